//! legacy-import CLI - reconcile legacy CMS content into a new database.

use clap::{Parser, Subcommand};
use legacy_import::{
    bulk_import, BulkOptions, Config, ImportError, JsonProgress, KeepRelations, Orchestrator,
    Pass, DEFAULT_GROUP,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "legacy-import")]
#[command(about = "Three-pass reconciliation of legacy CMS content")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "import.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: trace, debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    /// Timeout in seconds for graceful shutdown (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the import passes over a group of units
    Run {
        /// Group of units to run
        #[arg(long, default_value = DEFAULT_GROUP)]
        group: String,

        /// Run a single pass: identify, import or link
        #[arg(long)]
        pass: Option<Pass>,
    },

    /// Show the units of a group without connecting
    Describe {
        /// Group of units to describe
        #[arg(long, default_value = DEFAULT_GROUP)]
        group: String,
    },

    /// Copy whole tables with mysqldump and map their rows to themselves
    Bulk {
        /// Comma separated table names
        #[arg(long, value_delimiter = ',', required = true)]
        tables: Vec<String>,

        /// Relation columns to keep: true, false, or a comma separated list of <Relation>ID
        #[arg(long, default_value = "false")]
        keep_relations: KeepRelations,
    },

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), ImportError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Describe { group } => {
            let plan = config.describe_group(&group)?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!("Group '{}':", group);
                for (index, unit) in plan.iter().enumerate() {
                    println!("  {}. {}", index + 1, unit);
                }
            }
        }

        Commands::Run { group, pass } => {
            let cancel_token = setup_signal_handler(cli.shutdown_timeout).await?;
            let mut orchestrator = Orchestrator::new(config).await?;
            if cli.progress {
                orchestrator = orchestrator.with_progress_sink(Arc::new(JsonProgress::new()));
            }

            let result = orchestrator
                .execute(Some(&group), pass, cancel_token)
                .await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nImport {}!", result.status);
                println!("  Run ID: {}", result.run_id);
                println!("  Group: {}", result.group);
                println!("  Duration: {:.2}s", result.duration_seconds);
                for unit in &result.units {
                    println!("  {:?}: {}", unit.status, unit.unit);
                    println!("    {}", unit.totals.summary());
                }
                if !result.failed_units.is_empty() {
                    println!("  Failed units: {:?}", result.failed_units);
                }
            }
            result.ensure_success()?;
        }

        Commands::Bulk {
            tables,
            keep_relations,
        } => {
            let orchestrator = Orchestrator::new(config).await?;
            let mut options = BulkOptions::new(tables);
            options.keep_relations = keep_relations;

            let report =
                bulk_import(orchestrator.config(), &orchestrator.context(), &options).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("\nBulk import completed!");
                println!("  Tables: {}", report.tables.join(", "));
                for (table, count) in &report.mapped {
                    println!("  {}: {} records mapped", table, count);
                }
                if !report.relations_reset.is_empty() {
                    println!("  Relations reset: {}", report.relations_reset.join(", "));
                }
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Remote: {} ({}ms)",
                    if result.remote_connected { "OK" } else { "FAILED" },
                    result.remote_latency_ms
                );
                if let Some(ref err) = result.remote_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Local: {} ({}ms)",
                    if result.local_connected { "OK" } else { "FAILED" },
                    result.local_latency_ms
                );
                if let Some(ref err) = result.local_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(ImportError::Config("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Cancellation is observed between units, so the current unit pass finishes first.
#[cfg(unix)]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, ImportError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "\nReceived {}. Finishing the current unit (timeout: {}s)...",
            name, shutdown_timeout
        );
        token.cancel();
        tokio::time::sleep(std::time::Duration::from_secs(shutdown_timeout)).await;
        eprintln!("Shutdown timeout reached, exiting");
        std::process::exit(i32::from(legacy_import::error::EXIT_CANCELLED));
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler(_shutdown_timeout: u64) -> Result<CancellationToken, ImportError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing the current unit...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
