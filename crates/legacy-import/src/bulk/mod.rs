//! Bulk table import through the MySQL client tools.
//!
//! Named tables are dumped from the legacy database with `mysqldump` into a
//! temporary file and loaded into the local database with `mysql`. Relation
//! columns of the copied tables are then reset to 0 (unless kept) because
//! their values still point at legacy ids, and every copied row of a base
//! table is mapped to itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{Config, DatabaseConfig};
use crate::core::SelectQuery;
use crate::drivers::mysql::quote_ident;
use crate::error::{ImportError, Result};
use crate::importer::ImportContext;
use crate::mapping::IdentityMap;

/// Which relation columns survive a bulk copy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeepRelations {
    /// Keep every relation column as copied.
    All,
    /// Reset every relation column to 0.
    #[default]
    None,
    /// Keep only the named `<Relation>ID` columns.
    Only(Vec<String>),
}

impl KeepRelations {
    /// Check whether a relation column keeps its copied value.
    pub fn keeps(&self, column: &str) -> bool {
        match self {
            KeepRelations::All => true,
            KeepRelations::None => false,
            KeepRelations::Only(columns) => columns.iter().any(|c| c == column),
        }
    }
}

impl FromStr for KeepRelations {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "true" | "all" => Ok(KeepRelations::All),
            "" | "false" | "0" | "none" => Ok(KeepRelations::None),
            list => Ok(KeepRelations::Only(
                list.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
        }
    }
}

/// Options of a bulk import.
#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Tables to copy.
    pub tables: Vec<String>,

    /// Relation columns to keep.
    pub keep_relations: KeepRelations,

    /// Dump program (default: `mysqldump`).
    pub dump_program: String,

    /// Load program (default: `mysql`).
    pub load_program: String,

    /// Directory for the dump file (default: system temp dir).
    pub temp_dir: Option<PathBuf>,
}

impl BulkOptions {
    pub fn new(tables: Vec<String>) -> Self {
        Self {
            tables,
            keep_relations: KeepRelations::None,
            dump_program: "mysqldump".into(),
            load_program: "mysql".into(),
            temp_dir: None,
        }
    }
}

/// Outcome of a bulk import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkReport {
    /// Tables copied.
    pub tables: Vec<String>,

    /// `<table>.<column>` relation columns reset to 0.
    pub relations_reset: Vec<String>,

    /// `<table>.<column>` relation columns kept.
    pub relations_kept: Vec<String>,

    /// Identity mappings written per table.
    pub mapped: BTreeMap<String, u64>,
}

impl BulkReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Copy tables from the legacy database and map their rows to themselves.
pub async fn bulk_import(
    config: &Config,
    ctx: &ImportContext,
    options: &BulkOptions,
) -> Result<BulkReport> {
    if options.tables.is_empty() {
        return Err(ImportError::Config("no tables specified".into()));
    }
    for table in &options.tables {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ImportError::Config(format!("invalid table name '{}'", table)));
        }
    }

    info!("== Importing bulk data ==");
    let dir = options.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
    let dump = dir.join(format!("legacy-import-mysqldump-{}.sql", uuid::Uuid::new_v4()));

    let copied = copy_tables(config, options, &dump).await;
    if let Err(e) = tokio::fs::remove_file(&dump).await {
        debug!("could not remove {}: {}", dump.display(), e);
    }
    copied?;

    let mut report = BulkReport {
        tables: options.tables.clone(),
        ..Default::default()
    };
    reset_relations(ctx, options, &mut report).await?;
    map_rows(ctx, options, &mut report).await?;

    info!("Done!");
    Ok(report)
}

async fn copy_tables(config: &Config, options: &BulkOptions, dump: &Path) -> Result<()> {
    info!(" * Exporting tables with {}", options.dump_program);
    let file = std::fs::File::create(dump)?;
    let mut args = config.remote.client_args();
    args.push(config.remote.database.clone());
    args.extend(options.tables.iter().cloned());
    run_tool(
        &options.dump_program,
        &args,
        &config.remote.password,
        Stdio::null(),
        Stdio::from(file),
    )
    .await?;

    info!(" * Importing tables with {}", options.load_program);
    let file = std::fs::File::open(dump)?;
    run_tool(
        &options.load_program,
        &load_args(&config.local),
        &config.local.password,
        Stdio::from(file),
        Stdio::null(),
    )
    .await
}

fn load_args(db: &DatabaseConfig) -> Vec<String> {
    let mut args = db.client_args();
    args.push("-D".into());
    args.push(db.database.clone());
    args
}

async fn run_tool(
    program: &str,
    args: &[String],
    password: &str,
    stdin: Stdio,
    stdout: Stdio,
) -> Result<()> {
    let mut command = Command::new(program);
    command.args(args);
    if !password.is_empty() {
        command.env("MYSQL_PWD", password);
    }
    let child = command
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ImportError::Bulk(format!("could not invoke {}: {}", program, e)))?;
    let output = child.wait_with_output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ImportError::Bulk(format!(
            "{} failed ({}): {}",
            program,
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

async fn reset_relations(
    ctx: &ImportContext,
    options: &BulkOptions,
    report: &mut BulkReport,
) -> Result<()> {
    if options.keep_relations == KeepRelations::All {
        info!("Keeping relations; not resetting relation ids to zero");
        return Ok(());
    }

    info!("Invalidating has_one fields");
    for table in &options.tables {
        let Some(def) = ctx.catalog.get(table) else {
            continue;
        };
        for relation in def.has_one.keys() {
            let column = format!("{}ID", relation);
            let label = format!("{}.{}", table, column);
            if options.keep_relations.keeps(&column) {
                info!(" * Keeping relation {}", label);
                report.relations_kept.push(label);
                continue;
            }
            info!(" * Resetting relation {} to zero", label);
            ctx.local
                .execute(&format!(
                    "UPDATE {} SET {} = 0",
                    quote_ident(table),
                    quote_ident(&column)
                ))
                .await?;
            report.relations_reset.push(label);
        }
    }
    Ok(())
}

async fn map_rows(ctx: &ImportContext, options: &BulkOptions, report: &mut BulkReport) -> Result<()> {
    info!("== Marking records as migrated ==");
    let now = IdentityMap::now();
    for table in &options.tables {
        if ctx.catalog.contains(table) && ctx.catalog.base_type(table) != table {
            debug!("{} is not a base table, not mapped", table);
            continue;
        }

        ctx.mappings.prepare(table, None).await?;
        let cleared = ctx.mappings.clear(table).await?;
        if cleared > 0 {
            warn!("{}: replaced {} existing mappings", table, cleared);
        }

        let rows = ctx
            .remote
            .select(&SelectQuery::from(table.clone()).columns(["ID"]).order_by("ID"))
            .await?;
        for row in &rows {
            ctx.mappings.record(table, row.id(), row.id(), Some(now)).await?;
        }
        ctx.mappings.flush();
        info!(" * {}: {} records mapped", table, rows.len());
        report.mapped.insert(table.clone(), rows.len() as u64);
    }
    Ok(())
}
