//! Import orchestrator - main workflow coordinator.
//!
//! A run executes the identify, import and link passes over the units of one
//! group. Every unit finishes a pass before the next unit starts it, and no
//! unit starts the next pass before every unit finished the current one.

pub mod progress;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, MappingStorage, DEFAULT_GROUP};
use crate::core::{LocalStore, RemoteSource, TypeCatalog};
use crate::drivers::{MysqlLocalStore, MysqlRemote};
use crate::error::{ImportError, Result};
use crate::helpers::build_helpers;
use crate::importer::{build_units, ImportContext, Importer, UnitReport};
use crate::mapping::{ColumnMappingStore, IdentityMap, MappingStore, MysqlMappingStore};
use progress::{LogProgress, ProgressSink};

/// One of the three passes of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pass {
    Identify,
    Import,
    Link,
}

impl Pass {
    /// Every pass in execution order.
    pub const ALL: [Pass; 3] = [Pass::Identify, Pass::Import, Pass::Link];

    pub fn as_str(&self) -> &'static str {
        match self {
            Pass::Identify => "identify",
            Pass::Import => "import",
            Pass::Link => "link",
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pass {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "identify" => Ok(Pass::Identify),
            "import" => Ok(Pass::Import),
            "link" => Ok(Pass::Link),
            other => Err(ImportError::Config(format!(
                "unknown pass '{}' (expected identify, import or link)",
                other
            ))),
        }
    }
}

/// Outcome of one unit over a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Per-unit summary of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSummary {
    /// Unit description.
    pub unit: String,

    /// Final status.
    pub status: UnitStatus,

    /// Counts per completed pass.
    pub passes: BTreeMap<Pass, UnitReport>,

    /// Counts over every completed pass.
    pub totals: UnitReport,

    /// Error that failed the unit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Time spent in this unit in seconds.
    pub duration_seconds: f64,
}

impl UnitSummary {
    fn new(unit: String) -> Self {
        Self {
            unit,
            status: UnitStatus::Completed,
            passes: BTreeMap::new(),
            totals: UnitReport::default(),
            error: None,
            duration_seconds: 0.0,
        }
    }
}

/// Result of an import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: completed, failed or cancelled.
    pub status: String,

    /// Group that was run.
    pub group: String,

    /// Passes that were requested.
    pub passes: Vec<Pass>,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Per-unit summaries in declared order.
    pub units: Vec<UnitSummary>,

    /// Counts over every unit.
    pub totals: UnitReport,

    /// Descriptions of failed units.
    pub failed_units: Vec<String>,
}

impl ImportResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Turn a failed or cancelled run into its error.
    pub fn ensure_success(&self) -> Result<()> {
        if self.status == "cancelled" {
            return Err(ImportError::Cancelled);
        }
        if !self.failed_units.is_empty() {
            return Err(ImportError::UnitsFailed {
                count: self.failed_units.len(),
                units: self.failed_units.clone(),
            });
        }
        Ok(())
    }
}

/// Result of a connection check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub remote_connected: bool,
    pub remote_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<String>,
    pub local_connected: bool,
    pub local_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_error: Option<String>,
    pub healthy: bool,
}

/// Import orchestrator.
pub struct Orchestrator {
    config: Config,
    catalog: Arc<TypeCatalog>,
    remote: Arc<dyn RemoteSource>,
    local: Arc<dyn LocalStore>,
    mappings: Arc<IdentityMap>,
    progress: Arc<dyn ProgressSink>,
}

impl Orchestrator {
    /// Connect to both databases described by the configuration.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(config.catalog()?);

        let remote = Arc::new(MysqlRemote::new(&config.remote).await?);
        let local = Arc::new(MysqlLocalStore::new(&config.local, catalog.clone()).await?);

        let store: Arc<dyn MappingStore> = match config.mapping.storage {
            MappingStorage::SideTable => Arc::new(MysqlMappingStore::new(
                local.pool(),
                config.mapping.table.clone(),
            )),
            MappingStorage::LegacyColumns => {
                Arc::new(ColumnMappingStore::new(remote.clone(), local.clone()))
            }
        };

        Self::with_backends(config, remote, local, store)
    }

    /// Build an orchestrator over explicit backends.
    pub fn with_backends(
        config: Config,
        remote: Arc<dyn RemoteSource>,
        local: Arc<dyn LocalStore>,
        store: Arc<dyn MappingStore>,
    ) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(config.catalog()?);
        let mappings = Arc::new(IdentityMap::new(
            store,
            catalog.clone(),
            config.mapping.conflicts,
        ));
        Ok(Self {
            config,
            catalog,
            remote,
            local,
            mappings,
            progress: Arc::new(LogProgress::new()),
        })
    }

    /// Replace the progress sink.
    pub fn with_progress_sink(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        &self.catalog
    }

    pub fn mappings(&self) -> &Arc<IdentityMap> {
        &self.mappings
    }

    pub fn remote(&self) -> &Arc<dyn RemoteSource> {
        &self.remote
    }

    pub fn local(&self) -> &Arc<dyn LocalStore> {
        &self.local
    }

    /// Shared handles for units and helpers.
    pub fn context(&self) -> ImportContext {
        ImportContext {
            remote: self.remote.clone(),
            local: self.local.clone(),
            mappings: self.mappings.clone(),
            catalog: self.catalog.clone(),
            progress: self.progress.clone(),
        }
    }

    /// Run a group and fail if any unit failed or the run was cancelled.
    pub async fn run(
        &self,
        group: Option<&str>,
        pass: Option<Pass>,
        cancel: CancellationToken,
    ) -> Result<ImportResult> {
        let result = self.execute(group, pass, cancel).await?;
        result.ensure_success()?;
        Ok(result)
    }

    /// Run a group and report the outcome of every unit.
    ///
    /// Only errors raised before the first unit runs, and bulk tool
    /// failures, are returned as errors.
    pub async fn execute(
        &self,
        group: Option<&str>,
        pass: Option<Pass>,
        cancel: CancellationToken,
    ) -> Result<ImportResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let group = group.unwrap_or(DEFAULT_GROUP).to_string();
        let passes: Vec<Pass> = match pass {
            Some(pass) => vec![pass],
            None => Pass::ALL.to_vec(),
        };

        info!("Starting import run {} for group '{}'", run_id, group);

        // Every unit is built before anything is written.
        self.config.validate()?;
        let units = self.config.group(&group)?;
        let ctx = self.context();
        let helpers = build_helpers(&self.config, &ctx)?;
        let importers = build_units(&self.config, units, &ctx, &helpers)?;

        let used: HashSet<&str> = units
            .iter()
            .flat_map(|u| u.helpers.iter().map(String::as_str))
            .collect();
        for name in used {
            if let Some(helper) = helpers.get(name) {
                helper.init().await?;
            }
        }

        let mut summaries: Vec<UnitSummary> = importers
            .iter()
            .map(|importer| UnitSummary::new(importer.describe()))
            .collect();

        for (importer, summary) in importers.iter().zip(summaries.iter_mut()) {
            let start = Instant::now();
            if let Err(e) = importer.check().await {
                error!("{}: {}", summary.unit, e);
                summary.status = UnitStatus::Failed;
                summary.error = Some(e.to_string());
            }
            importer.flush();
            summary.duration_seconds += start.elapsed().as_secs_f64();
        }

        let mut cancelled = false;
        'passes: for pass in &passes {
            info!("Pass: {}", pass);
            for (importer, summary) in importers.iter().zip(summaries.iter_mut()) {
                if cancel.is_cancelled() {
                    info!("Cancellation requested, stopping before {}", summary.unit);
                    cancelled = true;
                    break 'passes;
                }
                if summary.status == UnitStatus::Failed {
                    continue;
                }

                let start = Instant::now();
                let outcome = run_pass(importer.as_ref(), *pass).await;
                importer.flush();
                summary.duration_seconds += start.elapsed().as_secs_f64();

                match outcome {
                    Ok(report) => {
                        info!("{} {}: {}", summary.unit, pass, report.summary());
                        summary.totals.merge(&report);
                        summary.passes.insert(*pass, report);
                    }
                    Err(e @ ImportError::Bulk(_)) => {
                        error!("{} {}: {}", summary.unit, pass, e);
                        return Err(e);
                    }
                    Err(e) => {
                        error!("{} {} failed: {}", summary.unit, pass, e);
                        summary.status = UnitStatus::Failed;
                        summary.error = Some(e.to_string());
                    }
                }
            }
        }

        if cancelled {
            for summary in summaries.iter_mut() {
                if summary.status == UnitStatus::Completed
                    && passes.iter().any(|p| !summary.passes.contains_key(p))
                {
                    summary.status = UnitStatus::Cancelled;
                }
            }
        }

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let mut totals = UnitReport::default();
        for summary in &summaries {
            totals.merge(&summary.totals);
        }
        let failed_units: Vec<String> = summaries
            .iter()
            .filter(|s| s.status == UnitStatus::Failed)
            .map(|s| s.unit.clone())
            .collect();

        let status = if cancelled {
            "cancelled"
        } else if !failed_units.is_empty() {
            "failed"
        } else {
            "completed"
        };

        let result = ImportResult {
            run_id,
            status: status.to_string(),
            group,
            passes,
            started_at,
            completed_at,
            duration_seconds: duration,
            units: summaries,
            totals,
            failed_units,
        };

        info!(
            "Import {}: {} units in {:.1}s ({})",
            result.status,
            result.units.len(),
            result.duration_seconds,
            result.totals.summary()
        );
        if !result.failed_units.is_empty() {
            warn!("Failed units: {}", result.failed_units.join(", "));
        }

        Ok(result)
    }

    /// Test both database connections.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let start = Instant::now();
        let remote = self.remote.test_connection().await;
        let remote_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let local = self.local.test_connection().await;
        let local_latency_ms = start.elapsed().as_millis() as u64;

        let healthy = remote.is_ok() && local.is_ok();
        Ok(HealthCheckResult {
            remote_connected: remote.is_ok(),
            remote_latency_ms,
            remote_error: remote.err().map(|e| e.to_string()),
            local_connected: local.is_ok(),
            local_latency_ms,
            local_error: local.err().map(|e| e.to_string()),
            healthy,
        })
    }
}

async fn run_pass(importer: &dyn Importer, pass: Pass) -> Result<UnitReport> {
    match pass {
        Pass::Identify => importer.identify_pass().await,
        Pass::Import => importer.import_pass().await,
        Pass::Link => importer.link_pass().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Record;
    use crate::drivers::{MemoryLocalStore, MemoryRemote};
    use crate::mapping::MemoryMappingStore;
    use progress::NoProgress;

    const YAML: &str = r#"
remote: { host: legacy, database: old, user: u }
local: { host: localhost, database: new, user: u }
types:
  - name: Member
    tracked: true
    fields: { Email: varchar }
  - name: Note
    fields: { Body: text }
groups:
  tasks:
    - class: Note
      strategy: [Add]
    - class: Member
      strategy: [Identify, Add]
      idcolumns: [Email]
"#;

    fn orchestrator() -> (Orchestrator, Arc<MemoryLocalStore>) {
        let config = Config::from_yaml(YAML).unwrap();
        let catalog = Arc::new(config.catalog().unwrap());
        let remote = MemoryRemote::new().with_table(
            "Member",
            vec![
                Record::new().with("ID", 1).with("Email", "a@x"),
                Record::new().with("ID", 2).with("Email", "b@x"),
            ],
        );
        let local = Arc::new(MemoryLocalStore::new(catalog));
        let orchestrator = Orchestrator::with_backends(
            config,
            Arc::new(remote),
            local.clone(),
            Arc::new(MemoryMappingStore::new()),
        )
        .unwrap()
        .with_progress_sink(Arc::new(NoProgress));
        (orchestrator, local)
    }

    #[test]
    fn test_pass_from_str() {
        assert_eq!("Import".parse::<Pass>().unwrap(), Pass::Import);
        assert!("sync".parse::<Pass>().is_err());
    }

    #[tokio::test]
    async fn test_failed_unit_does_not_stop_others() {
        let (orchestrator, local) = orchestrator();
        let result = orchestrator
            .execute(None, None, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, "failed");
        assert_eq!(result.failed_units.len(), 1);
        assert!(result.failed_units[0].contains("Note"));
        assert_eq!(result.units[1].status, UnitStatus::Completed);
        assert_eq!(result.totals.added, 2);
        assert_eq!(local.records("Member").len(), 2);
        assert!(matches!(
            result.ensure_success(),
            Err(ImportError::UnitsFailed { count: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_single_pass() {
        let (orchestrator, local) = orchestrator();
        let result = orchestrator
            .execute(None, Some(Pass::Identify), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.passes, vec![Pass::Identify]);
        assert!(local.records("Member").is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_unit() {
        let (orchestrator, local) = orchestrator();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orchestrator.run(None, None, cancel).await.unwrap_err();
        assert!(matches!(err, ImportError::Cancelled));
        assert!(local.records("Member").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_group_is_config_error() {
        let (orchestrator, _) = orchestrator();
        let err = orchestrator
            .execute(Some("nope"), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Config(_)));
    }

    #[tokio::test]
    async fn test_result_json() {
        let (orchestrator, _) = orchestrator();
        let result = orchestrator
            .execute(None, None, CancellationToken::new())
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["group"], "tasks");
        assert_eq!(json["passes"][1], "import");
        assert_eq!(json["units"][0]["status"], "failed");
    }

    #[tokio::test]
    async fn test_health_check_memory() {
        let (orchestrator, _) = orchestrator();
        let health = orchestrator.health_check().await.unwrap();
        assert!(health.healthy);
    }
}
