//! Import units and their three passes.
//!
//! Every configured unit becomes one [`Importer`]. The orchestrator calls
//! `identify_pass`, `import_pass` and `link_pass` on every unit in declared
//! order, then `flush` after each unit pass.
//!
//! | Importer             | identify             | import                     | link                    |
//! |----------------------|----------------------|----------------------------|-------------------------|
//! | [`DataObjectImporter`] | flat natural key     | add/update + helpers       | re-resolve relations    |
//! | [`HierarchyImporter`]  | depth-first by parent| as data object             | as data object          |
//! | [`RelationImporter`]   | -                    | add join rows              | -                       |
//! | [`TruncateImporter`]   | -                    | destroy and reinsert       | -                       |
//! | [`AssetImporter`]      | by `Filename`        | preload command or on demand | as data object        |

pub mod assets;
pub mod copier;
pub mod data_object;
pub mod hierarchy;
pub mod relation;
pub mod strategy;
pub mod truncate;

pub use assets::AssetImporter;
pub use data_object::DataObjectImporter;
pub use hierarchy::HierarchyImporter;
pub use relation::RelationImporter;
pub use strategy::{Selection, Strategy, StrategySet};
pub use truncate::TruncateImporter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::config::{Config, ImporterKind, UnitConfig};
use crate::core::{LocalStore, RemoteSource, TypeCatalog};
use crate::error::{ImportError, Result};
use crate::helpers::Helper;
use crate::mapping::IdentityMap;
use crate::orchestrator::progress::ProgressSink;

/// Shared handles every unit and helper is built from.
#[derive(Clone)]
pub struct ImportContext {
    pub remote: Arc<dyn RemoteSource>,
    pub local: Arc<dyn LocalStore>,
    pub mappings: Arc<IdentityMap>,
    pub catalog: Arc<TypeCatalog>,
    pub progress: Arc<dyn ProgressSink>,
}

/// Counts produced by one pass of one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReport {
    /// Pairs found by natural key.
    pub identified: u64,
    /// Local records created.
    pub added: u64,
    /// Local records re-synced.
    pub updated: u64,
    /// Relations fixed up after import.
    pub linked: u64,
    /// Rows left for a later run.
    pub skipped: u64,
    /// Mappings refused by the conflict policy.
    pub conflicts: u64,
    /// Relation fields left at zero.
    pub unresolved: u64,
    /// Files that could not be fetched or linked.
    pub assets_failed: u64,
}

impl UnitReport {
    /// Add another report's counts to this one.
    pub fn merge(&mut self, other: &UnitReport) {
        self.identified += other.identified;
        self.added += other.added;
        self.updated += other.updated;
        self.linked += other.linked;
        self.skipped += other.skipped;
        self.conflicts += other.conflicts;
        self.unresolved += other.unresolved;
        self.assets_failed += other.assets_failed;
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "identified {}, added {}, updated {}, linked {}, skipped {}, conflicts {}, unresolved {}, assets failed {}",
            self.identified,
            self.added,
            self.updated,
            self.linked,
            self.skipped,
            self.conflicts,
            self.unresolved,
            self.assets_failed
        )
    }
}

/// One configured migration rule.
#[async_trait]
pub trait Importer: Send + Sync {
    /// Human-readable identification (type and strategy).
    fn describe(&self) -> String;

    /// Check that the unit can run; failures disable the unit for the run.
    async fn check(&self) -> Result<()>;

    /// Pair existing local records with remote rows.
    async fn identify_pass(&self) -> Result<UnitReport>;

    /// Add and update local records.
    async fn import_pass(&self) -> Result<UnitReport>;

    /// Fix relations that could not be resolved during import.
    async fn link_pass(&self) -> Result<UnitReport> {
        Ok(UnitReport::default())
    }

    /// Drop per-pass caches.
    fn flush(&self);
}

/// Count a refused mapping instead of failing the pass.
///
/// Returns true when the mapping was written.
pub(crate) fn absorb_conflict(result: Result<()>, report: &mut UnitReport) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(err @ ImportError::MappingConflict { .. }) => {
            warn!("{}", err);
            report.conflicts += 1;
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Build the importers of a group in declared order.
pub fn build_units(
    config: &Config,
    units: &[UnitConfig],
    ctx: &ImportContext,
    helpers: &HashMap<String, Arc<dyn Helper>>,
) -> Result<Vec<Box<dyn Importer>>> {
    units
        .iter()
        .map(|unit| build_unit(config, unit, ctx, helpers))
        .collect()
}

fn build_unit(
    config: &Config,
    unit: &UnitConfig,
    ctx: &ImportContext,
    helpers: &HashMap<String, Arc<dyn Helper>>,
) -> Result<Box<dyn Importer>> {
    let unit_helpers = unit
        .helpers
        .iter()
        .map(|name| {
            helpers
                .get(name)
                .cloned()
                .ok_or_else(|| ImportError::Config(format!("unknown helper '{}'", name)))
        })
        .collect::<Result<Vec<_>>>()?;

    let importer: Box<dyn Importer> = match unit.effective_kind() {
        ImporterKind::DataObject => Box::new(DataObjectImporter::new(
            ctx.clone(),
            unit.clone(),
            &config.assets,
            unit_helpers,
        )?),
        ImporterKind::Hierarchy => Box::new(HierarchyImporter::new(
            ctx.clone(),
            unit.clone(),
            &config.assets,
            unit_helpers,
        )?),
        ImporterKind::Relation => Box::new(RelationImporter::new(ctx.clone(), unit.clone())?),
        ImporterKind::Truncate => Box::new(TruncateImporter::new(
            ctx.clone(),
            unit.clone(),
            &config.assets,
        )?),
        ImporterKind::Assets => Box::new(AssetImporter::new(
            ctx.clone(),
            unit.clone(),
            &config.assets,
            unit_helpers,
        )?),
    };
    Ok(importer)
}
