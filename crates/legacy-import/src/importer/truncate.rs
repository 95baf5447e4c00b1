//! Destroy-and-replace importer.
//!
//! Every data table of the type is emptied and refilled from the remote rows
//! with their legacy ids preserved. Relation ids are copied verbatim. Tree
//! types are refused before anything is touched.

use async_trait::async_trait;
use tracing::{info, warn};

use super::copier::is_skipped_column;
use super::data_object::remote_query;
use super::{ImportContext, Importer, UnitReport};
use crate::config::{AssetsConfig, UnitConfig};
use crate::core::LocalRecord;
use crate::error::{ImportError, Result};
use crate::mapping::IdentityMap;

/// Replaces every local record of a type.
pub struct TruncateImporter {
    ctx: ImportContext,
    unit: UnitConfig,
    class: String,
    description: String,
}

impl TruncateImporter {
    pub fn new(ctx: ImportContext, unit: UnitConfig, assets: &AssetsConfig) -> Result<Self> {
        let class = unit.effective_class(assets).to_string();
        if class.is_empty() {
            return Err(ImportError::Config(format!(
                "missing class for {}",
                unit.describe(assets)
            )));
        }
        ctx.catalog.require(&class)?;
        let description = unit.describe(assets);
        Ok(Self {
            ctx,
            unit,
            class,
            description,
        })
    }

    fn guard(&self) -> Result<()> {
        if self.ctx.catalog.is_hierarchical(&self.class) {
            return Err(ImportError::Config(format!(
                "{}: refusing to truncate hierarchical type {}",
                self.description, self.class
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Importer for TruncateImporter {
    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn check(&self) -> Result<()> {
        self.guard()?;
        if !self.ctx.catalog.is_tracked(&self.class) {
            return Err(ImportError::precondition(
                &self.description,
                format!("{} does not carry legacy identity", self.class),
            ));
        }
        self.ctx
            .mappings
            .prepare(&self.class, self.unit.remote_table.as_deref())
            .await
    }

    async fn identify_pass(&self) -> Result<UnitReport> {
        info!("{}: skipping identify", self.description);
        Ok(UnitReport::default())
    }

    async fn import_pass(&self) -> Result<UnitReport> {
        self.guard()?;
        let mut report = UnitReport::default();

        let query = remote_query(&self.ctx, &self.unit, &self.class).await?;
        let rows = self.ctx.remote.select(&query).await?;
        let existing = self.ctx.local.count(&self.class).await?;
        info!(
            "{}: replacing {} records with {} ones",
            self.description,
            existing,
            rows.len()
        );

        let cleared = self.ctx.mappings.clear(&self.class).await?;
        if cleared > 0 {
            warn!("{}: dropped {} mappings", self.description, cleared);
        }

        let mut tables = self.ctx.catalog.data_tables_for(&self.class);
        if self.ctx.catalog.is_versioned(&self.class) {
            let live: Vec<String> = tables.iter().map(|t| format!("{}_Live", t)).collect();
            tables.extend(live);
        }
        for table in &tables {
            self.ctx.local.truncate(table).await?;
        }
        info!("{}: {} tables truncated", self.description, tables.len());

        self.ctx
            .progress
            .begin(&self.description, "import", rows.len() as u64);
        for (done, row) in rows.iter().enumerate() {
            self.ctx.progress.tick(done as u64 + 1);

            let class = self.ctx.catalog.resolve_class(&self.class, row.class_name());
            let mut local = LocalRecord::new(class);
            local.id = row.id();
            for (remote_column, value) in row.iter() {
                let column = self.unit.local_column(remote_column);
                if !is_skipped_column(remote_column) && !is_skipped_column(column) {
                    local.fields.set(column, value.clone());
                }
            }

            let id = self.ctx.local.insert(&mut local).await?;
            self.ctx
                .mappings
                .record(&self.class, id, row.id(), Some(IdentityMap::now()))
                .await?;
            report.added += 1;
        }
        self.ctx.progress.end();

        info!("{}: Result: {} added", self.description, report.added);
        Ok(report)
    }

    fn flush(&self) {
        self.ctx.mappings.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConflictPolicy;
    use crate::core::{Record, TypeCatalog, TypeDef};
    use crate::drivers::{MemoryLocalStore, MemoryRemote};
    use crate::importer::Strategy;
    use crate::mapping::MemoryMappingStore;
    use crate::orchestrator::progress::NoProgress;
    use std::sync::Arc;

    fn setup() -> (ImportContext, Arc<MemoryLocalStore>) {
        let catalog = Arc::new(
            TypeCatalog::from_defs(vec![
                TypeDef::new("SiteTree").tracked().hierarchical(),
                TypeDef::new("Tag").tracked().has_one("Owner", "Member"),
                TypeDef::new("SpecialTag").extends("Tag"),
                TypeDef::new("Member").tracked(),
            ])
            .unwrap(),
        );
        let remote = MemoryRemote::new()
            .with_table(
                "Tag",
                vec![
                    Record::new()
                        .with("ID", 40)
                        .with("ClassName", "SpecialTag")
                        .with("Title", "a")
                        .with("OwnerID", 42),
                    Record::new()
                        .with("ID", 41)
                        .with("ClassName", "Retired")
                        .with("Title", "b"),
                ],
            )
            .with_table("SiteTree", Vec::new());
        let local = Arc::new(MemoryLocalStore::new(catalog.clone()));
        let ctx = ImportContext {
            remote: Arc::new(remote),
            local: local.clone(),
            mappings: Arc::new(IdentityMap::new(
                Arc::new(MemoryMappingStore::new()),
                catalog.clone(),
                ConflictPolicy::Reject,
            )),
            catalog,
            progress: Arc::new(NoProgress),
        };
        (ctx, local)
    }

    fn unit(class: &str) -> UnitConfig {
        UnitConfig {
            class: class.into(),
            strategy: vec![Strategy::Truncate],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_replaces_with_preserved_ids() {
        let (ctx, local) = setup();
        let mut old = LocalRecord::new("Tag");
        old.fields.set("Title", "old");
        local.seed(old).unwrap();
        ctx.mappings.record("Tag", 1, 99, None).await.unwrap();

        let importer = TruncateImporter::new(ctx.clone(), unit("Tag"), &AssetsConfig::default())
            .unwrap();
        let report = importer.import_pass().await.unwrap();
        assert_eq!(report.added, 2);

        let records = local.records("Tag");
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![40, 41]);
        assert_eq!(records[0].class_name, "SpecialTag");
        assert_eq!(records[1].class_name, "Tag");
        // relation ids are not remapped
        assert_eq!(records[0].fields.get_i64("OwnerID"), 42);

        assert_eq!(ctx.mappings.find_local("Tag", 40).await.unwrap(), Some(40));
        assert_eq!(ctx.mappings.find_local("Tag", 99).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refuses_hierarchical_before_touching_anything() {
        let (ctx, local) = setup();
        let mut page = LocalRecord::new("SiteTree");
        page.fields.set("Title", "Home");
        local.seed(page).unwrap();
        ctx.mappings.record("SiteTree", 1, 1, None).await.unwrap();

        let importer =
            TruncateImporter::new(ctx.clone(), unit("SiteTree"), &AssetsConfig::default())
                .unwrap();
        assert!(matches!(
            importer.check().await.unwrap_err(),
            ImportError::Config(_)
        ));
        assert!(matches!(
            importer.import_pass().await.unwrap_err(),
            ImportError::Config(_)
        ));

        assert_eq!(local.records("SiteTree").len(), 1);
        assert!(local.executed().is_empty());
        assert_eq!(ctx.mappings.find_local("SiteTree", 1).await.unwrap(), Some(1));
    }
}
