//! File and folder importer.
//!
//! File records are identified by `Filename`. Copying the files themselves
//! happens either up front through a configured preload command (for example
//! an rsync of the legacy assets directory) or on demand, when the asset
//! linker meets a referenced file.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

use super::data_object::DataObjectImporter;
use super::{ImportContext, Importer, Selection, UnitReport};
use crate::config::{AssetsConfig, UnitConfig};
use crate::error::{ImportError, Result};
use crate::helpers::Helper;

/// Imports file records of the configured file type.
pub struct AssetImporter {
    inner: DataObjectImporter,
    preload: Option<String>,
}

impl AssetImporter {
    pub fn new(
        ctx: ImportContext,
        unit: UnitConfig,
        assets: &AssetsConfig,
        helpers: Vec<Arc<dyn Helper>>,
    ) -> Result<Self> {
        let preload = unit
            .preload_command
            .clone()
            .filter(|command| !command.trim().is_empty());
        Ok(Self {
            inner: DataObjectImporter::new(ctx, unit, assets, helpers)?,
            preload,
        })
    }

    async fn run_preload(&self, command: &str) -> Result<()> {
        info!("{}: Beginning asset synchronisation", self.describe());
        debug!("running {}", command);
        let output = Command::new("sh").arg("-c").arg(command).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ImportError::Bulk(format!(
                "asset synchronisation failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }
        info!("{}: Asset synchronisation complete", self.describe());
        Ok(())
    }
}

#[async_trait]
impl Importer for AssetImporter {
    fn describe(&self) -> String {
        self.inner.describe()
    }

    async fn check(&self) -> Result<()> {
        self.inner.check().await
    }

    async fn identify_pass(&self) -> Result<UnitReport> {
        self.inner.identify_pass().await
    }

    async fn import_pass(&self) -> Result<UnitReport> {
        if let Some(command) = &self.preload {
            self.run_preload(command).await?;
        }
        if self.inner.strategy.selection() == Selection::Nothing {
            info!("{}: Skipping import step for ondemand strategy", self.describe());
            return Ok(UnitReport::default());
        }
        self.inner.import_pass().await
    }

    async fn link_pass(&self) -> Result<UnitReport> {
        self.inner.link_relations().await
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConflictPolicy, ImporterKind};
    use crate::core::{LocalRecord, Record, TypeCatalog, TypeDef};
    use crate::drivers::{MemoryLocalStore, MemoryRemote};
    use crate::importer::Strategy;
    use crate::mapping::{IdentityMap, MemoryMappingStore};
    use crate::orchestrator::progress::NoProgress;

    fn setup() -> (ImportContext, Arc<MemoryLocalStore>) {
        let catalog = Arc::new(
            TypeCatalog::from_defs(vec![
                TypeDef::new("File").tracked(),
                TypeDef::new("Image").extends("File"),
            ])
            .unwrap(),
        );
        let remote = MemoryRemote::new().with_table(
            "File",
            vec![
                Record::new()
                    .with("ID", 8)
                    .with("ClassName", "Image")
                    .with("Name", "logo.png")
                    .with("Filename", "assets/logo.png"),
                Record::new()
                    .with("ID", 9)
                    .with("ClassName", "File")
                    .with("Name", "new.pdf")
                    .with("Filename", "assets/new.pdf"),
            ],
        );
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

    fn unit(strategy: Vec<Strategy>, preload: Option<&str>) -> UnitConfig {
        UnitConfig {
            importer: ImporterKind::Assets,
            strategy,
            preload_command: preload.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_identifies_by_filename() {
        let (ctx, local) = setup();
        let mut logo = LocalRecord::new("Image");
        logo.fields.set("Filename", "assets/logo.png");
        let logo = local.seed(logo).unwrap();

        let importer = AssetImporter::new(
            ctx.clone(),
            unit(vec![Strategy::Identify], None),
            &AssetsConfig::default(),
            Vec::new(),
        )
        .unwrap();
        let report = importer.identify_pass().await.unwrap();
        assert_eq!(report.identified, 1);
        assert_eq!(ctx.mappings.find_remote("File", logo).await.unwrap(), Some(8));
    }

    #[tokio::test]
    async fn test_ondemand_skips_import() {
        let (ctx, local) = setup();
        let importer = AssetImporter::new(
            ctx,
            unit(vec![Strategy::Identify], None),
            &AssetsConfig::default(),
            Vec::new(),
        )
        .unwrap();
        assert_eq!(importer.import_pass().await.unwrap(), UnitReport::default());
        assert!(local.records("File").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_preload_runs_before_import() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("synced");
        let command = format!("touch {}", marker.display());
        let (ctx, local) = setup();
        let importer = AssetImporter::new(
            ctx,
            unit(vec![Strategy::Add], Some(&command)),
            &AssetsConfig::default(),
            Vec::new(),
        )
        .unwrap();

        let report = importer.import_pass().await.unwrap();
        assert!(marker.exists());
        assert_eq!(report.added, 2);
        assert_eq!(local.records("Image").len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_preload_is_bulk_error() {
        let (ctx, _) = setup();
        let importer = AssetImporter::new(
            ctx,
            unit(vec![Strategy::Add], Some("exit 3")),
            &AssetsConfig::default(),
            Vec::new(),
        )
        .unwrap();
        assert!(matches!(
            importer.import_pass().await.unwrap_err(),
            ImportError::Bulk(_)
        ));
    }
}
