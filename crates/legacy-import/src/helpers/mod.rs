//! Per-record helpers run after the field copy.
//!
//! A helper receives the fully copied local record and its remote row and
//! may mutate the local record before its single save. Helpers run in the
//! order a unit lists them and must not assume any other helper ran.

pub mod asset_linker;

pub use asset_linker::AssetLinker;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Config, HelperKind};
use crate::core::{LocalRecord, RemoteRecord};
use crate::error::Result;
use crate::importer::{ImportContext, UnitReport};

/// A post-copy hook applied to every synced record of a unit.
#[async_trait]
pub trait Helper: Send + Sync {
    /// Configured name of this helper.
    fn name(&self) -> &str;

    /// Provision whatever the helper needs before the first record.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Update the local record from its remote row.
    async fn update_local_object(
        &self,
        local: &mut LocalRecord,
        remote: &RemoteRecord,
    ) -> Result<UnitReport>;
}

/// Build every configured helper by name.
pub fn build_helpers(
    config: &Config,
    ctx: &ImportContext,
) -> Result<HashMap<String, Arc<dyn Helper>>> {
    let mut helpers: HashMap<String, Arc<dyn Helper>> = HashMap::new();
    for (name, helper) in &config.helpers {
        let built: Arc<dyn Helper> = match helper.kind {
            HelperKind::AssetLinker => Arc::new(AssetLinker::new(
                name,
                ctx.clone(),
                config.assets.clone(),
                helper,
            )?),
        };
        helpers.insert(name.clone(), built);
    }
    Ok(helpers)
}
