//! Tree importer for types whose records nest through `ParentID`.
//!
//! With `ParentID` among the id columns, identification walks the local tree
//! from the root and only matches a local child against the remote children
//! of its already matched parent. An unmatched parent prunes its subtree for
//! the pass. Without `ParentID` the flat strategy is used.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use super::data_object::{local_key, remote_key, DataObjectImporter};
use super::{absorb_conflict, ImportContext, Importer, UnitReport};
use crate::config::{AssetsConfig, UnitConfig};
use crate::core::{LocalRecord, RemoteRecord};
use crate::error::{ImportError, Result};
use crate::helpers::Helper;

const PARENT: &str = "Parent";
const PARENT_ID: &str = "ParentID";

/// Imports a tree-structured type.
pub struct HierarchyImporter {
    inner: DataObjectImporter,
}

impl HierarchyImporter {
    pub fn new(
        ctx: ImportContext,
        mut unit: UnitConfig,
        assets: &AssetsConfig,
        helpers: Vec<Arc<dyn Helper>>,
    ) -> Result<Self> {
        let class = unit.effective_class(assets).to_string();
        if ctx.catalog.relation_type(&class, PARENT).is_none()
            && !unit.relations.contains_key(PARENT)
        {
            let base = ctx.catalog.base_type(&class).to_string();
            unit.relations.insert(PARENT.to_string(), base);
        }
        Ok(Self {
            inner: DataObjectImporter::new(ctx, unit, assets, helpers)?,
        })
    }

    async fn identify_depth_first(&self) -> Result<UnitReport> {
        let inner = &self.inner;
        let ctx = &inner.ctx;
        let mut report = UnitReport::default();

        let rows = inner.remote_rows().await?;
        let mapped = ctx.mappings.snapshot(&inner.class).await?;
        let before = rows.iter().filter(|r| !mapped.contains_key(&r.id())).count() as u64;
        if before == 0 {
            info!("{}: all remote objects identified, skipping", inner.describe());
            return Ok(report);
        }

        let mut matched: HashMap<i64, i64> =
            mapped.values().map(|m| (m.local_id, m.remote_id)).collect();
        let mut consumed: HashSet<i64> = mapped.keys().copied().collect();

        let parent_column = inner.unit.remote_column(PARENT_ID);
        let mut remote_children: HashMap<i64, Vec<&RemoteRecord>> = HashMap::new();
        for row in rows.iter() {
            remote_children
                .entry(row.get_i64(parent_column))
                .or_default()
                .push(row);
        }

        let locals = ctx.local.find(&inner.class, &[]).await?;
        let mut local_children: HashMap<i64, Vec<&LocalRecord>> = HashMap::new();
        for local in &locals {
            local_children
                .entry(local.fields.get_i64(PARENT_ID))
                .or_default()
                .push(local);
        }

        let key_columns: Vec<String> = inner
            .idcolumns
            .iter()
            .filter(|c| c.as_str() != PARENT_ID)
            .cloned()
            .collect();

        info!(
            "{}: performing depth first search via {}",
            inner.describe(),
            PARENT_ID
        );
        ctx.progress
            .begin(&inner.describe(), "identify", locals.len() as u64);

        let mut visited = HashSet::new();
        let mut stack: Vec<(i64, Option<i64>)> = vec![(0, Some(0))];
        while let Some((local_parent, remote_parent)) = stack.pop() {
            let Some(children) = local_children.get(&local_parent) else {
                continue;
            };

            let mut next = Vec::with_capacity(children.len());
            for local in children {
                if !visited.insert(local.id) {
                    continue;
                }
                ctx.progress.tick(visited.len() as u64);

                let mut remote_id = matched.get(&local.id).copied();
                if let (None, Some(remote_parent)) = (remote_id, remote_parent) {
                    let candidate = local_key(local, &key_columns).and_then(|key| {
                        remote_children.get(&remote_parent).and_then(|siblings| {
                            siblings
                                .iter()
                                .filter(|r| !consumed.contains(&r.id()))
                                .find(|r| {
                                    remote_key(&inner.unit, r, &key_columns).as_ref()
                                        == Some(&key)
                                })
                                .map(|r| r.id())
                        })
                    });

                    if let Some(candidate) = candidate {
                        let result = ctx
                            .mappings
                            .record(&inner.class, local.id, candidate, None)
                            .await;
                        if absorb_conflict(result, &mut report)? {
                            debug!("Identified {} as remote #{}", local.label(), candidate);
                            consumed.insert(candidate);
                            matched.insert(local.id, candidate);
                            report.identified += 1;
                            remote_id = Some(candidate);
                        }
                    }
                }
                next.push((local.id, remote_id));
            }
            stack.extend(next.into_iter().rev());
        }
        ctx.progress.end();

        info!(
            "{}: Result: {} unmatched objects reduced to {}",
            inner.describe(),
            before,
            before - report.identified
        );
        Ok(report)
    }
}

#[async_trait]
impl Importer for HierarchyImporter {
    fn describe(&self) -> String {
        self.inner.describe()
    }

    async fn check(&self) -> Result<()> {
        if !self.inner.ctx.catalog.is_hierarchical(self.inner.class()) {
            return Err(ImportError::precondition(
                self.describe(),
                format!("{} is not hierarchical", self.inner.class()),
            ));
        }
        self.inner.check().await
    }

    async fn identify_pass(&self) -> Result<UnitReport> {
        let uses_parent = self.inner.idcolumns.iter().any(|c| c == PARENT_ID);
        if !self.inner.strategy.identify || !uses_parent {
            return self.inner.identify_pass().await;
        }
        self.identify_depth_first().await
    }

    async fn import_pass(&self) -> Result<UnitReport> {
        self.inner.import_pass().await
    }

    async fn link_pass(&self) -> Result<UnitReport> {
        self.inner.link_relations().await
    }

    fn flush(&self) {
        self.inner.flush();
    }
}
