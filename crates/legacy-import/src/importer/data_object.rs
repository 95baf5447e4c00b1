//! Flat data object importer.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::copier::{copy_fields, is_skipped_column, relation_name};
use super::strategy::select_rows;
use super::{absorb_conflict, ImportContext, Importer, Selection, StrategySet, UnitReport};
use crate::config::{AssetsConfig, UnitConfig};
use crate::core::{lock, Condition, LocalRecord, RemoteRecord, SelectQuery, Value};
use crate::error::{ImportError, Result};
use crate::helpers::Helper;
use crate::mapping::{IdentityMap, RelationResolution};

/// Select over the remote tables of `class`.
///
/// Reads the base table, left-joins every other data table that exists on
/// the remote side, restricts to subtypes of `class` and applies the unit's
/// filters. A configured `remote_table` replaces all of this.
pub(crate) async fn remote_query(
    ctx: &ImportContext,
    unit: &UnitConfig,
    class: &str,
) -> Result<SelectQuery> {
    if let Some(table) = &unit.remote_table {
        return Ok(SelectQuery::from(table.clone())
            .filters(unit.conditions())
            .order_by("ID"));
    }

    let base = ctx.catalog.base_type(class).to_string();
    let mut query = SelectQuery::from(base.clone());
    for table in ctx.catalog.data_tables_for(class) {
        if table == base {
            continue;
        }
        if ctx.remote.field_list(&table).await?.is_empty() {
            debug!("No remote table {}, not joined", table);
            continue;
        }
        query = query.join_on_id(table);
    }
    if class != base {
        let classes = ctx
            .catalog
            .descendants(class)
            .into_iter()
            .map(Value::from)
            .collect();
        query = query.filter(Condition::In(format!("{}.ClassName", base), classes));
    }
    Ok(query.filters(unit.conditions()).order_by("ID"))
}

/// Natural key of a local record; `None` if any key column is null.
pub(crate) fn local_key(local: &LocalRecord, columns: &[String]) -> Option<Vec<String>> {
    columns
        .iter()
        .map(|column| local.field(column).and_then(|v| v.key_string()))
        .collect()
}

/// Natural key of a remote row, reading renamed columns where mapped.
pub(crate) fn remote_key(
    unit: &UnitConfig,
    row: &RemoteRecord,
    columns: &[String],
) -> Option<Vec<String>> {
    columns
        .iter()
        .map(|column| {
            row.get(unit.remote_column(column))
                .and_then(Value::key_string)
        })
        .collect()
}

/// Imports one content type by natural key.
pub struct DataObjectImporter {
    pub(crate) ctx: ImportContext,
    pub(crate) unit: UnitConfig,
    pub(crate) class: String,
    pub(crate) strategy: StrategySet,
    pub(crate) idcolumns: Vec<String>,
    helpers: Vec<Arc<dyn Helper>>,
    description: String,
    rows: Mutex<Option<Arc<Vec<RemoteRecord>>>>,
    published: Mutex<Option<Arc<HashSet<i64>>>>,
}

impl DataObjectImporter {
    pub fn new(
        ctx: ImportContext,
        unit: UnitConfig,
        assets: &AssetsConfig,
        helpers: Vec<Arc<dyn Helper>>,
    ) -> Result<Self> {
        let class = unit.effective_class(assets).to_string();
        if class.is_empty() {
            return Err(ImportError::Config(format!(
                "missing class for {}",
                unit.describe(assets)
            )));
        }
        ctx.catalog.require(&class)?;
        let strategy = StrategySet::from_list(&unit.effective_strategy())?;
        let idcolumns = unit.effective_idcolumns();
        let description = unit.describe(assets);

        Ok(Self {
            ctx,
            unit,
            class,
            strategy,
            idcolumns,
            helpers,
            description,
            rows: Mutex::new(None),
            published: Mutex::new(None),
        })
    }

    /// Target content type.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Remote table holding the base rows.
    pub(crate) fn remote_base(&self) -> String {
        self.unit
            .remote_table
            .clone()
            .unwrap_or_else(|| self.ctx.catalog.base_type(&self.class).to_string())
    }

    /// Remote rows of this unit, fetched once per pass.
    pub(crate) async fn remote_rows(&self) -> Result<Arc<Vec<RemoteRecord>>> {
        let cached = lock(&self.rows).clone();
        if let Some(rows) = cached {
            return Ok(rows);
        }
        let query = remote_query(&self.ctx, &self.unit, &self.class).await?;
        let rows = Arc::new(self.ctx.remote.select(&query).await?);
        debug!("{}: {} remote rows", self.description, rows.len());
        *lock(&self.rows) = Some(rows.clone());
        Ok(rows)
    }

    /// Remote ids present on the published stage.
    async fn published_ids(&self) -> Result<Arc<HashSet<i64>>> {
        let cached = lock(&self.published).clone();
        if let Some(ids) = cached {
            return Ok(ids);
        }
        let live = format!("{}_Live", self.remote_base());
        let ids: HashSet<i64> = if self.ctx.remote.field_list(&live).await?.is_empty() {
            debug!("No remote table {}, nothing is published", live);
            HashSet::new()
        } else {
            let query = SelectQuery::from(live).columns(["ID"]);
            self.ctx
                .remote
                .select(&query)
                .await?
                .iter()
                .map(|row| row.id())
                .collect()
        };
        let ids = Arc::new(ids);
        *lock(&self.published) = Some(ids.clone());
        Ok(ids)
    }

    /// Pair unmatched local records with unmatched remote rows by natural key.
    ///
    /// Locals are visited in id order; each remote row is consumed at most
    /// once and the lowest remote id wins a tie.
    pub(crate) async fn identify_flat(&self) -> Result<UnitReport> {
        let mut report = UnitReport::default();
        let rows = self.remote_rows().await?;
        let mapped = self.ctx.mappings.snapshot(&self.class).await?;

        let unmatched: Vec<&RemoteRecord> = rows
            .iter()
            .filter(|row| !mapped.contains_key(&row.id()))
            .collect();
        let before = unmatched.len() as u64;
        if before == 0 {
            info!("{}: all remote objects identified, skipping", self.description);
            return Ok(report);
        }

        let mapped_locals: HashSet<i64> = mapped.values().map(|m| m.local_id).collect();
        let locals: Vec<LocalRecord> = self
            .ctx
            .local
            .find(&self.class, &[])
            .await?
            .into_iter()
            .filter(|local| !mapped_locals.contains(&local.id))
            .collect();
        info!(
            "{}: checking {} unmatched local against {} remote objects",
            self.description,
            locals.len(),
            before
        );

        let mut candidates: HashMap<Vec<String>, VecDeque<i64>> = HashMap::new();
        for row in unmatched {
            if let Some(key) = remote_key(&self.unit, row, &self.idcolumns) {
                candidates.entry(key).or_default().push_back(row.id());
            }
        }

        self.ctx
            .progress
            .begin(&self.description, "identify", locals.len() as u64);
        for (checked, local) in locals.iter().enumerate() {
            self.ctx.progress.tick(checked as u64 + 1);
            let Some(key) = local_key(local, &self.idcolumns) else {
                continue;
            };
            let Some(remote_id) = candidates.get_mut(&key).and_then(VecDeque::pop_front) else {
                continue;
            };
            let result = self
                .ctx
                .mappings
                .record(&self.class, local.id, remote_id, None)
                .await;
            if absorb_conflict(result, &mut report)? {
                debug!("Identified {} as remote #{}", local.label(), remote_id);
                report.identified += 1;
            }
        }
        self.ctx.progress.end();

        info!(
            "{}: Result: {} unmatched objects reduced to {}",
            self.description,
            before,
            before - report.identified
        );
        Ok(report)
    }

    /// Copy, run helpers, save, record and publish one record.
    ///
    /// Returns false when the mapping was refused.
    async fn sync(
        &self,
        mut local: LocalRecord,
        row: &RemoteRecord,
        report: &mut UnitReport,
    ) -> Result<bool> {
        report.merge(&copy_fields(&self.ctx, &self.unit, &mut local, row).await?);
        for helper in &self.helpers {
            report.merge(&helper.update_local_object(&mut local, row).await?);
        }

        self.ctx.local.save(&mut local).await?;
        let result = self
            .ctx
            .mappings
            .record(&self.class, local.id, row.id(), Some(IdentityMap::now()))
            .await;
        if !absorb_conflict(result, report)? {
            return Ok(false);
        }

        if self.unit.publish && self.published_ids().await?.contains(&row.id()) {
            self.ctx.local.publish(&local).await?;
            debug!("Published {}", local.label());
        }
        debug!("Synced {} from remote #{}", local.label(), row.id());
        Ok(true)
    }

    /// Write relations that resolve now but were empty when the record was
    /// synced.
    pub(crate) async fn link_relations(&self) -> Result<UnitReport> {
        let mut report = UnitReport::default();
        if !self.strategy.add && !self.strategy.update {
            return Ok(report);
        }

        let rows = self.remote_rows().await?;
        let mapped = self.ctx.mappings.snapshot(&self.class).await?;
        for row in rows.iter() {
            let Some(mapping) = mapped.get(&row.id()) else {
                continue;
            };
            let Some(mut local) = self.ctx.local.get(&self.class, mapping.local_id).await? else {
                continue;
            };

            let mut linked = 0;
            for (remote_column, value) in row.iter() {
                let column = self.unit.local_column(remote_column);
                if is_skipped_column(remote_column) || is_skipped_column(column) {
                    continue;
                }
                let Some(relation) = relation_name(column) else {
                    continue;
                };
                let remote_id = value.as_i64().unwrap_or(0);
                let is_set = local.fields.get(column).is_some_and(|v| !v.is_empty());
                if remote_id <= 0 || is_set {
                    continue;
                }
                let resolution = self
                    .ctx
                    .mappings
                    .resolve_relation(&local.class_name, relation, remote_id, &self.unit.relations)
                    .await?;
                if let RelationResolution::Mapped(local_id) = resolution {
                    local.fields.set(column, local_id);
                    linked += 1;
                }
            }

            if linked > 0 {
                self.ctx.local.update(&local).await?;
                debug!("Linked {} relation(s) of {}", linked, local.label());
                report.linked += linked;
            }
        }

        info!(
            "{}: Result: {} relations linked",
            self.description, report.linked
        );
        Ok(report)
    }
}

#[async_trait]
impl Importer for DataObjectImporter {
    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn check(&self) -> Result<()> {
        if !self.ctx.catalog.is_tracked(&self.class) {
            return Err(ImportError::precondition(
                &self.description,
                format!("{} does not carry legacy identity", self.class),
            ));
        }
        let base = self.remote_base();
        if self.ctx.remote.field_list(&base).await?.is_empty() {
            return Err(ImportError::precondition(
                &self.description,
                format!("remote table {} not found", base),
            ));
        }
        self.ctx.mappings.prepare(&self.class, Some(base.as_str())).await
    }

    async fn identify_pass(&self) -> Result<UnitReport> {
        if !self.strategy.identify {
            info!(
                "{}: skipping identification for add only strategy",
                self.description
            );
            return Ok(UnitReport::default());
        }
        if self.idcolumns.is_empty() {
            return Err(ImportError::Config(format!(
                "{}: Identify requires idcolumns",
                self.description
            )));
        }
        self.identify_flat().await
    }

    async fn import_pass(&self) -> Result<UnitReport> {
        let mut report = UnitReport::default();
        let selection = self.strategy.selection();
        if selection == Selection::Nothing {
            info!(
                "{}: skipping import for identify only strategy",
                self.description
            );
            return Ok(report);
        }

        let rows = self.remote_rows().await?;
        let mapped = self.ctx.mappings.snapshot(&self.class).await?;
        let selected = select_rows(selection, &rows, &mapped, &self.unit.modified_column);
        let label = match selection {
            Selection::NewOrChanged => "new or changed",
            Selection::Changed => "changed",
            _ => "new",
        };
        info!(
            "{}: importing {} {} records",
            self.description,
            selected.len(),
            label
        );

        self.ctx
            .progress
            .begin(&self.description, "import", selected.len() as u64);
        for (done, row) in selected.iter().enumerate() {
            self.ctx.progress.tick(done as u64 + 1);

            let mut existing = None;
            if let Some(mapping) = mapped.get(&row.id()) {
                existing = self.ctx.local.get(&self.class, mapping.local_id).await?;
                if existing.is_none() {
                    self.ctx
                        .mappings
                        .forget(&self.class, mapping.local_id, mapping.remote_id)
                        .await?;
                }
            }

            match existing {
                Some(local) if self.strategy.update => {
                    if self.sync(local, row, &mut report).await? {
                        report.updated += 1;
                    }
                }
                None if self.strategy.add => {
                    let class = self.ctx.catalog.resolve_class(&self.class, row.class_name());
                    let local = LocalRecord::new(class);
                    if self.sync(local, row, &mut report).await? {
                        report.added += 1;
                    }
                }
                _ => report.skipped += 1,
            }
        }
        self.ctx.progress.end();

        info!(
            "{}: Result: {} added, {} updated",
            self.description, report.added, report.updated
        );
        Ok(report)
    }

    async fn link_pass(&self) -> Result<UnitReport> {
        self.link_relations().await
    }

    fn flush(&self) {
        *lock(&self.rows) = None;
        *lock(&self.published) = None;
        self.ctx.mappings.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConflictPolicy;
    use crate::importer::Strategy;
    use crate::core::{Record, TypeCatalog, TypeDef};
    use crate::drivers::{MemoryLocalStore, MemoryRemote};
    use crate::mapping::MemoryMappingStore;
    use crate::orchestrator::progress::NoProgress;

    struct Fixture {
        ctx: ImportContext,
        remote: Arc<MemoryRemote>,
        local: Arc<MemoryLocalStore>,
    }

    fn fixture(remote_rows: Vec<Record>) -> Fixture {
        let catalog = Arc::new(
            TypeCatalog::from_defs(vec![
                TypeDef::new("Member").tracked(),
                TypeDef::new("Group"),
            ])
            .unwrap(),
        );
        let remote = Arc::new(MemoryRemote::new().with_table("Member", remote_rows));
        let local = Arc::new(MemoryLocalStore::new(catalog.clone()));
        let ctx = ImportContext {
            remote: remote.clone(),
            local: local.clone(),
            mappings: Arc::new(IdentityMap::new(
                Arc::new(MemoryMappingStore::new()),
                catalog.clone(),
                ConflictPolicy::Reject,
            )),
            catalog,
            progress: Arc::new(NoProgress),
        };
        Fixture { ctx, remote, local }
    }

    fn unit(strategy: Vec<Strategy>) -> UnitConfig {
        UnitConfig {
            class: "Member".into(),
            strategy,
            idcolumns: vec!["Email".into()],
            ..Default::default()
        }
    }

    fn member(id: i64, email: &str) -> Record {
        Record::new()
            .with("ID", id)
            .with("ClassName", "Member")
            .with("Email", email)
    }

    fn importer(fx: &Fixture, unit: UnitConfig) -> DataObjectImporter {
        DataObjectImporter::new(fx.ctx.clone(), unit, &AssetsConfig::default(), Vec::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_identify_lowest_remote_id_wins() {
        let fx = fixture(vec![member(9, "a@x"), member(4, "a@x"), member(5, "b@x")]);
        let mut first = LocalRecord::new("Member");
        first.fields.set("Email", "a@x");
        fx.local.seed(first).unwrap();

        let imp = importer(&fx, unit(vec![Strategy::Identify]));
        let report = imp.identify_pass().await.unwrap();
        assert_eq!(report.identified, 1);
        assert_eq!(fx.ctx.mappings.find_local("Member", 4).await.unwrap(), Some(1));
        assert_eq!(fx.ctx.mappings.find_local("Member", 9).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_identify_null_key_never_matches() {
        let fx = fixture(vec![Record::new().with("ID", 1).with("Email", Value::Null)]);
        let mut local = LocalRecord::new("Member");
        local.fields.set("Email", Value::Null);
        fx.local.seed(local).unwrap();

        let imp = importer(&fx, unit(vec![Strategy::Identify]));
        assert_eq!(imp.identify_pass().await.unwrap().identified, 0);
    }

    #[tokio::test]
    async fn test_add_then_rerun_is_stable() {
        let fx = fixture(vec![member(1, "a@x"), member(2, "b@x")]);
        let imp = importer(&fx, unit(vec![Strategy::Add]));

        let report = imp.import_pass().await.unwrap();
        assert_eq!(report.added, 2);
        imp.flush();

        let report = imp.import_pass().await.unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(fx.local.records("Member").len(), 2);
    }

    #[tokio::test]
    async fn test_update_resyncs_unsynced_identified_rows() {
        let fx = fixture(vec![member(1, "a@x").with("FirstName", "Ann")]);
        let mut local = LocalRecord::new("Member");
        local.fields.set("Email", "a@x");
        fx.local.seed(local).unwrap();

        let imp = importer(&fx, unit(vec![Strategy::Identify, Strategy::Update]));
        imp.identify_pass().await.unwrap();
        imp.flush();
        let report = imp.import_pass().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.added, 0);

        let synced = fx.local.records("Member");
        assert_eq!(synced[0].fields.get_str("FirstName"), Some("Ann"));
        let mapping = fx
            .ctx
            .mappings
            .mapping_for_remote("Member", 1)
            .await
            .unwrap()
            .unwrap();
        assert!(mapping.imported_date.is_some());
    }

    #[tokio::test]
    async fn test_stale_mapping_readded() {
        let fx = fixture(vec![member(1, "a@x")]);
        fx.ctx.mappings.record("Member", 50, 1, None).await.unwrap();

        let imp = importer(&fx, unit(vec![Strategy::Add, Strategy::Update]));
        let report = imp.import_pass().await.unwrap();
        assert_eq!(report.added, 1);
        let local_id = fx.ctx.mappings.find_local("Member", 1).await.unwrap();
        assert_ne!(local_id, Some(50));
    }

    #[tokio::test]
    async fn test_publish_follows_remote_live_table() {
        let fx = fixture(vec![member(1, "a@x"), member(2, "b@x")]);
        fx.remote.insert("Member_Live", Record::new().with("ID", 2));

        let mut cfg = unit(vec![Strategy::Add]);
        cfg.publish = true;
        let imp = importer(&fx, cfg);
        imp.import_pass().await.unwrap();

        let first = fx.ctx.mappings.find_local("Member", 1).await.unwrap().unwrap();
        let second = fx.ctx.mappings.find_local("Member", 2).await.unwrap().unwrap();
        assert!(!fx.local.is_published("Member", first));
        assert!(fx.local.is_published("Member", second));
    }

    #[tokio::test]
    async fn test_check_rejects_untracked_type() {
        let fx = fixture(Vec::new());
        let imp = DataObjectImporter::new(
            fx.ctx.clone(),
            UnitConfig {
                class: "Group".into(),
                strategy: vec![Strategy::Add],
                ..Default::default()
            },
            &AssetsConfig::default(),
            Vec::new(),
        )
        .unwrap();
        let err = imp.check().await.unwrap_err();
        assert!(matches!(err, ImportError::Precondition { .. }));
    }
}
