//! Many-to-many join table importer.
//!
//! Join rows are add-only. Every partner column is translated through the
//! identity map; rows with an unmapped partner are left for a later run.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{absorb_conflict, ImportContext, Importer, UnitReport};
use crate::config::UnitConfig;
use crate::core::{Condition, Record, SelectQuery};
use crate::error::{ImportError, Result};
use crate::mapping::IdentityMap;

/// Imports the rows of one join table.
pub struct RelationImporter {
    ctx: ImportContext,
    unit: UnitConfig,
    table: String,
    fields: BTreeMap<String, String>,
    description: String,
}

impl RelationImporter {
    pub fn new(ctx: ImportContext, unit: UnitConfig) -> Result<Self> {
        let table = unit
            .table
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ImportError::Config("relation unit requires a table".into()))?;
        if unit.fields.is_empty() {
            return Err(ImportError::Config(format!(
                "relation unit for {} requires fields",
                table
            )));
        }
        for related in unit.fields.values() {
            ctx.catalog.require(related)?;
        }
        let fields = unit.fields.clone();
        let description = format!("RelationImporter for {}", table);
        Ok(Self {
            ctx,
            unit,
            table,
            fields,
            description,
        })
    }

    /// Local partner ids for a remote join row; `None` if any is unmapped.
    async fn translate(&self, row: &Record) -> Result<Option<Record>> {
        let mut translated = Record::new();
        for (field, related) in &self.fields {
            let remote_id = row.get_i64(field);
            if remote_id <= 0 {
                return Ok(None);
            }
            match self.ctx.mappings.find_local(related, remote_id).await? {
                Some(local_id) => translated.set(field.clone(), local_id),
                None => {
                    debug!(
                        "{}: remote #{} waits for {} #{}",
                        self.table,
                        row.id(),
                        related,
                        remote_id
                    );
                    return Ok(None);
                }
            }
        }
        Ok(Some(translated))
    }
}

#[async_trait]
impl Importer for RelationImporter {
    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn check(&self) -> Result<()> {
        for related in self.fields.values() {
            if !self.ctx.catalog.is_tracked(related) {
                return Err(ImportError::precondition(
                    &self.description,
                    format!("{} does not carry legacy identity", related),
                ));
            }
        }
        if self.ctx.local.field_list(&self.table).await?.is_empty() {
            return Err(ImportError::precondition(
                &self.description,
                format!("local table {} not found", self.table),
            ));
        }
        if self.ctx.remote.field_list(&self.table).await?.is_empty() {
            return Err(ImportError::precondition(
                &self.description,
                format!("remote table {} not found", self.table),
            ));
        }
        self.ctx.mappings.prepare(&self.table, None).await
    }

    async fn identify_pass(&self) -> Result<UnitReport> {
        info!("{}: relations are add only, skipping identify", self.description);
        Ok(UnitReport::default())
    }

    async fn import_pass(&self) -> Result<UnitReport> {
        let mut report = UnitReport::default();
        let query = SelectQuery::from(self.table.clone())
            .filters(self.unit.conditions())
            .order_by("ID");
        let rows = self.ctx.remote.select(&query).await?;
        let mapped = self.ctx.mappings.snapshot(&self.table).await?;
        let pending: Vec<&Record> = rows
            .iter()
            .filter(|row| !mapped.contains_key(&row.id()))
            .collect();
        info!("{}: found {} items to import", self.description, pending.len());

        self.ctx
            .progress
            .begin(&self.description, "import", pending.len() as u64);
        for (done, row) in pending.iter().enumerate() {
            self.ctx.progress.tick(done as u64 + 1);

            let Some(translated) = self.translate(row).await? else {
                report.skipped += 1;
                continue;
            };

            let conditions: Vec<Condition> = translated
                .iter()
                .map(|(field, value)| Condition::Eq(field.clone(), value.clone()))
                .collect();
            let (local_id, inserted) = match self.ctx.local.find_row(&self.table, &conditions).await? {
                Some(existing) => (existing.id(), false),
                None => (self.ctx.local.insert_row(&self.table, &translated).await?, true),
            };

            let result = self
                .ctx
                .mappings
                .record(&self.table, local_id, row.id(), Some(IdentityMap::now()))
                .await;
            if absorb_conflict(result, &mut report)? {
                if inserted {
                    report.added += 1;
                } else {
                    report.updated += 1;
                }
            }
        }
        self.ctx.progress.end();

        info!(
            "{}: Result: {} added, {} updated, {} waiting",
            self.description, report.added, report.updated, report.skipped
        );
        Ok(report)
    }

    fn flush(&self) {
        self.ctx.mappings.flush();
    }
}
