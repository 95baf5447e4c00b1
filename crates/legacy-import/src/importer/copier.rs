//! Field copy from a remote row onto a local record.
//!
//! Every remote column is visited once:
//!
//! - `ID`, `ClassName` and bookkeeping columns are skipped
//! - columns prefixed `_obsolete` are skipped
//! - `<Relation>ID` columns are translated through the identity map and only
//!   written when they resolve; new records get an explicit 0 for dangling
//!   relations
//! - everything else is copied verbatim

use tracing::{debug, trace};

use super::{ImportContext, UnitReport};
use crate::config::UnitConfig;
use crate::core::{LocalRecord, RemoteRecord, Value};
use crate::error::Result;
use crate::mapping::columns::{IMPORTED_DATE, IMPORTED_ID, LEGACY_ID};
use crate::mapping::RelationResolution;

/// Prefix marking columns that were retired in the legacy schema.
pub const OBSOLETE_PREFIX: &str = "_obsolete";

/// True for columns the copier never writes.
pub fn is_skipped_column(name: &str) -> bool {
    matches!(name, "ID" | "ClassName" | IMPORTED_ID | IMPORTED_DATE | LEGACY_ID)
        || name.starts_with(OBSOLETE_PREFIX)
}

/// Relation name of a `<Relation>ID` column.
pub fn relation_name(column: &str) -> Option<&str> {
    column
        .strip_suffix("ID")
        .filter(|name| !name.is_empty() && !name.ends_with('_'))
}

/// Copy every remote field onto the local record.
pub async fn copy_fields(
    ctx: &ImportContext,
    unit: &UnitConfig,
    local: &mut LocalRecord,
    remote: &RemoteRecord,
) -> Result<UnitReport> {
    let mut report = UnitReport::default();

    for (remote_column, value) in remote.iter() {
        let column = unit.local_column(remote_column);
        if is_skipped_column(remote_column) || is_skipped_column(column) {
            continue;
        }

        let Some(relation) = relation_name(column) else {
            trace!("{}.{} = {:?}", local.class_name, column, value);
            local.fields.set(column, value.clone());
            continue;
        };

        let remote_id = value.as_i64().unwrap_or(0);
        let resolution = ctx
            .mappings
            .resolve_relation(&local.class_name, relation, remote_id, &unit.relations)
            .await?;

        match resolution {
            RelationResolution::Untracked => {
                trace!("{}.{} is not a tracked relation", local.class_name, column);
            }
            RelationResolution::Mapped(local_id) => {
                trace!(
                    "{}.{}: remote {} -> local {}",
                    local.class_name,
                    column,
                    remote_id,
                    local_id
                );
                local.fields.set(column, local_id);
            }
            RelationResolution::Dangling => {
                if remote_id > 0 {
                    report.unresolved += 1;
                    debug!(
                        "{}: unresolved {} -> remote {}",
                        local.label(),
                        column,
                        remote_id
                    );
                }
                if !local.fields.contains(column) {
                    local.fields.set(column, Value::Int(0));
                }
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConflictPolicy;
    use crate::core::{Record, TypeCatalog, TypeDef};
    use crate::drivers::{MemoryLocalStore, MemoryRemote};
    use crate::mapping::{IdentityMap, MemoryMappingStore};
    use crate::orchestrator::progress::NoProgress;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn context() -> ImportContext {
        let catalog = Arc::new(
            TypeCatalog::from_defs(vec![
                TypeDef::new("Member").tracked(),
                TypeDef::new("Group"),
                TypeDef::new("Comment")
                    .tracked()
                    .has_one("Owner", "Member")
                    .has_one("Group", "Group"),
            ])
            .unwrap(),
        );
        ImportContext {
            remote: Arc::new(MemoryRemote::new()),
            local: Arc::new(MemoryLocalStore::new(catalog.clone())),
            mappings: Arc::new(IdentityMap::new(
                Arc::new(MemoryMappingStore::new()),
                catalog.clone(),
                ConflictPolicy::Reject,
            )),
            catalog,
            progress: Arc::new(NoProgress),
        }
    }

    fn remote_comment(owner: i64) -> Record {
        Record::new()
            .with("ID", 5)
            .with("ClassName", "Comment")
            .with("Title", "Hello")
            .with("OwnerID", owner)
            .with("GroupID", 3)
            .with("_obsolete_Rating", 4)
    }

    #[test]
    fn test_relation_name() {
        assert_eq!(relation_name("OwnerID"), Some("Owner"));
        assert_eq!(relation_name("ID"), None);
        assert_eq!(relation_name("Title"), None);
    }

    #[tokio::test]
    async fn test_relation_remapped() {
        let ctx = context();
        ctx.mappings.record("Member", 7, 42, None).await.unwrap();

        let mut local = LocalRecord::new("Comment");
        let report = copy_fields(&ctx, &UnitConfig::default(), &mut local, &remote_comment(42))
            .await
            .unwrap();

        assert_eq!(local.fields.get_i64("OwnerID"), 7);
        assert_eq!(local.fields.get_str("Title"), Some("Hello"));
        assert!(!local.fields.contains("ID"));
        assert!(!local.fields.contains("ClassName"));
        assert!(!local.fields.contains("_obsolete_Rating"));
        // Group is untracked: left alone
        assert!(!local.fields.contains("GroupID"));
        assert_eq!(report.unresolved, 0);
    }

    #[tokio::test]
    async fn test_dangling_relation_zeroed_on_new_record() {
        let ctx = context();
        let mut local = LocalRecord::new("Comment");
        let report = copy_fields(&ctx, &UnitConfig::default(), &mut local, &remote_comment(42))
            .await
            .unwrap();
        assert_eq!(local.fields.get("OwnerID"), Some(&Value::Int(0)));
        assert_eq!(report.unresolved, 1);
    }

    #[tokio::test]
    async fn test_dangling_relation_keeps_existing_value() {
        let ctx = context();
        let mut local = LocalRecord::new("Comment");
        local.id = 3;
        local.fields.set("OwnerID", 11);
        copy_fields(&ctx, &UnitConfig::default(), &mut local, &remote_comment(42))
            .await
            .unwrap();
        assert_eq!(local.fields.get_i64("OwnerID"), 11);
    }

    #[tokio::test]
    async fn test_field_map_and_relation_override() {
        let ctx = context();
        ctx.mappings.record("Member", 7, 42, None).await.unwrap();

        let mut field_map = BTreeMap::new();
        field_map.insert("Title".to_string(), "Subject".to_string());
        let mut relations = BTreeMap::new();
        relations.insert("Author".to_string(), "Member".to_string());
        let unit = UnitConfig {
            field_map,
            relations,
            ..Default::default()
        };

        let remote = Record::new().with("Title", "Hi").with("AuthorID", 42);
        let mut local = LocalRecord::new("Comment");
        copy_fields(&ctx, &unit, &mut local, &remote).await.unwrap();
        assert_eq!(local.fields.get_str("Subject"), Some("Hi"));
        assert!(!local.fields.contains("Title"));
        assert_eq!(local.fields.get_i64("AuthorID"), 7);
    }
}
