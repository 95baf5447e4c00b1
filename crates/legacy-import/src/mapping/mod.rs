//! Identity map between remote and local records.
//!
//! A [`LegacyMapping`] pairs one remote row with one local record of the same
//! object type. The [`IdentityMap`] sits in front of a [`MappingStore`] and
//! adds the pieces every importer needs:
//!
//! - object type normalization (a `Page` mapping is stored under `SiteTree`)
//! - conflict detection according to the configured [`ConflictPolicy`]
//! - relation resolution with a per-pass cache, cleared by [`IdentityMap::flush`]

pub mod backend;
pub mod columns;
pub mod memory;
pub mod mysql_db;

pub use backend::MappingStore;
pub use columns::ColumnMappingStore;
pub use memory::MemoryMappingStore;
pub use mysql_db::MysqlMappingStore;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::config::ConflictPolicy;
use crate::core::{lock, TypeCatalog};
use crate::error::{ImportError, Result};

/// Durable pairing of one remote row and one local record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyMapping {
    /// Base type name, or join table name for relation rows.
    pub object_type: String,

    /// Local record id.
    pub local_id: i64,

    /// Remote row id.
    pub remote_id: i64,

    /// Last successful field sync; `None` for identified-only pairs.
    pub imported_date: Option<NaiveDateTime>,
}

impl LegacyMapping {
    /// Create a mapping that was never synced.
    pub fn new(object_type: impl Into<String>, local_id: i64, remote_id: i64) -> Self {
        Self {
            object_type: object_type.into(),
            local_id,
            remote_id,
            imported_date: None,
        }
    }
}

/// Outcome of translating a remote relation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationResolution {
    /// The related type carries no legacy identity; leave the field alone.
    Untracked,
    /// The related row is mapped to this local id.
    Mapped(i64),
    /// The related type is tracked but the row is not mapped (yet).
    Dangling,
}

/// Mapping lookups and writes shared by every unit of a run.
pub struct IdentityMap {
    store: Arc<dyn MappingStore>,
    catalog: Arc<TypeCatalog>,
    policy: ConflictPolicy,
    cache: Mutex<HashMap<(String, i64), RelationResolution>>,
    prepared: Mutex<HashSet<String>>,
}

impl IdentityMap {
    /// Create an identity map over a store.
    pub fn new(
        store: Arc<dyn MappingStore>,
        catalog: Arc<TypeCatalog>,
        policy: ConflictPolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            policy,
            cache: Mutex::new(HashMap::new()),
            prepared: Mutex::new(HashSet::new()),
        }
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn MappingStore> {
        &self.store
    }

    /// Timestamp written as `imported_date` for a sync happening now.
    pub fn now() -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }

    /// Object type a mapping of `name` is stored under.
    ///
    /// Content types collapse to their base type; anything else (join tables)
    /// is used verbatim.
    pub fn object_type(&self, name: &str) -> String {
        if self.catalog.contains(name) {
            self.catalog.base_type(name).to_string()
        } else {
            name.to_string()
        }
    }

    /// Provision storage for a type once per run.
    ///
    /// `remote_table` names the legacy table when it differs from the
    /// object type.
    pub async fn prepare(&self, name: &str, remote_table: Option<&str>) -> Result<()> {
        let object_type = self.object_type(name);
        let prepared = lock(&self.prepared).contains(&object_type);
        if prepared {
            return Ok(());
        }
        let remote_table = remote_table.unwrap_or(&object_type);
        self.store.prepare(&object_type, remote_table).await?;
        lock(&self.prepared).insert(object_type);
        Ok(())
    }

    /// Local id mapped to a remote row.
    pub async fn find_local(&self, name: &str, remote_id: i64) -> Result<Option<i64>> {
        Ok(self
            .mapping_for_remote(name, remote_id)
            .await?
            .map(|m| m.local_id))
    }

    /// Remote id mapped to a local record.
    pub async fn find_remote(&self, name: &str, local_id: i64) -> Result<Option<i64>> {
        let object_type = self.object_type(name);
        Ok(self
            .store
            .find_by_local(&object_type, local_id)
            .await?
            .map(|m| m.remote_id))
    }

    /// Full mapping for a remote row.
    pub async fn mapping_for_remote(
        &self,
        name: &str,
        remote_id: i64,
    ) -> Result<Option<LegacyMapping>> {
        let object_type = self.object_type(name);
        self.store.find_by_remote(&object_type, remote_id).await
    }

    /// Every mapping of a type keyed by remote id.
    pub async fn snapshot(&self, name: &str) -> Result<HashMap<i64, LegacyMapping>> {
        let object_type = self.object_type(name);
        Ok(self
            .store
            .list(&object_type)
            .await?
            .into_iter()
            .map(|m| (m.remote_id, m))
            .collect())
    }

    /// Record a pairing, enforcing one-to-one under the conflict policy.
    ///
    /// Re-recording an existing pair only refreshes `imported_date`.
    pub async fn record(
        &self,
        name: &str,
        local_id: i64,
        remote_id: i64,
        imported_date: Option<NaiveDateTime>,
    ) -> Result<()> {
        let object_type = self.object_type(name);

        let by_remote = self.store.find_by_remote(&object_type, remote_id).await?;
        let by_local = self.store.find_by_local(&object_type, local_id).await?;

        let existing = match (&by_remote, &by_local) {
            (Some(m), _) if m.local_id != local_id => Some(format!(
                "remote {} already mapped to local {}",
                remote_id, m.local_id
            )),
            (_, Some(m)) if m.remote_id != remote_id => Some(format!(
                "local {} already mapped to remote {}",
                local_id, m.remote_id
            )),
            _ => None,
        };

        if let Some(existing) = existing {
            match self.policy {
                ConflictPolicy::Reject => {
                    return Err(ImportError::MappingConflict {
                        object_type,
                        local_id,
                        remote_id,
                        existing,
                    });
                }
                ConflictPolicy::Overwrite => {
                    warn!(
                        "Overwriting {} mapping: {} (now local {} <-> remote {})",
                        object_type, existing, local_id, remote_id
                    );
                    self.store.delete(&object_type, local_id, remote_id).await?;
                }
            }
        }

        self.store
            .upsert(&LegacyMapping {
                object_type: object_type.clone(),
                local_id,
                remote_id,
                imported_date,
            })
            .await?;

        // A cached Dangling for this row is now stale
        lock(&self.cache).remove(&(object_type, remote_id));
        Ok(())
    }

    /// Drop a mapping whose local record no longer exists.
    pub async fn forget(&self, name: &str, local_id: i64, remote_id: i64) -> Result<()> {
        let object_type = self.object_type(name);
        debug!(
            "Forgetting stale {} mapping local {} <-> remote {}",
            object_type, local_id, remote_id
        );
        self.store.delete(&object_type, local_id, remote_id).await?;
        lock(&self.cache).remove(&(object_type, remote_id));
        Ok(())
    }

    /// Remove every mapping of a type. Only the truncate and bulk pathways call this.
    pub async fn clear(&self, name: &str) -> Result<u64> {
        let object_type = self.object_type(name);
        let removed = self.store.clear(&object_type).await?;
        lock(&self.cache).retain(|(t, _), _| *t != object_type);
        Ok(removed)
    }

    /// Translate a remote relation id for a field of `owner_class`.
    ///
    /// `relation` is the relation name without the `ID` suffix. `overrides`
    /// names related types for relations the type does not declare.
    pub async fn resolve_relation(
        &self,
        owner_class: &str,
        relation: &str,
        remote_id: i64,
        overrides: &BTreeMap<String, String>,
    ) -> Result<RelationResolution> {
        let related = match overrides.get(relation) {
            Some(related) => related.as_str(),
            None => match self.catalog.relation_type(owner_class, relation) {
                Some(related) => related,
                None => return Ok(RelationResolution::Untracked),
            },
        };
        if !self.catalog.is_tracked(related) {
            return Ok(RelationResolution::Untracked);
        }
        if remote_id <= 0 {
            return Ok(RelationResolution::Dangling);
        }

        let key = (self.object_type(related), remote_id);
        let cached = lock(&self.cache).get(&key).copied();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let resolution = match self.store.find_by_remote(&key.0, remote_id).await? {
            Some(m) if m.local_id > 0 => RelationResolution::Mapped(m.local_id),
            _ => RelationResolution::Dangling,
        };
        lock(&self.cache).insert(key, resolution);
        Ok(resolution)
    }

    /// Clear the per-pass relation cache.
    pub fn flush(&self) {
        lock(&self.cache).clear();
    }

    /// Number of cached relation resolutions.
    pub fn cached(&self) -> usize {
        lock(&self.cache).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TypeDef;

    fn catalog() -> Arc<TypeCatalog> {
        Arc::new(
            TypeCatalog::from_defs(vec![
                TypeDef::new("SiteTree").tracked().hierarchical(),
                TypeDef::new("Page").extends("SiteTree"),
                TypeDef::new("Member").tracked(),
                TypeDef::new("Group"),
                TypeDef::new("Comment")
                    .tracked()
                    .has_one("Owner", "Member")
                    .has_one("Group", "Group")
                    .has_one("Page", "Page"),
            ])
            .unwrap(),
        )
    }

    fn identity_map(policy: ConflictPolicy) -> (IdentityMap, Arc<MemoryMappingStore>) {
        let store = Arc::new(MemoryMappingStore::new());
        (IdentityMap::new(store.clone(), catalog(), policy), store)
    }

    #[tokio::test]
    async fn test_subtypes_share_base_mappings() {
        let (map, store) = identity_map(ConflictPolicy::Reject);
        map.record("Page", 7, 42, None).await.unwrap();
        assert_eq!(map.find_local("SiteTree", 42).await.unwrap(), Some(7));
        assert_eq!(map.find_remote("Page", 7).await.unwrap(), Some(42));
        assert_eq!(store.all()[0].object_type, "SiteTree");
    }

    #[tokio::test]
    async fn test_rerecord_refreshes_date() {
        let (map, store) = identity_map(ConflictPolicy::Reject);
        map.record("Member", 7, 42, None).await.unwrap();
        let now = IdentityMap::now();
        map.record("Member", 7, 42, Some(now)).await.unwrap();
        let all = store.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].imported_date, Some(now));
    }

    #[tokio::test]
    async fn test_conflict_rejected() {
        let (map, store) = identity_map(ConflictPolicy::Reject);
        map.record("Member", 7, 42, None).await.unwrap();

        let err = map.record("Member", 8, 42, None).await.unwrap_err();
        assert!(matches!(err, ImportError::MappingConflict { .. }));
        let err = map.record("Member", 7, 43, None).await.unwrap_err();
        assert!(err.to_string().contains("local 7 already mapped to remote 42"));
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_overwritten() {
        let (map, store) = identity_map(ConflictPolicy::Overwrite);
        map.record("Member", 7, 42, None).await.unwrap();
        map.record("Member", 9, 50, None).await.unwrap();
        map.record("Member", 7, 50, None).await.unwrap();

        let all = store.all();
        assert_eq!(all.len(), 1);
        assert_eq!((all[0].local_id, all[0].remote_id), (7, 50));
    }

    #[tokio::test]
    async fn test_resolve_relation() {
        let (map, _) = identity_map(ConflictPolicy::Reject);
        let none = BTreeMap::new();
        map.record("Member", 7, 42, None).await.unwrap();

        let resolved = map.resolve_relation("Comment", "Owner", 42, &none).await.unwrap();
        assert_eq!(resolved, RelationResolution::Mapped(7));

        let resolved = map.resolve_relation("Comment", "Owner", 43, &none).await.unwrap();
        assert_eq!(resolved, RelationResolution::Dangling);

        // Group is not tracked, Author is not declared
        let resolved = map.resolve_relation("Comment", "Group", 3, &none).await.unwrap();
        assert_eq!(resolved, RelationResolution::Untracked);
        let resolved = map.resolve_relation("Comment", "Author", 42, &none).await.unwrap();
        assert_eq!(resolved, RelationResolution::Untracked);

        let mut overrides = BTreeMap::new();
        overrides.insert("Author".to_string(), "Member".to_string());
        let resolved = map
            .resolve_relation("Comment", "Author", 42, &overrides)
            .await
            .unwrap();
        assert_eq!(resolved, RelationResolution::Mapped(7));
    }

    #[tokio::test]
    async fn test_cache_invalidated_by_record_and_flush() {
        let (map, _) = identity_map(ConflictPolicy::Reject);
        let none = BTreeMap::new();

        let resolved = map.resolve_relation("Comment", "Page", 5, &none).await.unwrap();
        assert_eq!(resolved, RelationResolution::Dangling);
        assert_eq!(map.cached(), 1);

        map.record("Page", 11, 5, None).await.unwrap();
        let resolved = map.resolve_relation("Comment", "Page", 5, &none).await.unwrap();
        assert_eq!(resolved, RelationResolution::Mapped(11));

        map.flush();
        assert_eq!(map.cached(), 0);
    }

    #[tokio::test]
    async fn test_clear_removes_type() {
        let (map, store) = identity_map(ConflictPolicy::Reject);
        map.record("Member", 1, 1, None).await.unwrap();
        map.record("Member", 2, 2, None).await.unwrap();
        map.record("Page", 3, 3, None).await.unwrap();
        assert_eq!(map.clear("Member").await.unwrap(), 2);
        assert_eq!(store.all().len(), 1);
    }
}
