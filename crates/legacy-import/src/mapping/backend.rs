//! Storage backend trait for legacy mappings.
//!
//! The [`MappingStore`] trait defines the interface for persisting the
//! correspondence between remote and local records:
//!
//! - **Side table**: `MysqlMappingStore` in `mysql_db.rs`
//! - **Legacy columns**: `ColumnMappingStore` in `columns.rs`
//! - **Memory**: `MemoryMappingStore` in `memory.rs`, for tests
//!
//! Stores are dumb: they do not enforce the one-to-one invariant beyond what
//! their schema guarantees. [`IdentityMap`](super::IdentityMap) checks for
//! conflicts before writing.

use async_trait::async_trait;

use super::LegacyMapping;
use crate::error::Result;

/// Trait for mapping persistence backends.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow sharing across units.
///
/// # Example
///
/// ```rust,ignore
/// let store: Arc<dyn MappingStore> = Arc::new(MysqlMappingStore::new(pool, "_LegacyMapping"));
/// store.init_schema().await?;
/// store.upsert(&LegacyMapping::new("SiteTree", 7, 42)).await?;
/// let found = store.find_by_remote("SiteTree", 42).await?;
/// ```
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Initialize the storage schema.
    ///
    /// This should be idempotent - safe to call multiple times.
    async fn init_schema(&self) -> Result<()>;

    /// Prepare storage for one object type before its first use.
    ///
    /// `remote_table` is the legacy table the type's rows are read from.
    /// Backends that keep mappings on the content tables provision their
    /// columns here.
    async fn prepare(&self, _object_type: &str, _remote_table: &str) -> Result<()> {
        Ok(())
    }

    /// Mapping for a remote row, if any.
    async fn find_by_remote(&self, object_type: &str, remote_id: i64)
        -> Result<Option<LegacyMapping>>;

    /// Mapping for a local record, if any.
    async fn find_by_local(&self, object_type: &str, local_id: i64)
        -> Result<Option<LegacyMapping>>;

    /// Insert a mapping, or refresh the imported date of the same pair.
    async fn upsert(&self, mapping: &LegacyMapping) -> Result<()>;

    /// Delete every mapping of the type that involves either id.
    async fn delete(&self, object_type: &str, local_id: i64, remote_id: i64) -> Result<()>;

    /// Every mapping of a type, ordered by remote id.
    async fn list(&self, object_type: &str) -> Result<Vec<LegacyMapping>>;

    /// Delete every mapping of a type and return how many were removed.
    async fn clear(&self, object_type: &str) -> Result<u64>;

    /// Get the backend type name for logging/debugging.
    fn backend_type(&self) -> &'static str;
}
