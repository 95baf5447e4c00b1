//! In-memory mapping store.
//!
//! Used by tests and dry runs. Mappings are lost when the process exits.

use async_trait::async_trait;
use std::sync::Mutex;

use super::backend::MappingStore;
use super::LegacyMapping;
use crate::error::Result;

/// Mapping store backed by a vector.
#[derive(Default)]
pub struct MemoryMappingStore {
    mappings: Mutex<Vec<LegacyMapping>>,
}

impl MemoryMappingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored mapping, for assertions.
    pub fn all(&self) -> Vec<LegacyMapping> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LegacyMapping>> {
        // A poisoned lock only means a test panicked mid-write
        self.mappings.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn find_by_remote(
        &self,
        object_type: &str,
        remote_id: i64,
    ) -> Result<Option<LegacyMapping>> {
        Ok(self
            .lock()
            .iter()
            .find(|m| m.object_type == object_type && m.remote_id == remote_id)
            .cloned())
    }

    async fn find_by_local(
        &self,
        object_type: &str,
        local_id: i64,
    ) -> Result<Option<LegacyMapping>> {
        Ok(self
            .lock()
            .iter()
            .find(|m| m.object_type == object_type && m.local_id == local_id)
            .cloned())
    }

    async fn upsert(&self, mapping: &LegacyMapping) -> Result<()> {
        let mut mappings = self.lock();
        match mappings.iter_mut().find(|m| {
            m.object_type == mapping.object_type
                && m.local_id == mapping.local_id
                && m.remote_id == mapping.remote_id
        }) {
            Some(existing) => existing.imported_date = mapping.imported_date,
            None => mappings.push(mapping.clone()),
        }
        Ok(())
    }

    async fn delete(&self, object_type: &str, local_id: i64, remote_id: i64) -> Result<()> {
        self.lock().retain(|m| {
            !(m.object_type == object_type && (m.local_id == local_id || m.remote_id == remote_id))
        });
        Ok(())
    }

    async fn list(&self, object_type: &str) -> Result<Vec<LegacyMapping>> {
        let mut found: Vec<LegacyMapping> = self
            .lock()
            .iter()
            .filter(|m| m.object_type == object_type)
            .cloned()
            .collect();
        found.sort_by_key(|m| m.remote_id);
        Ok(found)
    }

    async fn clear(&self, object_type: &str) -> Result<u64> {
        let mut mappings = self.lock();
        let before = mappings.len();
        mappings.retain(|m| m.object_type != object_type);
        Ok((before - mappings.len()) as u64)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
