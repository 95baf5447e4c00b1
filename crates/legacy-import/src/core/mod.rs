//! Core abstractions shared by importers, helpers and drivers.
//!
//! - [`value`]: field values and records
//! - [`query`]: structured select specification
//! - [`schema`]: content type definitions
//! - [`catalog`]: type registry used for class resolution
//! - [`traits`]: remote and local collaborator traits

pub mod catalog;
pub mod query;
pub mod schema;
pub mod traits;
pub mod value;

pub use catalog::TypeCatalog;
pub use query::{Condition, Join, SelectQuery};
pub use schema::{FieldKind, TypeDef};
pub use traits::{ensure_local_column, ensure_remote_column, LocalStore, RemoteSource};
pub use value::{LocalRecord, Record, RemoteRecord, Value, DATETIME_FORMAT};

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if another holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
