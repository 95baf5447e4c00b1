//! Database backend implementations.
//!
//! This module provides implementations of the collaborator traits in
//! [`crate::core::traits`]:
//!
//! - [`mysql`]: MySQL/MariaDB, used for both the legacy and the local database
//! - [`memory`]: in-memory backends for tests and dry runs
//!
//! # Adding New Backends
//!
//! 1. Create a new module under `drivers/`
//! 2. Implement `RemoteSource` and/or `LocalStore`
//! 3. Construct it in `Orchestrator::new` or pass it to `Orchestrator::with_backends`

pub mod memory;
pub mod mysql;

pub use memory::{MemoryLocalStore, MemoryRemote};
pub use mysql::{MysqlLocalStore, MysqlRemote};
