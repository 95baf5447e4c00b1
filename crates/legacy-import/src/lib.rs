//! # legacy-import
//!
//! Reconciliation engine for migrating content from a legacy CMS database
//! into a new one.
//!
//! A run walks an ordered list of import units through three passes:
//!
//! - **identify** pairs existing local records with remote rows by natural key
//! - **import** adds and updates local records, remapping relation ids
//! - **link** re-resolves relations whose targets were imported later
//!
//! Every pairing is kept in a durable identity map, so runs are idempotent and
//! may be repeated to converge.
//!
//! ## Example
//!
//! ```rust,no_run
//! use legacy_import::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> legacy_import::Result<()> {
//! let config = Config::load("import.yaml")?;
//! let orchestrator = Orchestrator::new(config).await?;
//! let result = orchestrator.run(None, None, CancellationToken::new()).await?;
//! println!("{}", result.totals.summary());
//! # Ok(())
//! # }
//! ```

pub mod bulk;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod helpers;
pub mod importer;
pub mod mapping;
pub mod orchestrator;

// Re-exports for convenient access
pub use bulk::{bulk_import, BulkOptions, BulkReport, KeepRelations};
pub use config::{Config, ConflictPolicy, MappingStorage, UnitConfig, DEFAULT_GROUP};
pub use core::{
    Condition, FieldKind, LocalRecord, LocalStore, Record, RemoteRecord, RemoteSource,
    SelectQuery, TypeCatalog, TypeDef, Value,
};
pub use drivers::{MemoryLocalStore, MemoryRemote, MysqlLocalStore, MysqlRemote};
pub use error::{ImportError, Result};
pub use helpers::{AssetLinker, Helper};
pub use importer::{ImportContext, Importer, Strategy, UnitReport};
pub use mapping::{
    ColumnMappingStore, IdentityMap, LegacyMapping, MappingStore, MemoryMappingStore,
};
pub use orchestrator::progress::{JsonProgress, LogProgress, NoProgress, ProgressSink};
pub use orchestrator::{HealthCheckResult, ImportResult, Orchestrator, Pass, UnitStatus};
