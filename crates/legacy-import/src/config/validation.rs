//! Configuration validation.
//!
//! Everything checked here aborts the run before any database is touched.

use super::{Config, DatabaseConfig, ImporterKind, UnitConfig};
use crate::core::TypeCatalog;
use crate::error::{ImportError, Result};
use crate::importer::strategy::{Strategy, StrategySet};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_database("remote", &config.remote)?;
    validate_database("local", &config.local)?;

    // Cannot migrate into the database being read
    if config.remote.host == config.local.host
        && config.remote.port == config.local.port
        && config.remote.database == config.local.database
    {
        return Err(ImportError::Config(
            "remote and local cannot be the same database".into(),
        ));
    }

    if config.mapping.table.is_empty() {
        return Err(ImportError::Config("mapping.table cannot be empty".into()));
    }

    let catalog = config.catalog()?;

    for (group, units) in &config.groups {
        for (index, unit) in units.iter().enumerate() {
            validate_unit(config, &catalog, unit).map_err(|e| match e {
                ImportError::Config(msg) => {
                    ImportError::Config(format!("groups.{}[{}]: {}", group, index, msg))
                }
                other => other,
            })?;
        }
    }

    Ok(())
}

fn validate_database(section: &str, db: &DatabaseConfig) -> Result<()> {
    if db.host.is_empty() {
        return Err(ImportError::Config(format!("{}.host is required", section)));
    }
    if db.database.is_empty() {
        return Err(ImportError::Config(format!("{}.database is required", section)));
    }
    if db.user.is_empty() {
        return Err(ImportError::Config(format!("{}.user is required", section)));
    }
    Ok(())
}

fn validate_unit(config: &Config, catalog: &TypeCatalog, unit: &UnitConfig) -> Result<()> {
    for helper in &unit.helpers {
        if !config.helpers.contains_key(helper) {
            return Err(ImportError::Config(format!("unknown helper '{}'", helper)));
        }
    }
    if !unit.helpers.is_empty() {
        catalog.require(&config.assets.file_type)?;
    }

    let kind = unit.effective_kind();
    if kind == ImporterKind::Relation {
        return validate_relation_unit(catalog, unit);
    }

    let class = unit.effective_class(&config.assets);
    if class.is_empty() {
        return Err(ImportError::Config("missing class".into()));
    }
    catalog.require(class)?;

    let strategy = unit.effective_strategy();
    if strategy.is_empty() {
        return Err(ImportError::Config(format!("missing strategy for {}", class)));
    }
    let set = StrategySet::from_list(&strategy)?;
    if kind == ImporterKind::Truncate && !set.truncate {
        return Err(ImportError::Config(format!(
            "truncate importer for {} requires the Truncate strategy",
            class
        )));
    }

    if set.truncate && catalog.is_hierarchical(class) {
        return Err(ImportError::Config(format!(
            "refusing to truncate hierarchical type {}",
            class
        )));
    }
    if set.truncate && !unit.helpers.is_empty() {
        return Err(ImportError::Config(
            "helpers do not run for the Truncate strategy".into(),
        ));
    }
    if set.identify && unit.effective_idcolumns().is_empty() {
        return Err(ImportError::Config(format!(
            "cannot Identify {} without idcolumns",
            class
        )));
    }
    if kind == ImporterKind::Hierarchy && !catalog.is_hierarchical(class) {
        return Err(ImportError::Config(format!(
            "hierarchy importer requires a hierarchical type, {} is not",
            class
        )));
    }
    if unit.publish && !catalog.is_versioned(class) {
        return Err(ImportError::Config(format!(
            "cannot publish {}: type is not versioned",
            class
        )));
    }
    for (relation, related) in &unit.relations {
        if !catalog.contains(related) {
            return Err(ImportError::Config(format!(
                "relation override {} points to unknown type '{}'",
                relation, related
            )));
        }
    }
    if unit.preload_command.is_some() && kind != ImporterKind::Assets {
        return Err(ImportError::Config(
            "preload_command is only valid for asset units".into(),
        ));
    }
    if unit.modified_column.is_empty() {
        return Err(ImportError::Config("modified_column cannot be empty".into()));
    }

    Ok(())
}

fn validate_relation_unit(catalog: &TypeCatalog, unit: &UnitConfig) -> Result<()> {
    let table = unit.table.as_deref().unwrap_or_default();
    if table.is_empty() {
        return Err(ImportError::Config("relation unit requires a table".into()));
    }
    if unit.fields.is_empty() {
        return Err(ImportError::Config(format!(
            "relation unit for {} requires fields",
            table
        )));
    }
    for related in unit.fields.values() {
        catalog.require(related)?;
    }
    if unit.effective_strategy() != vec![Strategy::Add] {
        return Err(ImportError::Config(format!(
            "relation unit for {} is add-only",
            table
        )));
    }
    Ok(())
}
