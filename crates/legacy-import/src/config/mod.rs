//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::core::TypeCatalog;
use crate::error::{ImportError, Result};
use std::path::Path;

/// Group run when none is named.
pub const DEFAULT_GROUP: &str = "tasks";

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Build the type catalog from the configured types.
    pub fn catalog(&self) -> Result<TypeCatalog> {
        TypeCatalog::from_defs(self.types.iter().cloned())
    }

    /// Units of a named group, in declared order.
    pub fn group(&self, name: &str) -> Result<&[UnitConfig]> {
        self.groups.get(name).map(Vec::as_slice).ok_or_else(|| {
            let known: Vec<&str> = self.groups.keys().map(String::as_str).collect();
            ImportError::Config(format!(
                "unknown group '{}' (configured: {})",
                name,
                known.join(", ")
            ))
        })
    }

    /// Descriptions of every unit in a group, for planning output.
    pub fn describe_group(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .group(name)?
            .iter()
            .map(|unit| unit.describe(&self.assets))
            .collect())
    }
}

impl DatabaseConfig {
    /// Command line arguments for the `mysql` and `mysqldump` clients.
    ///
    /// The password is not included; it is passed through `MYSQL_PWD`.
    pub fn client_args(&self) -> Vec<String> {
        vec![
            format!("--user={}", self.user),
            format!("--host={}", self.host),
            format!("--port={}", self.port),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
remote:
  host: legacy.internal
  database: ss23
  user: reader
  password: secret
local:
  host: localhost
  database: ss4
  user: root
types:
  - name: SiteTree
    tracked: true
    hierarchical: true
    versioned: true
    fields:
      Title: varchar
      URLSegment: varchar
      Content: html
    has_one:
      Parent: SiteTree
  - name: Page
    parent: SiteTree
  - name: File
    tracked: true
    fields:
      Filename: varchar
      Name: varchar
  - name: Folder
    parent: File
  - name: Image
    parent: File
helpers:
  assets:
    kind: asset_linker
groups:
  tasks:
    - importer: hierarchy
      class: SiteTree
      strategy: [Identify, Add, Update]
      idcolumns: [ParentID, URLSegment]
      publish: true
      helpers: [assets]
    - importer: assets
      strategy: Identify
      preload_command: rsync -a legacy:/var/www/assets/ assets/
"#;

    #[test]
    fn test_from_yaml() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.remote.port, 3306);
        assert_eq!(config.mapping.storage, MappingStorage::SideTable);
        assert_eq!(config.mapping.conflicts, ConflictPolicy::Reject);
        assert_eq!(config.types.len(), 5);

        let units = config.group(DEFAULT_GROUP).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].strategy.len(), 3);
        assert_eq!(units[1].effective_class(&config.assets), "File");
        assert_eq!(units[1].effective_idcolumns(), vec!["Filename".to_string()]);
    }

    #[test]
    fn test_describe_group() {
        let config = Config::from_yaml(YAML).unwrap();
        let plan = config.describe_group(DEFAULT_GROUP).unwrap();
        assert_eq!(
            plan,
            vec![
                "HierarchyImporter for SiteTree with strategy Identify/Add/Update".to_string(),
                "AssetImporter for File with strategy Identify".to_string(),
            ]
        );
    }

    #[test]
    fn test_unknown_group() {
        let config = Config::from_yaml(YAML).unwrap();
        assert!(matches!(config.group("nope"), Err(ImportError::Config(_))));
    }

    #[test]
    fn test_password_redacted() {
        let config = Config::from_yaml(YAML).unwrap();
        let debug = format!("{:?}", config.remote);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
