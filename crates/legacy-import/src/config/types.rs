//! Configuration type definitions.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::core::{Condition, TypeDef, Value};
use crate::importer::strategy::Strategy;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Legacy database the content is migrated from.
    pub remote: DatabaseConfig,

    /// Destination database the content is migrated into.
    pub local: DatabaseConfig,

    /// Where and how legacy mappings are stored.
    #[serde(default)]
    pub mapping: MappingConfig,

    /// Asset fetching settings.
    #[serde(default)]
    pub assets: AssetsConfig,

    /// Content types known to both schemas.
    #[serde(default)]
    pub types: Vec<TypeDef>,

    /// Named helper definitions referenced by units.
    #[serde(default)]
    pub helpers: BTreeMap<String, HelperConfig>,

    /// Named, ordered lists of import units.
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<UnitConfig>>,
}

/// MySQL connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode: disable, prefer, require, verify-ca, verify-full (default: "prefer").
    #[serde(default = "default_prefer")]
    pub ssl_mode: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Mapping persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Storage layout (default: side_table).
    #[serde(default)]
    pub storage: MappingStorage,

    /// What to do when a new mapping collides with an existing one (default: reject).
    #[serde(default)]
    pub conflicts: ConflictPolicy,

    /// Side table name (default: "_LegacyMapping").
    #[serde(default = "default_mapping_table")]
    pub table: String,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            storage: MappingStorage::default(),
            conflicts: ConflictPolicy::default(),
            table: default_mapping_table(),
        }
    }
}

/// Mapping storage layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStorage {
    /// One `_LegacyMapping` table in the local database.
    #[default]
    SideTable,
    /// `_ImportedID`/`_ImportedDate` on remote tables and `LegacyID` on local ones.
    LegacyColumns,
}

/// Policy for a mapping that would pair an already-paired record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Refuse the new mapping and report a conflict.
    #[default]
    Reject,
    /// Replace the existing mapping (last write wins).
    Overwrite,
}

/// Asset fetching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// Public base URL of the legacy site, e.g. `https://old.example.com`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_site: Option<String>,

    /// Local web root that asset paths are relative to (default: ".").
    #[serde(default = "default_base_folder")]
    pub base_folder: PathBuf,

    /// Asset directory prefix (default: "assets").
    #[serde(default = "default_assets_dir")]
    pub assets_dir: String,

    /// Extensions a linked file may have.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    /// File content type (default: "File").
    #[serde(default = "default_file_type")]
    pub file_type: String,

    /// Folder content type (default: "Folder").
    #[serde(default = "default_folder_type")]
    pub folder_type: String,

    /// Concrete file type per extension; unlisted extensions use `file_type`.
    #[serde(default = "default_class_for_extension")]
    pub class_for_extension: BTreeMap<String, String>,

    /// HTTP timeout for a single fetch in seconds (default: 30).
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            remote_site: None,
            base_folder: default_base_folder(),
            assets_dir: default_assets_dir(),
            allowed_extensions: default_allowed_extensions(),
            file_type: default_file_type(),
            folder_type: default_folder_type(),
            class_for_extension: default_class_for_extension(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl AssetsConfig {
    /// Content type for a file with the given extension.
    pub fn class_for_extension(&self, extension: &str) -> &str {
        self.class_for_extension
            .get(&extension.to_lowercase())
            .map(String::as_str)
            .unwrap_or(&self.file_type)
    }

    /// Check a file name against the extension allow-list.
    pub fn is_allowed(&self, name: &str) -> bool {
        let extension = match name.rsplit_once('.') {
            Some((_, ext)) => ext.to_lowercase(),
            None => String::new(),
        };
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.to_lowercase() == extension)
    }
}

/// Helper definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperConfig {
    /// Helper implementation.
    pub kind: HelperKind,

    /// Raw SQL conditions restricting the remote rows the helper reads.
    #[serde(default)]
    pub r#where: Vec<String>,
}

/// Available helper implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HelperKind {
    /// Fetches referenced files and links file relations.
    AssetLinker,
}

/// Importer implementation for a unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImporterKind {
    /// Flat natural-key matching and field sync.
    #[default]
    DataObject,
    /// Depth-first matching through `ParentID`.
    Hierarchy,
    /// Many-to-many join table rows.
    Relation,
    /// Destroy and replace every record of a type.
    Truncate,
    /// File records, optionally preloading the asset tree.
    Assets,
}

impl ImporterKind {
    /// Label used in unit descriptions.
    pub fn label(&self) -> &'static str {
        match self {
            ImporterKind::DataObject => "DataObjectImporter",
            ImporterKind::Hierarchy => "HierarchyImporter",
            ImporterKind::Relation => "RelationImporter",
            ImporterKind::Truncate => "TruncateImporter",
            ImporterKind::Assets => "AssetImporter",
        }
    }
}

/// One configured migration rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Importer implementation (default: data_object).
    #[serde(default)]
    pub importer: ImporterKind,

    /// Target content type.
    #[serde(default)]
    pub class: String,

    /// Strategy: one of Add, Update, Identify, Truncate, or a list.
    #[serde(default, deserialize_with = "one_or_many")]
    pub strategy: Vec<Strategy>,

    /// Natural key columns used for identification.
    #[serde(default)]
    pub idcolumns: Vec<String>,

    /// Column equality filter applied to remote rows.
    #[serde(default)]
    pub filter: BTreeMap<String, serde_yaml::Value>,

    /// Raw SQL conditions applied to remote rows.
    #[serde(default)]
    pub r#where: Vec<String>,

    /// Helper names, run in order after each field copy.
    #[serde(default)]
    pub helpers: Vec<String>,

    /// Publish local records whose remote counterpart is live.
    #[serde(default)]
    pub publish: bool,

    /// Remote table to read instead of the type's base table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_table: Option<String>,

    /// Remote column to local column renames.
    #[serde(default)]
    pub field_map: BTreeMap<String, String>,

    /// Relation name to type for relation columns not declared on the type.
    #[serde(default)]
    pub relations: BTreeMap<String, String>,

    /// Remote modification timestamp column (default: "LastEdited").
    #[serde(default = "default_modified_column")]
    pub modified_column: String,

    /// Join table for relation units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    /// Join table column to related type, for relation units.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,

    /// Shell command that syncs the remote asset tree, for asset units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preload_command: Option<String>,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            importer: ImporterKind::default(),
            class: String::new(),
            strategy: Vec::new(),
            idcolumns: Vec::new(),
            filter: BTreeMap::new(),
            r#where: Vec::new(),
            helpers: Vec::new(),
            publish: false,
            remote_table: None,
            field_map: BTreeMap::new(),
            relations: BTreeMap::new(),
            modified_column: default_modified_column(),
            table: None,
            fields: BTreeMap::new(),
            preload_command: None,
        }
    }
}

impl UnitConfig {
    /// Importer implementation after applying strategy shortcuts.
    pub fn effective_kind(&self) -> ImporterKind {
        if self.strategy.contains(&Strategy::Truncate) {
            ImporterKind::Truncate
        } else {
            self.importer
        }
    }

    /// Target type, with the asset importer defaulting to the file type.
    pub fn effective_class<'a>(&'a self, assets: &'a AssetsConfig) -> &'a str {
        if self.class.is_empty() && self.importer == ImporterKind::Assets {
            &assets.file_type
        } else {
            &self.class
        }
    }

    /// Natural key columns, with per-importer defaults.
    pub fn effective_idcolumns(&self) -> Vec<String> {
        if !self.idcolumns.is_empty() {
            return self.idcolumns.clone();
        }
        match self.importer {
            ImporterKind::Hierarchy => vec!["ClassName".into(), "URLSegment".into()],
            ImporterKind::Assets => vec!["Filename".into()],
            _ => Vec::new(),
        }
    }

    /// Strategies, with relation units defaulting to Add.
    pub fn effective_strategy(&self) -> Vec<Strategy> {
        if self.strategy.is_empty() && self.importer == ImporterKind::Relation {
            vec![Strategy::Add]
        } else {
            self.strategy.clone()
        }
    }

    /// Remote row filter as query conditions.
    pub fn conditions(&self) -> Vec<Condition> {
        let mut conditions: Vec<Condition> = self
            .filter
            .iter()
            .map(|(column, value)| Condition::Eq(column.clone(), Value::from_yaml(value)))
            .collect();
        conditions.extend(self.r#where.iter().cloned().map(Condition::Raw));
        conditions
    }

    /// Local column written for a remote column.
    pub fn local_column<'a>(&'a self, remote_column: &'a str) -> &'a str {
        self.field_map
            .get(remote_column)
            .map(String::as_str)
            .unwrap_or(remote_column)
    }

    /// Remote column read for a local column.
    pub fn remote_column<'a>(&'a self, local_column: &'a str) -> &'a str {
        self.field_map
            .iter()
            .find(|(_, local)| local.as_str() == local_column)
            .map(|(remote, _)| remote.as_str())
            .unwrap_or(local_column)
    }

    /// Human-readable identification of the unit.
    pub fn describe(&self, assets: &AssetsConfig) -> String {
        let kind = self.effective_kind();
        if kind == ImporterKind::Relation {
            return format!(
                "{} for {}",
                kind.label(),
                self.table.as_deref().unwrap_or("<unset>")
            );
        }
        let mut desc = kind.label().to_string();
        let class = self.effective_class(assets);
        if !class.is_empty() {
            desc.push_str(&format!(" for {}", class));
        }
        let strategy = self.effective_strategy();
        if !strategy.is_empty() {
            let names: Vec<&str> = strategy.iter().map(Strategy::as_str).collect();
            desc.push_str(&format!(" with strategy {}", names.join("/")));
        }
        desc
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<Strategy>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(Strategy),
        Many(Vec<Strategy>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

// Default value functions
fn default_mysql_port() -> u16 {
    3306
}

fn default_prefer() -> String {
    "prefer".to_string()
}

fn default_mapping_table() -> String {
    "_LegacyMapping".to_string()
}

fn default_base_folder() -> PathBuf {
    PathBuf::from(".")
}

fn default_assets_dir() -> String {
    "assets".to_string()
}

fn default_allowed_extensions() -> Vec<String> {
    [
        "jpg", "jpeg", "png", "gif", "bmp", "svg", "ico", "pdf", "doc", "docx", "xls", "xlsx",
        "ppt", "pptx", "txt", "csv", "rtf", "zip", "mp3", "mp4", "mov", "avi",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_file_type() -> String {
    "File".to_string()
}

fn default_folder_type() -> String {
    "Folder".to_string()
}

fn default_class_for_extension() -> BTreeMap<String, String> {
    ["jpg", "jpeg", "png", "gif"]
        .iter()
        .map(|ext| (ext.to_string(), "Image".to_string()))
        .collect()
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_modified_column() -> String {
    "LastEdited".to_string()
}
