//! Content type metadata shared by the legacy and local schemas.
//!
//! Each content type maps to one table of the same name. Subtypes add their
//! own table, joined to the base type's table on `ID`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Storage kind of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Short text.
    Varchar,
    /// Long plain text.
    Text,
    /// Rich text that may embed asset references.
    Html,
    /// Integer.
    Int,
    /// Fixed point number.
    Decimal,
    /// Boolean flag.
    Boolean,
    /// Date and time.
    Datetime,
    /// Enumerated string.
    Enum,
}

impl FieldKind {
    /// MySQL column specification used when provisioning a missing column.
    pub fn column_spec(&self) -> &'static str {
        match self {
            FieldKind::Varchar => "varchar(255) character set utf8mb4 default null",
            FieldKind::Text | FieldKind::Html => "mediumtext character set utf8mb4",
            FieldKind::Int => "int(11) not null default 0",
            FieldKind::Decimal => "decimal(9,2) not null default 0.00",
            FieldKind::Boolean => "tinyint(1) unsigned not null default 0",
            FieldKind::Datetime => "datetime default null",
            FieldKind::Enum => "varchar(100) character set utf8mb4 default null",
        }
    }
}

/// Definition of one content type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    /// Type name, also the name of its table.
    pub name: String,

    /// Parent type, if this is a subtype.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Fields stored on this type's own table.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldKind>,

    /// Single-valued relations: relation name to related type.
    /// The relation is stored in the `<name>ID` column.
    #[serde(default)]
    pub has_one: BTreeMap<String, String>,

    /// Records form a tree through `ParentID`.
    #[serde(default)]
    pub hierarchical: bool,

    /// Records carry legacy identity and may be targeted by import units.
    #[serde(default)]
    pub tracked: bool,

    /// Records have a published (`<table>_Live`) stage.
    #[serde(default)]
    pub versioned: bool,
}

impl TypeDef {
    /// Create a bare type definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            fields: BTreeMap::new(),
            has_one: BTreeMap::new(),
            hierarchical: false,
            tracked: false,
            versioned: false,
        }
    }

    /// Set the parent type.
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Declare a field.
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(name.into(), kind);
        self
    }

    /// Declare a has-one relation.
    pub fn has_one(mut self, relation: impl Into<String>, related: impl Into<String>) -> Self {
        self.has_one.insert(relation.into(), related.into());
        self
    }

    /// Mark the type as carrying legacy identity.
    pub fn tracked(mut self) -> Self {
        self.tracked = true;
        self
    }

    /// Mark the type as tree-structured.
    pub fn hierarchical(mut self) -> Self {
        self.hierarchical = true;
        self
    }

    /// Mark the type as having a published stage.
    pub fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    /// Columns stored on this type's own table, excluding `ID`.
    pub fn own_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self.fields.keys().cloned().collect();
        columns.extend(self.has_one.keys().map(|r| format!("{}ID", r)));
        columns
    }
}
