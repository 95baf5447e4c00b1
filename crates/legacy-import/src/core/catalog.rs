//! Type catalog for explicit class resolution.
//!
//! The [`TypeCatalog`] is built once from configuration and passed to every
//! importer and helper. It answers inheritance questions (ancestry, base type,
//! subtypes) and decides which concrete type a remote row becomes, replacing
//! any lookup of types by name at runtime.
//!
//! # Example
//!
//! ```rust
//! use legacy_import::core::{TypeCatalog, TypeDef};
//!
//! let catalog = TypeCatalog::from_defs(vec![
//!     TypeDef::new("SiteTree").tracked().hierarchical(),
//!     TypeDef::new("Page").extends("SiteTree"),
//! ])
//! .unwrap();
//!
//! assert_eq!(catalog.base_type("Page"), "SiteTree");
//! assert_eq!(catalog.resolve_class("SiteTree", Some("Page")), "Page");
//! assert_eq!(catalog.resolve_class("Page", Some("Unknown")), "Page");
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};

use super::schema::{FieldKind, TypeDef};
use crate::error::{ImportError, Result};

/// Registry of content types.
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    /// Registered types by name.
    types: HashMap<String, TypeDef>,

    /// Registration order, used for stable iteration.
    order: Vec<String>,
}

impl TypeCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate a catalog from definitions.
    pub fn from_defs(defs: impl IntoIterator<Item = TypeDef>) -> Result<Self> {
        let mut catalog = Self::new();
        for def in defs {
            catalog.register(def)?;
        }
        catalog.validate()?;
        Ok(catalog)
    }

    /// Register a type definition.
    pub fn register(&mut self, def: TypeDef) -> Result<()> {
        if self.types.contains_key(&def.name) {
            return Err(ImportError::Config(format!(
                "type '{}' is defined more than once",
                def.name
            )));
        }
        self.order.push(def.name.clone());
        self.types.insert(def.name.clone(), def);
        Ok(())
    }

    /// Check parents, relation targets and inheritance cycles.
    pub fn validate(&self) -> Result<()> {
        for name in &self.order {
            let def = &self.types[name];
            if let Some(parent) = &def.parent {
                if !self.types.contains_key(parent) {
                    return Err(ImportError::Config(format!(
                        "type '{}' extends unknown type '{}'",
                        name, parent
                    )));
                }
            }
            for (relation, related) in &def.has_one {
                if !self.types.contains_key(related) {
                    return Err(ImportError::Config(format!(
                        "relation {}.{} points to unknown type '{}'",
                        name, relation, related
                    )));
                }
            }

            let mut seen = HashSet::new();
            let mut current = Some(name.as_str());
            while let Some(type_name) = current {
                if !seen.insert(type_name) {
                    return Err(ImportError::Config(format!(
                        "type '{}' has a cyclic inheritance chain",
                        name
                    )));
                }
                current = self.types.get(type_name).and_then(|d| d.parent.as_deref());
            }
        }
        Ok(())
    }

    /// Check if a type is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Get a type definition.
    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// Get a type definition or fail with a configuration error.
    pub fn require(&self, name: &str) -> Result<&TypeDef> {
        self.get(name)
            .ok_or_else(|| ImportError::Config(format!("unknown type '{}'", name)))
    }

    /// Registered type names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Inheritance chain from the base type down to `name`.
    pub fn ancestry(&self, name: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self.types.get(name);
        while let Some(def) = current {
            if chain.len() > self.types.len() {
                break;
            }
            chain.push(def.name.as_str());
            current = def.parent.as_deref().and_then(|p| self.types.get(p));
        }
        chain.reverse();
        chain
    }

    /// Root of the inheritance chain; mappings are stored under this name.
    pub fn base_type<'a>(&'a self, name: &'a str) -> &'a str {
        self.ancestry(name).first().copied().unwrap_or(name)
    }

    /// Check whether `name` is `ancestor` or one of its subtypes.
    pub fn is_a(&self, name: &str, ancestor: &str) -> bool {
        self.ancestry(name).contains(&ancestor)
    }

    /// `name` and every registered subtype of it.
    pub fn descendants(&self, name: &str) -> Vec<&str> {
        self.order
            .iter()
            .map(String::as_str)
            .filter(|candidate| self.is_a(candidate, name))
            .collect()
    }

    /// Every table holding data for `name`: its ancestors and its subtypes.
    pub fn data_tables_for(&self, name: &str) -> Vec<String> {
        let mut tables: Vec<String> = self.ancestry(name).iter().map(|s| s.to_string()).collect();
        for descendant in self.descendants(name) {
            if descendant != name {
                tables.push(descendant.to_string());
            }
        }
        tables
    }

    /// True if the type or any ancestor is tree-structured.
    pub fn is_hierarchical(&self, name: &str) -> bool {
        self.ancestry(name)
            .iter()
            .any(|t| self.types.get(*t).is_some_and(|d| d.hierarchical))
    }

    /// True if the type or any ancestor carries legacy identity.
    pub fn is_tracked(&self, name: &str) -> bool {
        self.ancestry(name)
            .iter()
            .any(|t| self.types.get(*t).is_some_and(|d| d.tracked))
    }

    /// True if the type or any ancestor has a published stage.
    pub fn is_versioned(&self, name: &str) -> bool {
        self.ancestry(name)
            .iter()
            .any(|t| self.types.get(*t).is_some_and(|d| d.versioned))
    }

    /// Every has-one relation of a type, including inherited ones.
    pub fn has_one_all(&self, name: &str) -> BTreeMap<String, String> {
        let mut relations = BTreeMap::new();
        for type_name in self.ancestry(name) {
            if let Some(def) = self.types.get(type_name) {
                relations.extend(def.has_one.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        relations
    }

    /// Related type of a has-one relation, including inherited ones.
    pub fn relation_type(&self, name: &str, relation: &str) -> Option<&str> {
        self.ancestry(name)
            .into_iter()
            .rev()
            .filter_map(|t| self.types.get(t))
            .find_map(|d| d.has_one.get(relation).map(String::as_str))
    }

    /// Every declared field of a type, including inherited ones.
    pub fn fields_all(&self, name: &str) -> BTreeMap<String, FieldKind> {
        let mut fields = BTreeMap::new();
        for type_name in self.ancestry(name) {
            if let Some(def) = self.types.get(type_name) {
                fields.extend(def.fields.iter().map(|(k, v)| (k.clone(), *v)));
            }
        }
        fields
    }

    /// Every declared column of a type, including inherited ones.
    pub fn declared_columns(&self, name: &str) -> Vec<String> {
        self.ancestry(name)
            .into_iter()
            .filter_map(|t| self.types.get(t))
            .flat_map(TypeDef::own_columns)
            .collect()
    }

    /// Rich text fields of a type, including inherited ones.
    pub fn html_fields(&self, name: &str) -> Vec<String> {
        self.fields_all(name)
            .into_iter()
            .filter(|(_, kind)| *kind == FieldKind::Html)
            .map(|(field, _)| field)
            .collect()
    }

    /// Table within the ancestry of `name` that stores `column`.
    pub fn table_for_column(&self, name: &str, column: &str) -> Option<&str> {
        self.ancestry(name).into_iter().rev().find(|t| {
            self.types
                .get(*t)
                .is_some_and(|d| d.own_columns().iter().any(|c| c == column))
        })
    }

    /// Concrete type for a row of `target`, given its discriminator.
    ///
    /// The discriminator is used only when it names a registered subtype of
    /// `target`; anything else falls back to `target`.
    pub fn resolve_class<'a>(&'a self, target: &'a str, discriminator: Option<&'a str>) -> &'a str {
        match discriminator {
            Some(class) if self.contains(class) && self.is_a(class, target) => class,
            _ => target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> TypeCatalog {
        TypeCatalog::from_defs(vec![
            TypeDef::new("SiteTree")
                .tracked()
                .hierarchical()
                .versioned()
                .field("Title", FieldKind::Varchar)
                .field("Content", FieldKind::Html)
                .has_one("Parent", "SiteTree"),
            TypeDef::new("Page").extends("SiteTree"),
            TypeDef::new("NewsPage")
                .extends("Page")
                .field("Summary", FieldKind::Html)
                .has_one("Image", "Image"),
            TypeDef::new("File").tracked().field("Filename", FieldKind::Varchar),
            TypeDef::new("Image").extends("File"),
            TypeDef::new("Folder").extends("File"),
            TypeDef::new("Tag"),
        ])
        .unwrap()
    }

    #[test]
    fn test_ancestry_and_base() {
        let c = catalog();
        assert_eq!(c.ancestry("NewsPage"), vec!["SiteTree", "Page", "NewsPage"]);
        assert_eq!(c.base_type("NewsPage"), "SiteTree");
        assert_eq!(c.base_type("Tag"), "Tag");
        assert!(c.is_a("Image", "File"));
        assert!(!c.is_a("File", "Image"));
    }

    #[test]
    fn test_inherited_flags() {
        let c = catalog();
        assert!(c.is_hierarchical("NewsPage"));
        assert!(c.is_tracked("Image"));
        assert!(c.is_versioned("Page"));
        assert!(!c.is_tracked("Tag"));
    }

    #[test]
    fn test_data_tables_for() {
        let c = catalog();
        assert_eq!(c.data_tables_for("File"), vec!["File", "Image", "Folder"]);
        assert_eq!(c.data_tables_for("Page"), vec!["SiteTree", "Page", "NewsPage"]);
    }

    #[test]
    fn test_relations_and_fields() {
        let c = catalog();
        assert_eq!(c.relation_type("NewsPage", "Parent"), Some("SiteTree"));
        assert_eq!(c.relation_type("NewsPage", "Image"), Some("Image"));
        assert_eq!(c.relation_type("Page", "Image"), None);
        assert_eq!(c.html_fields("NewsPage"), vec!["Content", "Summary"]);
        assert_eq!(c.table_for_column("NewsPage", "ParentID"), Some("SiteTree"));
        assert_eq!(c.table_for_column("NewsPage", "Summary"), Some("NewsPage"));
    }

    #[test]
    fn test_resolve_class() {
        let c = catalog();
        assert_eq!(c.resolve_class("SiteTree", Some("NewsPage")), "NewsPage");
        assert_eq!(c.resolve_class("Page", Some("SiteTree")), "Page");
        assert_eq!(c.resolve_class("Page", Some("ErrorPage")), "Page");
        assert_eq!(c.resolve_class("File", None), "File");
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let result = TypeCatalog::from_defs(vec![TypeDef::new("Page").extends("SiteTree")]);
        assert!(matches!(result, Err(ImportError::Config(_))));
    }

    #[test]
    fn test_cycle_rejected() {
        let result = TypeCatalog::from_defs(vec![
            TypeDef::new("A").extends("B"),
            TypeDef::new("B").extends("A"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut c = TypeCatalog::new();
        c.register(TypeDef::new("File")).unwrap();
        assert!(c.register(TypeDef::new("File")).is_err());
    }
}
