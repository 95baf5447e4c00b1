//! Strategy sets and importable row selection.
//!
//! A unit's strategy decides which remote rows the import pass looks at:
//!
//! | Add | Update | rows selected                         |
//! |-----|--------|---------------------------------------|
//! | yes | yes    | unmapped, or modified since last sync |
//! | no  | yes    | mapped and modified since last sync   |
//! | yes | no     | unmapped                              |
//! | no  | no     | none (identify only)                  |

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::RemoteRecord;
use crate::error::{ImportError, Result};
use crate::mapping::LegacyMapping;

/// One strategy keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// Create local records for unmapped remote rows.
    Add,
    /// Re-sync mapped records whose remote row changed.
    Update,
    /// Pair existing local records with remote rows by natural key.
    Identify,
    /// Replace every local record of the type.
    Truncate,
}

impl Strategy {
    /// Keyword as written in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Add => "Add",
            Strategy::Update => "Update",
            Strategy::Identify => "Identify",
            Strategy::Truncate => "Truncate",
        }
    }
}

/// Which remote rows the import pass processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Unmapped rows and mapped rows modified since their last sync.
    NewOrChanged,
    /// Mapped rows modified since their last sync.
    Changed,
    /// Unmapped rows.
    New,
    /// Nothing; the unit only identifies.
    Nothing,
}

/// Permanently configured strategy of a unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrategySet {
    pub add: bool,
    pub update: bool,
    pub identify: bool,
    pub truncate: bool,
}

impl StrategySet {
    /// Build a set from configured keywords.
    ///
    /// Truncate cannot be combined with anything else.
    pub fn from_list(strategies: &[Strategy]) -> Result<Self> {
        if strategies.is_empty() {
            return Err(ImportError::Config("strategy cannot be empty".into()));
        }
        let mut set = StrategySet::default();
        for strategy in strategies {
            match strategy {
                Strategy::Add => set.add = true,
                Strategy::Update => set.update = true,
                Strategy::Identify => set.identify = true,
                Strategy::Truncate => set.truncate = true,
            }
        }
        if set.truncate && (set.add || set.update || set.identify) {
            return Err(ImportError::Config(
                "Truncate cannot be combined with other strategies".into(),
            ));
        }
        Ok(set)
    }

    /// Row selection for the import pass.
    pub fn selection(&self) -> Selection {
        match (self.add, self.update) {
            (true, true) => Selection::NewOrChanged,
            (false, true) => Selection::Changed,
            (true, false) => Selection::New,
            (false, false) => Selection::Nothing,
        }
    }

    /// Keywords joined with `/`.
    pub fn label(&self) -> String {
        let mut names = Vec::new();
        if self.identify {
            names.push("Identify");
        }
        if self.add {
            names.push("Add");
        }
        if self.update {
            names.push("Update");
        }
        if self.truncate {
            names.push("Truncate");
        }
        names.join("/")
    }
}

/// True if the remote row changed since the mapping was last synced.
///
/// A mapping that was never synced (identified only) counts as modified;
/// a row without a readable modification timestamp does not.
pub fn is_modified(mapping: &LegacyMapping, remote: &RemoteRecord, modified_column: &str) -> bool {
    let Some(imported) = mapping.imported_date else {
        return true;
    };
    remote
        .get(modified_column)
        .and_then(|v| v.as_datetime())
        .is_some_and(|edited| edited > imported)
}

/// Filter remote rows down to the importable set, keeping their order.
pub fn select_rows<'a>(
    selection: Selection,
    rows: &'a [RemoteRecord],
    mapped: &HashMap<i64, LegacyMapping>,
    modified_column: &str,
) -> Vec<&'a RemoteRecord> {
    rows.iter()
        .filter(|row| {
            let mapping = mapped.get(&row.id());
            match (selection, mapping) {
                (Selection::Nothing, _) => false,
                (Selection::New, m) => m.is_none(),
                (Selection::Changed, Some(m)) => is_modified(m, row, modified_column),
                (Selection::Changed, None) => false,
                (Selection::NewOrChanged, None) => true,
                (Selection::NewOrChanged, Some(m)) => is_modified(m, row, modified_column),
            }
        })
        .collect()
}
