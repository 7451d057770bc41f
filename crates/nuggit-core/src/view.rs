//! Views: tabular projections over pipe results.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identity::{self, NameDigest};
use crate::index::Index;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub pipe: NameDigest,
}

impl Column {
    pub fn new(pipe: NameDigest) -> Self {
        Self { alias: None, pipe }
    }

    /// The SQL column name: the alias, or the pipe name with `-` mapped to `_`.
    pub fn column_name(&self) -> String {
        match &self.alias {
            Some(a) => a.clone(),
            None => self.pipe.name().replace('-', "_"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<Column>,
}

impl View {
    pub fn digest(&self) -> Result<String> {
        identity::digest(self)
    }

    pub fn deps(&self) -> impl Iterator<Item = NameDigest> + '_ {
        self.columns.iter().map(|c| c.pipe.clone())
    }

    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::invalid("view must have at least one column"));
        }
        if let Some(alias) = &self.alias {
            validate_view_alias(alias)?;
        }
        let mut pipes = BTreeSet::new();
        let mut names = BTreeSet::new();
        for col in &self.columns {
            if let Some(alias) = &col.alias {
                validate_sql_alias(alias)?;
            }
            if !pipes.insert(col.pipe.clone()) {
                return Err(Error::invalid(format!(
                    "duplicate pipe in view: {}",
                    col.pipe
                )));
            }
            if !names.insert(col.column_name()) {
                return Err(Error::invalid(format!(
                    "duplicate column name in view: {}",
                    col.column_name()
                )));
            }
        }
        Ok(())
    }

    /// Qualify every column pipe against `index`.
    pub fn qualify(&self, index: &Index) -> Result<View> {
        let mut v = self.clone();
        for col in v.columns.iter_mut() {
            col.pipe = index.resolve_pipe(&col.pipe)?;
        }
        Ok(v)
    }
}

/// Aliases become SQL identifiers and must match `^[a-z][a-z0-9_]*$`.
pub fn validate_sql_alias(alias: &str) -> Result<()> {
    let mut chars = alias.chars();
    let ok = matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !ok {
        return Err(Error::invalid(format!(
            "alias must match ^[a-z][a-z0-9_]*$: {:?}",
            alias
        )));
    }
    Ok(())
}

/// Tables of the store schema, lowercased. SQLite names are case-insensitive.
const SCHEMA_TABLES: &[&str] = &[
    "pipes",
    "views",
    "triggerrules",
    "piperules",
    "viewpipes",
    "resources",
    "resourcelabels",
    "triggerplans",
    "triggerplanpipes",
    "triggerevents",
    "triggerresults",
];

/// Name prefixes owned by SQLite and by generated tables, views and indexes.
const RESERVED_PREFIXES: &[&str] = &["sqlite_", "collection_", "view_", "idx_"];

/// A view alias names a SQL view next to the store schema, so it must be a
/// valid alias that no schema table or generated object can use.
pub fn validate_view_alias(alias: &str) -> Result<()> {
    validate_sql_alias(alias)?;
    if SCHEMA_TABLES.contains(&alias) {
        return Err(Error::invalid(format!(
            "view alias collides with a store table: {}",
            alias
        )));
    }
    if let Some(prefix) = RESERVED_PREFIXES.iter().find(|p| alias.starts_with(*p)) {
        return Err(Error::invalid(format!(
            "view alias may not start with {:?}: {}",
            prefix, alias
        )));
    }
    Ok(())
}
