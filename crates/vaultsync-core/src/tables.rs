//! Managed table set and dependency ordering.
//!
//! The managed table list is the single source of truth consumed by
//! both the restore engine and the sync orchestrator. Tables restore
//! in dependency order (referenced tables first); truncation runs as
//! one cascading statement over the whole set, so rank is not
//! consulted at truncate time.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Static configuration for one managed table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSpec {
    /// Table name as it appears in the database
    pub name: String,

    /// Names of tables this table references via foreign keys
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Requires windowed (batched) copy during data movement
    #[serde(default)]
    pub large: bool,

    /// Carries an index expensive enough to drop/recreate around bulk load
    #[serde(default)]
    pub indexed: bool,

    /// DDL statements to recreate the expensive indexes, in order
    #[serde(default)]
    pub index_ddl: Vec<String>,

    /// Column used to order windowed selects (must be stable and unique)
    #[serde(default = "default_order_column")]
    pub order_column: String,
}

fn default_order_column() -> String {
    "id".to_string()
}

impl TableSpec {
    /// Create a minimal spec with no dependencies.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            large: false,
            indexed: false,
            index_ddl: Vec::new(),
            order_column: default_order_column(),
        }
    }

    /// Mark this table as requiring windowed copy.
    pub fn large(mut self) -> Self {
        self.large = true;
        self
    }

    /// Mark this table as carrying expensive indexes.
    pub fn indexed(mut self, ddl: Vec<String>) -> Self {
        self.indexed = true;
        self.index_ddl = ddl;
        self
    }

    /// Add a foreign-key dependency on another managed table.
    pub fn depends_on(mut self, table: impl Into<String>) -> Self {
        self.depends_on.push(table.into());
        self
    }
}

/// The dependency-ordered managed table set.
#[derive(Debug, Clone)]
pub struct ManagedTables {
    /// Specs in restore order: referenced tables before referencing ones
    ordered: Vec<TableSpec>,
}

impl ManagedTables {
    /// Build the managed set from config order, validating references
    /// and re-ordering by foreign-key dependency.
    ///
    /// Fails with `CircularDependency` if the foreign-key graph has a
    /// cycle, and `UnknownTable` if a `depends_on` entry names a table
    /// outside the managed set.
    pub fn new(specs: Vec<TableSpec>) -> Result<Self> {
        if specs.is_empty() {
            return Err(Error::invalid_config("managed table list is empty"));
        }

        let by_name: HashMap<String, TableSpec> = specs
            .iter()
            .map(|s| (s.name.clone(), s.clone()))
            .collect();

        if by_name.len() != specs.len() {
            return Err(Error::invalid_config("duplicate table name in managed set"));
        }

        for spec in &specs {
            for dep in &spec.depends_on {
                if !by_name.contains_key(dep) {
                    return Err(Error::UnknownTable { table: dep.clone() });
                }
            }
        }

        // DFS topological sort with cycle detection
        let mut ordered = Vec::with_capacity(specs.len());
        let mut seen = HashSet::new();
        let mut visiting = HashSet::new();

        for spec in &specs {
            Self::visit(&spec.name, &by_name, &mut ordered, &mut seen, &mut visiting)?;
        }

        Ok(Self { ordered })
    }

    fn visit(
        name: &str,
        by_name: &HashMap<String, TableSpec>,
        ordered: &mut Vec<TableSpec>,
        seen: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
    ) -> Result<()> {
        if visiting.contains(name) {
            return Err(Error::circular_dependency(name.to_string()));
        }
        if seen.contains(name) {
            return Ok(());
        }

        visiting.insert(name.to_string());

        let spec = &by_name[name];
        for dep in &spec.depends_on {
            Self::visit(dep, by_name, ordered, seen, visiting)?;
        }

        visiting.remove(name);
        seen.insert(name.to_string());
        ordered.push(spec.clone());

        Ok(())
    }

    /// Specs in restore order (dependencies first).
    pub fn in_restore_order(&self) -> &[TableSpec] {
        &self.ordered
    }

    /// All managed table names, restore-ordered.
    pub fn names(&self) -> Vec<&str> {
        self.ordered.iter().map(|s| s.name.as_str()).collect()
    }

    /// Look up a spec by table name.
    pub fn get(&self, name: &str) -> Option<&TableSpec> {
        self.ordered.iter().find(|s| s.name == name)
    }

    /// Number of managed tables.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// True when the managed set is empty (never after construction).
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Tables flagged as carrying expensive indexes.
    pub fn indexed_tables(&self) -> impl Iterator<Item = &TableSpec> {
        self.ordered.iter().filter(|s| s.indexed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_table_chain() -> Vec<TableSpec> {
        // c -> b -> a
        vec![
            TableSpec::new("c").depends_on("b"),
            TableSpec::new("a"),
            TableSpec::new("b").depends_on("a"),
        ]
    }

    #[test]
    fn test_restore_order_respects_dependencies() {
        let tables = ManagedTables::new(three_table_chain()).unwrap();
        assert_eq!(tables.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_detected() {
        let specs = vec![
            TableSpec::new("a").depends_on("b"),
            TableSpec::new("b").depends_on("a"),
        ];
        let err = ManagedTables::new(specs).unwrap_err();
        assert!(matches!(err, Error::CircularDependency { .. }));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let specs = vec![TableSpec::new("a").depends_on("ghost")];
        let err = ManagedTables::new(specs).unwrap_err();
        assert!(matches!(err, Error::UnknownTable { .. }));
    }

    #[test]
    fn test_empty_set_rejected() {
        assert!(ManagedTables::new(vec![]).is_err());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let specs = vec![TableSpec::new("a"), TableSpec::new("a")];
        assert!(ManagedTables::new(specs).is_err());
    }

    #[test]
    fn test_flags_survive_ordering() {
        let specs = vec![
            TableSpec::new("events").large().indexed(vec![
                "CREATE INDEX idx_events_embedding ON events USING ivfflat (embedding)".to_string(),
            ]),
            TableSpec::new("users"),
        ];
        let tables = ManagedTables::new(specs).unwrap();
        let events = tables.get("events").unwrap();
        assert!(events.large);
        assert!(events.indexed);
        assert_eq!(events.index_ddl.len(), 1);
        assert_eq!(tables.indexed_tables().count(), 1);
    }
}
