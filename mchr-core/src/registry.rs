//! In-memory mapping table -> (source schema, target schema), mutated by
//! DDL and rehydrated from the state store on restart.

use std::collections::HashMap;

use mchr_convert::TableStructure;

/// A table's schema in both dialects.
pub type SchemaPair = (TableStructure, TableStructure);

/// The schema registry. Reads are performed by the Applier and
/// Snapshotter; writes happen at bootstrap and on CREATE/ALTER TABLE
/// events.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: HashMap<String, SchemaPair>,
}

impl SchemaRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    /// Rehydrate a registry from a state store's cached schema pairs.
    pub fn from_cached(tables: HashMap<String, SchemaPair>) -> Self {
        SchemaRegistry { tables }
    }

    /// Register (or replace, on ALTER) a table's schema pair.
    pub fn set(&mut self, table: String, pair: SchemaPair) {
        self.tables.insert(table, pair);
    }

    /// Look up a table's schema pair.
    pub fn get(&self, table: &str) -> Option<&SchemaPair> {
        self.tables.get(table)
    }

    /// `true` if `table` has been registered.
    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Snapshot the registry's contents for persisting into the state
    /// store.
    pub fn to_cached(&self) -> HashMap<String, SchemaPair> {
        self.tables.clone()
    }
}
