//! Per-table coalescing of pending inserts (by PK) and deletes (PK set).
//! Process-local and never persisted — durability lives in the target's
//! applied state plus the two transaction cursors in [`crate::state`].

use std::collections::HashMap;

use mchr_binlog::{Row, Value};

/// A value's identity for buffer bookkeeping purposes: the literal
/// rendering of a [`Value`] is a deterministic, unique string for any
/// primary key MySQL can produce, which is all a `HashMap` key needs to
/// be here (`Value` itself isn't `Eq`/`Hash` because of its `f64` case).
fn pk_key(value: &Value) -> String {
    value.to_literal()
}

/// In-memory per-table pending inserts (PK -> row, last-writer-wins) and
/// pending deletes (PK set), kept disjoint per table (invariant I2).
#[derive(Debug, Default)]
pub struct Buffer {
    pending_inserts: HashMap<String, HashMap<String, Row>>,
    pending_deletes: HashMap<String, HashMap<String, Value>>,
}

impl Buffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Buffer::default()
    }

    /// Record an insert (or the insert half of an update) for `pk` in
    /// `table`. A later insert for the same PK overwrites the earlier
    /// row. Removes `pk` from `pending_deletes[table]` if present.
    pub fn insert(&mut self, table: &str, pk: Value, row: Row) {
        let key = pk_key(&pk);
        if let Some(deletes) = self.pending_deletes.get_mut(table) {
            deletes.remove(&key);
        }
        self.pending_inserts
            .entry(table.to_string())
            .or_default()
            .insert(key, row);
    }

    /// Record a delete for `pk` in `table`. Removes `pk` from
    /// `pending_inserts[table]` if present.
    pub fn delete(&mut self, table: &str, pk: Value) {
        let key = pk_key(&pk);
        if let Some(inserts) = self.pending_inserts.get_mut(table) {
            inserts.remove(&key);
        }
        self.pending_deletes
            .entry(table.to_string())
            .or_default()
            .insert(key, pk);
    }

    /// Number of pending inserts for `table`.
    pub fn insert_count(&self, table: &str) -> usize {
        self.pending_inserts.get(table).map_or(0, HashMap::len)
    }

    /// Number of pending deletes for `table`.
    pub fn delete_count(&self, table: &str) -> usize {
        self.pending_deletes.get(table).map_or(0, HashMap::len)
    }

    /// `true` if neither map holds anything for any table.
    pub fn is_empty(&self) -> bool {
        self.pending_inserts.values().all(HashMap::is_empty)
            && self.pending_deletes.values().all(HashMap::is_empty)
    }

    /// Every table name with a non-empty insert or delete set, in
    /// arbitrary order.
    pub fn tables_with_pending(&self) -> Vec<String> {
        let mut tables: Vec<String> = self
            .pending_inserts
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, _)| k.clone())
            .collect();
        for table in self.pending_deletes.keys() {
            if self.delete_count(table) > 0 && !tables.contains(table) {
                tables.push(table.clone());
            }
        }
        tables
    }

    /// Drain and return every pending row for `table`.
    pub fn take_inserts(&mut self, table: &str) -> Vec<Row> {
        self.pending_inserts
            .get_mut(table)
            .map(|m| m.drain().map(|(_, row)| row).collect())
            .unwrap_or_default()
    }

    /// Drain and return every pending delete key for `table`.
    pub fn take_deletes(&mut self, table: &str) -> Vec<Value> {
        self.pending_deletes
            .get_mut(table)
            .map(|m| m.drain().map(|(_, pk)| pk).collect())
            .unwrap_or_default()
    }

    /// Verify invariant I2 (no PK present in both maps for the same
    /// table). Used by tests and the property-test harness.
    #[cfg(test)]
    fn check_disjoint(&self) -> bool {
        for (table, inserts) in &self.pending_inserts {
            if let Some(deletes) = self.pending_deletes.get(table) {
                if inserts.keys().any(|k| deletes.contains_key(k)) {
                    return false;
                }
            }
        }
        true
    }
}
