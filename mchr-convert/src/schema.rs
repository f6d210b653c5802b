//! The schema pair: one [`TableStructure`] per dialect, sharing the same
//! shape so the same field list can describe both the source and target
//! column sets.

use serde::{Deserialize, Serialize};

/// One column: its name and a dialect-specific type name (`"INT"`,
/// `"VARCHAR(255)"` on the source side; `"Int32"`, `"String"` on the
/// target side).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Column name.
    pub name: String,
    /// The dialect-specific type name.
    pub field_type: String,
}

/// A table's schema in one dialect: its ordered fields plus which one is
/// the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStructure {
    /// The table name (unqualified).
    pub table_name: String,
    /// Ordered column list, in source declaration order.
    pub fields: Vec<FieldDef>,
    /// Name of the (single) primary key column. A primary key is required
    /// for every table this replicator tracks.
    pub primary_key: String,
    /// Position of `primary_key` within `fields`.
    pub primary_key_index: usize,
}

impl TableStructure {
    /// Look up a field's type name by column name.
    pub fn field_type(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.field_type.as_str())
    }

    /// The primary key column's type name.
    pub fn primary_key_type(&self) -> &str {
        self.fields[self.primary_key_index].field_type.as_str()
    }
}
