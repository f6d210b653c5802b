//! The data model shared by every component that touches a row: the
//! transaction id total order, the closed event-kind variant set, and the
//! value representation rows are carried in end to end.

use mchr_util::quote_literal;
use serde::{Deserialize, Serialize};

/// A totally ordered binlog position: `(log-file-name, byte-offset)`.
/// Comparable with lexicographic ordering on the tuple — `#[derive(Ord)]`
/// on a two-field struct gives exactly that, field by field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    /// Binlog file name, e.g. `mysql-bin.000042`.
    pub log_file: String,
    /// Byte offset within that file.
    pub offset: u64,
}

impl TransactionId {
    /// Construct a transaction id from its components.
    pub fn new(log_file: impl Into<String>, offset: u64) -> Self {
        TransactionId {
            log_file: log_file.into(),
            offset,
        }
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.log_file, self.offset)
    }
}

/// A single column value, carried from the source row representation
/// through conversion to the target row representation. Narrow on purpose
/// — just enough variants to round-trip MySQL's common column types into
/// ClickHouse's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Signed integer types (TINYINT..BIGINT).
    Int(i64),
    /// Unsigned integer types (TINYINT UNSIGNED..BIGINT UNSIGNED).
    UInt(u64),
    /// FLOAT/DOUBLE.
    Float(f64),
    /// CHAR/VARCHAR/TEXT/ENUM/JSON and anything else best kept textual.
    Str(String),
    /// BINARY/VARBINARY/BLOB.
    Bytes(Vec<u8>),
    /// DATE.
    Date(chrono::NaiveDate),
    /// DATETIME/TIMESTAMP.
    DateTime(chrono::NaiveDateTime),
}

impl Value {
    /// Render the value as a literal suitable for embedding directly in a
    /// generated SQL statement (used by delete-by-PK-set and by the
    /// snapshotter's paging cursor for non-integer primary keys).
    pub fn to_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Int(i) => i.to_string(),
            Value::UInt(u) => u.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => quote_literal(s),
            Value::Bytes(b) => quote_literal(&String::from_utf8_lossy(b)),
            Value::Date(d) => quote_literal(&d.to_string()),
            Value::DateTime(dt) => quote_literal(&dt.to_string()),
        }
    }

    /// `true` if this value came from a MySQL integer column.
    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Int(_) | Value::UInt(_))
    }
}

/// One row, as an ordered list of column values matching the owning
/// table's field order.
pub type Row = Vec<Value>;

/// The parsed sub-kind of a `QUERY` event, computed once at event
/// construction time (binlog decode time) so downstream consumers never
/// need to re-parse the SQL text to dispatch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryKind {
    /// `ALTER TABLE ...`
    Alter,
    /// `CREATE TABLE ...`
    Create,
    /// `DROP TABLE ...`
    Drop,
    /// Anything else (transaction control statements, DML wrapped in a
    /// QUERY event, etc.) — ignored by the applier.
    Other,
}

impl QueryKind {
    /// Classify a raw SQL statement's leading keyword, case-insensitively.
    pub fn classify(sql: &str) -> Self {
        let trimmed = sql.trim_start();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("alter") {
            QueryKind::Alter
        } else if lower.starts_with("create table")
            || lower.starts_with("create table if not exists")
        {
            QueryKind::Create
        } else if lower.starts_with("drop table") {
            QueryKind::Drop
        } else {
            QueryKind::Other
        }
    }
}

/// The closed set of change-event kinds the binlog reader can produce.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// Row insertions (or the insert half of an update).
    Add(Vec<Row>),
    /// Row deletions (or the delete half of an update).
    Remove(Vec<Row>),
    /// A DDL/DML statement. `kind` is classified once, here.
    Query { sql: String, kind: QueryKind },
}

/// A single ordered change event read from the binlog.
#[derive(Debug, Clone)]
pub struct Event {
    /// The transaction this event belongs to.
    pub transaction_id: TransactionId,
    /// The database the event applies to.
    pub db_name: String,
    /// The table the event applies to. Empty for non-table-scoped QUERY
    /// events (e.g. `BEGIN`).
    pub table_name: String,
    /// The event payload.
    pub kind: EventKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_order_lexicographically() {
        let a = TransactionId::new("log1", 100);
        let b = TransactionId::new("log1", 110);
        let c = TransactionId::new("log2", 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn query_kind_classifies_case_insensitively() {
        assert_eq!(QueryKind::classify("ALTER TABLE u ADD COLUMN age INT"), QueryKind::Alter);
        assert_eq!(QueryKind::classify("create table u (id int)"), QueryKind::Create);
        assert_eq!(QueryKind::classify("  Drop Table u"), QueryKind::Drop);
        assert_eq!(QueryKind::classify("BEGIN"), QueryKind::Other);
    }

    #[test]
    fn string_literal_is_quoted() {
        assert_eq!(Value::Str("a'b".into()).to_literal(), "'a''b'");
        assert_eq!(Value::Int(5).to_literal(), "5");
    }
}
