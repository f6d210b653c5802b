//! The paging cursor passed to `get_records`. Integer primary keys are
//! passed numerically; non-integer primary keys must be pre-quoted by the
//! caller.

use std::fmt;

/// Resume point for a PK-ordered range scan.
#[derive(Debug, Clone, PartialEq)]
pub enum StartValue {
    /// Start from the beginning of the table.
    Unbounded,
    /// Resume strictly after this integer primary key.
    Int(i64),
    /// Resume strictly after this primary key, already quoted as a SQL
    /// literal (used for non-integer primary keys).
    QuotedLiteral(String),
}

impl fmt::Display for StartValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartValue::Unbounded => Ok(()),
            StartValue::Int(i) => write!(f, "{i}"),
            StartValue::QuotedLiteral(s) => write!(f, "{s}"),
        }
    }
}
