//! MySQL column type names to their ClickHouse equivalents.
//!
//! This is a pragmatic subset covering commonly used column types, not a
//! complete MySQL type grammar.

use tracing::warn;

/// Map a MySQL column type (already uppercased, parameters intact, e.g.
/// `"VARCHAR(255)"`, `"DECIMAL(10,2)"`, `"INT UNSIGNED"`) to its
/// ClickHouse equivalent.
pub fn mysql_type_to_clickhouse(mysql_type: &str) -> String {
    let t = mysql_type.trim();
    let upper = t.to_uppercase();
    let unsigned = upper.contains("UNSIGNED");
    let base = upper
        .split('(')
        .next()
        .unwrap_or(&upper)
        .trim()
        .replace("UNSIGNED", "")
        .trim()
        .to_string();

    match base.as_str() {
        "TINYINT" => (if unsigned { "UInt8" } else { "Int8" }).to_string(),
        "SMALLINT" => (if unsigned { "UInt16" } else { "Int16" }).to_string(),
        "MEDIUMINT" | "INT" | "INTEGER" => (if unsigned { "UInt32" } else { "Int32" }).to_string(),
        "BIGINT" => (if unsigned { "UInt64" } else { "Int64" }).to_string(),
        "FLOAT" => "Float32".to_string(),
        "DOUBLE" | "REAL" => "Float64".to_string(),
        "DECIMAL" | "NUMERIC" => clickhouse_decimal(t),
        "BOOL" | "BOOLEAN" => "Bool".to_string(),
        "DATE" => "Date".to_string(),
        "DATETIME" | "TIMESTAMP" => "DateTime64(6)".to_string(),
        "TIME" => "String".to_string(),
        "YEAR" => "UInt16".to_string(),
        "JSON" => "String".to_string(),
        "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET" => {
            "String".to_string()
        }
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            "String".to_string()
        }
        _ => {
            warn!(mysql_type = t, "unknown MySQL type, defaulting to String");
            "String".to_string()
        }
    }
}

/// Extract `(precision, scale)` from a `DECIMAL(p,s)` declaration and
/// render the ClickHouse `Decimal(p, s)` form, defaulting to `(10, 0)`
/// when unparenthesized.
fn clickhouse_decimal(mysql_type: &str) -> String {
    let open = mysql_type.find('(');
    let close = mysql_type.find(')');
    match (open, close) {
        (Some(o), Some(c)) if c > o => {
            let inner = &mysql_type[o + 1..c];
            let parts: Vec<&str> = inner.split(',').map(|p| p.trim()).collect();
            match parts.as_slice() {
                [p, s] => format!("Decimal({p}, {s})"),
                [p] => format!("Decimal({p}, 0)"),
                _ => "Decimal(10, 0)".to_string(),
            }
        }
        _ => "Decimal(10, 0)".to_string(),
    }
}
