//! Row value coercion: once a column's ClickHouse type is known, make
//! sure the value read from MySQL (or decoded off the binlog) is shaped
//! to match it rather than relying on ClickHouse's own implicit casts.

use mchr_binlog::{Row, Value};

use crate::schema::TableStructure;

/// Coerce every row's values to the types declared by `target`. Rows
/// shorter than `target.fields` are left as-is for the missing tail
/// (the caller is expected to have already validated column counts
/// against the source schema); this function never panics on a length
/// mismatch.
pub fn convert_rows(rows: Vec<Row>, target: &TableStructure) -> Vec<Row> {
    rows.into_iter()
        .map(|row| convert_row(row, target))
        .collect()
}

fn convert_row(row: Row, target: &TableStructure) -> Row {
    row.into_iter()
        .enumerate()
        .map(|(idx, value)| match target.fields.get(idx) {
            Some(field) => coerce(value, &field.field_type),
            None => value,
        })
        .collect()
}

fn coerce(value: Value, target_type: &str) -> Value {
    if matches!(value, Value::Null) {
        return value;
    }
    if target_type.starts_with("Int") || target_type.starts_with("UInt") {
        return coerce_integer(value, target_type);
    }
    if target_type.starts_with("Float") {
        return coerce_float(value);
    }
    if target_type.starts_with("Decimal") {
        return coerce_decimal(value);
    }
    if target_type == "String" {
        return coerce_string(value);
    }
    value
}

fn coerce_integer(value: Value, target_type: &str) -> Value {
    let unsigned = target_type.starts_with("UInt");
    match value {
        Value::Int(_) | Value::UInt(_) => value,
        Value::Float(f) => {
            if unsigned {
                Value::UInt(f as u64)
            } else {
                Value::Int(f as i64)
            }
        }
        Value::Str(ref s) => {
            if unsigned {
                s.trim()
                    .parse::<u64>()
                    .map(Value::UInt)
                    .unwrap_or(Value::Null)
            } else {
                s.trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .unwrap_or(Value::Null)
            }
        }
        other => other,
    }
}

fn coerce_float(value: Value) -> Value {
    match value {
        Value::Float(_) => value,
        Value::Int(i) => Value::Float(i as f64),
        Value::UInt(u) => Value::Float(u as f64),
        Value::Str(ref s) => s.trim().parse::<f64>().map(Value::Float).unwrap_or(Value::Null),
        other => other,
    }
}

fn coerce_decimal(value: Value) -> Value {
    // ClickHouse accepts decimal literals as plain numeric strings;
    // leave the textual representation intact rather than round-tripping
    // through a float and risking precision loss.
    match value {
        Value::Int(i) => Value::Str(i.to_string()),
        Value::UInt(u) => Value::Str(u.to_string()),
        Value::Float(f) => Value::Str(f.to_string()),
        other => other,
    }
}

fn coerce_string(value: Value) -> Value {
    match value {
        Value::Str(_) => value,
        Value::Int(i) => Value::Str(i.to_string()),
        Value::UInt(u) => Value::Str(u.to_string()),
        Value::Float(f) => Value::Str(f.to_string()),
        Value::Bytes(b) => Value::Str(String::from_utf8_lossy(&b).into_owned()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;

    fn target() -> TableStructure {
        TableStructure {
            table_name: "t".into(),
            fields: vec![
                FieldDef {
                    name: "id".into(),
                    field_type: "Int32".into(),
                },
                FieldDef {
                    name: "name".into(),
                    field_type: "String".into(),
                },
                FieldDef {
                    name: "balance".into(),
                    field_type: "Decimal(10, 2)".into(),
                },
            ],
            primary_key: "id".into(),
            primary_key_index: 0,
        }
    }

    #[test]
    fn coerces_numeric_string_into_integer() {
        let rows = vec![vec![
            Value::Str("42".into()),
            Value::Str("alice".into()),
            Value::Float(10.5),
        ]];
        let out = convert_rows(rows, &target());
        assert_eq!(out[0][0], Value::Int(42));
        assert_eq!(out[0][1], Value::Str("alice".into()));
        assert_eq!(out[0][2], Value::Str("10.5".into()));
    }

    #[test]
    fn leaves_null_untouched() {
        let rows = vec![vec![Value::Null, Value::Str("x".into()), Value::Null]];
        let out = convert_rows(rows, &target());
        assert_eq!(out[0][0], Value::Null);
        assert_eq!(out[0][2], Value::Null);
    }
}
