//! Parsing of source `CREATE TABLE`/`ALTER TABLE` statements.
//!
//! This is a pragmatic subset of MySQL DDL, not a general SQL parser: it
//! covers plain column definitions, a single-column primary key (inline
//! or as a table-level `PRIMARY KEY (...)` clause), and the handful of
//! `ALTER TABLE` forms the replicator needs to keep a target schema in
//! sync (`ADD COLUMN`, `DROP COLUMN`, `MODIFY COLUMN`, `CHANGE COLUMN`).
//! Indexes, foreign keys, and table options are recognized only well
//! enough to be skipped.

use nom::branch::alt;
use nom::bytes::complete::{is_not, tag_no_case, take_while1};
use nom::character::complete::{char, multispace0};
use nom::combinator::{opt, recognize};
use nom::sequence::{delimited, tuple};
use nom::IResult;

use mchr_errors::{ReplicationError, ReplicationResult};

use crate::schema::{FieldDef, TableStructure};
use crate::type_map::mysql_type_to_clickhouse;

/// Parse a `SHOW CREATE TABLE`-style statement into a source/target
/// schema pair, the target schema's field types already mapped to their
/// ClickHouse equivalents.
pub fn parse_source_create(sql: &str) -> ReplicationResult<(TableStructure, TableStructure)> {
    let table_name = parse_table_name(sql)?;
    let body = extract_paren_body(sql)
        .ok_or_else(|| ReplicationError::Protocol(format!("malformed CREATE TABLE: {sql}")))?;

    let mut fields = Vec::new();
    let mut primary_key: Option<String> = None;

    for clause in split_top_level(&body) {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        let upper = clause.to_uppercase();
        if upper.starts_with("PRIMARY KEY") {
            if let Some(name) = extract_paren_column(clause) {
                primary_key = Some(name);
            }
            continue;
        }
        if starts_with_any(
            &upper,
            &["KEY ", "UNIQUE KEY", "UNIQUE INDEX", "INDEX ", "CONSTRAINT", "FOREIGN KEY", "FULLTEXT", "SPATIAL"],
        ) {
            continue;
        }

        let (name, type_name, is_pk) = parse_column_def(clause)?;
        if is_pk {
            primary_key = Some(name.clone());
        }
        fields.push(FieldDef {
            name,
            field_type: type_name,
        });
    }

    let primary_key = primary_key.ok_or_else(|| {
        ReplicationError::Protocol(format!("table {table_name} has no primary key"))
    })?;
    let primary_key_index = fields
        .iter()
        .position(|f| f.name == primary_key)
        .ok_or_else(|| {
            ReplicationError::Protocol(format!(
                "primary key column {primary_key} not found in {table_name}"
            ))
        })?;

    let source = TableStructure {
        table_name,
        fields,
        primary_key,
        primary_key_index,
    };
    let target = to_target_schema(&source);
    Ok((source, target))
}

/// An `ALTER TABLE` rewrite: a ready-to-execute statement against the
/// target database, or `None` for forms this replicator doesn't mirror
/// (the original distilled system likewise only mirrors column
/// add/drop/type changes, and otherwise leaves the target schema as-is).
pub fn convert_alter(sql: &str, target_db: &str) -> Option<String> {
    let table_name = parse_table_name(sql).ok()?;
    let rest = after_keyword(sql, "ALTER")?;
    let rest = after_keyword(rest, "TABLE")?;
    let rest = skip_identifier(rest.trim_start()).ok()?;
    let rest = rest.trim_start();

    if let Some(tail) = strip_prefix_ci(rest, "ADD COLUMN").or_else(|| strip_prefix_ci(rest, "ADD")) {
        let (name, type_name, _) = parse_column_def(tail.trim()).ok()?;
        let ch_type = mysql_type_to_clickhouse(&type_name);
        return Some(format!(
            "ALTER TABLE `{target_db}`.`{table_name}` ADD COLUMN `{name}` {ch_type}"
        ));
    }

    if let Some(tail) =
        strip_prefix_ci(rest, "DROP COLUMN").or_else(|| strip_prefix_ci(rest, "DROP"))
    {
        let name = parse_identifier(tail.trim()).ok()?.1;
        return Some(format!(
            "ALTER TABLE `{target_db}`.`{table_name}` DROP COLUMN `{name}`"
        ));
    }

    if let Some(tail) = strip_prefix_ci(rest, "MODIFY COLUMN").or_else(|| strip_prefix_ci(rest, "MODIFY")) {
        let (name, type_name, _) = parse_column_def(tail.trim()).ok()?;
        let ch_type = mysql_type_to_clickhouse(&type_name);
        return Some(format!(
            "ALTER TABLE `{target_db}`.`{table_name}` MODIFY COLUMN `{name}` {ch_type}"
        ));
    }

    if let Some(tail) = strip_prefix_ci(rest, "CHANGE COLUMN").or_else(|| strip_prefix_ci(rest, "CHANGE")) {
        // CHANGE COLUMN old_name new_def... — renaming columns is out of
        // scope; only a same-name type change is mirrored.
        let (_, old_name) = parse_identifier(tail.trim()).ok()?;
        let after_old = skip_identifier(tail.trim()).ok()?.trim();
        let (new_name, type_name, _) = parse_column_def(after_old).ok()?;
        if new_name != old_name {
            return None;
        }
        let ch_type = mysql_type_to_clickhouse(&type_name);
        return Some(format!(
            "ALTER TABLE `{target_db}`.`{table_name}` MODIFY COLUMN `{new_name}` {ch_type}"
        ));
    }

    None
}

/// Extract the table name a `CREATE TABLE`/`ALTER TABLE`/`DROP TABLE`
/// statement targets. QUERY events carry no table name of their own
/// (only row events do), so the applier recovers it from the statement
/// text itself.
pub fn table_name_from_sql(sql: &str) -> ReplicationResult<String> {
    parse_table_name(sql)
}

/// Apply an `ADD`/`DROP`/`MODIFY`/`CHANGE COLUMN` statement to a cached
/// source schema, producing its post-`ALTER` shape. `None` for the same
/// unsupported forms [`convert_alter`] returns `None` for.
pub fn apply_alter_to_schema(sql: &str, source: &TableStructure) -> Option<TableStructure> {
    let rest = after_keyword(sql, "ALTER")?;
    let rest = after_keyword(rest, "TABLE")?;
    let rest = skip_identifier(rest.trim_start()).ok()?;
    let rest = rest.trim_start();

    let mut fields = source.fields.clone();

    if let Some(tail) = strip_prefix_ci(rest, "ADD COLUMN").or_else(|| strip_prefix_ci(rest, "ADD")) {
        let (name, type_name, _) = parse_column_def(tail.trim()).ok()?;
        fields.push(FieldDef {
            name,
            field_type: type_name,
        });
    } else if let Some(tail) =
        strip_prefix_ci(rest, "DROP COLUMN").or_else(|| strip_prefix_ci(rest, "DROP"))
    {
        let name = parse_identifier(tail.trim()).ok()?.1;
        fields.retain(|f| f.name != name);
    } else if let Some(tail) =
        strip_prefix_ci(rest, "MODIFY COLUMN").or_else(|| strip_prefix_ci(rest, "MODIFY"))
    {
        let (name, type_name, _) = parse_column_def(tail.trim()).ok()?;
        let field = fields.iter_mut().find(|f| f.name == name)?;
        field.field_type = type_name;
    } else if let Some(tail) =
        strip_prefix_ci(rest, "CHANGE COLUMN").or_else(|| strip_prefix_ci(rest, "CHANGE"))
    {
        let (_, old_name) = parse_identifier(tail.trim()).ok()?;
        let after_old = skip_identifier(tail.trim()).ok()?.trim();
        let (new_name, type_name, _) = parse_column_def(after_old).ok()?;
        if new_name != old_name {
            return None;
        }
        let field = fields.iter_mut().find(|f| f.name == old_name)?;
        field.field_type = type_name;
    } else {
        return None;
    }

    let primary_key_index = fields.iter().position(|f| f.name == source.primary_key)?;
    Some(TableStructure {
        table_name: source.table_name.clone(),
        fields,
        primary_key: source.primary_key.clone(),
        primary_key_index,
    })
}

/// Derive a target schema from a source schema by mapping each field's
/// type through [`mysql_type_to_clickhouse`], preserving field order and
/// the primary key position.
pub fn to_target_schema(source: &TableStructure) -> TableStructure {
    let fields = source
        .fields
        .iter()
        .map(|f| FieldDef {
            name: f.name.clone(),
            field_type: mysql_type_to_clickhouse(&f.field_type),
        })
        .collect();
    TableStructure {
        table_name: source.table_name.clone(),
        fields,
        primary_key: source.primary_key.clone(),
        primary_key_index: source.primary_key_index,
    }
}

fn parse_table_name(sql: &str) -> ReplicationResult<String> {
    let upper = sql.to_uppercase();
    let idx = upper
        .find("TABLE")
        .ok_or_else(|| ReplicationError::Protocol(format!("no TABLE keyword in: {sql}")))?;
    let mut rest = sql[idx + "TABLE".len()..].trim_start();
    if rest.to_uppercase().starts_with("IF NOT EXISTS") {
        rest = rest["IF NOT EXISTS".len()..].trim_start();
    }
    if rest.to_uppercase().starts_with("IF EXISTS") {
        rest = rest["IF EXISTS".len()..].trim_start();
    }
    let (_, name) = parse_identifier(rest)
        .map_err(|_| ReplicationError::Protocol(format!("no table name in: {sql}")))?;
    // Strip a leading schema qualifier (`db`.`table`).
    Ok(name.rsplit('.').next().unwrap_or(&name).to_string())
}

/// Find the outermost `(...)` body in a `CREATE TABLE` statement.
fn extract_paren_body(sql: &str) -> Option<String> {
    let start = sql.find('(')?;
    let bytes = sql.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(sql[start + 1..i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Split a column-definition list on top-level commas (ignoring commas
/// nested inside parentheses, e.g. `DECIMAL(10,2)`).
fn split_top_level(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in body.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

/// Extract the first column name from a `(col)` or `(col, ...)` clause,
/// as used by a table-level `PRIMARY KEY (...)`.
fn extract_paren_column(clause: &str) -> Option<String> {
    let body = extract_paren_body(clause)?;
    let first = split_top_level(&body).into_iter().next()?;
    parse_identifier(first.trim()).ok().map(|(_, n)| n)
}

/// Parse one column definition: `` `name` TYPE(...) [modifiers...] ``,
/// returning `(name, type, is_inline_primary_key)`.
fn parse_column_def(clause: &str) -> ReplicationResult<(String, String, bool)> {
    let clause = clause.trim();
    let (rest, name) = parse_identifier(clause)
        .map_err(|_| ReplicationError::Protocol(format!("malformed column: {clause}")))?;
    let rest = rest.trim_start();

    let (_, type_name) = parse_type_token(rest)
        .map_err(|_| ReplicationError::Protocol(format!("malformed column type: {clause}")))?;

    let is_pk = rest.to_uppercase().contains("PRIMARY KEY");
    Ok((name, type_name.trim().to_string(), is_pk))
}

/// Parse a type token: a bare word optionally followed by a parenthesized
/// parameter list and an `UNSIGNED` qualifier, e.g. `DECIMAL(10, 2)
/// UNSIGNED`.
fn parse_type_token(input: &str) -> IResult<&str, String> {
    let (rest, word) = take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)?;
    let (rest, params) = opt(recognize(delimited(char('('), is_not(")"), char(')'))))(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, unsigned) = opt(tag_no_case("UNSIGNED"))(rest)?;

    let mut type_name = word.to_string();
    if let Some(p) = params {
        type_name.push_str(p);
    }
    if unsigned.is_some() {
        type_name.push_str(" UNSIGNED");
    }
    Ok((rest, type_name))
}

/// Parse a backtick-quoted or bare identifier, returning the remainder
/// and the identifier text (without backticks).
fn parse_identifier(input: &str) -> IResult<&str, String> {
    let (rest, ident) = alt((
        delimited(char('`'), is_not("`"), char('`')),
        recognize(tuple((
            take_while1(|c: char| c.is_alphanumeric() || c == '_'),
            opt(tuple((
                char('.'),
                take_while1(|c: char| c.is_alphanumeric() || c == '_'),
            ))),
        ))),
    ))(input.trim_start())?;
    Ok((rest, ident.to_string()))
}

fn skip_identifier(input: &str) -> ReplicationResult<&str> {
    parse_identifier(input)
        .map(|(rest, _)| rest)
        .map_err(|_| ReplicationError::Protocol(format!("expected identifier in: {input}")))
}

fn starts_with_any(upper: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| upper.starts_with(p))
}

fn strip_prefix_ci<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    let trimmed = input.trim_start();
    if trimmed.len() < prefix.len() {
        return None;
    }
    if trimmed[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&trimmed[prefix.len()..])
    } else {
        None
    }
}

fn after_keyword<'a>(input: &'a str, keyword: &str) -> Option<&'a str> {
    let upper = input.to_uppercase();
    let idx = upper.find(keyword)?;
    Some(&input[idx + keyword.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS_CREATE: &str = "CREATE TABLE `users` (\n  `id` int NOT NULL AUTO_INCREMENT,\n  `name` varchar(255) NOT NULL,\n  `balance` decimal(10,2) DEFAULT NULL,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB";

    #[test]
    fn parses_table_with_trailing_primary_key_clause() {
        let (source, target) = parse_source_create(USERS_CREATE).unwrap();
        assert_eq!(source.table_name, "users");
        assert_eq!(source.primary_key, "id");
        assert_eq!(source.fields.len(), 3);
        assert_eq!(source.field_type("balance"), Some("decimal(10,2)"));
        assert_eq!(target.field_type("balance"), Some("Decimal(10, 2)"));
        assert_eq!(target.field_type("name"), Some("String"));
    }

    #[test]
    fn parses_inline_primary_key() {
        let sql = "CREATE TABLE `t` (`id` bigint PRIMARY KEY, `v` text)";
        let (source, _) = parse_source_create(sql).unwrap();
        assert_eq!(source.primary_key, "id");
        assert_eq!(source.primary_key_index, 0);
    }

    #[test]
    fn converts_add_column() {
        let sql = "ALTER TABLE `users` ADD COLUMN `age` int NOT NULL";
        let out = convert_alter(sql, "mydb").unwrap();
        assert_eq!(out, "ALTER TABLE `mydb`.`users` ADD COLUMN `age` Int32");
    }

    #[test]
    fn converts_drop_column() {
        let sql = "ALTER TABLE `users` DROP COLUMN `age`";
        let out = convert_alter(sql, "mydb").unwrap();
        assert_eq!(out, "ALTER TABLE `mydb`.`users` DROP COLUMN `age`");
    }

    #[test]
    fn returns_none_for_unsupported_alter_forms() {
        let sql = "ALTER TABLE `users` RENAME TO `people`";
        assert_eq!(convert_alter(sql, "mydb"), None);
    }
}
