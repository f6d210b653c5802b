//! `ClickHouseTargetClient`: the concrete `clickhouse`-crate-backed
//! implementation of the target DB contract.
//!
//! Target tables are created as `ReplacingMergeTree`, keyed by the
//! source primary key and deduplicated on a synthetic `_version` column.
//! Every insert stamps rows with a version strictly greater than any
//! version already written for that table, so a row reinserted after a
//! crash-recovery replay always wins over the stale copy it replaces —
//! the same idempotent-convergence trick the distilled system's
//! `tables_last_record_version` bookkeeping relies on.

use std::collections::HashMap;

use async_trait::async_trait;
use mchr_binlog::{Row, Value};
use mchr_convert::TableStructure;
use mchr_errors::{ReplicationError, ReplicationResult};
use tracing::debug;

/// Name of the synthetic version column every target table carries.
pub const VERSION_COLUMN: &str = "_version";

/// The target database contract: DDL plus versioned row upload.
#[async_trait]
pub trait TargetClient: Send {
    /// Drop and recreate the target database, leaving it empty. Called
    /// once, at the start of a fresh (non-resumed) replication run.
    async fn recreate_database(&mut self) -> ReplicationResult<()>;

    /// Create a table matching `structure`, if it doesn't already exist.
    async fn create_table(&mut self, structure: &TableStructure) -> ReplicationResult<()>;

    /// Insert `rows` into `table`, each stamped with a fresh version.
    /// A no-op on an empty slice.
    async fn insert(
        &mut self,
        table: &str,
        structure: &TableStructure,
        rows: &[Row],
    ) -> ReplicationResult<()>;

    /// Mark every row in `table` whose primary key is in `keys` as
    /// deleted. A no-op on an empty slice.
    async fn erase(
        &mut self,
        table: &str,
        structure: &TableStructure,
        keys: &[Value],
    ) -> ReplicationResult<()>;

    /// Execute an arbitrary DDL statement (an `ALTER TABLE` produced by
    /// the converter) against the target database.
    async fn execute_command(&mut self, sql: &str) -> ReplicationResult<()>;

    /// The per-table high-water version mark, for persisting into
    /// durable state.
    fn record_versions(&self) -> HashMap<String, u64>;

    /// Restore the per-table high-water version mark from durable state
    /// (called once, on startup, before any insert).
    fn set_record_versions(&mut self, versions: HashMap<String, u64>);
}

/// `TargetClient` backed by a single `clickhouse::Client`.
pub struct ClickHouseTargetClient {
    client: clickhouse::Client,
    database: String,
    tables_last_record_version: HashMap<String, u64>,
}

impl ClickHouseTargetClient {
    /// Build a client against `url`, authenticating as `user`/`password`
    /// and scoping all statements to `database`.
    pub fn new(url: &str, user: &str, password: &str, database: String) -> Self {
        let client = clickhouse::Client::default()
            .with_url(url)
            .with_user(user)
            .with_password(password);
        ClickHouseTargetClient {
            client,
            database,
            tables_last_record_version: HashMap::new(),
        }
    }

    fn next_version(&mut self, table: &str) -> u64 {
        let entry = self
            .tables_last_record_version
            .entry(table.to_string())
            .or_insert(0);
        *entry += 1;
        *entry
    }

    async fn run(&self, sql: String) -> ReplicationResult<()> {
        debug!(target: "mchr_target_clickhouse", %sql, "executing");
        self.client
            .query(&sql)
            .execute()
            .await
            .map_err(|e| ReplicationError::Target(e.to_string()))
    }
}

#[async_trait]
impl TargetClient for ClickHouseTargetClient {
    async fn recreate_database(&mut self) -> ReplicationResult<()> {
        self.run(format!("DROP DATABASE IF EXISTS `{}`", self.database))
            .await?;
        self.run(format!("CREATE DATABASE `{}`", self.database))
            .await
    }

    async fn create_table(&mut self, structure: &TableStructure) -> ReplicationResult<()> {
        let mut columns: Vec<String> = structure
            .fields
            .iter()
            .map(|f| format!("`{}` Nullable({})", f.name, f.field_type))
            .collect();
        // The primary key column must not be nullable: ReplacingMergeTree
        // requires a non-nullable sort key.
        if let Some(pk_col) = columns.get_mut(structure.primary_key_index) {
            *pk_col = format!(
                "`{}` {}",
                structure.primary_key, structure.fields[structure.primary_key_index].field_type
            );
        }
        columns.push(format!("`{VERSION_COLUMN}` UInt64"));

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS `{}`.`{}` ({}) ENGINE = ReplacingMergeTree(`{VERSION_COLUMN}`) ORDER BY (`{}`)",
            self.database,
            structure.table_name,
            columns.join(", "),
            structure.primary_key,
        );
        self.run(sql).await
    }

    async fn insert(
        &mut self,
        table: &str,
        structure: &TableStructure,
        rows: &[Row],
    ) -> ReplicationResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut column_names: Vec<String> =
            structure.fields.iter().map(|f| format!("`{}`", f.name)).collect();
        column_names.push(format!("`{VERSION_COLUMN}`"));

        let mut value_rows = Vec::with_capacity(rows.len());
        for row in rows {
            let version = self.next_version(table);
            let mut literals: Vec<String> = row.iter().map(Value::to_literal).collect();
            literals.push(version.to_string());
            value_rows.push(format!("({})", literals.join(", ")));
        }

        let sql = format!(
            "INSERT INTO `{}`.`{}` ({}) VALUES {}",
            self.database,
            table,
            column_names.join(", "),
            value_rows.join(", "),
        );
        self.run(sql).await
    }

    async fn erase(
        &mut self,
        table: &str,
        structure: &TableStructure,
        keys: &[Value],
    ) -> ReplicationResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let literals: Vec<String> = keys.iter().map(Value::to_literal).collect();
        let sql = format!(
            "ALTER TABLE `{}`.`{}` DELETE WHERE `{}` IN ({})",
            self.database,
            table,
            structure.primary_key,
            literals.join(", "),
        );
        self.run(sql).await
    }

    async fn execute_command(&mut self, sql: &str) -> ReplicationResult<()> {
        self.run(sql.to_string()).await
    }

    fn record_versions(&self) -> HashMap<String, u64> {
        self.tables_last_record_version.clone()
    }

    fn set_record_versions(&mut self, versions: HashMap<String, u64>) {
        self.tables_last_record_version = versions;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mchr_convert::FieldDef;

    fn structure() -> TableStructure {
        TableStructure {
            table_name: "users".into(),
            fields: vec![
                FieldDef {
                    name: "id".into(),
                    field_type: "Int32".into(),
                },
                FieldDef {
                    name: "name".into(),
                    field_type: "String".into(),
                },
            ],
            primary_key: "id".into(),
            primary_key_index: 0,
        }
    }

    #[test]
    fn version_counter_increments_per_table() {
        let mut client = ClickHouseTargetClient::new("http://localhost:8123", "default", "", "db".into());
        assert_eq!(client.next_version("users"), 1);
        assert_eq!(client.next_version("users"), 2);
        assert_eq!(client.next_version("orders"), 1);
    }

    #[test]
    fn record_versions_round_trip() {
        let mut client = ClickHouseTargetClient::new("http://localhost:8123", "default", "", "db".into());
        let mut restored = HashMap::new();
        restored.insert("users".to_string(), 41u64);
        client.set_record_versions(restored);
        assert_eq!(client.next_version("users"), 42);
        assert_eq!(client.record_versions().get("users"), Some(&42));
    }

    #[test]
    fn structure_has_expected_shape() {
        let s = structure();
        assert_eq!(s.primary_key, "id");
    }
}
