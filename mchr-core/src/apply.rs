//! Consumes binlog events in log order, dispatches them by kind, and
//! updates the [`Buffer`] and [`SchemaRegistry`] accordingly.

use std::time::Instant;

use mchr_binlog::{Event, EventKind, QueryKind};
use mchr_errors::ReplicationResult;
use mchr_target_clickhouse::TargetClient;
use tracing::warn;

use crate::buffer::Buffer;
use crate::flush::Flusher;
use crate::registry::SchemaRegistry;
use crate::state::StateStore;
use crate::stats::Statistics;

/// Replays a single database's event stream against its [`Buffer`] and
/// [`SchemaRegistry`].
pub struct Applier {
    database: String,
}

impl Applier {
    /// Build an applier scoped to `database` (used for log/metric
    /// attribution).
    pub fn new(database: String) -> Self {
        Applier { database }
    }

    /// Apply one event. Returns `false` if the event was discarded as a
    /// duplicate of buffered-but-lost work already reflected in
    /// `state.last_processed_transaction_non_uploaded` (the
    /// crash-recovery replay window).
    #[allow(clippy::too_many_arguments)]
    pub async fn apply(
        &self,
        event: Event,
        buffer: &mut Buffer,
        registry: &mut SchemaRegistry,
        state: &mut StateStore,
        flusher: &mut Flusher,
        target: &mut dyn TargetClient,
        stats: &mut Statistics,
        now: Instant,
    ) -> ReplicationResult<bool> {
        if let Some(cursor) = &state.last_processed_transaction_non_uploaded {
            if event.transaction_id <= *cursor {
                return Ok(false);
            }
        }

        state.advance_non_uploaded(event.transaction_id.clone());
        stats.record_event(event.transaction_id.clone(), &self.database);

        match event.kind {
            EventKind::Add(rows) => {
                self.handle_add(&event.table_name, rows, buffer, registry, stats)?;
            }
            EventKind::Remove(rows) => {
                self.handle_remove(&event.table_name, rows, buffer, registry, stats)?;
            }
            EventKind::Query { sql, kind } => {
                self.handle_query(sql, kind, &event.db_name, buffer, registry, target, flusher, state, now)
                    .await?;
            }
        }

        Ok(true)
    }

    fn handle_add(
        &self,
        table: &str,
        rows: Vec<mchr_binlog::Row>,
        buffer: &mut Buffer,
        registry: &SchemaRegistry,
        stats: &mut Statistics,
    ) -> ReplicationResult<()> {
        stats.record_insert(rows.len(), &self.database);
        let (_, target_schema) = registry
            .get(table)
            .ok_or_else(|| mchr_errors::ReplicationError::UnknownTable(table.to_string()))?;
        let converted = mchr_convert::convert_rows(rows, target_schema);
        let pk_index = target_schema.primary_key_index;
        for row in converted {
            let pk = row[pk_index].clone();
            buffer.insert(table, pk, row);
        }
        Ok(())
    }

    fn handle_remove(
        &self,
        table: &str,
        rows: Vec<mchr_binlog::Row>,
        buffer: &mut Buffer,
        registry: &SchemaRegistry,
        stats: &mut Statistics,
    ) -> ReplicationResult<()> {
        stats.record_erase(rows.len(), &self.database);
        let (source_schema, _) = registry
            .get(table)
            .ok_or_else(|| mchr_errors::ReplicationError::UnknownTable(table.to_string()))?;
        let pk_index = source_schema.primary_key_index;
        for row in rows {
            let pk = row[pk_index].clone();
            buffer.delete(table, pk);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_query(
        &self,
        sql: String,
        kind: QueryKind,
        db_name: &str,
        buffer: &mut Buffer,
        registry: &mut SchemaRegistry,
        target: &mut dyn TargetClient,
        flusher: &mut Flusher,
        state: &mut StateStore,
        now: Instant,
    ) -> ReplicationResult<()> {
        match kind {
            QueryKind::Alter => {
                // Force a flush first so buffered rows land under the
                // old schema before the target's DDL runs.
                flusher.flush(buffer, registry, target, state, now).await?;

                let table = mchr_convert::table_name_from_sql(&sql)?;
                match mchr_convert::convert_alter(&sql, db_name) {
                    Some(ch_sql) => {
                        target.execute_command(&ch_sql).await?;
                        let current_source = registry.get(&table).map(|(source, _)| source.clone());
                        if let Some(source) = current_source {
                            if let Some(new_source) = mchr_convert::apply_alter_to_schema(&sql, &source) {
                                let new_target = mchr_convert::to_target_schema(&new_source);
                                registry.set(table, (new_source, new_target));
                            }
                        }
                    }
                    None => {
                        warn!(target: "mchr_core::apply", %sql, "unsupported ALTER, skipping");
                    }
                }
            }
            QueryKind::Create => {
                let (source, target_schema) = mchr_convert::parse_source_create(&sql)?;
                target.create_table(&target_schema).await?;
                registry.set(source.table_name.clone(), (source, target_schema));
            }
            QueryKind::Drop => {
                let table = mchr_convert::table_name_from_sql(&sql).unwrap_or_default();
                warn!(target: "mchr_core::apply", table, "DROP TABLE received; ignoring (see design notes)");
            }
            QueryKind::Other => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mchr_binlog::{TransactionId, Value};
    use mchr_convert::{FieldDef, TableStructure};
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use mchr_binlog::Row;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct FakeTarget {
        inserted: Arc<Mutex<HashMap<String, Vec<Row>>>>,
        erased: Arc<Mutex<HashMap<String, Vec<Value>>>>,
        commands: Arc<Mutex<Vec<String>>>,
        created: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TargetClient for FakeTarget {
        async fn recreate_database(&mut self) -> ReplicationResult<()> {
            Ok(())
        }
        async fn create_table(&mut self, structure: &TableStructure) -> ReplicationResult<()> {
            self.created.lock().unwrap().push(structure.table_name.clone());
            Ok(())
        }
        async fn insert(
            &mut self,
            table: &str,
            _structure: &TableStructure,
            rows: &[Row],
        ) -> ReplicationResult<()> {
            self.inserted
                .lock()
                .unwrap()
                .entry(table.to_string())
                .or_default()
                .extend_from_slice(rows);
            Ok(())
        }
        async fn erase(
            &mut self,
            table: &str,
            _structure: &TableStructure,
            keys: &[Value],
        ) -> ReplicationResult<()> {
            self.erased
                .lock()
                .unwrap()
                .entry(table.to_string())
                .or_default()
                .extend_from_slice(keys);
            Ok(())
        }
        async fn execute_command(&mut self, sql: &str) -> ReplicationResult<()> {
            self.commands.lock().unwrap().push(sql.to_string());
            Ok(())
        }
        fn record_versions(&self) -> HashMap<String, u64> {
            HashMap::new()
        }
        fn set_record_versions(&mut self, _versions: HashMap<String, u64>) {}
    }

    fn registry_with_users() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        let source = TableStructure {
            table_name: "u".into(),
            fields: vec![
                FieldDef {
                    name: "id".into(),
                    field_type: "INT".into(),
                },
                FieldDef {
                    name: "name".into(),
                    field_type: "VARCHAR(255)".into(),
                },
            ],
            primary_key: "id".into(),
            primary_key_index: 0,
        };
        let target = mchr_convert::to_target_schema(&source);
        registry.set("u".into(), (source, target));
        registry
    }

    #[tokio::test]
    async fn add_event_populates_pending_inserts() {
        let applier = Applier::new("db".into());
        let mut buffer = Buffer::new();
        let mut registry = registry_with_users();
        let dir = tempfile::tempdir().unwrap();
        let mut state = StateStore::load(dir.path().join("state.bin")).unwrap();
        let mut flusher = Flusher::new(10_000, Duration::from_secs(1));
        let mut target = FakeTarget::default();
        let mut stats = Statistics::new();

        let event = Event {
            transaction_id: TransactionId::new("log1", 100),
            db_name: "db".into(),
            table_name: "u".into(),
            kind: EventKind::Add(vec![vec![Value::Int(3), Value::Str("c".into())]]),
        };

        let applied = applier
            .apply(event, &mut buffer, &mut registry, &mut state, &mut flusher, &mut target, &mut stats, Instant::now())
            .await
            .unwrap();
        assert!(applied);
        assert_eq!(buffer.insert_count("u"), 1);
    }

    #[tokio::test]
    async fn duplicate_transaction_is_suppressed() {
        let applier = Applier::new("db".into());
        let mut buffer = Buffer::new();
        let mut registry = registry_with_users();
        let dir = tempfile::tempdir().unwrap();
        let mut state = StateStore::load(dir.path().join("state.bin")).unwrap();
        state.advance_non_uploaded(TransactionId::new("log1", 200));
        let mut flusher = Flusher::new(10_000, Duration::from_secs(1));
        let mut target = FakeTarget::default();
        let mut stats = Statistics::new();

        let event = Event {
            transaction_id: TransactionId::new("log1", 100),
            db_name: "db".into(),
            table_name: "u".into(),
            kind: EventKind::Add(vec![vec![Value::Int(3), Value::Str("c".into())]]),
        };

        let applied = applier
            .apply(event, &mut buffer, &mut registry, &mut state, &mut flusher, &mut target, &mut stats, Instant::now())
            .await
            .unwrap();
        assert!(!applied);
        assert_eq!(buffer.insert_count("u"), 0);
    }

    #[tokio::test]
    async fn alter_forces_flush_before_ddl_and_updates_registry() {
        let applier = Applier::new("db".into());
        let mut buffer = Buffer::new();
        let mut registry = registry_with_users();
        buffer.insert("u", Value::Int(1), vec![Value::Int(1), Value::Str("a".into())]);
        let dir = tempfile::tempdir().unwrap();
        let mut state = StateStore::load(dir.path().join("state.bin")).unwrap();
        let mut flusher = Flusher::new(10_000, Duration::from_secs(1));
        let mut target = FakeTarget::default();
        let mut stats = Statistics::new();

        let event = Event {
            transaction_id: TransactionId::new("log1", 300),
            db_name: "db".into(),
            table_name: String::new(),
            kind: EventKind::Query {
                sql: "ALTER TABLE `u` ADD COLUMN `age` int NOT NULL".into(),
                kind: QueryKind::Alter,
            },
        };

        applier
            .apply(event, &mut buffer, &mut registry, &mut state, &mut flusher, &mut target, &mut stats, Instant::now())
            .await
            .unwrap();

        assert!(buffer.is_empty());
        assert_eq!(target.inserted.lock().unwrap().get("u").unwrap().len(), 1);
        assert_eq!(target.commands.lock().unwrap().len(), 1);
        assert_eq!(registry.get("u").unwrap().0.fields.len(), 3);
    }

    #[tokio::test]
    async fn unsupported_alter_is_skipped_without_error() {
        let applier = Applier::new("db".into());
        let mut buffer = Buffer::new();
        let mut registry = registry_with_users();
        let dir = tempfile::tempdir().unwrap();
        let mut state = StateStore::load(dir.path().join("state.bin")).unwrap();
        let mut flusher = Flusher::new(10_000, Duration::from_secs(1));
        let mut target = FakeTarget::default();
        let mut stats = Statistics::new();

        let event = Event {
            transaction_id: TransactionId::new("log1", 400),
            db_name: "db".into(),
            table_name: String::new(),
            kind: EventKind::Query {
                sql: "ALTER TABLE `u` PARTITION BY RANGE (id)".into(),
                kind: QueryKind::Alter,
            },
        };

        applier
            .apply(event, &mut buffer, &mut registry, &mut state, &mut flusher, &mut target, &mut stats, Instant::now())
            .await
            .unwrap();

        assert!(target.commands.lock().unwrap().is_empty());
        assert_eq!(registry.get("u").unwrap().0.fields.len(), 2);
    }
}
