//! Periodic/threshold-driven upload of the [`Buffer`] to the target,
//! advancing the durable cursor on success.

use std::time::{Duration, Instant};

use mchr_errors::{ReplicationError, ReplicationResult};
use mchr_target_clickhouse::TargetClient;
use mchr_util::IntervalGate;

use crate::buffer::Buffer;
use crate::registry::SchemaRegistry;
use crate::state::StateStore;

/// Drives flush timing and the flush itself. One instance per database.
pub struct Flusher {
    batch_size: usize,
    interval: IntervalGate,
}

impl Flusher {
    /// `batch_size` is `DATA_DUMP_BATCH_SIZE`; `interval` is
    /// `DATA_DUMP_INTERVAL`.
    pub fn new(batch_size: usize, interval: Duration) -> Self {
        Flusher {
            batch_size,
            interval: IntervalGate::new(interval),
        }
    }

    /// `true` if `table`'s pending inserts or deletes have crossed the
    /// batch-size threshold.
    pub fn table_over_threshold(&self, buffer: &Buffer, table: &str) -> bool {
        buffer.insert_count(table) >= self.batch_size || buffer.delete_count(table) >= self.batch_size
    }

    /// `true` if the flush interval has elapsed since the last flush.
    pub fn interval_due(&self, now: Instant) -> bool {
        self.interval.is_due(now)
    }

    /// Upload every table's pending inserts, then every table's pending
    /// deletes (safe because I2 guarantees the two sets are disjoint per
    /// table), reset both buffers, advance the durable cursor, and
    /// persist state. Any target error aborts the flush before the
    /// cursor is advanced, so a restart re-reads the lost events from
    /// the log.
    pub async fn flush(
        &mut self,
        buffer: &mut Buffer,
        registry: &SchemaRegistry,
        target: &mut dyn TargetClient,
        state: &mut StateStore,
        now: Instant,
    ) -> ReplicationResult<()> {
        let tables = buffer.tables_with_pending();

        for table in &tables {
            let rows = buffer.take_inserts(table);
            if rows.is_empty() {
                continue;
            }
            let (_, target_schema) = registry
                .get(table)
                .ok_or_else(|| ReplicationError::UnknownTable(table.clone()))?;
            target.insert(table, target_schema, &rows).await?;
        }

        for table in &tables {
            let keys = buffer.take_deletes(table);
            if keys.is_empty() {
                continue;
            }
            let (_, target_schema) = registry
                .get(table)
                .ok_or_else(|| ReplicationError::UnknownTable(table.clone()))?;
            target.erase(table, target_schema, &keys).await?;
        }

        state.commit_flush();
        state.state.tables_last_record_version = target.record_versions();
        state.save()?;
        self.interval.fire(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mchr_binlog::{Row, TransactionId, Value};
    use mchr_convert::{FieldDef, TableStructure};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct FakeTarget {
        inserted: Arc<Mutex<HashMap<String, Vec<Row>>>>,
        erased: Arc<Mutex<HashMap<String, Vec<Value>>>>,
        versions: HashMap<String, u64>,
    }

    #[async_trait]
    impl TargetClient for FakeTarget {
        async fn recreate_database(&mut self) -> ReplicationResult<()> {
            Ok(())
        }
        async fn create_table(&mut self, _structure: &TableStructure) -> ReplicationResult<()> {
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
            *self.versions.entry(table.to_string()).or_insert(0) += rows.len() as u64;
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
        async fn execute_command(&mut self, _sql: &str) -> ReplicationResult<()> {
            Ok(())
        }
        fn record_versions(&self) -> HashMap<String, u64> {
            self.versions.clone()
        }
        fn set_record_versions(&mut self, versions: HashMap<String, u64>) {
            self.versions = versions;
        }
    }

    fn registry() -> SchemaRegistry {
        let mut r = SchemaRegistry::new();
        let source = TableStructure {
            table_name: "u".into(),
            fields: vec![FieldDef {
                name: "id".into(),
                field_type: "INT".into(),
            }],
            primary_key: "id".into(),
            primary_key_index: 0,
        };
        let target = source.clone();
        r.set("u".into(), (source, target));
        r
    }

    #[tokio::test]
    async fn flush_uploads_inserts_before_deletes_and_resets_buffer() {
        let mut buffer = Buffer::new();
        buffer.insert("u", Value::Int(3), vec![Value::Int(3)]);
        buffer.insert("u", Value::Int(4), vec![Value::Int(4)]);
        buffer.delete("u", Value::Int(5));

        let registry = registry();
        let mut target = FakeTarget::default();
        let dir = tempfile::tempdir().unwrap();
        let mut state = StateStore::load(dir.path().join("state.bin")).unwrap();
        state.advance_non_uploaded(TransactionId::new("log1", 100));

        let mut flusher = Flusher::new(10_000, Duration::from_secs(1));
        flusher
            .flush(&mut buffer, &registry, &mut target, &mut state, Instant::now())
            .await
            .unwrap();

        assert!(buffer.is_empty());
        assert_eq!(target.inserted.lock().unwrap().get("u").unwrap().len(), 2);
        assert_eq!(target.erased.lock().unwrap().get("u").unwrap().len(), 1);
        assert_eq!(
            state.state.last_processed_transaction,
            Some(TransactionId::new("log1", 100))
        );
    }

    #[tokio::test]
    async fn flush_on_unregistered_table_fails_without_partial_commit() {
        let mut buffer = Buffer::new();
        buffer.insert("ghost", Value::Int(1), vec![Value::Int(1)]);

        let registry = SchemaRegistry::new();
        let mut target = FakeTarget::default();
        let dir = tempfile::tempdir().unwrap();
        let mut state = StateStore::load(dir.path().join("state.bin")).unwrap();

        let mut flusher = Flusher::new(10_000, Duration::from_secs(1));
        let result = flusher
            .flush(&mut buffer, &registry, &mut target, &mut state, Instant::now())
            .await;
        assert!(matches!(result, Err(ReplicationError::UnknownTable(_))));
    }
}
