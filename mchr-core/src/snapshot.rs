//! PK-ordered range-paged scan of each table, streaming converted rows
//! straight to the target. Resumable via the persisted snapshot cursor.

use std::time::{Duration, Instant};

use mchr_binlog::Value;
use mchr_errors::ReplicationResult;
use mchr_source_mysql::{SourceClient, StartValue};
use mchr_target_clickhouse::TargetClient;
use mchr_util::IntervalGate;
use tracing::info;

use crate::registry::SchemaRegistry;
use crate::state::StateStore;

/// Rows requested per page of the initial snapshot (`INITIAL_BATCH`).
pub const DEFAULT_INITIAL_BATCH: u64 = 50_000;

/// Drives the PK-ordered range scan for every table in `state.state.tables`.
pub struct Snapshotter {
    batch_size: u64,
    /// Gates the per-page `state.save()` in `run_table` to at most once
    /// per `SAVE_STATE_INTERVAL`, the same policy `run_realtime` applies
    /// via its own `save_gate`.
    save_gate: IntervalGate,
}

impl Snapshotter {
    /// `batch_size` is `INITIAL_BATCH`; `save_interval` is
    /// `SAVE_STATE_INTERVAL`.
    pub fn new(batch_size: u64, save_interval: Duration) -> Self {
        Snapshotter {
            batch_size,
            save_gate: IntervalGate::new(save_interval),
        }
    }

    /// Snapshot every table, honoring a resume point left by a prior
    /// crash (`initial_replication_table` / `initial_replication_max_primary_key`).
    pub async fn run(
        &mut self,
        source: &mut dyn SourceClient,
        target: &mut dyn TargetClient,
        registry: &SchemaRegistry,
        state: &mut StateStore,
    ) -> ReplicationResult<()> {
        let tables = state.state.tables.clone();
        let mut skipping = state.state.initial_replication_table.is_some();

        for table in tables {
            if skipping {
                if state.state.initial_replication_table.as_deref() == Some(table.as_str()) {
                    skipping = false;
                } else {
                    continue;
                }
            }

            if state.state.initial_replication_table.as_deref() != Some(table.as_str()) {
                state.state.initial_replication_table = Some(table.clone());
                state.state.initial_replication_max_primary_key = None;
                state.save()?;
            }

            self.run_table(&table, source, target, registry, state).await?;
        }

        state.state.initial_replication_table = None;
        state.state.initial_replication_max_primary_key = None;
        state.save()?;
        Ok(())
    }

    async fn run_table(
        &mut self,
        table: &str,
        source: &mut dyn SourceClient,
        target: &mut dyn TargetClient,
        registry: &SchemaRegistry,
        state: &mut StateStore,
    ) -> ReplicationResult<()> {
        info!(target: "mchr_core::snapshot", table, "running initial replication for table");

        let (_, target_schema) = registry
            .get(table)
            .ok_or_else(|| mchr_errors::ReplicationError::UnknownTable(table.to_string()))?;
        let primary_key = target_schema.primary_key.clone();
        let primary_key_index = target_schema.primary_key_index;

        let mut max_pk = state.state.initial_replication_max_primary_key.clone();

        loop {
            let start_value = to_start_value(max_pk.as_ref());
            let rows = source
                .get_records(table, &primary_key, self.batch_size, &start_value)
                .await?;
            if rows.is_empty() {
                break;
            }

            let (_, target_schema) = registry
                .get(table)
                .ok_or_else(|| mchr_errors::ReplicationError::UnknownTable(table.to_string()))?;
            let converted = mchr_convert::convert_rows(rows, target_schema);
            target.insert(table, target_schema, &converted).await?;

            for row in &converted {
                let pk = row[primary_key_index].clone();
                max_pk = Some(match max_pk {
                    Some(current) if greater(&current, &pk) => current,
                    _ => pk,
                });
            }

            state.state.initial_replication_max_primary_key = max_pk.clone();
            if self.save_gate.fire(Instant::now()) {
                state.save()?;
            }
        }

        Ok(())
    }
}

fn to_start_value(max_pk: Option<&Value>) -> StartValue {
    match max_pk {
        None => StartValue::Unbounded,
        Some(Value::Int(i)) => StartValue::Int(*i),
        Some(Value::UInt(u)) => StartValue::Int(*u as i64),
        Some(other) => StartValue::QuotedLiteral(other.to_literal()),
    }
}

/// Total order over primary key values for tracking the running
/// maximum. Numeric variants compare numerically; anything else falls
/// back to lexicographic string comparison, which is sufficient for the
/// monotonically-increasing PK scan this function is used for.
fn greater(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x > y,
        (Value::UInt(x), Value::UInt(y)) => x > y,
        (Value::Int(x), Value::UInt(y)) => *x > *y as i64,
        (Value::UInt(x), Value::Int(y)) => *x as i64 > *y,
        (Value::Float(x), Value::Float(y)) => x > y,
        _ => a.to_literal() > b.to_literal(),
    }
}
