//! Drives one database through its full lifecycle: `NONE` ->
//! `CreatingStructures` -> `InitialSnapshot` -> `Realtime`, resuming from
//! whichever phase was last persisted.

use std::time::{Duration, Instant};

use mchr_binlog::BinlogReader;
use mchr_errors::ReplicationResult;
use mchr_source_mysql::SourceClient;
use mchr_target_clickhouse::TargetClient;
use mchr_util::IntervalGate;
use tracing::{info, warn};

use crate::apply::Applier;
use crate::buffer::Buffer;
use crate::flush::Flusher;
use crate::registry::SchemaRegistry;
use crate::snapshot::{Snapshotter, DEFAULT_INITIAL_BATCH};
use crate::state::{Phase, StateStore};
use crate::stats::Statistics;

/// Tunable knobs for one database's orchestrator, each overridable from
/// configuration (`DATA_DUMP_BATCH_SIZE`, `DATA_DUMP_INTERVAL`,
/// `SAVE_STATE_INTERVAL`, `STATS_DUMP_INTERVAL`, `READ_LOG_INTERVAL`,
/// `INITIAL_BATCH`).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Rows requested per page of the initial snapshot.
    pub initial_batch: u64,
    /// Per-table insert/delete count that forces an early flush.
    pub data_dump_batch_size: usize,
    /// Maximum time between flushes while events are flowing.
    pub data_dump_interval: Duration,
    /// Minimum time between durable state saves during realtime replay.
    pub save_state_interval: Duration,
    /// Minimum time between statistics log lines.
    pub stats_dump_interval: Duration,
    /// How long to sleep after an empty read of the binlog stream.
    pub read_log_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            initial_batch: DEFAULT_INITIAL_BATCH,
            data_dump_batch_size: 10_000,
            data_dump_interval: Duration::from_secs(1),
            save_state_interval: Duration::from_secs(10),
            stats_dump_interval: Duration::from_secs(60),
            read_log_interval: Duration::from_secs(1),
        }
    }
}

/// Owns every per-database component and sequences them through the
/// state machine. One instance per replicated database.
pub struct Orchestrator {
    database: String,
    config: OrchestratorConfig,
    state: StateStore,
    registry: SchemaRegistry,
    buffer: Buffer,
    stats: Statistics,
    flusher: Flusher,
    snapshotter: Snapshotter,
    applier: Applier,
}

impl Orchestrator {
    /// Build an orchestrator for `database`, loading (or starting fresh)
    /// the durable state at `state_path`.
    pub fn new(
        database: String,
        state_path: impl Into<std::path::PathBuf>,
        config: OrchestratorConfig,
    ) -> ReplicationResult<Self> {
        let state = StateStore::load(state_path)?;
        let registry = SchemaRegistry::from_cached(state.state.tables_structure.clone());
        let flusher = Flusher::new(config.data_dump_batch_size, config.data_dump_interval);
        let snapshotter = Snapshotter::new(config.initial_batch, config.save_state_interval);
        let applier = Applier::new(database.clone());
        Ok(Orchestrator {
            database,
            config,
            state,
            registry,
            buffer: Buffer::new(),
            stats: Statistics::new(),
            flusher,
            snapshotter,
            applier,
        })
    }

    /// The database this orchestrator replicates.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The orchestrator's current phase, for a `status` report.
    pub fn phase(&self) -> Phase {
        self.state.state.phase
    }

    /// Run this database to completion of bootstrap/snapshot, then loop
    /// the realtime applier forever (until `source`/`target`/`binlog_reader`
    /// error or the caller drops the future).
    pub async fn run(
        &mut self,
        mut source: Box<dyn SourceClient>,
        mut target: Box<dyn TargetClient>,
        mut binlog_reader: Box<dyn BinlogReader>,
    ) -> ReplicationResult<()> {
        target.set_record_versions(self.state.state.tables_last_record_version.clone());

        if self.state.state.phase == Phase::None {
            self.bootstrap(target.as_mut(), source.as_mut(), binlog_reader.as_mut()).await?;
        }

        if self.state.state.phase == Phase::CreatingStructures {
            self.create_structures(source.as_mut(), target.as_mut()).await?;
        }

        if self.state.state.phase == Phase::InitialSnapshot {
            self.snapshotter
                .run(source.as_mut(), target.as_mut(), &self.registry, &mut self.state)
                .await?;
            self.state.state.phase = Phase::Realtime;
            self.state.save()?;
        }

        // The source client is never touched again past this point.
        source.close().await?;

        self.run_realtime(target.as_mut(), binlog_reader.as_mut()).await
    }

    async fn bootstrap(
        &mut self,
        target: &mut dyn TargetClient,
        source: &mut dyn SourceClient,
        binlog_reader: &mut dyn BinlogReader,
    ) -> ReplicationResult<()> {
        info!(target: "mchr_core::orchestrator", database = %self.database, "bootstrapping database");
        target.recreate_database().await?;
        self.state.state.tables = source.get_tables().await?;
        let tail = binlog_reader.get_last_transaction_id().await?;
        self.state.state.last_processed_transaction = Some(tail.clone());
        self.state.last_processed_transaction_non_uploaded = Some(tail);
        self.state.state.phase = Phase::CreatingStructures;
        self.state.save()
    }

    async fn create_structures(
        &mut self,
        source: &mut dyn SourceClient,
        target: &mut dyn TargetClient,
    ) -> ReplicationResult<()> {
        info!(target: "mchr_core::orchestrator", database = %self.database, tables = self.state.state.tables.len(), "creating target structures");
        for table in self.state.state.tables.clone() {
            let create_sql = source.get_table_create_statement(&table).await?;
            let (source_schema, target_schema) = mchr_convert::parse_source_create(&create_sql)?;
            target.create_table(&target_schema).await?;
            self.registry.set(table, (source_schema, target_schema));
        }
        self.state.state.tables_structure = self.registry.to_cached();
        self.state.state.phase = Phase::InitialSnapshot;
        self.state.save()
    }

    async fn run_realtime(
        &mut self,
        target: &mut dyn TargetClient,
        binlog_reader: &mut dyn BinlogReader,
    ) -> ReplicationResult<()> {
        info!(
            target: "mchr_core::orchestrator",
            database = %self.database,
            cursor = ?self.state.state.last_processed_transaction,
            "entering realtime replication",
        );
        binlog_reader
            .set_position(self.state.state.last_processed_transaction.clone())
            .await?;

        let mut save_gate = IntervalGate::new(self.config.save_state_interval);
        let mut stats_gate = IntervalGate::new(self.config.stats_dump_interval);

        loop {
            match binlog_reader.read_next_event().await? {
                Some(event) => {
                    let now = Instant::now();
                    self.applier
                        .apply(
                            event,
                            &mut self.buffer,
                            &mut self.registry,
                            &mut self.state,
                            &mut self.flusher,
                            target,
                            &mut self.stats,
                            now,
                        )
                        .await?;

                    if self.should_flush(now) {
                        self.flusher
                            .flush(&mut self.buffer, &self.registry, target, &mut self.state, now)
                            .await?;
                    }

                    self.maybe_save_and_report(target, &mut save_gate, &mut stats_gate, now)?;
                }
                None => {
                    tokio::time::sleep(self.config.read_log_interval).await;
                    let now = Instant::now();
                    if self.flusher.interval_due(now) && !self.buffer.is_empty() {
                        self.flusher
                            .flush(&mut self.buffer, &self.registry, target, &mut self.state, now)
                            .await?;
                    }
                    self.maybe_save_and_report(target, &mut save_gate, &mut stats_gate, now)?;
                }
            }
        }
    }

    fn should_flush(&self, now: Instant) -> bool {
        let over_threshold = self
            .buffer
            .tables_with_pending()
            .iter()
            .any(|table| self.flusher.table_over_threshold(&self.buffer, table));
        over_threshold || (self.flusher.interval_due(now) && !self.buffer.is_empty())
    }

    fn maybe_save_and_report(
        &mut self,
        target: &mut dyn TargetClient,
        save_gate: &mut IntervalGate,
        stats_gate: &mut IntervalGate,
        now: Instant,
    ) -> ReplicationResult<()> {
        if save_gate.fire(now) {
            self.state.state.tables_structure = self.registry.to_cached();
            self.state.state.tables_last_record_version = target.record_versions();
            self.state.save()?;
        }
        if stats_gate.fire(now) {
            self.stats.log_and_reset(&self.database);
        }
        Ok(())
    }
}

/// Log a warning and carry on when a single database's orchestrator task
/// dies; the supervisor owns the decision to restart the process.
pub fn log_database_failure(database: &str, err: &mchr_errors::ReplicationError) {
    warn!(target: "mchr_core::orchestrator", database, error = %err, "database replication task failed");
}
