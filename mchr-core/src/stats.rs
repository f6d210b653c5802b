//! Replication statistics: the periodic summary line plus the matching
//! `metrics` counters/gauges, scoped per database.

use mchr_binlog::TransactionId;
use tracing::info;

/// Event/record counters since the last dump. Reset to zero after every
/// [`Statistics::log_and_reset`] call.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    /// The most recently processed transaction id, if any.
    pub last_transaction: Option<TransactionId>,
    /// Total events processed (ADD + REMOVE + QUERY).
    pub events_count: u64,
    /// Number of ADD events processed.
    pub insert_events_count: u64,
    /// Number of rows carried by ADD events.
    pub insert_records_count: u64,
    /// Number of REMOVE events processed.
    pub erase_events_count: u64,
    /// Number of rows carried by REMOVE events.
    pub erase_records_count: u64,
}

impl Statistics {
    /// A zeroed counter set.
    pub fn new() -> Self {
        Statistics::default()
    }

    /// Record an ADD event carrying `record_count` rows.
    pub fn record_insert(&mut self, record_count: usize, database: &str) {
        self.insert_events_count += 1;
        self.insert_records_count += record_count as u64;
        metrics::counter!("mchr_insert_records_total", "database" => database.to_string())
            .increment(record_count as u64);
    }

    /// Record a REMOVE event carrying `record_count` rows.
    pub fn record_erase(&mut self, record_count: usize, database: &str) {
        self.erase_events_count += 1;
        self.erase_records_count += record_count as u64;
        metrics::counter!("mchr_erase_records_total", "database" => database.to_string())
            .increment(record_count as u64);
    }

    /// Record any processed event (called for every non-suppressed
    /// event, including QUERY).
    pub fn record_event(&mut self, transaction_id: TransactionId, database: &str) {
        self.events_count += 1;
        self.last_transaction = Some(transaction_id);
        metrics::counter!("mchr_events_total", "database" => database.to_string()).increment(1);
    }

    /// Log the current counters at `info` level and reset them, as the
    /// periodic statistics dump.
    pub fn log_and_reset(&mut self, database: &str) {
        info!(
            target: "mchr_core::stats",
            database,
            last_transaction = ?self.last_transaction,
            events_count = self.events_count,
            insert_events_count = self.insert_events_count,
            insert_records_count = self.insert_records_count,
            erase_events_count = self.erase_events_count,
            erase_records_count = self.erase_records_count,
            "replication statistics",
        );
        *self = Statistics::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let mut stats = Statistics::new();
        stats.record_insert(3, "db");
        stats.record_erase(1, "db");
        stats.record_event(TransactionId::new("log1", 1), "db");

        assert_eq!(stats.insert_records_count, 3);
        assert_eq!(stats.erase_records_count, 1);
        assert_eq!(stats.events_count, 1);

        stats.log_and_reset("db");
        assert_eq!(stats.events_count, 0);
        assert_eq!(stats.insert_records_count, 0);
        assert!(stats.last_transaction.is_none());
    }
}
