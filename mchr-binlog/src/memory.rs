//! A queue-backed [`BinlogReader`] used by the property and scenario tests
//! in `mchr-core` — it lets a test push a literal sequence of events and
//! drive the replicator against it without a real MySQL server.

use std::collections::VecDeque;

use async_trait::async_trait;
use mchr_errors::ReplicationResult;

use crate::event::{Event, TransactionId};
use crate::reader::BinlogReader;

/// An in-memory `BinlogReader` backed by a fixed event log. `set_position`
/// truncates the queue to events strictly after the given position,
/// emulating how a real reader would seek.
pub struct InMemoryBinlogReader {
    all_events: Vec<Event>,
    pending: VecDeque<Event>,
}

impl InMemoryBinlogReader {
    /// Build a reader over the given ordered event log, starting at the
    /// head (nothing consumed yet until `set_position` is called).
    pub fn new(events: Vec<Event>) -> Self {
        let pending = events.clone().into();
        InMemoryBinlogReader {
            all_events: events,
            pending,
        }
    }
}

#[async_trait]
impl BinlogReader for InMemoryBinlogReader {
    async fn set_position(&mut self, position: Option<TransactionId>) -> ReplicationResult<()> {
        self.pending = match position {
            None => self.all_events.clone().into(),
            Some(pos) => self
                .all_events
                .iter()
                .filter(|e| e.transaction_id > pos)
                .cloned()
                .collect(),
        };
        Ok(())
    }

    async fn read_next_event(&mut self) -> ReplicationResult<Option<Event>> {
        Ok(self.pending.pop_front())
    }

    async fn get_last_transaction_id(&mut self) -> ReplicationResult<TransactionId> {
        Ok(self
            .all_events
            .last()
            .map(|e| e.transaction_id.clone())
            .unwrap_or_else(|| TransactionId::new("", 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, QueryKind};

    fn add_event(log: &str, offset: u64, table: &str) -> Event {
        Event {
            transaction_id: TransactionId::new(log, offset),
            db_name: "db".into(),
            table_name: table.into(),
            kind: EventKind::Query {
                sql: "BEGIN".into(),
                kind: QueryKind::Other,
            },
        }
    }

    #[tokio::test]
    async fn set_position_skips_already_processed_events() {
        let events = vec![
            add_event("log1", 10, "t"),
            add_event("log1", 20, "t"),
            add_event("log1", 30, "t"),
        ];
        let mut reader = InMemoryBinlogReader::new(events);
        reader
            .set_position(Some(TransactionId::new("log1", 20)))
            .await
            .unwrap();

        let next = reader.read_next_event().await.unwrap().unwrap();
        assert_eq!(next.transaction_id, TransactionId::new("log1", 30));
        assert!(reader.read_next_event().await.unwrap().is_none());
    }
}
