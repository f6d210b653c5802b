//! The `BinlogReader` contract consumed by the realtime applier.

use async_trait::async_trait;
use mchr_errors::ReplicationResult;

use crate::event::{Event, TransactionId};

/// An ordered stream of change events. Implementations may be a real
/// connection to a source database's replication protocol, or an
/// in-memory queue for tests.
#[async_trait]
pub trait BinlogReader: Send {
    /// Seek to just after `position`, or to the current head if `None`.
    async fn set_position(&mut self, position: Option<TransactionId>) -> ReplicationResult<()>;

    /// Read the next event, or `None` if none is currently available
    /// (the caller is expected to sleep and retry).
    async fn read_next_event(&mut self) -> ReplicationResult<Option<Event>>;

    /// The current tail position of the log, used at bootstrap to record
    /// the "replicate from here" watermark before a snapshot begins.
    async fn get_last_transaction_id(&mut self) -> ReplicationResult<TransactionId>;
}
