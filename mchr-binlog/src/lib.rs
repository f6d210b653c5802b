//! The binlog reader: an ordered stream of change events from the source
//! database, consumed by the realtime applier in `mchr-core`.
//!
//! This is specified purely at the interface in the system's original
//! scope, but a deployable crate needs a real implementation, so this
//! crate provides both: [`MySqlBinlogReader`] speaks the MySQL replication
//! protocol directly, and [`memory::InMemoryBinlogReader`] is a queue-backed
//! test double used by the property tests in `mchr-core`.

pub mod event;
pub mod memory;
pub mod mysql_reader;
pub mod reader;

pub use event::{Event, EventKind, QueryKind, Row, TransactionId, Value};
pub use memory::InMemoryBinlogReader;
pub use mysql_reader::MySqlBinlogReader;
pub use reader::BinlogReader;
