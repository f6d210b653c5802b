//! Shared error type for every crate in the workspace.
//!
//! Mirrors the split common in this kind of workspace between a typed
//! library error (here) and `anyhow` at the binary boundary: library code
//! always returns
//! [`ReplicationResult`], the CLI wraps those in `anyhow::Context`.

use std::fmt;

/// The result type used throughout the replicator.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors that can occur while replicating a database.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// A source, target, or binlog I/O call failed. Transient by design —
    /// the process is expected to exit and be restarted by a supervisor.
    #[error("source error: {0}")]
    Source(String),

    /// The target database rejected a DDL statement or a bulk write.
    #[error("target error: {0}")]
    Target(String),

    /// The binlog stream produced a malformed or unexpected event.
    #[error("binlog protocol error: {0}")]
    Protocol(String),

    /// A row event (or a delete) referenced a table that was never
    /// registered via bootstrap or a CREATE TABLE event. Per spec this is a
    /// programming error, not a transient condition.
    #[error("received event for unregistered table `{0}`")]
    UnknownTable(String),

    /// The persisted state file could not be deserialized.
    #[error("state file at {path} is corrupt: {source}")]
    CorruptState {
        /// Path to the offending state file.
        path: String,
        /// The underlying (de)serialization error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Underlying filesystem I/O failure (state file read/write).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed or was missing a required field.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ReplicationError {
    /// Build a [`ReplicationError::CorruptState`] from any serialization error.
    pub fn corrupt_state(
        path: impl fmt::Display,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ReplicationError::CorruptState {
            path: path.to_string(),
            source: Box::new(source),
        }
    }
}
