//! The source database client: schema introspection (`SHOW TABLES`,
//! `SHOW CREATE TABLE`) and primary-key-ordered paged reads, consumed by
//! the orchestrator's bootstrap phase and the initial snapshotter.

mod client;
mod start_value;

pub use client::{MySqlSourceClient, SourceClient};
pub use start_value::StartValue;
