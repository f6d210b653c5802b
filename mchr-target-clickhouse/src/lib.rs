//! The target database client: ClickHouse DDL execution and versioned
//! row upload.

mod client;

pub use client::{ClickHouseTargetClient, TargetClient, VERSION_COLUMN};
