//! The per-database replicator: state store, buffer, schema registry,
//! initial snapshotter, realtime applier, flusher, and the orchestrator
//! that sequences them through the `NONE -> CreatingStructures ->
//! InitialSnapshot -> Realtime` state machine.

mod apply;
mod buffer;
mod flush;
mod orchestrator;
mod registry;
mod snapshot;
mod state;
mod stats;

pub use apply::Applier;
pub use buffer::Buffer;
pub use flush::Flusher;
pub use orchestrator::{log_database_failure, Orchestrator, OrchestratorConfig};
pub use registry::{SchemaPair, SchemaRegistry};
pub use snapshot::{Snapshotter, DEFAULT_INITIAL_BATCH};
pub use state::{PersistedState, Phase, StateStore};
pub use stats::Statistics;
