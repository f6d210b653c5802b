//! Miscellaneous utilities used by the rest of the workspace.

pub mod atomic_file;
pub mod interval;
pub mod quote;

pub use atomic_file::atomic_write;
pub use interval::IntervalGate;
pub use quote::quote_literal;
