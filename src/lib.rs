//! Weiser Library
//!
//! Declarative data-quality engine: compiles configured checks into
//! dialect-specific SQL, executes them against their sources, evaluates
//! pass/fail conditions, and appends every evaluation to a metric store
//! that anomaly checks read back.

pub mod config;
pub mod drivers;
pub mod engine;
pub mod models;
pub mod sql;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use engine::{compile_checks, CancelHandle, Runner};
pub use models::{CheckDescriptor, MetricRecord, RunSummary};
pub use store::{open_store, MetricStore};
pub use utils::{ErrorKind, WeiserError, WeiserResult};

#[cfg(test)]
mod tests;
