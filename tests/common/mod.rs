//! Common test utilities for integration tests.

pub mod cluster_sim;
pub mod fixtures;

// Re-export common types
pub use cluster_sim::*;
pub use fixtures::*;
