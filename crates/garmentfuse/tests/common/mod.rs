//! Shared utilities for garmentfuse integration tests.
//!
//! - `TestHarness` wires a memory job store, a filesystem blob store in a
//!   temp directory, an orchestrator, a dispatcher and the API
//! - builders for images, uploads and creation requests
//! - scripted inference clients

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
