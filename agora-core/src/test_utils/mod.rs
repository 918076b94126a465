//! Test utilities and helpers for agora-core
//!
//! Fixtures, seeded keypairs and bounded channel waits shared by the unit tests,
//! the integration tests under `tests/` and the benches.

pub mod async_helpers;
pub mod deterministic_rng;
pub mod fixtures;

pub use async_helpers::*;
pub use deterministic_rng::*;
pub use fixtures::*;
