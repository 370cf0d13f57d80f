//! Test utilities and fixtures for modcache
//!
//! Shared by the integration tests and benches of `modcache-core`.

pub mod fixtures;
pub mod mocks;
