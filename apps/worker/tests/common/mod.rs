//! Common test utilities for worker integration tests
//!
//! Scheduler setup helpers shared by the scenario tests. Mock handlers and
//! polling helpers come from `reel-test-utils`.

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod fixtures;

pub use fixtures::*;
