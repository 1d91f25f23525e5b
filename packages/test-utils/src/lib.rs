//! Shared test utilities for the reel workspace
//!
//! Mock task handlers, scaled-down scheduler configurations, and polling
//! helpers for asserting on asynchronous task state.
//!
//! # Mock Handlers
//!
//! - [`RecordingHandler`] - succeeds, optionally reporting progress
//! - [`FailingHandler`] - always fails (retryable or not)
//! - [`FlakyHandler`] - fails a fixed number of times, then succeeds
//! - [`SleepyHandler`] - sleeps and ignores cancellation
//! - [`CooperativeHandler`] - waits for its cancellation signal
//! - [`PanickingHandler`] - panics
//! - [`GateHandler`] - blocks on a shared [`Gate`], tracking concurrency
//!
//! # Example
//!
//! ```rust,ignore
//! use reel_test_utils::{test_config, wait_for_status, RecordingHandler};
//!
//! #[tokio::test]
//! async fn test_health_check() {
//!     let scheduler = Scheduler::builder(test_config()).build().unwrap();
//!     let handler = RecordingHandler::new();
//!     scheduler.registry().register_handler("HealthCheck", Default::default(), Arc::new(handler.clone()));
//!     scheduler.start().await.unwrap();
//!     // ...
//! }
//! ```

mod config;
mod handlers;
mod wait;

pub use config::{test_config, with_workers};
pub use handlers::{
    CallLog, CallRecord, CooperativeHandler, FailingHandler, FlakyHandler, Gate, GateHandler,
    PanickingHandler, RecordingHandler, SleepyHandler,
};
pub use wait::{eventually, wait_for_chain, wait_for_status, wait_for_terminal, POLL_INTERVAL};
