//! Reel worker
//!
//! Hosts the task scheduler for the media library: loads configuration,
//! registers the built-in maintenance jobs and installs their default
//! schedules.

pub mod config;
pub mod error;
pub mod jobs;

pub use config::Config;
pub use error::{WorkerError, WorkerResult};
