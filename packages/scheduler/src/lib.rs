//! Reel background task scheduler
//!
//! Coordinates asynchronous library work (metadata refresh, searches,
//! imports, health checks, cleanup) across three priority tiers, each with
//! its own bounded queue and fixed-size worker pool.
//!
//! - [`HandlerRegistry`] maps task type names to [`TaskHandler`] factories.
//! - [`TaskStore`] owns every task and schedule row; [`MemoryTaskStore`] is
//!   the in-process implementation.
//! - [`Dispatcher`] validates and enqueues submissions, and serves
//!   get/list/cancel/queue status.
//! - Worker pools enforce timeouts and cooperative cancellation.
//! - Failed attempts are retried with exponential backoff ([`RetryPolicy`]).
//! - [`ScheduleTrigger`] fires recurring [`ScheduledTask`]s.
//!
//! ```rust,ignore
//! let scheduler = Scheduler::builder(SchedulerConfig::from_env()?).build()?;
//! scheduler.registry().register("RefreshMovie", || Arc::new(RefreshMovie));
//! scheduler.start().await?;
//!
//! let task = scheduler
//!     .submit(TaskRequest::new("RefreshMovie").params(json!({ "movie_id": 42 })))
//!     .await?;
//! ```

pub mod dispatcher;
pub mod error;
pub mod handler;
mod pool;
mod queue;
pub mod registry;
pub mod retry;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod trigger;

pub use dispatcher::{Dispatcher, TaskRequest};
pub use error::{ErrorSeverity, SchedulerError, SchedulerResult, TaskError, TaskResult};
pub use handler::{handler_fn, FnHandler, ProgressReporter, TaskContext, TaskHandler};
pub use registry::{HandlerFactory, HandlerRegistry, TaskTypeOptions};
pub use retry::RetryPolicy;
pub use schedule::{OverlapPolicy, Recurrence, ScheduledTask};
pub use scheduler::{Scheduler, SchedulerBuilder};
pub use store::{MemoryTaskStore, TaskStore};
pub use task::{Priority, QueueStatus, TaskFilter, TaskInstance, TaskStatus, WorkerBinding};
pub use trigger::{ScheduleTrigger, TickReport};

pub use reel_shared_config::{QueueConfig, RetentionConfig, RetryConfig, SchedulerConfig};
