//! Task handler registry
//!
//! Maps a task type name to a handler factory plus per-type defaults. The
//! registry is an injectable value owned by one scheduler; there is no
//! process-wide table.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::handler::TaskHandler;
use crate::task::Priority;

/// Constructor invoked once per execution
pub type HandlerFactory = Arc<dyn Fn() -> Arc<dyn TaskHandler> + Send + Sync>;

/// Defaults applied to submissions of one task type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskTypeOptions {
    pub priority: Option<Priority>,
    pub max_attempts: Option<u32>,
    pub timeout: Option<Duration>,
}

impl TaskTypeOptions {
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct Registration {
    factory: HandlerFactory,
    options: TaskTypeOptions,
}

/// Registry of executable task types
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler factory under `task_type`, replacing any previous one
    pub fn register<F>(&self, task_type: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn TaskHandler> + Send + Sync + 'static,
    {
        self.register_with(task_type, TaskTypeOptions::default(), factory);
    }

    /// Register a handler factory with per-type defaults
    pub fn register_with<F>(&self, task_type: impl Into<String>, options: TaskTypeOptions, factory: F)
    where
        F: Fn() -> Arc<dyn TaskHandler> + Send + Sync + 'static,
    {
        let task_type = task_type.into();
        let previous = self.handlers.insert(
            task_type.clone(),
            Registration {
                factory: Arc::new(factory),
                options,
            },
        );
        if previous.is_some() {
            tracing::warn!(task_type = %task_type, "Replaced task handler registration");
        } else {
            tracing::debug!(task_type = %task_type, "Registered task handler");
        }
    }

    /// Register a shared handler instance
    pub fn register_handler(
        &self,
        task_type: impl Into<String>,
        options: TaskTypeOptions,
        handler: Arc<dyn TaskHandler>,
    ) {
        self.register_with(task_type, options, move || handler.clone());
    }

    pub fn unregister(&self, task_type: &str) -> bool {
        self.handlers.remove(task_type).is_some()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn options(&self, task_type: &str) -> Option<TaskTypeOptions> {
        self.handlers.get(task_type).map(|r| r.options)
    }

    /// Build a handler for one execution
    pub fn resolve(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        // Clone the factory out so the shard lock is not held while it runs
        let factory = self.handlers.get(task_type).map(|r| r.factory.clone())?;
        Some(factory())
    }

    /// Registered task type names, sorted
    pub fn task_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskResult;
    use crate::handler::{handler_fn, TaskContext};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop() -> Arc<dyn TaskHandler> {
        handler_fn(|_ctx: TaskContext, _params| async { TaskResult::Ok(()) })
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = HandlerRegistry::new();
        assert!(!registry.contains("RefreshMovie"));
        assert!(registry.resolve("RefreshMovie").is_none());

        registry.register("RefreshMovie", noop);
        assert!(registry.contains("RefreshMovie"));
        assert!(registry.resolve("RefreshMovie").is_some());
        assert_eq!(registry.options("RefreshMovie"), Some(TaskTypeOptions::default()));
    }

    #[test]
    fn test_factory_runs_per_resolution() {
        let registry = HandlerRegistry::new();
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        registry.register("SearchMovie", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            noop()
        });

        registry.resolve("SearchMovie");
        registry.resolve("SearchMovie");
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_options_and_listing() {
        let registry = HandlerRegistry::new();
        let options = TaskTypeOptions::default()
            .priority(Priority::Background)
            .max_attempts(5)
            .timeout(Duration::from_secs(600));
        registry.register_handler("Housekeeping", options, noop());
        registry.register("HealthCheck", noop);

        assert_eq!(registry.options("Housekeeping"), Some(options));
        assert_eq!(registry.task_types(), vec!["HealthCheck", "Housekeeping"]);

        assert!(registry.unregister("HealthCheck"));
        assert!(!registry.unregister("HealthCheck"));
        assert_eq!(registry.task_types(), vec!["Housekeeping"]);
    }
}
