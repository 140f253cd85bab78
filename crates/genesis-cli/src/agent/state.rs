//! Life loop configuration and run bookkeeping

use genesis_core::config::EngineConfig;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Budgets for one life loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// Attempts per task before it is marked failed
    pub max_retries: u32,
    /// Plan/act steps per attempt
    pub max_steps: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from_engine(&EngineConfig::default())
    }
}

impl LoopConfig {
    pub fn from_engine(engine: &EngineConfig) -> Self {
        Self {
            max_retries: engine.max_retries,
            max_steps: engine.max_steps_per_task,
        }
    }

    #[cfg(test)]
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    #[cfg(test)]
    pub fn with_max_steps(mut self, max: u32) -> Self {
        self.max_steps = max;
        self
    }
}

/// Counters returned by `run_all`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub completed: usize,
    pub failed: usize,
    /// Tasks started, including one interrupted by a stop
    pub total: usize,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} completed, {} failed, {} total",
            self.completed, self.failed, self.total
        )
    }
}

/// Cooperative stop flag shared between a loop and its callers
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Actions and last result of one attempt
#[derive(Debug, Clone, Default)]
pub(crate) struct AttemptLog {
    pub actions: Vec<String>,
    pub last_result: String,
}

/// How one attempt ended
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    Completed(AttemptLog),
    Exhausted(AttemptLog),
    Stopped,
}

/// How one task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Completed,
    Failed,
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_config_builder() {
        let config = LoopConfig::default().with_max_retries(5).with_max_steps(2);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_steps, 2);
        assert_eq!(LoopConfig::default().max_steps, 10);
    }

    #[test]
    fn test_stop_handle_is_shared() {
        let handle = StopHandle::new();
        let clone = handle.clone();
        clone.request();
        assert!(handle.is_requested());
        handle.reset();
        assert!(!clone.is_requested());
    }

    #[test]
    fn test_run_stats_display() {
        let stats = RunStats {
            completed: 2,
            failed: 1,
            total: 3,
        };
        assert_eq!(stats.to_string(), "2 completed, 1 failed, 3 total");
    }
}
