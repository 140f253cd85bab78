//! Background scheduler: runs an idle callback after a quiet period

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use genesis_core::config::SchedulerConfig;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// How long `stop` waits for the worker before aborting it
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Work to run once the agent has been idle long enough
pub type IdleCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Polls for inactivity on a tokio task.
///
/// The callback is awaited inline, so idle cycles never overlap.
pub struct BackgroundScheduler {
    idle_timeout: Duration,
    poll_interval: Duration,
    last_interaction: Arc<Mutex<Instant>>,
    is_running: Arc<AtomicBool>,
    /// Replaced on every start so a permit left by an aborted worker is never seen
    shutdown: Mutex<Arc<Notify>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    on_idle: Mutex<Option<IdleCallback>>,
}

impl BackgroundScheduler {
    pub fn new(idle_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            idle_timeout,
            poll_interval,
            last_interaction: Arc::new(Mutex::new(Instant::now())),
            is_running: Arc::new(AtomicBool::new(false)),
            shutdown: Mutex::new(Arc::new(Notify::new())),
            handle: Mutex::new(None),
            on_idle: Mutex::new(None),
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.idle_timeout(), config.poll_interval())
    }

    /// Set the idle callback. Takes effect on the next `start`.
    pub fn set_idle_callback(&self, callback: IdleCallback) {
        *self.on_idle.lock() = Some(callback);
    }

    /// Record user or system activity
    pub fn note_interaction(&self) {
        *self.last_interaction.lock() = Instant::now();
    }

    #[cfg(test)]
    pub fn idle_for(&self) -> Duration {
        self.last_interaction.lock().elapsed()
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Spawn the polling task. Does nothing if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let is_running = self.is_running.clone();
        let shutdown = Arc::new(Notify::new());
        *self.shutdown.lock() = shutdown.clone();
        let last_interaction = self.last_interaction.clone();
        let on_idle = self.on_idle.lock().clone();
        let idle_timeout = self.idle_timeout;
        let poll_interval = self.poll_interval;

        info!(idle_secs = idle_timeout.as_secs(), poll_secs = poll_interval.as_secs(), "Background scheduler started");

        *handle = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sleep(poll_interval) => {}
                    _ = shutdown.notified() => break,
                }
                if !is_running.load(Ordering::SeqCst) {
                    break;
                }

                let idle = last_interaction.lock().elapsed();
                if idle < idle_timeout {
                    continue;
                }

                debug!(idle_secs = idle.as_secs(), "Idle threshold reached");
                if let Some(ref callback) = on_idle {
                    callback().await;
                }
                *last_interaction.lock() = Instant::now();
            }
            debug!("Background scheduler exited");
        }));
    }

    /// Signal the task to exit and wait briefly for it. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        let Some(mut handle) = self.handle.lock().take() else {
            return;
        };
        self.shutdown.lock().notify_one();

        if timeout(JOIN_TIMEOUT, &mut handle).await.is_err() {
            warn!("Background scheduler did not exit in time, aborting it");
            handle.abort();
        }
        info!("Background scheduler stopped");
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}
