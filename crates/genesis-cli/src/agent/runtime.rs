//! Agent facade: one store, one life loop, and an optional idle scheduler

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::ValueEnum;
use futures::future::BoxFuture;
use genesis_core::{AgentState, Config, StateStore, StoreError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::life_loop::{LifeLoop, ProgressFn};
use super::state::{LoopConfig, RunStats, StopHandle};
use crate::mind::{single_line, DecisionPort, MemoryDistiller};
use crate::scheduler::{BackgroundScheduler, IdleCallback};
use crate::tools::executor::ActionPort;

/// How an agent is driven
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Serve the given file only
    #[default]
    Foreground,
    /// Evolve against the wake file with the meta prompt
    Background,
    /// Serve the given file while idle cycles run against the wake file
    Dual,
}

impl RunMode {
    pub fn uses_scheduler(self) -> bool {
        matches!(self, Self::Background | Self::Dual)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
            Self::Dual => "dual",
        };
        f.write_str(name)
    }
}

/// The two boundaries every loop talks to
#[derive(Clone)]
pub struct Ports {
    pub decision: Arc<dyn DecisionPort>,
    pub actions: Arc<dyn ActionPort>,
}

/// Read the meta prompt file, ignoring a missing or empty one
pub fn load_meta_prompt(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "No meta prompt");
            None
        }
    }
}

/// One idle cycle against the wake file
struct Introspection {
    wake_file: PathBuf,
    meta_prompt: Option<String>,
    ports: Ports,
    config: LoopConfig,
    distiller: MemoryDistiller,
    stop: StopHandle,
    progress: Option<ProgressFn>,
    cycle: Arc<Mutex<()>>,
}

impl Introspection {
    async fn run(&self) {
        let Ok(_cycle) = self.cycle.try_lock() else {
            debug!("Agent busy, skipping idle cycle");
            return;
        };
        if !self.wake_file.exists() {
            warn!(path = %self.wake_file.display(), "Wake file missing, skipping idle cycle");
            return;
        }

        info!(path = %self.wake_file.display(), "Idle cycle started");
        let store = Arc::new(StateStore::new(&self.wake_file));
        let mut life_loop = LifeLoop::new(store, self.ports.decision.clone(), self.ports.actions.clone(), self.config)
            .with_distiller(self.distiller)
            .with_meta_prompt(self.meta_prompt.clone())
            .with_stop_handle(self.stop.clone());
        if let Some(ref progress) = self.progress {
            life_loop = life_loop.with_progress(progress.clone());
        }

        match life_loop.run_once().await {
            Ok(true) => info!("Idle cycle ran a task"),
            Ok(false) => debug!("Idle cycle found nothing to do"),
            Err(e) => warn!(error = %e, "Idle cycle failed"),
        }
    }

    fn into_callback(self) -> IdleCallback {
        let this = Arc::new(self);
        Arc::new(move || -> BoxFuture<'static, ()> {
            let this = this.clone();
            Box::pin(async move { this.run().await })
        })
    }
}

/// A runnable agent over one backing file
pub struct Agent {
    mode: RunMode,
    life_loop: LifeLoop,
    scheduler: Option<BackgroundScheduler>,
    /// Held while any loop cycle runs so idle cycles never overlap with it
    cycle: Arc<Mutex<()>>,
}

impl Agent {
    /// Open the backing file and wire the loop for `mode`.
    ///
    /// A missing backing file is an error. The scheduler is not started
    /// until [`Agent::start`].
    pub fn new(
        file: impl Into<PathBuf>,
        mode: RunMode,
        config: &Config,
        ports: Ports,
        progress: Option<ProgressFn>,
    ) -> Result<Self, StoreError> {
        let store = Arc::new(StateStore::open(file)?);
        let loop_config = LoopConfig::from_engine(&config.engine);
        let distiller = MemoryDistiller::from_config(&config.memory);
        let stop = StopHandle::new();
        let cycle = Arc::new(Mutex::new(()));

        let meta_prompt = if mode.uses_scheduler() {
            load_meta_prompt(&config.scheduler.meta_prompt_file)
        } else {
            None
        };
        if meta_prompt.is_some() {
            info!(path = %config.scheduler.meta_prompt_file.display(), "Loaded meta prompt");
        }

        let main_meta = match mode {
            RunMode::Background => meta_prompt.clone(),
            _ => None,
        };
        let mut life_loop = LifeLoop::new(store, ports.decision.clone(), ports.actions.clone(), loop_config)
            .with_distiller(distiller)
            .with_meta_prompt(main_meta)
            .with_stop_handle(stop.clone());
        if let Some(ref progress) = progress {
            life_loop = life_loop.with_progress(progress.clone());
        }

        let scheduler = mode.uses_scheduler().then(|| {
            let scheduler = BackgroundScheduler::from_config(&config.scheduler);
            let introspection = Introspection {
                wake_file: config.scheduler.wake_file.clone(),
                meta_prompt,
                ports,
                config: loop_config,
                distiller,
                stop,
                progress,
                cycle: cycle.clone(),
            };
            scheduler.set_idle_callback(introspection.into_callback());
            scheduler
        });

        Ok(Self {
            mode,
            life_loop,
            scheduler,
            cycle,
        })
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        self.life_loop.store().path()
    }

    pub fn has_scheduler(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Start the idle scheduler, if this mode has one
    pub fn start(&self) {
        if let Some(ref scheduler) = self.scheduler {
            scheduler.start();
        }
    }

    pub fn note_interaction(&self) {
        if let Some(ref scheduler) = self.scheduler {
            scheduler.note_interaction();
        }
    }

    /// Fresh state from disk
    pub fn state(&self) -> Result<AgentState, StoreError> {
        self.life_loop.store().load()
    }

    pub async fn run_all(&self) -> Result<RunStats, StoreError> {
        self.note_interaction();
        let _cycle = self.cycle.lock().await;
        let stats = self.life_loop.run_all().await;
        self.note_interaction();
        stats
    }

    pub async fn run_once(&self) -> Result<bool, StoreError> {
        self.note_interaction();
        let _cycle = self.cycle.lock().await;
        let ran = self.life_loop.run_once().await;
        self.note_interaction();
        ran
    }

    /// Insert a task ahead of everything else and persist
    pub fn add_task_front(&self, content: &str) -> Result<(), StoreError> {
        self.note_interaction();
        let store = self.life_loop.store();
        store.load()?;
        store.update(|state| state.insert_task_front(single_line(content)))
    }

    /// Append a task and persist
    pub fn add_task(&self, content: &str) -> Result<(), StoreError> {
        self.note_interaction();
        let store = self.life_loop.store();
        store.load()?;
        store.update(|state| state.push_task(single_line(content)))
    }

    /// Handle for requesting a stop from another task (e.g. a signal handler)
    pub fn stop_handle(&self) -> StopHandle {
        self.life_loop.stop_handle()
    }

    pub fn request_stop(&self) {
        self.life_loop.request_stop();
    }

    /// Request a stop and shut the scheduler down
    pub async fn stop(&self) {
        self.request_stop();
        if let Some(ref scheduler) = self.scheduler {
            scheduler.stop().await;
        }
    }
}
