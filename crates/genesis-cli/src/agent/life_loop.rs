//! Life loop: runs pending tasks with retries, steps and failure handling

use std::sync::Arc;

use genesis_core::{AgentState, StateStore, StoreError};
use tracing::{debug, info, instrument, warn};

use super::state::{AttemptLog, AttemptOutcome, LoopConfig, RunStats, StopHandle, TaskOutcome};
use crate::mind::{
    clip, single_line, CompletionCheck, DecisionPort, MemoryDistiller, Plan, PlanAction, PlanContext, ADD_TASK_TOOL,
};
use crate::tools::executor::ActionPort;
use crate::tools::ToolCall;

// ANSI colors
const GREEN: &str = "\x1b[92m";
const BLUE: &str = "\x1b[94m";
const YELLOW: &str = "\x1b[93m";
const CYAN: &str = "\x1b[96m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

const MEMORY_WINDOW: usize = 10;
const ACTION_WINDOW: usize = 5;
const SUMMARY_WINDOW: usize = 3;
const SUMMARY_MAX_CHARS: usize = 100;
const ANALYSIS_MAX_CHARS: usize = 200;
const FOLLOWUP_MAX_CHARS: usize = 50;
const LOG_PREVIEW_CHARS: usize = 50;

const FOLLOWUP_PREFIX: &str = "[follow-up]";
const ANALYSIS_FALLBACK: &str = "unable to analyze failure";

/// Receives human-readable progress lines
pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// What one executed step left behind
struct StepRecord {
    /// Line for the attempt's action log
    entry: String,
    output: String,
    /// A successful action whose handler changes state
    mutated: bool,
}

/// The task execution state machine over one state store
pub struct LifeLoop {
    store: Arc<StateStore>,
    decision: Arc<dyn DecisionPort>,
    actions: Arc<dyn ActionPort>,
    distiller: MemoryDistiller,
    config: LoopConfig,
    meta_prompt: Option<String>,
    stop: StopHandle,
    progress: Option<ProgressFn>,
}

impl LifeLoop {
    pub fn new(
        store: Arc<StateStore>,
        decision: Arc<dyn DecisionPort>,
        actions: Arc<dyn ActionPort>,
        config: LoopConfig,
    ) -> Self {
        Self {
            store,
            decision,
            actions,
            distiller: MemoryDistiller::default(),
            config,
            meta_prompt: None,
            stop: StopHandle::new(),
            progress: None,
        }
    }

    pub fn with_distiller(mut self, distiller: MemoryDistiller) -> Self {
        self.distiller = distiller;
        self
    }

    pub fn with_meta_prompt(mut self, meta_prompt: Option<String>) -> Self {
        self.meta_prompt = meta_prompt;
        self
    }

    /// Share a stop flag with other loops or callers
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Ask the loop to stop at the next checkpoint
    pub fn request_stop(&self) {
        self.stop.request();
    }

    /// Run pending tasks until none are left or a stop is requested
    #[instrument(skip(self), fields(path = %self.store.path().display()))]
    pub async fn run_all(&self) -> Result<RunStats, StoreError> {
        self.stop.reset();
        let mut stats = RunStats::default();

        loop {
            if self.stop.is_requested() {
                info!("Stop requested, leaving task loop");
                break;
            }

            let state = self.store.load()?;
            let Some(task) = state.next_pending_todo().map(|t| t.content.clone()) else {
                break;
            };

            stats.total += 1;
            match self.execute_task_with_retry(&task).await? {
                TaskOutcome::Completed => stats.completed += 1,
                TaskOutcome::Failed => stats.failed += 1,
                TaskOutcome::Stopped => break,
            }
        }

        info!(completed = stats.completed, failed = stats.failed, total = stats.total, "Task loop finished");
        self.report(&format!("{}[Run finished: {}]{}", DIM, stats, RESET));
        Ok(stats)
    }

    /// Run the first pending task, if any. Returns whether one was found.
    #[instrument(skip(self), fields(path = %self.store.path().display()))]
    pub async fn run_once(&self) -> Result<bool, StoreError> {
        let state = self.store.load()?;
        let Some(task) = state.next_pending_todo().map(|t| t.content.clone()) else {
            debug!("No pending task");
            return Ok(false);
        };

        self.execute_task_with_retry(&task).await?;
        Ok(true)
    }

    async fn execute_task_with_retry(&self, task: &str) -> Result<TaskOutcome, StoreError> {
        let attempts = self.config.max_retries.max(1);
        let mut last = AttemptLog::default();

        info!(task = %task, "Starting task");
        self.report(&format!("\n{}▶ {}{}", BLUE, task, RESET));

        for attempt in 1..=attempts {
            if self.stop.is_requested() {
                return Ok(TaskOutcome::Stopped);
            }
            debug!(task = %task, attempt, "Starting attempt");
            if attempt > 1 {
                self.report(&format!("{}[Attempt {}/{}]{}", DIM, attempt, attempts, RESET));
            }

            let state = self.store.load()?;
            match self.execute_steps(task, state).await? {
                AttemptOutcome::Stopped => return Ok(TaskOutcome::Stopped),
                AttemptOutcome::Completed(log) => {
                    self.record_success(task, &log).await?;
                    return Ok(TaskOutcome::Completed);
                }
                AttemptOutcome::Exhausted(log) => {
                    self.record_incomplete_attempt(task).await?;
                    last = log;
                }
            }
        }

        self.handle_failure(task, &last, attempts).await?;
        Ok(TaskOutcome::Failed)
    }

    async fn execute_steps(&self, task: &str, mut state: AgentState) -> Result<AttemptOutcome, StoreError> {
        let mut log = AttemptLog::default();

        for step in 1..=self.config.max_steps {
            if self.stop.is_requested() {
                return Ok(AttemptOutcome::Stopped);
            }

            let mut context = tail(&state.memory, MEMORY_WINDOW).to_vec();
            context.extend_from_slice(tail(&log.actions, ACTION_WINDOW));
            let ctx = PlanContext {
                agent: &state.agent,
                knowledge: tail(&state.knowledge, MEMORY_WINDOW),
                memory: &context,
                task,
                meta_prompt: self.meta_prompt.as_deref(),
            };

            let plan = match self.decision.plan(&ctx).await {
                Ok(plan) => plan,
                Err(e) => {
                    warn!(error = %e, "Planner failed, continuing without a plan");
                    Plan::unavailable()
                }
            };
            debug!(step, completed = plan.task_completed, "Plan ready");
            self.report(&format!("{}[Step {}]{} {}", DIM, step, RESET, clip(&plan.thought, 120)));

            let record = self.execute_plan(task, &plan, &mut state).await?;
            log.actions.push(record.entry);
            log.last_result = record.output;

            if plan.task_completed {
                return Ok(AttemptOutcome::Completed(log));
            }

            if record.mutated {
                let check = self
                    .decision
                    .check_completion(task, &log.actions, &log.last_result)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "Completion check failed");
                        CompletionCheck::incomplete("completion check unavailable")
                    });
                debug!(completed = check.completed, reason = %check.reason, "Completion check");
                if check.completed {
                    return Ok(AttemptOutcome::Completed(log));
                }
            }
        }

        Ok(AttemptOutcome::Exhausted(log))
    }

    async fn execute_plan(&self, task: &str, plan: &Plan, state: &mut AgentState) -> Result<StepRecord, StoreError> {
        let call = match &plan.action {
            Some(PlanAction::Call(call)) => call,
            Some(PlanAction::Answer(answer)) => return Ok(note(plan, answer)),
            None => return Ok(note(plan, "no action taken")),
        };

        if call.name == ADD_TASK_TOOL {
            return self.add_task(task, call, state);
        }

        let outcome = self.actions.execute(call).await;
        let status = if outcome.success {
            format!("{}OK{}", GREEN, RESET)
        } else {
            format!("{}Failed{}", YELLOW, RESET)
        };
        self.report(&format!("{}[Tool: {}]{} {}", CYAN, call.name, RESET, status));

        Ok(StepRecord {
            entry: action_entry(call, &outcome.output),
            mutated: outcome.success && outcome.mutates_state,
            output: outcome.output,
        })
    }

    /// Append a subtask, refusing one identical to the current task
    fn add_task(&self, current: &str, call: &ToolCall, state: &mut AgentState) -> Result<StepRecord, StoreError> {
        let new_task = single_line(call.arg_str("task").unwrap_or_default());

        let output = if new_task.is_empty() {
            "Error: add_task needs a non-empty task".to_string()
        } else if new_task == single_line(current) {
            warn!(task = %current, "Rejected self-decomposition");
            "Error: a task cannot be decomposed into itself".to_string()
        } else {
            state.push_task(new_task.as_str());
            self.store.save(Some(state.clone()))?;
            info!(task = %new_task, "Task added");
            self.report(&format!("{}[+ task] {}{}", CYAN, new_task, RESET));
            format!("Task added: {}", new_task)
        };

        Ok(StepRecord {
            entry: action_entry(call, &output),
            output,
            mutated: false,
        })
    }

    async fn record_success(&self, task: &str, log: &AttemptLog) -> Result<(), StoreError> {
        let text = format!(
            "task: {} | actions: {} | result: {}",
            task,
            tail(&log.actions, SUMMARY_WINDOW).join("; "),
            clip(&log.last_result, ANALYSIS_MAX_CHARS)
        );
        let summary = match self.decision.summarize(&text, SUMMARY_MAX_CHARS).await {
            Ok(summary) if !summary.trim().is_empty() => single_line(&summary),
            Ok(_) => clip(&single_line(&text), SUMMARY_MAX_CHARS),
            Err(e) => {
                warn!(error = %e, "Summary failed, using raw text");
                clip(&single_line(&text), SUMMARY_MAX_CHARS)
            }
        };

        let mut state = self.store.load()?;
        state.mark_done(task);
        state.memory.push(format!("[{}] ✓ {}", timestamp(), summary));
        self.distill_if_needed(&mut state).await;
        self.store.save(Some(state))?;

        info!(task = %task, "Task completed");
        self.report(&format!("{}✓ Done{}", GREEN, RESET));
        Ok(())
    }

    async fn record_incomplete_attempt(&self, task: &str) -> Result<(), StoreError> {
        let mut state = self.store.load()?;
        let attempt = state.increment_retry(task);
        state.add_action_history(task, format!("attempt {} incomplete", attempt));
        state
            .memory
            .push(format!("[{}] ⟳ attempt {} incomplete: {}", timestamp(), attempt, task));
        self.store.save(Some(state))?;

        warn!(task = %task, attempt, "Attempt ended without completion");
        self.report(&format!("{}⟳ attempt {} incomplete{}", YELLOW, attempt, RESET));
        Ok(())
    }

    async fn handle_failure(&self, task: &str, log: &AttemptLog, attempts: u32) -> Result<(), StoreError> {
        let recent = tail(&log.actions, ACTION_WINDOW);
        let analysis = match self.decision.analyze_failure(task, recent, &log.last_result).await {
            Ok(analysis) if !analysis.trim().is_empty() => clip(&single_line(&analysis), ANALYSIS_MAX_CHARS),
            Ok(_) => ANALYSIS_FALLBACK.to_string(),
            Err(e) => {
                warn!(error = %e, "Failure analysis failed");
                ANALYSIS_FALLBACK.to_string()
            }
        };

        let followup = match self.decision.propose_followup(task, &analysis).await {
            Ok(proposal) => proposal
                .map(|p| clip(&single_line(&p), FOLLOWUP_MAX_CHARS).trim_end().to_string())
                .filter(|p| !p.is_empty() && *p != single_line(task)),
            Err(e) => {
                warn!(error = %e, "Follow-up proposal failed");
                None
            }
        };

        let mut state = self.store.load()?;
        let now = timestamp();
        state.mark_failed(task, format!("retried {} times without success", attempts));
        state.memory.push(format!("[{}] ✗ task failed: {}", now, task));
        state.memory.push(format!("[{}] failure analysis: {}", now, analysis));
        if let Some(ref followup) = followup {
            state.push_task(format!("{} {}", FOLLOWUP_PREFIX, followup));
        }
        self.distill_if_needed(&mut state).await;
        self.store.save(Some(state))?;

        warn!(task = %task, attempts, followup = ?followup, "Task failed");
        self.report(&format!("{}✗ Failed: {}{}", YELLOW, analysis, RESET));
        Ok(())
    }

    async fn distill_if_needed(&self, state: &mut AgentState) {
        if !self.distiller.should_distill(state.memory.len()) {
            return;
        }

        let (knowledge, retained) = self.distiller.distill(&state.memory, self.decision.as_ref()).await;
        if !knowledge.is_empty() {
            self.report(&format!("{}[Memory] {} new insights{}", DIM, knowledge.len(), RESET));
        }
        state.knowledge.extend(knowledge);
        state.memory = retained;
    }

    fn report(&self, line: &str) {
        if let Some(ref progress) = self.progress {
            progress(line);
        }
    }
}

fn note(plan: &Plan, result: &str) -> StepRecord {
    StepRecord {
        entry: format!("thought: {}", clip(&plan.thought, LOG_PREVIEW_CHARS)),
        output: result.to_string(),
        mutated: false,
    }
}

fn action_entry(call: &ToolCall, output: &str) -> String {
    format!("{}({}) -> {}", call.name, call.arguments, clip(output, LOG_PREVIEW_CHARS))
}

fn tail(items: &[String], n: usize) -> &[String] {
    &items[items.len().saturating_sub(n)..]
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mind::testing::ScriptedDecision;
    use crate::tools::builtin::create_default_registry;
    use crate::tools::executor::ToolExecutor;
    use crate::tools::ToolContext;
    use anyhow::Result;
    use async_trait::async_trait;
    use genesis_core::TodoStatus;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write_plan(path: &str, content: &str) -> Plan {
        Plan::tool_call(
            format!("write {}", path),
            ToolCall::new("write_file", json!({"path": path, "content": content})),
        )
    }

    fn add_task_plan(task: &str) -> Plan {
        Plan::tool_call("split", ToolCall::new(ADD_TASK_TOOL, json!({"task": task})))
    }

    fn life_loop(dir: &TempDir, aml: &str, decision: Arc<dyn DecisionPort>, config: LoopConfig) -> LifeLoop {
        let path = dir.path().join("agent.md");
        fs::write(&path, aml).unwrap();
        let actions = ToolExecutor::new(create_default_registry(), ToolContext::new(dir.path().to_path_buf()));
        LifeLoop::new(Arc::new(StateStore::new(path)), decision, Arc::new(actions), config)
    }

    fn reload(lp: &LifeLoop) -> AgentState {
        lp.store().load().unwrap()
    }

    #[tokio::test]
    async fn test_single_write_task_completes() {
        let dir = TempDir::new().unwrap();
        let decision = Arc::new(ScriptedDecision::with_plans(vec![
            write_plan("index.html", "<h1>hi</h1>").completed()
        ]));
        let lp = life_loop(&dir, "<todo>\n? create index.html\n</todo>\n", decision, LoopConfig::default());

        let stats = lp.run_all().await.unwrap();

        assert_eq!(
            stats,
            RunStats {
                completed: 1,
                failed: 0,
                total: 1
            }
        );
        let state = reload(&lp);
        assert_eq!(state.todo[0].status, TodoStatus::Done);
        assert!(state.memory.last().unwrap().contains("✓"));
        assert_eq!(fs::read_to_string(dir.path().join("index.html")).unwrap(), "<h1>hi</h1>");
    }

    #[tokio::test]
    async fn test_nothing_pending() {
        let dir = TempDir::new().unwrap();
        let lp = life_loop(
            &dir,
            "<todo>\n! already done\n</todo>\n",
            Arc::new(ScriptedDecision::default()),
            LoopConfig::default(),
        );

        assert_eq!(lp.run_all().await.unwrap(), RunStats::default());
        assert!(!lp.run_once().await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_backing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let lp = life_loop(&dir, "", Arc::new(ScriptedDecision::default()), LoopConfig::default());
        fs::remove_file(lp.store().path()).unwrap();

        assert!(matches!(lp.run_all().await, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_completion_check_after_write() {
        let dir = TempDir::new().unwrap();
        let decision = Arc::new(ScriptedDecision {
            fallback_plan: Some(write_plan("a.txt", "x")),
            completion: Some(CompletionCheck {
                completed: true,
                reason: "file written".into(),
            }),
            ..Default::default()
        });
        let lp = life_loop(&dir, "<todo>\n? write a.txt\n</todo>\n", decision.clone(), LoopConfig::default());

        assert!(lp.run_once().await.unwrap());

        assert_eq!(*decision.plan_calls.lock(), 1);
        assert_eq!(reload(&lp).todo[0].status, TodoStatus::Done);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_marks_failed_with_followup() {
        let dir = TempDir::new().unwrap();
        let decision = Arc::new(ScriptedDecision {
            followup: Some("  sketch the layout first ".into()),
            ..Default::default()
        });
        let config = LoopConfig::default().with_max_steps(2);
        let lp = life_loop(&dir, "<todo>\n? build site\n</todo>\n", decision.clone(), config);

        assert!(lp.run_once().await.unwrap());

        assert_eq!(*decision.plan_calls.lock(), 6);
        let state = reload(&lp);
        let task = &state.todo[0];
        assert_eq!(task.status, TodoStatus::Failed);
        assert_eq!(task.retry_count, 3);
        assert_eq!(task.failure_reason, "retried 3 times without success");
        assert_eq!(task.action_history.len(), 3);

        assert!(state.memory[0].contains("⟳ attempt 1 incomplete: build site"));
        assert!(state.memory.iter().any(|m| m.contains("✗ task failed: build site")));
        assert!(state
            .memory
            .iter()
            .any(|m| m.contains("failure analysis: build site needs more context")));

        assert_eq!(state.todo[1].content, "[follow-up] sketch the layout first");
        assert_eq!(state.todo[1].status, TodoStatus::Pending);
    }

    #[tokio::test]
    async fn test_failed_task_is_not_reselected() {
        let dir = TempDir::new().unwrap();
        let config = LoopConfig::default().with_max_steps(1).with_max_retries(2);
        let lp = life_loop(
            &dir,
            "<todo>\n? impossible\n</todo>\n",
            Arc::new(ScriptedDecision::default()),
            config,
        );

        let stats = lp.run_all().await.unwrap();
        assert_eq!(
            stats,
            RunStats {
                completed: 0,
                failed: 1,
                total: 1
            }
        );
        assert!(!lp.run_once().await.unwrap());
    }

    #[tokio::test]
    async fn test_offline_planner_degrades() {
        let dir = TempDir::new().unwrap();
        let config = LoopConfig::default().with_max_steps(1).with_max_retries(1);
        let lp = life_loop(
            &dir,
            "<todo>\n? anything\n</todo>\n",
            Arc::new(ScriptedDecision::offline()),
            config,
        );

        let stats = lp.run_all().await.unwrap();

        assert_eq!(stats.failed, 1);
        let state = reload(&lp);
        assert!(state
            .memory
            .iter()
            .any(|m| m.ends_with("failure analysis: unable to analyze failure")));
        assert_eq!(state.todo.len(), 1);
    }

    #[tokio::test]
    async fn test_self_decomposition_rejected() {
        let dir = TempDir::new().unwrap();
        let decision = Arc::new(ScriptedDecision::with_plans(vec![
            add_task_plan("build site"),
            add_task_plan("write css"),
            Plan::answer("all set", "DONE", true),
        ]));
        let lp = life_loop(&dir, "<todo>\n? build site\n</todo>\n", decision.clone(), LoopConfig::default());

        assert!(lp.run_once().await.unwrap());

        let state = reload(&lp);
        let contents: Vec<&str> = state.todo.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["build site", "write css"]);
        assert_eq!(state.todo[0].status, TodoStatus::Done);
        assert_eq!(state.todo[1].status, TodoStatus::Pending);

        let seen = decision.seen_memory.lock();
        assert!(seen[1].last().unwrap().contains("cannot be decomposed into itself"));
        assert!(seen[2].last().unwrap().contains("Task added: write css"));
    }

    #[tokio::test]
    async fn test_self_decomposition_rejected_mid_list() {
        let dir = TempDir::new().unwrap();
        let decision = Arc::new(ScriptedDecision::with_plans(vec![
            add_task_plan("build site"),
            add_task_plan(" build site\n"),
            Plan::answer("nothing to split", "DONE", true),
        ]));
        let lp = life_loop(
            &dir,
            "<todo>\n! setup\n? build site\n? polish\n? deploy\n</todo>\n",
            decision,
            LoopConfig::default(),
        );

        assert!(lp.run_once().await.unwrap());

        let state = reload(&lp);
        let todo: Vec<(&str, TodoStatus)> = state.todo.iter().map(|t| (t.content.as_str(), t.status)).collect();
        assert_eq!(
            todo,
            vec![
                ("setup", TodoStatus::Done),
                ("build site", TodoStatus::Done),
                ("polish", TodoStatus::Pending),
                ("deploy", TodoStatus::Pending),
            ]
        );
    }

    #[tokio::test]
    async fn test_multi_line_subtask_stays_one_task() {
        let dir = TempDir::new().unwrap();
        let decision = Arc::new(ScriptedDecision::with_plans(vec![
            add_task_plan("write css\nbuild site"),
            Plan::answer("split done", "DONE", true),
        ]));
        let lp = life_loop(&dir, "<todo>\n? build site\n</todo>\n", decision.clone(), LoopConfig::default());

        assert!(lp.run_once().await.unwrap());

        let state = reload(&lp);
        let todo: Vec<(&str, TodoStatus)> = state.todo.iter().map(|t| (t.content.as_str(), t.status)).collect();
        assert_eq!(
            todo,
            vec![
                ("build site", TodoStatus::Done),
                ("write css build site", TodoStatus::Pending),
            ]
        );
        assert!(decision.seen_memory.lock()[1]
            .last()
            .unwrap()
            .contains("Task added: write css build site"));
    }

    #[tokio::test]
    async fn test_multi_line_replies_stay_one_entry() {
        let dir = TempDir::new().unwrap();
        let decision = Arc::new(ScriptedDecision {
            analysis: Some("the css is missing\nand so are the fonts".into()),
            followup: Some("step one\nstep two".into()),
            ..Default::default()
        });
        let config = LoopConfig::default().with_max_steps(1).with_max_retries(1);
        let lp = life_loop(&dir, "<todo>\n? build site\n</todo>\n", decision, config);

        assert!(lp.run_once().await.unwrap());

        let state = reload(&lp);
        let todo: Vec<(&str, TodoStatus)> = state.todo.iter().map(|t| (t.content.as_str(), t.status)).collect();
        assert_eq!(
            todo,
            vec![
                ("build site", TodoStatus::Failed),
                ("[follow-up] step one step two", TodoStatus::Pending),
            ]
        );
        assert_eq!(state.memory.len(), 3);
        assert!(state.memory[2].ends_with("failure analysis: the css is missing and so are the fonts"));
    }

    #[tokio::test]
    async fn test_multi_line_summary_stays_one_entry() {
        let dir = TempDir::new().unwrap();
        let decision = Arc::new(ScriptedDecision {
            plans: Mutex::new(vec![write_plan("index.html", "<h1>hi</h1>").completed()].into()),
            summary: Some("built the page\n\nwith a heading".into()),
            ..Default::default()
        });
        let lp = life_loop(&dir, "<todo>\n? create index.html\n</todo>\n", decision, LoopConfig::default());

        lp.run_all().await.unwrap();

        let state = reload(&lp);
        assert_eq!(state.memory.len(), 1);
        assert!(state.memory[0].ends_with("✓ built the page with a heading"));
    }

    #[tokio::test]
    async fn test_save_failure_propagates() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");
        fs::create_dir(&state_dir).unwrap();
        let path = state_dir.join("agent.md");
        fs::write(&path, "<todo>\n? split work\n</todo>\n").unwrap();

        // The backing file's folder disappears before the subtask is saved
        let doomed = state_dir.clone();
        let decision = Arc::new(PlanHook {
            hook: Box::new(move || {
                let _ = fs::remove_dir_all(&doomed);
            }),
            plan: add_task_plan("write css"),
        });
        let actions = ToolExecutor::new(create_default_registry(), ToolContext::new(dir.path().to_path_buf()));
        let lp = LifeLoop::new(Arc::new(StateStore::new(path)), decision, Arc::new(actions), LoopConfig::default());

        let err = lp.run_all().await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. } | StoreError::Io { .. }));
        assert!(!state_dir.exists());
    }

    #[tokio::test]
    async fn test_stop_before_run_leaves_state() {
        let dir = TempDir::new().unwrap();
        let decision = Arc::new(ScriptedDecision::default());
        let lp = life_loop(&dir, "<todo>\n? wait\n</todo>\n", decision.clone(), LoopConfig::default());

        lp.request_stop();
        assert!(lp.run_once().await.unwrap());

        assert_eq!(*decision.plan_calls.lock(), 0);
        let state = reload(&lp);
        assert_eq!(state.todo[0].status, TodoStatus::Pending);
        assert!(state.memory.is_empty());
    }

    /// Runs a side effect inside every plan call, then returns `plan`
    struct PlanHook {
        hook: Box<dyn Fn() + Send + Sync>,
        plan: Plan,
    }

    #[async_trait]
    impl DecisionPort for PlanHook {
        async fn plan(&self, _ctx: &PlanContext<'_>) -> Result<Plan> {
            (self.hook)();
            Ok(self.plan.clone())
        }

        async fn check_completion(&self, _t: &str, _h: &[String], _l: &str) -> Result<CompletionCheck> {
            Ok(CompletionCheck::incomplete("no"))
        }

        async fn summarize(&self, text: &str, _max: usize) -> Result<String> {
            Ok(text.to_string())
        }

        async fn analyze_failure(&self, _t: &str, _a: &[String], _l: &str) -> Result<String> {
            Ok(String::new())
        }

        async fn propose_followup(&self, _t: &str, _a: &str) -> Result<Option<String>> {
            Ok(None)
        }

        async fn extract_insights(&self, _m: &[String]) -> Result<String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_stop_during_run_all() {
        let dir = TempDir::new().unwrap();
        let stop = StopHandle::new();
        let requester = stop.clone();
        let decision = Arc::new(PlanHook {
            hook: Box::new(move || requester.request()),
            plan: Plan::thinking("pausing"),
        });
        let lp = life_loop(
            &dir,
            "<todo>\n? first\n? second\n</todo>\n",
            decision,
            LoopConfig::default(),
        )
        .with_stop_handle(stop);

        let stats = lp.run_all().await.unwrap();

        assert_eq!(stats.total, 1);
        assert_eq!(stats.completed + stats.failed, 0);
        let state = reload(&lp);
        assert!(state.todo.iter().all(|t| t.status == TodoStatus::Pending && t.retry_count == 0));
    }

    #[tokio::test]
    async fn test_context_carries_attempt_actions() {
        let dir = TempDir::new().unwrap();
        let decision = Arc::new(ScriptedDecision::with_plans(vec![
            Plan::tool_call("look", ToolCall::new("read_file", json!({"path": "missing.txt"}))),
            Plan::answer("ok", "DONE", true),
        ]));
        let lp = life_loop(
            &dir,
            "<memory>\nearlier event\n</memory>\n<todo>\n? inspect\n</todo>\n",
            decision.clone(),
            LoopConfig::default(),
        );

        lp.run_once().await.unwrap();

        let seen = decision.seen_memory.lock();
        assert_eq!(seen[0], vec!["earlier event"]);
        assert_eq!(seen[1].len(), 2);
        assert!(seen[1][1].starts_with("read_file("));
        assert!(seen[1][1].contains("File not found"));
    }

    #[tokio::test]
    async fn test_distillation_after_success() {
        let dir = TempDir::new().unwrap();
        let decision = Arc::new(ScriptedDecision {
            fallback_plan: Some(Plan::answer("fine", "DONE", true)),
            insights: "- small steps work".into(),
            ..Default::default()
        });
        let lp = life_loop(
            &dir,
            "<memory>\nm1\nm2\nm3\n</memory>\n<todo>\n? tidy\n</todo>\n",
            decision,
            LoopConfig::default(),
        )
        .with_distiller(MemoryDistiller::new(3, 1));

        lp.run_once().await.unwrap();

        let state = reload(&lp);
        assert_eq!(state.knowledge, vec!["small steps work"]);
        assert_eq!(state.memory.len(), 1);
        assert!(state.memory[0].contains("✓"));
    }

    #[tokio::test]
    async fn test_progress_lines_reported() {
        let dir = TempDir::new().unwrap();
        let lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = lines.clone();
        let decision = Arc::new(ScriptedDecision::with_plans(vec![
            write_plan("notes.txt", "hello").completed()
        ]));
        let lp = life_loop(&dir, "<todo>\n? take notes\n</todo>\n", decision, LoopConfig::default())
            .with_progress(Arc::new(move |line: &str| sink.lock().push(line.to_string())));

        lp.run_all().await.unwrap();

        let lines = lines.lock();
        assert!(lines.iter().any(|l| l.contains("take notes")));
        assert!(lines.iter().any(|l| l.contains("[Tool: write_file]")));
    }
}
