//! Decision making: the planner boundary and memory distillation

mod memory;
mod planner;

pub use memory::MemoryDistiller;
pub use planner::LlmPlanner;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::tools::{ParameterProperty, ParameterSchema, ToolCall, ToolDefinition};

/// Reserved action name for appending a task to the agent's own list
pub const ADD_TASK_TOOL: &str = "add_task";

/// Schema of the reserved add-task action, offered next to the registry tools
pub fn add_task_definition() -> ToolDefinition {
    ToolDefinition::new(
        ADD_TASK_TOOL,
        "Append a new pending task to your own task list. Use it to split work into smaller steps; the new task must differ from the current one.",
        ParameterSchema::new().with_required("task", ParameterProperty::string("Description of the new task")),
    )
}

/// What a plan asks the loop to do
#[derive(Debug, Clone, PartialEq)]
pub enum PlanAction {
    /// Invoke a tool (or the reserved add-task action)
    Call(ToolCall),
    /// Answer without acting
    Answer(String),
}

/// One decision from the planner
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub thought: String,
    pub action: Option<PlanAction>,
    /// The planner declares the task finished
    pub task_completed: bool,
}

impl Plan {
    pub fn tool_call(thought: impl Into<String>, call: ToolCall) -> Self {
        Self {
            thought: thought.into(),
            action: Some(PlanAction::Call(call)),
            task_completed: false,
        }
    }

    pub fn answer(thought: impl Into<String>, answer: impl Into<String>, completed: bool) -> Self {
        Self {
            thought: thought.into(),
            action: Some(PlanAction::Answer(answer.into())),
            task_completed: completed,
        }
    }

    /// A thought with no action attached
    pub fn thinking(thought: impl Into<String>) -> Self {
        Self {
            thought: thought.into(),
            action: None,
            task_completed: false,
        }
    }

    /// Mark the plan as finishing the task
    #[cfg(test)]
    pub fn completed(mut self) -> Self {
        self.task_completed = true;
        self
    }

    /// Substitute used when the planner cannot be reached
    pub fn unavailable() -> Self {
        Self::answer("planner unavailable", "Error: no plan from planner", false)
    }

    #[cfg(test)]
    pub fn tool(&self) -> Option<&ToolCall> {
        match &self.action {
            Some(PlanAction::Call(call)) => Some(call),
            _ => None,
        }
    }
}

/// Verdict of a completion check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionCheck {
    pub completed: bool,
    pub reason: String,
}

impl CompletionCheck {
    pub fn incomplete(reason: impl Into<String>) -> Self {
        Self {
            completed: false,
            reason: reason.into(),
        }
    }
}

/// Everything the planner sees for one step
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub agent: &'a BTreeMap<String, String>,
    pub knowledge: &'a [String],
    /// Recent memory followed by this attempt's recent actions
    pub memory: &'a [String],
    pub task: &'a str,
    pub meta_prompt: Option<&'a str>,
}

/// Boundary to the planning service.
///
/// Every method may fail; callers own the fallback for each.
#[async_trait]
pub trait DecisionPort: Send + Sync {
    /// Decide the next step for a task
    async fn plan(&self, ctx: &PlanContext<'_>) -> Result<Plan>;

    /// Judge whether the recorded actions finished the task
    async fn check_completion(
        &self,
        task: &str,
        action_history: &[String],
        last_result: &str,
    ) -> Result<CompletionCheck>;

    /// Summarize text in at most `max_length` characters
    async fn summarize(&self, text: &str, max_length: usize) -> Result<String>;

    /// Explain why a task kept failing
    async fn analyze_failure(&self, task: &str, recent_actions: &[String], last_result: &str) -> Result<String>;

    /// Suggest a short follow-up task, if any
    async fn propose_followup(&self, task: &str, failure_analysis: &str) -> Result<Option<String>>;

    /// Turn old memories into insight text, one insight per line
    async fn extract_insights(&self, memories: &[String]) -> Result<String>;
}

/// Truncate to at most `max` characters
pub(crate) fn clip(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Collapse whitespace runs, newlines included, to single spaces.
///
/// Tasks and memory entries are one per line in the backing file.
pub(crate) fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
