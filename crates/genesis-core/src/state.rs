//! Agent state model
//!
//! An [`AgentState`] is the in-memory form of one backing file: identity,
//! distilled knowledge, timestamped memory, passthrough code lines and the
//! ordered task list.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default retry budget recorded on a freshly created task
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl TodoStatus {
    /// Parse a status keyword as written in the legacy bracket dialect
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "IN_PROGRESS" => Some(Self::InProgress),
            "DONE" => Some(Self::Done),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }

    /// Whether the task will never be selected again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_keyword())
    }
}

/// A single entry of the task list.
///
/// `content` doubles as the task's identity: lookups and mutations address a
/// task by its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Append-only log of what happened to this task
    pub action_history: Vec<String>,
    /// Empty unless the task failed
    pub failure_reason: String,
}

impl TodoItem {
    /// Create a new pending task
    pub fn new(content: impl Into<String>) -> Self {
        Self::with_status(content, TodoStatus::Pending)
    }

    pub fn with_status(content: impl Into<String>, status: TodoStatus) -> Self {
        Self {
            content: content.into(),
            status,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            action_history: Vec::new(),
            failure_reason: String::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TodoStatus::Pending
    }
}

/// Durable state of one agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    /// Free-form identity (name, objective, style, ...)
    pub agent: BTreeMap<String, String>,
    /// Distilled insights, oldest first
    pub knowledge: Vec<String>,
    /// Timestamped events, oldest first
    pub memory: Vec<String>,
    /// Opaque lines carried through untouched
    pub code: Vec<String>,
    /// Task list; list order is selection priority
    pub todo: Vec<TodoItem>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first pending task in list order
    pub fn next_pending_todo(&self) -> Option<&TodoItem> {
        self.todo.iter().find(|item| item.is_pending())
    }

    /// Number of tasks still waiting to run
    pub fn pending_count(&self) -> usize {
        self.todo.iter().filter(|item| item.is_pending()).count()
    }

    /// Look up a task by content.
    ///
    /// With duplicate content the first non-terminal match wins, falling back
    /// to the first match of any status.
    pub fn get_task(&self, content: &str) -> Option<&TodoItem> {
        self.find_index(content).map(|idx| &self.todo[idx])
    }

    pub fn get_task_mut(&mut self, content: &str) -> Option<&mut TodoItem> {
        self.find_index(content).map(move |idx| &mut self.todo[idx])
    }

    fn find_index(&self, content: &str) -> Option<usize> {
        self.todo
            .iter()
            .position(|item| item.content == content && !item.status.is_terminal())
            .or_else(|| self.todo.iter().position(|item| item.content == content))
    }

    /// Mark a task done. Returns false when no task has this content.
    pub fn mark_done(&mut self, content: &str) -> bool {
        match self.get_task_mut(content) {
            Some(item) => {
                item.status = TodoStatus::Done;
                true
            }
            None => false,
        }
    }

    /// Mark a task failed with a reason
    pub fn mark_failed(&mut self, content: &str, reason: impl Into<String>) -> bool {
        match self.get_task_mut(content) {
            Some(item) => {
                item.status = TodoStatus::Failed;
                item.failure_reason = reason.into();
                true
            }
            None => false,
        }
    }

    /// Bump the retry counter, returning the new count (0 if the task is gone)
    pub fn increment_retry(&mut self, content: &str) -> u32 {
        match self.get_task_mut(content) {
            Some(item) => {
                item.retry_count += 1;
                item.retry_count
            }
            None => 0,
        }
    }

    pub fn add_action_history(&mut self, content: &str, action: impl Into<String>) {
        if let Some(item) = self.get_task_mut(content) {
            item.action_history.push(action.into());
        }
    }

    /// Append a pending task at the end (lowest priority)
    pub fn push_task(&mut self, content: impl Into<String>) {
        self.todo.push(TodoItem::new(content));
    }

    /// Insert a pending task at the front (highest priority)
    pub fn insert_task_front(&mut self, content: impl Into<String>) {
        self.todo.insert(0, TodoItem::new(content));
    }

    /// Agent name, if the identity block has one
    pub fn name(&self) -> Option<&str> {
        self.agent.get("name").map(String::as_str)
    }
}
