//! genesis-core: persistent state for the genesis agent runtime
//!
//! Provides:
//! - The agent state model (identity, knowledge, memory, code, tasks)
//! - The AML text codec for backing files
//! - A lock-guarded state store over one backing file
//! - Configuration loading (genesis.toml)
//! - An OpenAI-compatible chat completions client

pub mod aml;
pub mod config;
pub mod llm;
pub mod state;
pub mod store;

pub use config::Config;
pub use llm::{AssistantMessage, ChatMessage, ChatOptions, LlmClient, LlmError, Role};
pub use state::{AgentState, TodoItem, TodoStatus};
pub use store::{StateStore, StoreError};
