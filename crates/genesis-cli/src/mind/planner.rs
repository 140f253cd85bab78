//! Planner backed by a chat completions endpoint

use anyhow::{Context, Result};
use async_trait::async_trait;
use genesis_core::{AssistantMessage, ChatMessage, ChatOptions, LlmClient};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{debug, instrument, warn};

use super::{clip, add_task_definition, CompletionCheck, DecisionPort, Plan, PlanContext};
use crate::tools::ToolCall;

const CONTEXT_WINDOW: usize = 10;
const COMPLETION_WINDOW: usize = 5;
const ANALYSIS_MAX_CHARS: usize = 200;
const FOLLOWUP_MAX_CHARS: usize = 50;
const INSIGHT_MAX_TOKENS: u32 = 512;

const OPERATING_RULES: &str = "\
1. Check your memory first and do not repeat actions that already failed.
2. Prefer acting: create files with write_file and folders with create_folder.
3. To change a file, write its full new content with write_file.
4. Avoid idle loops: after reading something, act on it.
5. Split large work with add_task. Reply DONE when the task is finished.";

/// Decision port that asks a language model
pub struct LlmPlanner {
    client: LlmClient,
    tool_schemas: Vec<Value>,
}

impl LlmPlanner {
    /// `tool_schemas` are the action port's schemas; add_task is appended here
    pub fn new(client: LlmClient, mut tool_schemas: Vec<Value>) -> Self {
        tool_schemas.push(add_task_definition().to_value());
        Self { client, tool_schemas }
    }

    async fn ask(&self, system: Option<&str>, user: String, options: ChatOptions) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(user));

        let reply = self.client.chat(&messages, None, options).await?;
        Ok(reply.text().trim().to_string())
    }
}

fn system_prompt(ctx: &PlanContext<'_>) -> String {
    let mut prompt = String::new();
    if let Some(meta) = ctx.meta_prompt {
        prompt.push_str("[Meta guidance]\n");
        prompt.push_str(meta);
        prompt.push_str("\n---\n");
    }

    let field = |key: &str, default: &'static str| -> String {
        ctx.agent.get(key).cloned().unwrap_or_else(|| default.to_string())
    };
    prompt.push_str(&format!(
        "You are {}.\nObjective: {}\nStyle: {}\n\n[Rules]\n{}\n\n",
        field("name", "Genesis AI"),
        field("objective", "Evolve"),
        field("style", "Concise"),
        OPERATING_RULES
    ));

    prompt.push_str(&format!("[Knowledge]: {:?}\n", tail(ctx.knowledge, CONTEXT_WINDOW)));
    prompt.push_str(&format!("[Memory]: {:?}\n", tail(ctx.memory, CONTEXT_WINDOW)));
    prompt
}

fn tail(items: &[String], n: usize) -> &[String] {
    &items[items.len().saturating_sub(n)..]
}

/// Turn a model reply into a plan
fn plan_from_reply(reply: &AssistantMessage) -> Plan {
    if let Some(native) = reply.tool_calls.first() {
        let args = Value::Object(native.function.parsed_arguments());
        let thought = format!("calling {} with {}", native.function.name, args);
        return Plan::tool_call(thought, ToolCall::new(native.function.name.clone(), args));
    }

    let content = reply.text().trim();
    if let Some(call) = parse_json_tool_call(content) {
        let thought = format!("calling {} with {}", call.name, call.arguments);
        return Plan::tool_call(thought, call);
    }

    if affirms(content, |word| word == "DONE" || word.eq_ignore_ascii_case("completed")) {
        return Plan::answer(content, content, true);
    }
    Plan::thinking(content)
}

/// Find a tool call written as JSON in the message body.
///
/// Small models often answer with `{"name": ..., "arguments": {...}}` instead
/// of using native tool calls, either raw or in a fenced block.
fn parse_json_tool_call(content: &str) -> Option<ToolCall> {
    if content.is_empty() {
        return None;
    }

    let json_content = extract_json_from_markdown(content).unwrap_or(content);
    try_parse_tool_call(json_content).or_else(|| first_embedded_call(content))
}

fn extract_json_from_markdown(content: &str) -> Option<&str> {
    let patterns = ["```json\n", "```JSON\n", "```\n"];

    for pattern in patterns {
        if let Some(start) = content.find(pattern) {
            let json_start = start + pattern.len();
            if let Some(end) = content[json_start..].find("```") {
                return Some(content[json_start..json_start + end].trim());
            }
        }
    }

    None
}

fn try_parse_tool_call(content: &str) -> Option<ToolCall> {
    #[derive(Deserialize)]
    struct ToolCallJson {
        name: String,
        #[serde(default)]
        arguments: Value,
    }

    let parsed: ToolCallJson = serde_json::from_str(content).ok()?;
    if parsed.name.is_empty() {
        return None;
    }

    let arguments = match parsed.arguments {
        Value::Object(map) => Value::Object(map),
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => Value::Object(Default::default()),
        },
        _ => Value::Object(Default::default()),
    };
    Some(ToolCall::new(parsed.name, arguments))
}

/// Scan balanced braces for the first object that parses as a tool call
fn first_embedded_call(content: &str) -> Option<ToolCall> {
    let mut depth = 0usize;
    let mut start = None;

    for (i, c) in content.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(call) = start.and_then(|s| try_parse_tool_call(&content[s..=i])) {
                        return Some(call);
                    }
                    start = None;
                }
            }
            _ => {}
        }
    }

    None
}

fn flat_json_object() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[^{}]*\}").expect("valid regex"))
}

/// Read a completion verdict from free text
fn parse_completion(content: &str) -> CompletionCheck {
    #[derive(Deserialize)]
    struct Verdict {
        completed: bool,
        #[serde(default)]
        reason: String,
    }

    if let Some(m) = flat_json_object().find(content) {
        if let Ok(v) = serde_json::from_str::<Verdict>(m.as_str()) {
            return CompletionCheck {
                completed: v.completed,
                reason: v.reason,
            };
        }
    }

    let completed = affirms(content, |word| {
        matches!(
            word.to_lowercase().as_str(),
            "done" | "complete" | "completed" | "success" | "successful" | "successfully"
        )
    });
    CompletionCheck {
        completed,
        reason: content.to_string(),
    }
}

const NEGATIONS: &[&str] = &["not", "no", "never", "isn't", "wasn't", "hasn't", "aren't", "nothing"];

/// A whole word matching `keyword` with no negation in the two words before it
fn affirms(text: &str, keyword: impl Fn(&str) -> bool) -> bool {
    let words: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect();

    words.iter().enumerate().any(|(i, word)| {
        keyword(*word)
            && !words[i.saturating_sub(2)..i]
                .iter()
                .any(|w| NEGATIONS.contains(&w.to_lowercase().as_str()))
    })
}

fn bullet_list(items: &[String]) -> String {
    items.iter().map(|a| format!("- {}", a)).collect::<Vec<_>>().join("\n")
}

#[async_trait]
impl DecisionPort for LlmPlanner {
    #[instrument(skip_all, fields(task = %ctx.task))]
    async fn plan(&self, ctx: &PlanContext<'_>) -> Result<Plan> {
        let messages = vec![
            ChatMessage::system(system_prompt(ctx)),
            ChatMessage::user(format!("Current task: {}\nDecide the next action.", ctx.task)),
        ];

        let reply = self
            .client
            .chat(&messages, Some(&self.tool_schemas), ChatOptions::default())
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!(model = self.client.model(), "Planner request timed out");
                }
                e
            })
            .context("planner request failed")?;

        let plan = plan_from_reply(&reply);
        debug!(thought = %clip(&plan.thought, 120), completed = plan.task_completed, "Plan received");
        Ok(plan)
    }

    async fn check_completion(
        &self,
        task: &str,
        action_history: &[String],
        last_result: &str,
    ) -> Result<CompletionCheck> {
        if action_history.is_empty() {
            return Ok(CompletionCheck::incomplete("no actions taken yet"));
        }

        let prompt = format!(
            "Decide whether this task is finished.\n\nTask: {}\n\nActions taken:\n{}\n\nLast result: {}\n\n\
             Answer with JSON only: {{\"completed\": true or false, \"reason\": \"why\", \"next_action\": \"what to do next if unfinished\"}}",
            task,
            bullet_list(tail(action_history, COMPLETION_WINDOW)),
            last_result
        );

        let content = self.ask(None, prompt, ChatOptions::default()).await?;
        Ok(parse_completion(&content))
    }

    async fn summarize(&self, text: &str, max_length: usize) -> Result<String> {
        let summary = self
            .ask(
                Some("You write short, plain summaries."),
                format!("Summarize in at most {} characters:\n{}", max_length, text),
                ChatOptions::default().with_max_tokens(max_length as u32),
            )
            .await?;
        Ok(clip(&summary, max_length))
    }

    async fn analyze_failure(&self, task: &str, recent_actions: &[String], last_result: &str) -> Result<String> {
        let prompt = format!(
            "This task failed repeatedly.\n\nTask: {}\n\nRecent actions:\n{}\n\nLast result: {}\n\n\
             In one or two sentences, explain the most likely cause.",
            task,
            bullet_list(recent_actions),
            last_result
        );
        let analysis = self.ask(None, prompt, ChatOptions::default()).await?;
        Ok(clip(&analysis, ANALYSIS_MAX_CHARS))
    }

    async fn propose_followup(&self, task: &str, failure_analysis: &str) -> Result<Option<String>> {
        let prompt = format!(
            "A task failed.\n\nTask: {}\nAnalysis: {}\n\n\
             Propose one simpler follow-up task in under {} characters. Reply with the task text only, or nothing if none is needed.",
            task, failure_analysis, FOLLOWUP_MAX_CHARS
        );
        let proposal = self.ask(None, prompt, ChatOptions::default()).await?;
        let proposal = clip(proposal.trim(), FOLLOWUP_MAX_CHARS).trim().to_string();

        if proposal.is_empty() || proposal == task.trim() {
            return Ok(None);
        }
        Ok(Some(proposal))
    }

    async fn extract_insights(&self, memories: &[String]) -> Result<String> {
        let insights = self
            .ask(
                Some("You are a knowledge extraction expert. Turn experience into durable, reusable insights."),
                format!(
                    "Extract the key lessons from these memories, one insight per line:\n{}",
                    memories.join("\n")
                ),
                ChatOptions::default().with_max_tokens(INSIGHT_MAX_TOKENS),
            )
            .await?;

        if insights.is_empty() {
            warn!("Insight extraction returned nothing");
        }
        Ok(insights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genesis_core::llm::{FunctionCallResponse, ToolCallResponse};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn reply(content: &str) -> AssistantMessage {
        AssistantMessage {
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
        }
    }

    #[test]
    fn test_native_tool_call_wins() {
        let msg = AssistantMessage {
            content: Some("DONE".into()),
            tool_calls: vec![ToolCallResponse {
                id: Some("call_1".into()),
                function: FunctionCallResponse {
                    name: "write_file".into(),
                    arguments: Value::String(r#"{"path": "index.html", "content": "<h1>hi</h1>"}"#.into()),
                },
            }],
        };

        let plan = plan_from_reply(&msg);
        let call = plan.tool().unwrap();
        assert_eq!(call.name, "write_file");
        assert_eq!(call.arg_str("path"), Some("index.html"));
        assert!(plan.thought.starts_with("calling write_file"));
        assert!(!plan.task_completed);
    }

    #[test]
    fn test_malformed_native_arguments_become_empty() {
        let msg = AssistantMessage {
            content: None,
            tool_calls: vec![ToolCallResponse {
                id: None,
                function: FunctionCallResponse {
                    name: "read_file".into(),
                    arguments: Value::String("{oops".into()),
                },
            }],
        };

        let plan = plan_from_reply(&msg);
        assert_eq!(plan.tool().unwrap().arguments, json!({}));
    }

    #[test]
    fn test_json_tool_call_in_content() {
        let plan = plan_from_reply(&reply(r#"{"name": "create_folder", "arguments": {"path": "site"}}"#));
        assert_eq!(plan.tool().unwrap().name, "create_folder");

        let fenced = "I'll do this:\n```json\n{\"name\": \"read_file\", \"arguments\": {\"path\": \"a.txt\"}}\n```";
        assert_eq!(plan_from_reply(&reply(fenced)).tool().unwrap().arg_str("path"), Some("a.txt"));

        let inline = r#"Next: {"name": "add_task", "arguments": {"task": "write css"}} then continue"#;
        assert_eq!(plan_from_reply(&reply(inline)).tool().unwrap().name, "add_task");
    }

    #[test]
    fn test_done_content_completes() {
        let plan = plan_from_reply(&reply("Everything is in place. DONE"));
        assert!(plan.task_completed);
        assert!(plan.tool().is_none());

        let plan = plan_from_reply(&reply("Task completed."));
        assert!(plan.task_completed);

        let plan = plan_from_reply(&reply("Let me think about the layout first."));
        assert!(!plan.task_completed);
        assert!(plan.action.is_none());
    }

    #[test]
    fn test_negated_done_keeps_working() {
        assert!(!plan_from_reply(&reply("The page is not completed yet.")).task_completed);
        assert!(!plan_from_reply(&reply("NOT DONE, css still missing")).task_completed);
        assert!(!plan_from_reply(&reply("Work is uncompleted")).task_completed);
    }

    #[test]
    fn test_parse_completion_json() {
        let check = parse_completion(r#"Sure: {"completed": true, "reason": "file exists", "next_action": ""}"#);
        assert!(check.completed);
        assert_eq!(check.reason, "file exists");

        let check = parse_completion(r#"{"completed": false, "reason": "missing css"}"#);
        assert!(!check.completed);
    }

    #[test]
    fn test_parse_completion_keyword_fallback() {
        assert!(parse_completion("Looks done to me").completed);
        assert!(parse_completion("The write was a success").completed);
        assert!(!parse_completion("Not there yet").completed);
        assert!(parse_completion("File written successfully").completed);
    }

    #[test]
    fn test_parse_completion_ignores_negations() {
        assert!(!parse_completion("The task is incomplete").completed);
        assert!(!parse_completion("It is not complete").completed);
        assert!(!parse_completion("Not completed yet, css missing").completed);
        assert!(!parse_completion("The write was not successful").completed);
        assert!(!parse_completion("Nothing done so far").completed);
    }

    #[test]
    fn test_system_prompt_defaults_and_meta() {
        let agent = BTreeMap::new();
        let knowledge: Vec<String> = (0..12).map(|i| format!("k{}", i)).collect();
        let ctx = PlanContext {
            agent: &agent,
            knowledge: &knowledge,
            memory: &[],
            task: "build site",
            meta_prompt: Some("stay small"),
        };

        let prompt = system_prompt(&ctx);
        assert!(prompt.starts_with("[Meta guidance]\nstay small"));
        assert!(prompt.contains("You are Genesis AI."));
        assert!(prompt.contains("Objective: Evolve"));
        assert!(prompt.contains("k11"));
        assert!(!prompt.contains("\"k1\""));
    }

    #[test]
    fn test_add_task_schema_offered() {
        let client = LlmClient::new(&Default::default()).unwrap();
        let planner = LlmPlanner::new(client, Vec::new());
        assert_eq!(planner.tool_schemas.len(), 1);
        assert_eq!(planner.tool_schemas[0]["function"]["name"], "add_task");
    }
}
