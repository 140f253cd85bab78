//! AML (Agent Markup Language) codec
//!
//! A backing file holds five tag-delimited sections in a fixed order:
//!
//! ```text
//! <agent>
//! name: Genesis
//! </agent>
//!
//! <knowledge>
//! </knowledge>
//!
//! <memory>
//! </memory>
//!
//! <code>
//! </code>
//!
//! <todo>
//! ? pending task
//! ! finished task
//! [FAILED] abandoned task
//! > retries: 3/3
//! > reason: retried 3 times without success
//! </todo>
//! ```
//!
//! Decoding never fails: anything it does not recognise is treated as absent.
//! Task lines accept several dialects (markdown checkboxes, `?`/`!` markers,
//! legacy `[STATUS]` brackets); encoding always emits the canonical one.

use crate::state::{AgentState, TodoItem, TodoStatus, DEFAULT_MAX_RETRIES};

const META_PREFIX: &str = ">";
const META_RETRIES: &str = "retries";
const META_REASON: &str = "reason";
const META_HISTORY: &str = "history";

/// Parse AML text into an [`AgentState`]
pub fn decode(text: &str) -> AgentState {
    AgentState {
        agent: parse_agent(section(text, "agent")),
        knowledge: parse_lines(section(text, "knowledge")),
        memory: parse_lines(section(text, "memory")),
        code: parse_code(section(text, "code")),
        todo: parse_todo(section(text, "todo")),
    }
}

/// Serialize an [`AgentState`] into canonical AML text
pub fn encode(state: &AgentState) -> String {
    let mut out = String::new();

    out.push_str("<agent>\n");
    for (key, value) in &state.agent {
        out.push_str(&format!("{}: {}\n", key, value));
    }
    out.push_str("</agent>\n\n");

    push_list(&mut out, "knowledge", &state.knowledge);
    push_list(&mut out, "memory", &state.memory);
    push_list(&mut out, "code", &state.code);

    out.push_str("<todo>\n");
    for item in &state.todo {
        push_todo(&mut out, item);
    }
    out.push_str("</todo>\n");

    out
}

/// Raw body of the first `<tag>...</tag>` pair, or "" when absent
fn section<'a>(text: &'a str, tag: &str) -> &'a str {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);

    let Some(start) = text.find(&open) else {
        return "";
    };
    let body = &text[start + open.len()..];
    match body.find(&close) {
        Some(end) => &body[..end],
        None => "",
    }
}

fn parse_agent(body: &str) -> std::collections::BTreeMap<String, String> {
    body.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn parse_lines(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Code is passthrough: only the line break after `<code>` and the one
/// before `</code>` belong to the markup
fn parse_code(body: &str) -> Vec<String> {
    let body = body.strip_prefix("\r\n").or_else(|| body.strip_prefix('\n')).unwrap_or(body);
    if body.is_empty() {
        return Vec::new();
    }
    let body = body.strip_suffix("\r\n").or_else(|| body.strip_suffix('\n')).unwrap_or(body);

    body.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

fn parse_todo(body: &str) -> Vec<TodoItem> {
    let mut todos: Vec<TodoItem> = Vec::new();

    for line in body.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }

        if let Some((key, value)) = parse_meta(line) {
            if let Some(item) = todos.last_mut() {
                apply_meta(item, key, value);
            }
            continue;
        }

        let (status, content) = parse_todo_line(line);
        if content.is_empty() {
            continue;
        }
        todos.push(TodoItem::with_status(content, status));
    }

    todos
}

/// Classify one task line, falling back to pending plain text
fn parse_todo_line(line: &str) -> (TodoStatus, String) {
    // Markdown checkboxes: - [ ] / - [x]
    if let Some(rest) = line.strip_prefix("- [") {
        let mut chars = rest.chars();
        let mark = chars.next();
        if chars.next() == Some(']') {
            match mark {
                Some(' ') => return (TodoStatus::Pending, chars.as_str().trim().to_string()),
                Some('x') | Some('X') => return (TodoStatus::Done, chars.as_str().trim().to_string()),
                _ => {}
            }
        }
    }

    // Simplified markers, ASCII and full-width
    for marker in ["? ", "？ "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return (TodoStatus::Pending, rest.trim().to_string());
        }
    }
    for marker in ["! ", "！ "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return (TodoStatus::Done, rest.trim().to_string());
        }
    }

    // Legacy brackets: [STATUS] text
    if let Some(rest) = line.strip_prefix('[') {
        if let Some((keyword, content)) = rest.split_once("] ") {
            if let Some(status) = TodoStatus::from_keyword(keyword) {
                return (status, content.trim().to_string());
            }
        }
    }

    (TodoStatus::Pending, line.to_string())
}

/// Recognise `> key: value` metadata lines for the known keys only
fn parse_meta(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix(META_PREFIX)?.trim_start();
    let (key, value) = rest.split_once(':')?;
    let key = key.trim();
    match key {
        META_RETRIES | META_REASON | META_HISTORY => Some((key, value.trim())),
        _ => None,
    }
}

fn apply_meta(item: &mut TodoItem, key: &str, value: &str) {
    match key {
        META_RETRIES => {
            if let Some((count, max)) = value.split_once('/') {
                if let (Ok(count), Ok(max)) = (count.trim().parse(), max.trim().parse()) {
                    item.retry_count = count;
                    item.max_retries = max;
                }
            }
        }
        META_REASON => item.failure_reason = value.to_string(),
        META_HISTORY => item.action_history.push(value.to_string()),
        _ => {}
    }
}

fn push_list(out: &mut String, tag: &str, lines: &[String]) {
    out.push_str(&format!("<{}>\n", tag));
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&format!("</{}>\n\n", tag));
}

fn push_todo(out: &mut String, item: &TodoItem) {
    match item.status {
        TodoStatus::Pending => out.push_str(&format!("? {}\n", item.content)),
        TodoStatus::Done => out.push_str(&format!("! {}\n", item.content)),
        other => out.push_str(&format!("[{}] {}\n", other.as_keyword(), item.content)),
    }

    if item.retry_count != 0 || item.max_retries != DEFAULT_MAX_RETRIES {
        out.push_str(&format!(
            "{} {}: {}/{}\n",
            META_PREFIX, META_RETRIES, item.retry_count, item.max_retries
        ));
    }
    if !item.failure_reason.is_empty() {
        out.push_str(&format!("{} {}: {}\n", META_PREFIX, META_REASON, item.failure_reason));
    }
    for entry in &item.action_history {
        out.push_str(&format!("{} {}: {}\n", META_PREFIX, META_HISTORY, entry));
    }
}
