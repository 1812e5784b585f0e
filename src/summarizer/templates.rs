//! Deterministic event-to-narration text rendering.
//!
//! Handles every event kind except `agent_message` (which goes through the
//! LLM) by filling compact template strings. Rendering is pure: the same
//! event always produces the same narration text.

use std::path::Path;

use crate::events::{BlockReason, EventKind, Narration, Priority, RawEvent, SummaryMethod};

/// Maximum length for command text in a Bash narration.
const BASH_CMD_MAX_LEN: usize = 60;

const ORDINAL_WORDS: [&str; 10] = [
    "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
];

fn priority_for(kind: EventKind) -> Priority {
    match kind {
        EventKind::AgentBlocked => Priority::Critical,
        EventKind::SessionStart | EventKind::SessionEnd => Priority::Low,
        _ => Priority::Normal,
    }
}

/// Convert a single event to a `Narration` using templates.
pub fn render(event: &RawEvent) -> Narration {
    let text = render_text(event);
    Narration {
        text: text.trim().to_string(),
        priority: priority_for(event.kind),
        source_kind: event.kind,
        session_id: event.session_id.clone(),
        source_event_id: event.id.clone(),
        method: SummaryMethod::Template,
        block_reason: if event.kind == EventKind::AgentBlocked {
            event.block_reason
        } else {
            None
        },
        options: if event.kind == EventKind::AgentBlocked {
            event.options.clone()
        } else {
            None
        },
    }
}

/// Convert a batch of tool_executed events into a single `Narration`.
///
/// Counts events per tool and produces a combined sentence:
/// all one tool → "Edited 3 files.", mixed → "Edited 2 files and ran a
/// command." (subsequent clauses lowercased).
pub fn render_batch(events: &[RawEvent]) -> Narration {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for event in events {
        let tool = event.tool_name.clone().unwrap_or_else(|| "Unknown".into());
        match counts.iter_mut().find(|(name, _)| *name == tool) {
            Some((_, count)) => *count += 1,
            None => counts.push((tool, 1)),
        }
    }

    let mut parts: Vec<String> = Vec::new();
    for (i, (tool, count)) in counts.iter().enumerate() {
        let verb = batch_verb(tool);
        let noun = batch_noun(tool, *count);
        let mut part = if *count > 1 {
            format!("{verb} {count} {noun}")
        } else {
            format!("{verb} {noun}")
        };
        if i > 0 {
            part = lowercase_first(&part);
        }
        parts.push(part);
    }

    let text = format!("{}.", parts.join(" and "));
    let first = &events[0];

    Narration {
        text,
        priority: Priority::Normal,
        source_kind: EventKind::ToolExecuted,
        session_id: first.session_id.clone(),
        source_event_id: first.id.clone(),
        method: SummaryMethod::Template,
        block_reason: None,
        options: None,
    }
}

fn render_text(event: &RawEvent) -> String {
    match event.kind {
        EventKind::ToolExecuted => render_tool_executed(event),
        EventKind::AgentBlocked => render_agent_blocked(event),
        EventKind::AgentStopped => render_agent_stopped(event),
        EventKind::SessionStart => "New coding session started.".to_string(),
        EventKind::SessionEnd => "Session ended.".to_string(),
        other => format!("Agent event: {}.", other.as_str()),
    }
}

fn render_tool_executed(event: &RawEvent) -> String {
    let tool_name = event.tool_name.as_deref().unwrap_or("Unknown");
    let input = event.tool_input.as_ref();

    let input_str = |key: &str, fallback: &str| -> String {
        input
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or(fallback)
            .to_string()
    };

    match tool_name {
        "Bash" => {
            let command = input_str("command", "");
            if command.chars().count() > BASH_CMD_MAX_LEN {
                let truncated: String = command.chars().take(BASH_CMD_MAX_LEN).collect();
                format!("Ran command: {truncated}...")
            } else {
                format!("Ran command: {command}")
            }
        }
        "Read" => format!("Read {}", basename(&input_str("file_path", "a file"))),
        "Edit" => format!("Edited {}", basename(&input_str("file_path", "a file"))),
        "Write" => format!("Created {}", basename(&input_str("file_path", "a file"))),
        "Glob" => format!(
            "Searched for files matching {}",
            input_str("pattern", "a pattern")
        ),
        "Grep" => format!("Searched code for {}", input_str("pattern", "a pattern")),
        "Task" => "Launched a sub-agent".to_string(),
        "WebFetch" => "Fetched a web page".to_string(),
        "WebSearch" => format!("Searched the web for {}", input_str("query", "something")),
        other => format!("Used {other} tool"),
    }
}

fn render_agent_blocked(event: &RawEvent) -> String {
    let message = event.message.as_deref().filter(|m| !m.is_empty());

    let mut base = match event.block_reason {
        Some(BlockReason::PermissionPrompt) => match message {
            Some(msg) => format!(
                "The agent needs your permission and is waiting for your answer. It's asking: {msg}"
            ),
            None => "The agent needs your permission and is waiting for your answer.".to_string(),
        },
        Some(BlockReason::Question) => match message {
            Some(msg) => format!(
                "The agent has a question and is waiting for your answer. It's asking: {msg}"
            ),
            None => "The agent has a question and is waiting for your answer.".to_string(),
        },
        Some(BlockReason::IdlePrompt) => "The agent is idle and waiting for your input.".to_string(),
        None => match message {
            Some(msg) => format!("The agent is blocked and needs your attention. {msg}"),
            None => "The agent is blocked and needs your attention.".to_string(),
        },
    };

    if let Some(options) = event.options.as_deref().filter(|o| !o.is_empty()) {
        base.push(' ');
        base.push_str(&format_options(options));
    }

    base
}

fn render_agent_stopped(event: &RawEvent) -> String {
    match event.stop_reason.as_deref().filter(|r| !r.is_empty()) {
        Some(reason) => format!("Agent stopped: {reason}"),
        None => "Agent finished.".to_string(),
    }
}

/// Reduce a path to its final component for TTS readability.
fn basename(file_path: &str) -> String {
    if file_path.is_empty() || file_path == "a file" {
        return "a file".to_string();
    }
    Path::new(file_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "a file".to_string())
}

/// Spoken ordinal enumeration: " Option one: A. Option two: B." Words cover
/// the first ten options; digits take over beyond that.
fn format_options(options: &[String]) -> String {
    options
        .iter()
        .enumerate()
        .map(|(i, opt)| format!("Option {}: {}.", ordinal_word(i), opt))
        .collect::<Vec<_>>()
        .join(" ")
}

fn ordinal_word(index: usize) -> String {
    if index < ORDINAL_WORDS.len() {
        ORDINAL_WORDS[index].to_string()
    } else {
        (index + 1).to_string()
    }
}

fn batch_verb(tool_name: &str) -> &'static str {
    match tool_name {
        "Edit" => "Edited",
        "Read" => "Read",
        "Write" => "Created",
        "Bash" => "Ran",
        "Glob" | "Grep" => "Searched",
        _ => "Used",
    }
}

fn batch_noun(tool_name: &str, count: usize) -> &'static str {
    match tool_name {
        "Edit" | "Read" | "Write" => {
            if count > 1 {
                "files"
            } else {
                "a file"
            }
        }
        "Bash" => {
            if count > 1 {
                "commands"
            } else {
                "a command"
            }
        }
        "Glob" | "Grep" => {
            if count > 1 {
                "searches"
            } else {
                "a search"
            }
        }
        _ => {
            if count > 1 {
                "tools"
            } else {
                "a tool"
            }
        }
    }
}

fn lowercase_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
