//! Hook payload normalization.
//!
//! The agent invokes hook scripts with a JSON object describing the
//! lifecycle event. This module maps those payloads onto `RawEvent`s.
//! Unrecognised event names are dropped with a warning; missing fields are
//! tolerated wherever the event kind permits.

use serde_json::Value;
use tracing::{debug, warn};

use crate::events::{BlockReason, EventKind, EventSource, RawEvent};

const HOOK_POST_TOOL_USE: &str = "PostToolUse";
const HOOK_NOTIFICATION: &str = "Notification";
const HOOK_PERMISSION_REQUEST: &str = "PermissionRequest";
const HOOK_STOP: &str = "Stop";
const HOOK_SESSION_START: &str = "SessionStart";
const HOOK_SESSION_END: &str = "SessionEnd";

/// Convert a raw hook payload into a `RawEvent`, or `None` when the payload
/// is unrecognised.
pub fn parse_hook_event(raw: &Value) -> Option<RawEvent> {
    let hook_event_name = raw
        .get("hook_event_name")
        .and_then(Value::as_str)
        .unwrap_or("");
    let session_id = raw
        .get("session_id")
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    debug!("Parsing hook event: name={hook_event_name} session_id={session_id}");

    match hook_event_name {
        HOOK_POST_TOOL_USE => Some(parse_post_tool_use(raw, session_id)),
        HOOK_NOTIFICATION => Some(parse_notification(raw, session_id)),
        HOOK_PERMISSION_REQUEST => Some(parse_permission_request(raw, session_id)),
        HOOK_STOP => Some(parse_stop(raw, session_id)),
        HOOK_SESSION_START => Some(RawEvent::new(
            EventKind::SessionStart,
            session_id,
            EventSource::Hook,
        )),
        HOOK_SESSION_END => Some(RawEvent::new(
            EventKind::SessionEnd,
            session_id,
            EventSource::Hook,
        )),
        other => {
            warn!("Unrecognised hook event name: {other:?} — skipping");
            None
        }
    }
}

fn parse_post_tool_use(raw: &Value, session_id: &str) -> RawEvent {
    let mut event = RawEvent::new(EventKind::ToolExecuted, session_id, EventSource::Hook);
    event.tool_name = raw
        .get("tool_name")
        .and_then(Value::as_str)
        .map(String::from);
    event.tool_input = raw.get("tool_input").cloned().filter(|v| !v.is_null());
    event.tool_output = raw.get("tool_response").cloned().filter(|v| !v.is_null());
    event
}

fn parse_notification(raw: &Value, session_id: &str) -> RawEvent {
    let notification_type = raw.get("type").and_then(Value::as_str).unwrap_or("");
    let message = raw.get("message").and_then(Value::as_str).map(String::from);
    let options = string_array(raw.get("options"));

    let block_reason = infer_block_reason(notification_type, message.as_deref());
    debug!("Notification: type={notification_type} block_reason={block_reason:?}");

    let mut event = RawEvent::new(EventKind::AgentBlocked, session_id, EventSource::Hook);
    event.block_reason = block_reason;
    event.message = message;
    event.options = options;
    event
}

/// A permission dialog is about to be shown. The payload carries the tool
/// name and input describing the action that needs approval.
fn parse_permission_request(raw: &Value, session_id: &str) -> RawEvent {
    let tool_name = raw
        .get("tool_name")
        .and_then(Value::as_str)
        .unwrap_or("unknown tool");
    let tool_input = raw.get("tool_input");

    let message = build_permission_message(tool_name, tool_input);

    // For AskUserQuestion, surface the real option labels so narration reads
    // them and the voice loop can match spoken answers.
    let options = match tool_name {
        "AskUserQuestion" => tool_input
            .and_then(extract_question_option_labels)
            .unwrap_or_else(|| vec!["Allow".into(), "Deny".into()]),
        _ => vec!["Allow".into(), "Deny".into()],
    };

    let mut event = RawEvent::new(EventKind::AgentBlocked, session_id, EventSource::Hook);
    event.block_reason = Some(BlockReason::PermissionPrompt);
    event.message = Some(message);
    event.options = Some(options);
    event.tool_name = Some(tool_name.to_string());
    event.tool_input = tool_input.cloned().filter(|v| !v.is_null());
    event
}

fn parse_stop(raw: &Value, session_id: &str) -> RawEvent {
    let mut event = RawEvent::new(EventKind::AgentStopped, session_id, EventSource::Hook);
    event.stop_reason = raw
        .get("stop_reason")
        .or_else(|| raw.get("reason"))
        .and_then(Value::as_str)
        .map(String::from);
    event
}

fn build_permission_message(tool_name: &str, tool_input: Option<&Value>) -> String {
    if let Some(input) = tool_input {
        if tool_name == "Bash" {
            if let Some(command) = input.get("command").and_then(Value::as_str) {
                return format!("The agent wants to run: {command}");
            }
        }
        if tool_name == "Write" {
            if let Some(path) = input.get("file_path").and_then(Value::as_str) {
                return format!("The agent wants to write to: {path}");
            }
        }
        if tool_name == "Edit" {
            if let Some(path) = input.get("file_path").and_then(Value::as_str) {
                return format!("The agent wants to edit: {path}");
            }
        }
        if tool_name == "AskUserQuestion" {
            return build_ask_user_question_message(input);
        }
    }
    format!("The agent wants to use {tool_name}")
}

fn build_ask_user_question_message(tool_input: &Value) -> String {
    let Some(first_q) = tool_input
        .get("questions")
        .and_then(Value::as_array)
        .and_then(|qs| qs.first())
    else {
        return "The agent wants to ask you a question".to_string();
    };

    let question = first_q.get("question").and_then(Value::as_str).unwrap_or("");
    let mut parts = if question.is_empty() {
        vec!["The agent wants to ask you a question".to_string()]
    } else {
        vec![format!("The agent is asking: {question}")]
    };

    if let Some(labels) = extract_question_option_labels(tool_input) {
        parts.push(format!("The choices are: {}", labels.join(", ")));
    }

    parts.join(" ")
}

/// Pull option labels out of an AskUserQuestion tool input, if present.
fn extract_question_option_labels(tool_input: &Value) -> Option<Vec<String>> {
    let first_q = tool_input.get("questions")?.as_array()?.first()?;
    let options = first_q.get("options")?.as_array()?;

    let labels: Vec<String> = options
        .iter()
        .map(|opt| match opt.get("label").and_then(Value::as_str) {
            Some(label) => label.to_string(),
            None => match opt.as_str() {
                Some(s) => s.to_string(),
                None => opt.to_string(),
            },
        })
        .collect();

    if labels.is_empty() {
        None
    } else {
        Some(labels)
    }
}

/// Determine the block reason from notification metadata. Checks the
/// explicit type first, then falls back to keyword matching on the message.
fn infer_block_reason(notification_type: &str, message: Option<&str>) -> Option<BlockReason> {
    let lowered = notification_type.to_lowercase();
    if lowered.contains("permission") {
        return Some(BlockReason::PermissionPrompt);
    }
    if lowered.contains("idle") {
        return Some(BlockReason::IdlePrompt);
    }
    if lowered.contains("question") {
        return Some(BlockReason::Question);
    }

    if let Some(msg) = message {
        let msg_lower = msg.to_lowercase();
        if msg_lower.contains("permission") {
            return Some(BlockReason::PermissionPrompt);
        }
        if msg_lower.contains("idle") {
            return Some(BlockReason::IdlePrompt);
        }
    }

    debug!("Could not determine block_reason from type={notification_type:?}");
    None
}

fn string_array(value: Option<&Value>) -> Option<Vec<String>> {
    let arr = value?.as_array()?;
    let strings: Vec<String> = arr
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();
    if strings.is_empty() {
        None
    } else {
        Some(strings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn post_tool_use_maps_to_tool_executed() {
        let raw = json!({
            "hook_event_name": "PostToolUse",
            "session_id": "s1",
            "tool_name": "Bash",
            "tool_input": {"command": "npm test"},
            "tool_response": {"stdout": "ok"},
        });
        let event = parse_hook_event(&raw).unwrap();
        assert_eq!(event.kind, EventKind::ToolExecuted);
        assert_eq!(event.session_id, "s1");
        assert_eq!(event.tool_name.as_deref(), Some("Bash"));
        assert_eq!(event.tool_input.unwrap()["command"], "npm test");
        assert_eq!(event.tool_output.unwrap()["stdout"], "ok");
        assert_eq!(event.source, EventSource::Hook);
    }

    #[test]
    fn notification_maps_to_agent_blocked() {
        let raw = json!({
            "hook_event_name": "Notification",
            "session_id": "s1",
            "type": "permission_prompt",
            "message": "Allow edit of auth.ts?",
            "options": ["Allow", "Deny"],
        });
        let event = parse_hook_event(&raw).unwrap();
        assert_eq!(event.kind, EventKind::AgentBlocked);
        assert_eq!(event.block_reason, Some(BlockReason::PermissionPrompt));
        assert_eq!(event.message.as_deref(), Some("Allow edit of auth.ts?"));
        assert_eq!(
            event.options,
            Some(vec!["Allow".to_string(), "Deny".to_string()])
        );
    }

    #[test]
    fn notification_infers_reason_from_message() {
        let raw = json!({
            "hook_event_name": "Notification",
            "session_id": "s1",
            "type": "",
            "message": "Claude needs your permission to use Bash",
        });
        let event = parse_hook_event(&raw).unwrap();
        assert_eq!(event.block_reason, Some(BlockReason::PermissionPrompt));
    }

    #[test]
    fn notification_without_reason_keeps_none() {
        let raw = json!({
            "hook_event_name": "Notification",
            "session_id": "s1",
            "type": "something_else",
            "message": "hello",
        });
        let event = parse_hook_event(&raw).unwrap();
        assert_eq!(event.kind, EventKind::AgentBlocked);
        assert_eq!(event.block_reason, None);
    }

    #[test]
    fn permission_request_builds_message_and_options() {
        let raw = json!({
            "hook_event_name": "PermissionRequest",
            "session_id": "s1",
            "tool_name": "Bash",
            "tool_input": {"command": "rm -rf build"},
        });
        let event = parse_hook_event(&raw).unwrap();
        assert_eq!(event.kind, EventKind::AgentBlocked);
        assert_eq!(event.block_reason, Some(BlockReason::PermissionPrompt));
        assert_eq!(
            event.message.as_deref(),
            Some("The agent wants to run: rm -rf build")
        );
        assert_eq!(
            event.options,
            Some(vec!["Allow".to_string(), "Deny".to_string()])
        );
    }

    #[test]
    fn permission_request_extracts_question_options() {
        let raw = json!({
            "hook_event_name": "PermissionRequest",
            "session_id": "s1",
            "tool_name": "AskUserQuestion",
            "tool_input": {
                "questions": [{
                    "question": "Which algorithm?",
                    "options": [{"label": "RS256"}, {"label": "HS256"}],
                }],
            },
        });
        let event = parse_hook_event(&raw).unwrap();
        assert_eq!(
            event.options,
            Some(vec!["RS256".to_string(), "HS256".to_string()])
        );
        let message = event.message.unwrap();
        assert!(message.contains("Which algorithm?"));
        assert!(message.contains("RS256"));
    }

    #[test]
    fn stop_maps_to_agent_stopped() {
        let raw = json!({
            "hook_event_name": "Stop",
            "session_id": "s1",
            "stop_reason": "end_turn",
        });
        let event = parse_hook_event(&raw).unwrap();
        assert_eq!(event.kind, EventKind::AgentStopped);
        assert_eq!(event.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn stop_without_reason_is_fine() {
        let raw = json!({"hook_event_name": "Stop", "session_id": "s1"});
        let event = parse_hook_event(&raw).unwrap();
        assert_eq!(event.stop_reason, None);
    }

    #[test]
    fn session_events_map() {
        let raw = json!({"hook_event_name": "SessionStart", "session_id": "s1"});
        assert_eq!(
            parse_hook_event(&raw).unwrap().kind,
            EventKind::SessionStart
        );
        let raw = json!({"hook_event_name": "SessionEnd", "session_id": "s1"});
        assert_eq!(parse_hook_event(&raw).unwrap().kind, EventKind::SessionEnd);
    }

    #[test]
    fn unknown_event_name_is_dropped() {
        let raw = json!({"hook_event_name": "SomethingNew", "session_id": "s1"});
        assert!(parse_hook_event(&raw).is_none());
    }

    #[test]
    fn missing_session_id_defaults_to_unknown() {
        let raw = json!({"hook_event_name": "SessionStart"});
        assert_eq!(parse_hook_event(&raw).unwrap().session_id, "unknown");
    }
}
