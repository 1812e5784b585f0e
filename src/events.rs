//! Payload types for the three pipeline buses.
//!
//! `RawEvent` flows on the raw bus (producers → summarizer/alerts/voice),
//! `Narration` on the narration bus (summarizer → speaker), and `Response`
//! on the response bus (voice → observers). All three are immutable after
//! emission and round-trip losslessly through JSON.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of events emitted by the agent's tool-use lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ToolExecuted,
    AgentBlocked,
    AgentStopped,
    AgentMessage,
    SessionStart,
    SessionEnd,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolExecuted => "tool_executed",
            Self::AgentBlocked => "agent_blocked",
            Self::AgentStopped => "agent_stopped",
            Self::AgentMessage => "agent_message",
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
        }
    }
}

/// Why the agent is blocked and waiting for the developer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    PermissionPrompt,
    IdlePrompt,
    Question,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionPrompt => "permission_prompt",
            Self::IdlePrompt => "idle_prompt",
            Self::Question => "question",
        }
    }
}

/// Which producer emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Hook,
    Transcript,
}

/// A single normalized event flowing through the raw bus.
///
/// Every event has a kind, timestamp, session id, source, and id. The
/// remaining fields are populated depending on the kind:
///   - tool_executed: tool_name, tool_input, tool_output
///   - agent_blocked: block_reason, message, options
///   - agent_message: text
///   - agent_stopped: stop_reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub kind: EventKind,
    pub session_id: String,
    pub timestamp: f64,
    pub source: EventSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<BlockReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl RawEvent {
    /// Create a bare event with a fresh id and the current wall-clock time.
    pub fn new(kind: EventKind, session_id: impl Into<String>, source: EventSource) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            session_id: session_id.into(),
            timestamp: now_timestamp(),
            source,
            tool_name: None,
            tool_input: None,
            tool_output: None,
            block_reason: None,
            message: None,
            options: None,
            text: None,
            stop_reason: None,
        }
    }
}

/// Scheduling class for a narration within the speaker stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    /// Rank used by the playback queue. Lower runs first.
    pub fn queue_rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

/// How a narration's text was produced, for observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMethod {
    Template,
    Llm,
    Truncation,
}

impl SummaryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Llm => "llm",
            Self::Truncation => "truncation",
        }
    }
}

/// A sentence to speak, carried on the narration bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Narration {
    pub text: String,
    pub priority: Priority,
    pub source_kind: EventKind,
    pub session_id: String,
    pub source_event_id: String,
    pub method: SummaryMethod,
    /// Present iff the narration was produced from an agent_blocked event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<BlockReason>,
    /// Carried through for the voice-response loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// How a spoken transcript was matched to an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Ordinal,
    YesNo,
    Direct,
    Fuzzy,
    Verbatim,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ordinal => "ordinal",
            Self::YesNo => "yes_no",
            Self::Direct => "direct",
            Self::Fuzzy => "fuzzy",
            Self::Verbatim => "verbatim",
        }
    }
}

/// A matched response ready for dispatch, carried on the response bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub text: String,
    pub transcript: String,
    pub session_id: String,
    pub match_method: MatchMethod,
    pub confidence: f64,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// Wall-clock seconds since the Unix epoch.
pub fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_event_defaults() {
        let event = RawEvent::new(EventKind::SessionStart, "s1", EventSource::Hook);
        assert_eq!(event.kind, EventKind::SessionStart);
        assert_eq!(event.session_id, "s1");
        assert!(!event.id.is_empty());
        assert!(event.timestamp > 0.0);
        assert!(event.tool_name.is_none());
        assert!(event.options.is_none());
    }

    #[test]
    fn raw_event_ids_are_unique() {
        let a = RawEvent::new(EventKind::SessionStart, "s1", EventSource::Hook);
        let b = RawEvent::new(EventKind::SessionStart, "s1", EventSource::Hook);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn raw_event_json_round_trip() {
        let mut event = RawEvent::new(EventKind::ToolExecuted, "s1", EventSource::Hook);
        event.tool_name = Some("Bash".into());
        event.tool_input = Some(serde_json::json!({"command": "npm test"}));
        event.tool_output = Some(serde_json::json!({"stdout": "ok"}));

        let json = serde_json::to_string(&event).unwrap();
        let back: RawEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, event.id);
        assert_eq!(back.kind, event.kind);
        assert_eq!(back.tool_name, event.tool_name);
        assert_eq!(back.tool_input, event.tool_input);
        assert_eq!(back.tool_output, event.tool_output);
        assert_eq!(back.session_id, event.session_id);
    }

    #[test]
    fn blocked_event_round_trip_keeps_reason_and_options() {
        let mut event = RawEvent::new(EventKind::AgentBlocked, "s2", EventSource::Hook);
        event.block_reason = Some(BlockReason::PermissionPrompt);
        event.message = Some("Allow edit of auth.ts?".into());
        event.options = Some(vec!["Allow".into(), "Deny".into()]);

        let json = serde_json::to_string(&event).unwrap();
        let back: RawEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(back.block_reason, Some(BlockReason::PermissionPrompt));
        assert_eq!(back.options.as_deref().map(|o| o.len()), Some(2));
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::ToolExecuted).unwrap();
        assert_eq!(json, "\"tool_executed\"");
        let json = serde_json::to_string(&BlockReason::PermissionPrompt).unwrap();
        assert_eq!(json, "\"permission_prompt\"");
    }

    #[test]
    fn priority_queue_ranks() {
        assert_eq!(Priority::Critical.queue_rank(), 0);
        assert_eq!(Priority::Normal.queue_rank(), 1);
        assert_eq!(Priority::Low.queue_rank(), 2);
    }
}
