//! Narration history.
//!
//! Appends one JSONL record per processed narration to
//! ~/.echo/history/{date}.jsonl. Best-effort: failures warn and move on.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::events::Narration;

fn history_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".echo/history")
}

fn history_file(date: &str) -> PathBuf {
    history_dir().join(format!("{date}.jsonl"))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NarrationRecord {
    pub timestamp: String,
    pub session_id: String,
    pub source_kind: String,
    pub priority: String,
    pub method: String,
    pub text: String,
    pub audio_played: bool,
}

impl NarrationRecord {
    pub fn from_narration(narration: &Narration, audio_played: bool) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            session_id: narration.session_id.clone(),
            source_kind: narration.source_kind.as_str().to_string(),
            priority: narration.priority.as_str().to_string(),
            method: narration.method.as_str().to_string(),
            text: narration.text.clone(),
            audio_played,
        }
    }
}

pub fn save_narration_record(record: &NarrationRecord) {
    let dir = history_dir();
    if let Err(e) = fs::create_dir_all(&dir) {
        warn!("Failed to create history dir: {e}");
        return;
    }

    let date = Local::now().format("%Y-%m-%d").to_string();
    let path = history_file(&date);

    let mut file = match fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            warn!("Failed to open history file: {e}");
            return;
        }
    };

    match serde_json::to_string(record) {
        Ok(line) => {
            if let Err(e) = writeln!(file, "{line}") {
                warn!("Failed to write history record: {e}");
            }
        }
        Err(e) => warn!("Failed to serialize history record: {e}"),
    }
}

/// Read back one day's records, newest last. Missing or unreadable files
/// yield an empty list.
pub fn load_narration_records(date: &str) -> Vec<NarrationRecord> {
    let path = history_file(date);
    let contents = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    contents
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, Priority, SummaryMethod};

    #[test]
    fn record_captures_narration_fields() {
        let narration = Narration {
            text: "Edited 3 files.".into(),
            priority: Priority::Normal,
            source_kind: EventKind::ToolExecuted,
            session_id: "s1".into(),
            source_event_id: "e1".into(),
            method: SummaryMethod::Template,
            block_reason: None,
            options: None,
        };
        let record = NarrationRecord::from_narration(&narration, true);
        assert_eq!(record.session_id, "s1");
        assert_eq!(record.source_kind, "tool_executed");
        assert_eq!(record.priority, "normal");
        assert_eq!(record.method, "template");
        assert!(record.audio_played);
    }
}
