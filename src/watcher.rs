//! Transcript file watcher.
//!
//! The agent appends newline-delimited JSON to a per-session transcript
//! file. This watcher tails those files (tracking a byte offset per file so
//! only new content is parsed) and emits `agent_message` events for
//! assistant text records. Events that collide with hook-derived events in
//! the same 100 ms bucket are suppressed by a small dedup LRU.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use notify::{Event, EventKind as NotifyEventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::events::{now_timestamp, EventKind, EventSource, RawEvent};

/// Dedup LRU capacity; keys are (session, 100 ms bucket) pairs.
const DEDUP_CAPACITY: usize = 256;

pub struct TranscriptWatcher {
    raw_bus: Bus<RawEvent>,
    dir: PathBuf,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

struct WatchState {
    /// Byte offset of the last-read position per file.
    offsets: HashMap<PathBuf, u64>,
    dedup: DedupCache,
}

impl TranscriptWatcher {
    pub fn new(raw_bus: Bus<RawEvent>, dir: &Path) -> Self {
        Self {
            raw_bus,
            dir: dir.to_path_buf(),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            watcher: Mutex::new(None),
        }
    }

    /// Start watching. Logs and declines to start when the transcript
    /// directory does not exist.
    pub async fn start(&self) {
        if !self.dir.is_dir() {
            warn!(
                "Transcript directory does not exist: {} — watcher will not start",
                self.dir.display()
            );
            return;
        }

        let (tx, mut rx) = mpsc::channel::<Event>(64);

        let watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    let _ = tx.blocking_send(event);
                }
                Err(e) => warn!("Transcript watch error: {e}"),
            }
        });

        let mut watcher = match watcher {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!("Failed to create transcript watcher: {e}");
                return;
            }
        };

        if let Err(e) = watcher.watch(&self.dir, RecursiveMode::Recursive) {
            warn!("Failed to watch {}: {e}", self.dir.display());
            return;
        }
        *self.watcher.lock().unwrap() = Some(watcher);

        let raw_bus = self.raw_bus.clone();
        let cancel = self.cancel.clone();

        let task = tokio::spawn(async move {
            let mut state = WatchState {
                offsets: HashMap::new(),
                dedup: DedupCache::new(DEDUP_CAPACITY),
            };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        handle_fs_event(&mut state, &event, &raw_bus);
                    }
                }
            }
        });

        *self.task.lock().unwrap() = Some(task);
        info!(
            "Transcript watcher started — monitoring {} for .jsonl changes",
            self.dir.display()
        );
    }

    pub async fn stop(&self) {
        // Dropping the watcher stops the notify thread.
        *self.watcher.lock().unwrap() = None;

        self.cancel.cancel();
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("Transcript watcher stopped");
    }
}

fn handle_fs_event(state: &mut WatchState, event: &Event, raw_bus: &Bus<RawEvent>) {
    let created = matches!(event.kind, NotifyEventKind::Create(_));
    let modified = matches!(event.kind, NotifyEventKind::Modify(_));
    let removed = matches!(event.kind, NotifyEventKind::Remove(_));

    for path in &event.paths {
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }

        if removed {
            state.offsets.remove(path);
            debug!("Removed offset tracking for deleted file: {}", path.display());
            continue;
        }

        if created {
            info!("New transcript file discovered: {}", path.display());
            state.offsets.insert(path.clone(), 0);
            process_file(state, path, raw_bus);
        } else if modified {
            // A pre-existing file seen for the first time: tail from its
            // current end so startup never replays an entire backlog.
            if !state.offsets.contains_key(path) {
                let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
                state.offsets.insert(path.clone(), size);
                continue;
            }
            process_file(state, path, raw_bus);
        }
    }
}

fn process_file(state: &mut WatchState, path: &Path, raw_bus: &Bus<RawEvent>) {
    let file_size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            warn!("Cannot stat transcript file {}: {e}", path.display());
            return;
        }
    };

    let mut offset = state.offsets.get(path).copied().unwrap_or(0);

    // The file was truncated or recreated; start over.
    if file_size < offset {
        debug!(
            "File {} appears truncated (size={file_size} < offset={offset}) — resetting",
            path.display()
        );
        offset = 0;
    }

    if file_size == offset {
        return; // nothing new
    }

    let new_data = match read_from_offset(path, offset) {
        Ok(data) => data,
        Err(e) => {
            warn!("Error reading transcript file {}: {e}", path.display());
            return;
        }
    };

    state.offsets.insert(path.to_path_buf(), file_size);

    for line in new_data.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        handle_line(state, line, path, raw_bus);
    }
}

fn read_from_offset(path: &Path, offset: u64) -> Result<String, String> {
    let mut file = fs::File::open(path).map_err(|e| e.to_string())?;
    file.seek(SeekFrom::Start(offset)).map_err(|e| e.to_string())?;
    let mut data = String::new();
    file.read_to_string(&mut data).map_err(|e| e.to_string())?;
    Ok(data)
}

fn handle_line(state: &mut WatchState, line: &str, path: &Path, raw_bus: &Bus<RawEvent>) {
    let entry: Value = match serde_json::from_str(line) {
        Ok(entry) => entry,
        Err(e) => {
            let preview: String = line.chars().take(80).collect();
            warn!("Malformed JSONL line in {}: {e} ({preview})", path.display());
            return;
        }
    };

    let Some(text) = extract_assistant_text(&entry) else {
        return;
    };

    let session_id = extract_session_id(&entry, path);
    let timestamp = extract_timestamp(&entry);

    if !state.dedup.insert(&session_id, timestamp) {
        debug!("Duplicate transcript message suppressed (session={session_id})");
        return;
    }

    let mut event = RawEvent::new(EventKind::AgentMessage, session_id, EventSource::Transcript);
    event.timestamp = timestamp;
    event.text = Some(text);

    raw_bus.emit(event);
}

/// Concatenated text blocks from an assistant transcript entry, or `None`
/// when the entry carries no spoken-worthy text (tool-use records arrive
/// via hooks instead).
fn extract_assistant_text(entry: &Value) -> Option<String> {
    if entry.get("type").and_then(Value::as_str) != Some("assistant") {
        return None;
    }

    let message = entry.get("message")?;
    if message.get("role").and_then(Value::as_str) != Some("assistant") {
        return None;
    }

    let content = message.get("content")?.as_array()?;
    let parts: Vec<&str> = content
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect();

    if parts.is_empty() {
        return None;
    }
    Some(parts.join("\n\n"))
}

/// Session id from the entry, falling back to the file stem (the transcript
/// filename is the session id).
fn extract_session_id(entry: &Value, path: &Path) -> String {
    entry
        .get("sessionId")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unknown".to_string())
        })
}

fn extract_timestamp(entry: &Value) -> f64 {
    match entry.get("timestamp") {
        Some(Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis() as f64 / 1000.0)
            .unwrap_or_else(|_| now_timestamp()),
        Some(Value::Number(n)) => n.as_f64().unwrap_or_else(now_timestamp),
        _ => now_timestamp(),
    }
}

/// Small LRU keyed by (session, 100 ms timestamp bucket). `insert` returns
/// false when the key was already present.
struct DedupCache {
    seen: HashSet<(String, i64)>,
    order: VecDeque<(String, i64)>,
    capacity: usize,
}

impl DedupCache {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn insert(&mut self, session_id: &str, timestamp: f64) -> bool {
        let key = (session_id.to_string(), (timestamp * 10.0).floor() as i64);
        if self.seen.contains(&key) {
            return false;
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }
}
