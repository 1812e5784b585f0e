//! Summarization stage: raw events in, narrations out.
//!
//! Subscribes to the raw bus and routes each event by kind:
//! - tool_executed → the batcher (collapses rapid runs of tool events)
//! - agent_message → the LLM summarizer (truncation fallback)
//! - agent_blocked → immediate critical template render, batcher flushed first
//! - everything else → template render
//!
//! Per-event failures are logged and the loop continues.

pub mod batcher;
pub mod llm;
pub mod templates;

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::Bus;
use crate::config::LlmConfig;
use crate::events::{EventKind, Narration, RawEvent};

use self::batcher::EventBatcher;
use self::llm::LlmSummarizer;

pub struct Summarizer {
    raw_bus: Bus<RawEvent>,
    narration_bus: Bus<Narration>,
    llm: Arc<LlmSummarizer>,
    batcher: Arc<EventBatcher>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Summarizer {
    pub fn new(
        raw_bus: Bus<RawEvent>,
        narration_bus: Bus<Narration>,
        llm_config: &LlmConfig,
    ) -> Self {
        Self {
            raw_bus,
            narration_bus: narration_bus.clone(),
            llm: Arc::new(LlmSummarizer::new(llm_config)),
            batcher: Arc::new(EventBatcher::new(narration_bus)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Probe the LLM, subscribe to the raw bus, and start the consume loop.
    pub async fn start(&self) {
        self.llm.start().await;

        let mut sub = self.raw_bus.subscribe();
        let narration_bus = self.narration_bus.clone();
        let llm = Arc::clone(&self.llm);
        let batcher = Arc::clone(&self.batcher);
        let cancel = self.cancel.clone();

        let task = tokio::spawn(async move {
            debug!("Summarizer consume loop started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = sub.recv() => {
                        let Some(event) = event else { break };
                        process_event(&event, &narration_bus, &llm, &batcher).await;
                    }
                }
            }
            debug!("Summarizer consume loop stopped");
            // Subscription drops here, releasing the queue.
        });

        *self.task.lock().unwrap() = Some(task);
        info!("Summarizer started");
    }

    /// Cancel the loop, run a final batcher flush, and wait for the task.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        if let Some(narration) = self.batcher.flush() {
            self.narration_bus.emit(narration);
        }
        info!("Summarizer stopped");
    }

    pub fn llm_available(&self) -> bool {
        self.llm.is_available()
    }
}

async fn process_event(
    event: &RawEvent,
    narration_bus: &Bus<Narration>,
    llm: &LlmSummarizer,
    batcher: &EventBatcher,
) {
    debug!("Processing event: {}", event.kind.as_str());

    match event.kind {
        EventKind::ToolExecuted => {
            if let Some(narration) = batcher.add(event.clone()) {
                emit(narration_bus, narration);
            }
        }
        EventKind::AgentMessage => {
            flush_batcher(narration_bus, batcher);
            let text = event.text.as_deref().unwrap_or("");
            let (summary, method) = llm.summarize(text).await;
            emit(
                narration_bus,
                Narration {
                    text: summary,
                    priority: crate::events::Priority::Normal,
                    source_kind: event.kind,
                    session_id: event.session_id.clone(),
                    source_event_id: event.id.clone(),
                    method,
                    block_reason: None,
                    options: None,
                },
            );
        }
        EventKind::AgentBlocked => {
            // Critical path — flush pending tool narrations so ordering holds,
            // then render without delay.
            flush_batcher(narration_bus, batcher);
            emit(narration_bus, templates::render(event));
        }
        _ => {
            flush_batcher(narration_bus, batcher);
            emit(narration_bus, templates::render(event));
        }
    }
}

fn flush_batcher(narration_bus: &Bus<Narration>, batcher: &EventBatcher) {
    if batcher.has_pending() {
        if let Some(narration) = batcher.flush() {
            emit(narration_bus, narration);
        }
    }
}

fn emit(narration_bus: &Bus<Narration>, narration: Narration) {
    let preview: String = narration.text.chars().take(80).collect();
    info!(
        "Narration emitted: [{}] {preview}",
        narration.priority.as_str()
    );
    narration_bus.emit(narration);
}
