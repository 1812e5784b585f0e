//! Time-windowed batcher that collapses rapid tool_executed events.
//!
//! Tool events arriving in quick succession accumulate in a batch that is
//! flushed into a single narration when:
//! 1. the batch window (500 ms) expires,
//! 2. a non-tool event forces an explicit flush, or
//! 3. the batch reaches the size cap (10).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::bus::Bus;
use crate::events::{Narration, RawEvent};
use crate::summarizer::templates;

pub const BATCH_WINDOW: Duration = Duration::from_millis(500);
pub const MAX_BATCH_SIZE: usize = 10;

pub struct EventBatcher {
    state: Arc<Mutex<BatchState>>,
    narration_bus: Bus<Narration>,
    window: Duration,
    max_size: usize,
}

struct BatchState {
    events: Vec<RawEvent>,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every flush so an in-flight timer can tell its batch is gone.
    generation: u64,
}

impl EventBatcher {
    pub fn new(narration_bus: Bus<Narration>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BatchState {
                events: Vec::new(),
                timer: None,
                generation: 0,
            })),
            narration_bus,
            window: BATCH_WINDOW,
            max_size: MAX_BATCH_SIZE,
        }
    }

    /// Add a tool_executed event. Returns a narration immediately when the
    /// batch hits the size cap; otherwise the window timer (started on the
    /// first event) will flush to the narration bus later.
    pub fn add(&self, event: RawEvent) -> Option<Narration> {
        let mut state = self.state.lock().unwrap();
        state.events.push(event);
        debug!("Added event to batch (size={})", state.events.len());

        if state.events.len() >= self.max_size {
            debug!("Batch reached size cap {}, flushing immediately", self.max_size);
            return flush_locked(&mut state);
        }

        if state.events.len() == 1 {
            self.schedule_flush(&mut state);
        }

        None
    }

    /// Force-flush the current batch. Returns the batched narration, or
    /// `None` if the batch is empty. Cancels any pending window timer.
    pub fn flush(&self) -> Option<Narration> {
        let mut state = self.state.lock().unwrap();
        flush_locked(&mut state)
    }

    pub fn has_pending(&self) -> bool {
        !self.state.lock().unwrap().events.is_empty()
    }

    fn schedule_flush(&self, state: &mut BatchState) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let bus = self.narration_bus.clone();
        let window = self.window;

        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let narration = {
                let mut state = shared.lock().unwrap();
                if state.generation != generation {
                    // Someone else flushed this batch while we slept.
                    return;
                }
                flush_locked(&mut state)
            };
            if let Some(narration) = narration {
                bus.emit(narration);
            }
        }));
    }
}

fn flush_locked(state: &mut BatchState) -> Option<Narration> {
    if let Some(timer) = state.timer.take() {
        timer.abort();
    }
    state.generation += 1;

    if state.events.is_empty() {
        debug!("Flush called on empty batch");
        return None;
    }

    let events = std::mem::take(&mut state.events);
    debug!("Flushing batch of {} events", events.len());
    Some(templates::render_batch(&events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, EventSource};
    use serde_json::json;

    fn edit_event(path: &str) -> RawEvent {
        let mut event = RawEvent::new(EventKind::ToolExecuted, "s1", EventSource::Hook);
        event.tool_name = Some("Edit".into());
        event.tool_input = Some(json!({ "file_path": path }));
        event
    }

    #[tokio::test]
    async fn empty_flush_returns_none() {
        let bus: Bus<Narration> = Bus::new();
        let batcher = EventBatcher::new(bus);
        assert!(batcher.flush().is_none());
        assert!(!batcher.has_pending());
    }

    #[tokio::test]
    async fn explicit_flush_renders_batch() {
        let bus: Bus<Narration> = Bus::new();
        let batcher = EventBatcher::new(bus);

        assert!(batcher.add(edit_event("/a.ts")).is_none());
        assert!(batcher.add(edit_event("/b.ts")).is_none());
        assert!(batcher.has_pending());

        let narration = batcher.flush().unwrap();
        assert_eq!(narration.text, "Edited 2 files.");
        assert!(!batcher.has_pending());

        // Idempotent: a second flush finds nothing.
        assert!(batcher.flush().is_none());
    }

    #[tokio::test]
    async fn size_cap_flushes_synchronously() {
        let bus: Bus<Narration> = Bus::new();
        let batcher = EventBatcher::new(bus);

        for i in 0..MAX_BATCH_SIZE - 1 {
            assert!(batcher.add(edit_event(&format!("/f{i}.ts"))).is_none());
        }
        let narration = batcher.add(edit_event("/last.ts")).unwrap();
        assert_eq!(narration.text, "Edited 10 files.");
        assert!(!batcher.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_flushes_to_bus() {
        let bus: Bus<Narration> = Bus::new();
        let mut sub = bus.subscribe();
        let batcher = EventBatcher::new(bus.clone());

        batcher.add(edit_event("/a.ts"));
        // Let the window timer register its sleep before advancing.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(400)).await;
        batcher.add(edit_event("/b.ts"));
        tokio::time::advance(Duration::from_millis(90)).await;
        batcher.add(edit_event("/c.ts"));

        // Window expires 500 ms after the first event.
        tokio::time::advance(Duration::from_millis(20)).await;
        tokio::task::yield_now().await;

        let narration = sub.recv().await.unwrap();
        assert_eq!(narration.text, "Edited 3 files.");

        // An event past the window starts a fresh batch.
        batcher.add(edit_event("/d.ts"));
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(510)).await;
        tokio::task::yield_now().await;
        let narration = sub.recv().await.unwrap();
        assert_eq!(narration.text, "Edited a file.");
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_flush_cancels_timer() {
        let bus: Bus<Narration> = Bus::new();
        let mut sub = bus.subscribe();
        let batcher = EventBatcher::new(bus.clone());

        batcher.add(edit_event("/a.ts"));
        tokio::task::yield_now().await;
        let narration = batcher.flush().unwrap();
        assert_eq!(narration.text, "Edited a file.");

        // The timer must not fire a second narration for the same batch.
        tokio::time::advance(Duration::from_millis(600)).await;
        tokio::task::yield_now().await;
        assert!(sub.try_recv().is_none());
    }
}
