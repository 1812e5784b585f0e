//! Per-session alert tracking with repeat timers.
//!
//! Watches the raw bus: any non-blocked event for a session with an active
//! alert resolves it. Activation comes from the speaker engine after a
//! critical narration has been played. Each alert owns one repeat timer
//! task that re-fires the registered callback until the alert is cleared
//! or the repeat cap is reached.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::config::AlertConfig;
use crate::events::{BlockReason, EventKind, RawEvent};

/// Callback fired on each repeat: `(block_reason, narration_text)`.
pub type RepeatCallback =
    Arc<dyn Fn(Option<BlockReason>, String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct ActiveAlert {
    pub session_id: String,
    pub block_reason: Option<BlockReason>,
    pub narration_text: String,
    pub options: Option<Vec<String>>,
    pub created_at: Instant,
    pub repeat_count: u32,
    repeat_task: Option<JoinHandle<()>>,
}

pub struct AlertManager {
    shared: Arc<AlertShared>,
    raw_bus: Bus<RawEvent>,
    cancel: CancellationToken,
    consume_task: Mutex<Option<JoinHandle<()>>>,
}

struct AlertShared {
    alerts: Mutex<HashMap<String, ActiveAlert>>,
    callback: Mutex<Option<RepeatCallback>>,
    repeat_interval: f64,
    max_repeats: u32,
    running: AtomicBool,
}

impl AlertManager {
    pub fn new(raw_bus: Bus<RawEvent>, config: &AlertConfig) -> Self {
        Self {
            shared: Arc::new(AlertShared {
                alerts: Mutex::new(HashMap::new()),
                callback: Mutex::new(None),
                repeat_interval: config.repeat_interval,
                max_repeats: config.max_repeats,
                running: AtomicBool::new(false),
            }),
            raw_bus,
            cancel: CancellationToken::new(),
            consume_task: Mutex::new(None),
        }
    }

    /// Register the repeat callback. The speaker engine supplies this at
    /// start so the manager never touches audio directly.
    pub fn set_repeat_callback(&self, callback: RepeatCallback) {
        *self.shared.callback.lock().unwrap() = Some(callback);
    }

    /// Subscribe to the raw bus and start watching for resolution events.
    pub async fn start(&self) {
        self.shared.running.store(true, Ordering::Relaxed);

        let mut sub = self.raw_bus.subscribe();
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = sub.recv() => {
                        let Some(event) = event else { break };
                        handle_event(&shared, &event);
                    }
                }
            }
        });

        *self.consume_task.lock().unwrap() = Some(task);
        info!("AlertManager started");
    }

    /// Stop the consume loop and cancel every repeat timer, waiting for
    /// each task to wind down.
    pub async fn stop(&self) {
        self.shared.running.store(false, Ordering::Relaxed);
        self.cancel.cancel();

        let task = self.consume_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let handles: Vec<JoinHandle<()>> = {
            let mut alerts = self.shared.alerts.lock().unwrap();
            let handles = alerts
                .values_mut()
                .filter_map(|alert| alert.repeat_task.take())
                .collect();
            alerts.clear();
            handles
        };
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }

        info!("AlertManager stopped");
    }

    /// Register an active alert and start its repeat timer. Replaces any
    /// existing alert for the session.
    pub async fn activate(
        &self,
        session_id: &str,
        block_reason: Option<BlockReason>,
        narration_text: &str,
        options: Option<Vec<String>>,
    ) {
        clear_alert(&self.shared, session_id);

        let repeat_task = if self.shared.repeat_interval > 0.0
            && self.shared.running.load(Ordering::Relaxed)
        {
            let shared = Arc::clone(&self.shared);
            let session = session_id.to_string();
            debug!(
                "Repeat timer started for session {session_id} (interval={:.1}s, max={})",
                self.shared.repeat_interval, self.shared.max_repeats
            );
            Some(tokio::spawn(async move {
                repeat_loop(shared, session).await;
            }))
        } else {
            None
        };

        let mut alerts = self.shared.alerts.lock().unwrap();
        alerts.insert(
            session_id.to_string(),
            ActiveAlert {
                session_id: session_id.to_string(),
                block_reason,
                narration_text: narration_text.to_string(),
                options,
                created_at: Instant::now(),
                repeat_count: 0,
                repeat_task,
            },
        );
        info!("Alert activated for session {session_id} (reason={block_reason:?})");
    }

    pub fn has_active_alert(&self, session_id: &str) -> bool {
        self.shared.alerts.lock().unwrap().contains_key(session_id)
    }

    pub fn active_count(&self) -> usize {
        self.shared.alerts.lock().unwrap().len()
    }
}

fn handle_event(shared: &Arc<AlertShared>, event: &RawEvent) {
    // Blocked events are not handled here; activation flows through the
    // speaker engine after the critical narration plays.
    if event.kind == EventKind::AgentBlocked {
        return;
    }
    let has_alert = shared.alerts.lock().unwrap().contains_key(&event.session_id);
    if has_alert {
        info!(
            "Alert resolved for session {} (event: {})",
            event.session_id,
            event.kind.as_str()
        );
        clear_alert(shared, &event.session_id);
    }
}

fn clear_alert(shared: &Arc<AlertShared>, session_id: &str) {
    let removed = shared.alerts.lock().unwrap().remove(session_id);
    if let Some(mut alert) = removed {
        if let Some(task) = alert.repeat_task.take() {
            task.abort();
        }
    }
}

async fn repeat_loop(shared: Arc<AlertShared>, session_id: String) {
    while shared.running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_secs_f64(shared.repeat_interval)).await;

        let fire = {
            let mut alerts = shared.alerts.lock().unwrap();
            let Some(alert) = alerts.get_mut(&session_id) else {
                break; // cleared while we slept
            };
            if alert.repeat_count >= shared.max_repeats {
                info!(
                    "Max alert repeats ({}) reached for session {session_id}",
                    shared.max_repeats
                );
                break;
            }
            alert.repeat_count += 1;
            info!(
                "Repeating alert for session {session_id} (repeat {}/{})",
                alert.repeat_count, shared.max_repeats
            );
            (alert.block_reason, alert.narration_text.clone())
        };

        let callback = shared.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(fire.0, fire.1).await;
        } else {
            warn!("No repeat callback registered for session {session_id}");
        }
    }
}
