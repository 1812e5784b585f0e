//! Speaking stage: narrations in, audio out.
//!
//! Subscribes to the narration bus and routes by priority:
//! - critical → interrupt playback, play the reason-specific alert tone,
//!   activate the alert manager, synthesize, play immediately
//! - normal → synthesize and enqueue at priority 1
//! - low → shed under backlog, otherwise synthesize and enqueue at priority 2
//!
//! Degrades gracefully: no TTS means synthesis is skipped, no device means
//! playback is skipped, no room credentials means publishing is skipped.

pub mod alerts;
pub mod player;
pub mod publisher;
pub mod tones;
pub mod tts;

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::events::{Narration, Priority};
use crate::history;

use self::alerts::AlertManager;
use self::player::Player;
use self::publisher::RemotePublisher;
use self::tts::TtsProvider;

/// Composite operational state of the speaking stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerState {
    /// Both TTS and the output device are available.
    Active,
    /// Exactly one of the two is available.
    Degraded,
    /// Neither is available.
    Disabled,
}

impl SpeakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Degraded => "degraded",
            Self::Disabled => "disabled",
        }
    }
}

/// Lightweight speaking handle for collaborators that need to narrate a
/// short confirmation without going through the narration bus.
#[derive(Clone)]
pub struct Narrator {
    tts: Arc<dyn TtsProvider>,
    player: Arc<Player>,
}

impl Narrator {
    /// Synthesize and play `text`, waiting for playback to finish. Silent
    /// no-op when TTS or the device is missing.
    pub async fn say(&self, text: &str) {
        if let Some(pcm) = self.tts.synthesize(text).await {
            self.player.play_immediate(pcm).await;
        }
    }
}

pub struct SpeakerEngine {
    narration_bus: Bus<Narration>,
    tts: Arc<dyn TtsProvider>,
    player: Arc<Player>,
    publisher: Arc<RemotePublisher>,
    alerts: Arc<AlertManager>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SpeakerEngine {
    pub fn new(
        narration_bus: Bus<Narration>,
        tts: Arc<dyn TtsProvider>,
        player: Arc<Player>,
        publisher: Arc<RemotePublisher>,
        alerts: Arc<AlertManager>,
    ) -> Self {
        Self {
            narration_bus,
            tts,
            player,
            publisher,
            alerts,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Start sub-components, register the repeat callback, subscribe to the
    /// narration bus, and begin the consume loop.
    pub async fn start(&self) {
        self.tts.start().await;
        self.player.start().await;
        self.publisher.start().await;

        // The alert manager calls back into audio through this closure; it
        // never holds a reference to the engine itself.
        let tts = Arc::clone(&self.tts);
        let player = Arc::clone(&self.player);
        let publisher = Arc::clone(&self.publisher);
        self.alerts.set_repeat_callback(Arc::new(move |block_reason, text| {
            let tts = Arc::clone(&tts);
            let player = Arc::clone(&player);
            let publisher = Arc::clone(&publisher);
            Box::pin(async move {
                player.interrupt();
                player.play_alert(block_reason).await;
                if let Some(pcm) = tts.synthesize(&text).await {
                    player.play_immediate(pcm.clone()).await;
                    publisher.publish(&pcm).await;
                }
            })
        }));
        self.alerts.start().await;

        let mut sub = self.narration_bus.subscribe();
        let cancel = self.cancel.clone();
        let tts = Arc::clone(&self.tts);
        let player = Arc::clone(&self.player);
        let publisher = Arc::clone(&self.publisher);
        let alerts = Arc::clone(&self.alerts);

        let task = tokio::spawn(async move {
            debug!("Speaker consume loop started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    narration = sub.recv() => {
                        let Some(narration) = narration else { break };
                        process_narration(&narration, &tts, &player, &publisher, &alerts).await;
                    }
                }
            }
            debug!("Speaker consume loop stopped");
        });

        *self.task.lock().unwrap() = Some(task);
        info!("Speaker engine started (state={})", self.state().as_str());
    }

    /// Cancel the consume loop and stop sub-components in reverse order.
    pub async fn stop(&self) {
        self.alerts.stop().await;

        self.cancel.cancel();
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        self.publisher.stop().await;
        self.player.stop().await;
        info!("Speaker engine stopped");
    }

    pub fn state(&self) -> SpeakerState {
        let tts_ok = self.tts.is_available();
        let audio_ok = self.player.is_available();
        if tts_ok && audio_ok {
            SpeakerState::Active
        } else if tts_ok || audio_ok {
            SpeakerState::Degraded
        } else {
            SpeakerState::Disabled
        }
    }

    pub fn tts_available(&self) -> bool {
        self.tts.is_available()
    }

    pub fn audio_available(&self) -> bool {
        self.player.is_available()
    }

    pub fn remote_connected(&self) -> bool {
        self.publisher.is_connected()
    }

    pub fn alert_active(&self) -> bool {
        self.alerts.active_count() > 0
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    /// A speaking handle for the voice loop's confirmation narrations.
    pub fn narrator(&self) -> Narrator {
        Narrator {
            tts: Arc::clone(&self.tts),
            player: Arc::clone(&self.player),
        }
    }
}

async fn process_narration(
    narration: &Narration,
    tts: &Arc<dyn TtsProvider>,
    player: &Arc<Player>,
    publisher: &Arc<RemotePublisher>,
    alerts: &Arc<AlertManager>,
) {
    let mut audio_played = false;

    match narration.priority {
        Priority::Critical => {
            player.interrupt();
            player.play_alert(narration.block_reason).await;

            // Activate before synthesis so repeats still work when TTS is
            // down.
            alerts
                .activate(
                    &narration.session_id,
                    narration.block_reason,
                    &narration.text,
                    narration.options.clone(),
                )
                .await;

            if let Some(pcm) = tts.synthesize(&narration.text).await {
                if pcm.is_empty() {
                    warn!("Critical narration TTS returned empty PCM data");
                } else {
                    player.play_immediate(pcm.clone()).await;
                    publisher.publish(&pcm).await;
                    audio_played = true;
                    let preview: String = narration.text.chars().take(80).collect();
                    info!("CRITICAL narration played: {preview}");
                }
            } else {
                warn!(
                    "Critical narration TTS failed (tts_available={})",
                    tts.is_available()
                );
            }
        }
        Priority::Normal => {
            if let Some(pcm) = tts.synthesize(&narration.text).await {
                player.enqueue(pcm.clone(), 1);
                publisher.publish(&pcm).await;
                audio_played = true;
            } else {
                debug!("Skipping narration — TTS unavailable");
            }
        }
        Priority::Low => {
            if player.depth() > player.backlog_threshold() {
                warn!("Skipping LOW narration — audio backlog");
            } else if let Some(pcm) = tts.synthesize(&narration.text).await {
                player.enqueue(pcm.clone(), 2);
                publisher.publish(&pcm).await;
                audio_played = true;
            } else {
                debug!("Skipping narration — TTS unavailable");
            }
        }
    }

    history::save_narration_record(&history::NarrationRecord::from_narration(
        narration,
        audio_played,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertConfig;
    use crate::events::{BlockReason, EventKind, RawEvent, SummaryMethod};
    use async_trait::async_trait;

    struct StubTts {
        available: bool,
    }

    #[async_trait]
    impl TtsProvider for StubTts {
        async fn start(&self) {}
        fn is_available(&self) -> bool {
            self.available
        }
        async fn synthesize(&self, _text: &str) -> Option<Vec<u8>> {
            if self.available {
                Some(vec![0u8; 64])
            } else {
                None
            }
        }
        fn name(&self) -> &'static str {
            "stub"
        }
    }

    fn critical_narration() -> Narration {
        Narration {
            text: "The agent needs your permission and is waiting for your answer.".into(),
            priority: Priority::Critical,
            source_kind: EventKind::AgentBlocked,
            session_id: "s1".into(),
            source_event_id: "e1".into(),
            method: SummaryMethod::Template,
            block_reason: Some(BlockReason::PermissionPrompt),
            options: Some(vec!["Allow".into(), "Deny".into()]),
        }
    }

    fn harness(tts_available: bool) -> (Arc<dyn TtsProvider>, Arc<Player>, Arc<RemotePublisher>, Arc<AlertManager>, Bus<RawEvent>) {
        let raw_bus: Bus<RawEvent> = Bus::new();
        let alerts = Arc::new(AlertManager::new(
            raw_bus.clone(),
            &AlertConfig {
                repeat_interval: 0.0,
                max_repeats: 5,
            },
        ));
        let player = Arc::new(Player::new(16000, 3));
        player.mark_available_for_tests();
        let tts: Arc<dyn TtsProvider> = Arc::new(StubTts {
            available: tts_available,
        });
        let publisher = Arc::new(RemotePublisher::new(&Default::default()));
        (tts, player, publisher, alerts, raw_bus)
    }

    #[tokio::test]
    async fn critical_narration_preempts_queue_and_activates_alert() {
        let (tts, player, publisher, alerts, _bus) = harness(false);
        alerts.start().await;

        // A normal item is waiting; the critical narration must drop it.
        player.enqueue(vec![0, 0], 1);
        assert_eq!(player.depth(), 1);

        process_narration(&critical_narration(), &tts, &player, &publisher, &alerts).await;

        assert_eq!(player.depth(), 0);
        assert!(alerts.has_active_alert("s1"));
        alerts.stop().await;
    }

    #[tokio::test]
    async fn alert_activates_even_when_tts_is_down() {
        let (tts, player, publisher, alerts, _bus) = harness(false);
        alerts.start().await;
        assert!(!tts.is_available());

        process_narration(&critical_narration(), &tts, &player, &publisher, &alerts).await;
        assert!(alerts.has_active_alert("s1"));
        alerts.stop().await;
    }

    #[tokio::test]
    async fn engine_state_combines_tts_and_device() {
        let (tts, player, publisher, alerts, _bus) = harness(true);
        let narration_bus: Bus<Narration> = Bus::new();
        let engine = SpeakerEngine::new(narration_bus, tts, player, publisher, alerts);

        // Stub TTS available + test-available player = active.
        assert_eq!(engine.state(), SpeakerState::Active);
        assert!(engine.tts_available());
        assert!(!engine.remote_connected());
        assert!(!engine.alert_active());
    }
}
