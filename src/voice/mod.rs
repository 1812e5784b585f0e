//! Voice-response stage: listen, transcribe, match, confirm, dispatch.
//!
//! Watches the raw bus for blocked events that carry options and runs one
//! listen cycle per alert: capture mic audio until silence, transcribe it,
//! match the transcript to an option, narrate a confirmation, and inject
//! the chosen text into the agent's terminal. Listening is single-flight
//! across sessions — a newer blocked event wins — and any non-blocked event
//! for the listening session cancels the cycle.

pub mod dispatcher;
pub mod matcher;
pub mod mic;
pub mod stt;

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::config::VoiceConfig;
use crate::events::{
    now_timestamp, BlockReason, EventKind, MatchMethod, RawEvent, Response,
};
use crate::speaker::Narrator;

use self::dispatcher::Dispatcher;
use self::mic::Microphone;
use self::stt::SttClient;

/// Composite operational state of the voice stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Listening,
    Active,
    Degraded,
    Disabled,
}

impl VoiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listening => "listening",
            Self::Active => "active",
            Self::Degraded => "degraded",
            Self::Disabled => "disabled",
        }
    }
}

struct ListenTask {
    session_id: String,
    handle: JoinHandle<()>,
}

struct VoiceShared {
    response_bus: Bus<Response>,
    mic: Arc<Microphone>,
    stt: Arc<SttClient>,
    dispatcher: Arc<Dispatcher>,
    narrator: Option<Narrator>,
    confidence_threshold: f64,
    listen: Mutex<Option<ListenTask>>,
}

pub struct VoiceEngine {
    raw_bus: Bus<RawEvent>,
    shared: Arc<VoiceShared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl VoiceEngine {
    pub fn new(
        raw_bus: Bus<RawEvent>,
        response_bus: Bus<Response>,
        mic: Arc<Microphone>,
        stt: Arc<SttClient>,
        dispatcher: Arc<Dispatcher>,
        narrator: Option<Narrator>,
        config: &VoiceConfig,
    ) -> Self {
        Self {
            raw_bus,
            shared: Arc::new(VoiceShared {
                response_bus,
                mic,
                stt,
                dispatcher,
                narrator,
                confidence_threshold: config.confidence_threshold,
                listen: Mutex::new(None),
            }),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Start sub-components, subscribe to the raw bus, begin the loop.
    pub async fn start(&self) {
        self.shared.mic.start().await;
        self.shared.stt.start().await;

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

        *self.task.lock().unwrap() = Some(task);
        info!("Voice engine started (state={})", self.state().as_str());
    }

    /// Cancel listening and the consume loop, stop sub-components.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let listen = self.shared.listen.lock().unwrap().take();
        if let Some(listen) = listen {
            listen.handle.abort();
            let _ = listen.handle.await;
        }

        self.shared.mic.stop().await;
        info!("Voice engine stopped");
    }

    pub fn state(&self) -> VoiceState {
        if self.shared.mic.is_listening() {
            return VoiceState::Listening;
        }
        let stt_ok = self.shared.stt.is_available();
        let mic_ok = self.shared.mic.is_available();
        if stt_ok && mic_ok {
            VoiceState::Active
        } else if stt_ok || mic_ok {
            VoiceState::Degraded
        } else {
            VoiceState::Disabled
        }
    }

    pub fn is_listening(&self) -> bool {
        self.shared.mic.is_listening()
    }

    pub fn stt_available(&self) -> bool {
        self.shared.stt.is_available()
    }

    pub fn mic_available(&self) -> bool {
        self.shared.mic.is_available()
    }

    pub fn dispatch_available(&self) -> bool {
        self.shared.dispatcher.is_available()
    }

    /// Resolve a block without voice: emits a verbatim response, narrates
    /// the confirmation, and dispatches. Returns true iff dispatch
    /// succeeded. Used by the HTTP surface.
    pub async fn handle_manual_response(&self, session_id: &str, text: &str) -> bool {
        cancel_listening(&self.shared, session_id);

        self.shared.response_bus.emit(Response {
            text: text.to_string(),
            transcript: text.to_string(),
            session_id: session_id.to_string(),
            match_method: MatchMethod::Verbatim,
            confidence: 1.0,
            timestamp: now_timestamp(),
            options: None,
        });

        narrate(&self.shared, &format!("Sending: {text}")).await;

        let success = self.shared.dispatcher.dispatch(text).await;
        if success {
            info!("Manual response dispatched for {session_id}: {text}");
        } else {
            warn!("Manual response dispatch failed for {session_id}");
            narrate(
                &self.shared,
                &format!("Couldn't send response. Please type: {text}"),
            )
            .await;
        }
        success
    }
}

fn handle_event(shared: &Arc<VoiceShared>, event: &RawEvent) {
    if event.kind == EventKind::AgentBlocked {
        let Some(options) = event.options.clone().filter(|o| !o.is_empty()) else {
            return; // nothing to listen for without options
        };
        start_listening(shared, &event.session_id, options, event.block_reason);
    } else {
        // A non-blocked event for the listening session means the block was
        // resolved some other way.
        let listening_session = {
            let listen = shared.listen.lock().unwrap();
            listen.as_ref().map(|l| l.session_id.clone())
        };
        if listening_session.as_deref() == Some(event.session_id.as_str()) {
            info!("Cancelling listening for resolved session {}", event.session_id);
            cancel_listening(shared, &event.session_id);
        }
    }
}

/// Single-flight: a newer blocked event cancels the prior listen task.
fn start_listening(
    shared: &Arc<VoiceShared>,
    session_id: &str,
    options: Vec<String>,
    block_reason: Option<BlockReason>,
) {
    if !shared.mic.is_available() {
        debug!("Microphone not available — skipping voice capture");
        return;
    }

    let mut listen = shared.listen.lock().unwrap();
    if let Some(prior) = listen.take() {
        prior.handle.abort();
    }

    let task_shared = Arc::clone(shared);
    let session = session_id.to_string();
    let handle = tokio::spawn(async move {
        listen_cycle(&task_shared, &session, options, block_reason).await;
        // Cycle finished on its own; clear the slot if it is still ours.
        let mut listen = task_shared.listen.lock().unwrap();
        if listen.as_ref().is_some_and(|l| l.session_id == session) {
            *listen = None;
        }
    });

    *listen = Some(ListenTask {
        session_id: session_id.to_string(),
        handle,
    });
}

fn cancel_listening(shared: &Arc<VoiceShared>, session_id: &str) {
    let mut listen = shared.listen.lock().unwrap();
    if listen.as_ref().is_some_and(|l| l.session_id == session_id) {
        if let Some(task) = listen.take() {
            task.handle.abort();
        }
    }
}

/// One full cycle: capture → transcribe → match → confirm → dispatch.
async fn listen_cycle(
    shared: &Arc<VoiceShared>,
    session_id: &str,
    options: Vec<String>,
    block_reason: Option<BlockReason>,
) {
    let Some(audio) = shared.mic.capture_until_silence().await else {
        // Timeout or capture failure; the alert repeat may re-trigger later.
        info!("No speech detected for session {session_id}");
        return;
    };

    let Some(transcript) = shared.stt.transcribe(&audio).await else {
        warn!("STT transcription returned nothing for session {session_id}");
        narrate(
            shared,
            "I couldn't understand. Please repeat or type your response.",
        )
        .await;
        return;
    };

    info!("Transcript for session {session_id}: {transcript}");

    let result = matcher::match_response(&transcript, Some(&options), block_reason);
    info!(
        "Match result for session {session_id}: text={}, confidence={:.2}, method={}",
        result.text,
        result.confidence,
        result.method.as_str()
    );

    if result.confidence < shared.confidence_threshold {
        info!(
            "Low confidence ({:.2} < {:.2}) for session {session_id} — not dispatching",
            result.confidence, shared.confidence_threshold
        );
        narrate(shared, "I didn't catch that clearly. Please repeat.").await;
        return;
    }

    shared.response_bus.emit(Response {
        text: result.text.clone(),
        transcript,
        session_id: session_id.to_string(),
        match_method: result.method,
        confidence: result.confidence,
        timestamp: now_timestamp(),
        options: Some(options),
    });

    // Speak the confirmation to completion before touching the keyboard so
    // the next capture cycle doesn't hear our own voice.
    narrate(shared, &format!("Sending: {}", result.text)).await;

    if shared.dispatcher.dispatch(&result.text).await {
        info!("Response dispatched for session {session_id}: {}", result.text);
    } else {
        warn!("Response dispatch failed for session {session_id}");
        narrate(
            shared,
            &format!("Couldn't send response. Please type: {}", result.text),
        )
        .await;
    }
}

async fn narrate(shared: &Arc<VoiceShared>, text: &str) {
    if let Some(narrator) = &shared.narrator {
        narrator.say(text).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SttConfig, VoiceConfig};
    use crate::events::EventSource;

    fn engine() -> (VoiceEngine, Bus<RawEvent>, Bus<Response>) {
        let raw_bus: Bus<RawEvent> = Bus::new();
        let response_bus: Bus<Response> = Bus::new();
        let config = VoiceConfig::default();
        let engine = VoiceEngine::new(
            raw_bus.clone(),
            response_bus.clone(),
            Arc::new(Microphone::new(&config, 16000)),
            Arc::new(SttClient::new(&SttConfig::default())),
            Arc::new(Dispatcher::new("tmux")),
            None,
            &config,
        );
        (engine, raw_bus, response_bus)
    }

    #[tokio::test]
    async fn manual_response_emits_verbatim_on_bus() {
        let (engine, _raw, responses) = engine();
        let mut sub = responses.subscribe();

        // tmux dispatch will fail in the test environment; the response
        // event must be emitted regardless.
        let _ = engine.handle_manual_response("s1", "RS256").await;

        let response = sub.recv().await.unwrap();
        assert_eq!(response.text, "RS256");
        assert_eq!(response.transcript, "RS256");
        assert_eq!(response.match_method, MatchMethod::Verbatim);
        assert_eq!(response.confidence, 1.0);
        assert_eq!(response.session_id, "s1");
    }

    #[tokio::test]
    async fn blocked_event_without_options_does_not_listen() {
        let (engine, raw, _responses) = engine();
        engine.start().await;

        let event = RawEvent::new(EventKind::AgentBlocked, "s1", EventSource::Hook);
        raw.emit(event);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(!engine.is_listening());
        assert!(engine.shared.listen.lock().unwrap().is_none());
        engine.stop().await;
    }

    #[tokio::test]
    async fn unavailable_mic_disables_listening() {
        let (engine, raw, _responses) = engine();
        engine.start().await;
        // Microphone probe fails in the test environment, so blocked events
        // with options never start a cycle.
        let mut event = RawEvent::new(EventKind::AgentBlocked, "s1", EventSource::Hook);
        event.options = Some(vec!["Allow".into(), "Deny".into()]);
        raw.emit(event);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(engine.shared.listen.lock().unwrap().is_none() || engine.mic_available());
        engine.stop().await;
    }

    #[tokio::test]
    async fn state_reflects_component_availability() {
        let (engine, _raw, _responses) = engine();
        // Nothing started: both unavailable.
        assert_eq!(engine.state(), VoiceState::Disabled);
        assert!(!engine.stt_available());
    }
}
