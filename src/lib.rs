//! echo-rs: voice sidecar for an AI coding agent.
//!
//! Captures the agent's tool-use lifecycle events, narrates them aloud,
//! plays differentiated alert tones when the agent is blocked, and listens
//! for spoken answers that it types back into the agent's terminal.
//!
//! The pipeline is producers → raw bus → {summarizer, alert manager, voice
//! engine}; summarizer → narration bus → speaker engine; voice engine →
//! response bus. Every stage degrades independently and no producer is
//! ever blocked by a consumer.

pub mod bus;
pub mod config;
pub mod events;
pub mod history;
pub mod hooks;
pub mod server;
pub mod speaker;
pub mod summarizer;
pub mod voice;
pub mod watcher;

use std::sync::Arc;

use crate::bus::Bus;
use crate::config::Config;
use crate::server::AppState;
use crate::speaker::alerts::AlertManager;
use crate::speaker::player::Player;
use crate::speaker::publisher::RemotePublisher;
use crate::speaker::tts::{create_tts_provider, TtsProvider};
use crate::speaker::SpeakerEngine;
use crate::summarizer::Summarizer;
use crate::voice::dispatcher::Dispatcher;
use crate::voice::mic::Microphone;
use crate::voice::stt::SttClient;
use crate::voice::VoiceEngine;
use crate::watcher::TranscriptWatcher;

/// Build the pipeline graph: three buses, the three orchestrators, and the
/// transcript watcher, all owned by the returned state.
pub fn build_app(config: &Config) -> AppState {
    let raw_bus: Bus<events::RawEvent> = Bus::new();
    let narration_bus: Bus<events::Narration> = Bus::new();
    let response_bus: Bus<events::Response> = Bus::new();

    let summarizer = Arc::new(Summarizer::new(
        raw_bus.clone(),
        narration_bus.clone(),
        &config.llm,
    ));

    let alerts = Arc::new(AlertManager::new(raw_bus.clone(), &config.alert));
    let player = Arc::new(Player::new(
        config.audio.sample_rate,
        config.audio.backlog_threshold,
    ));
    let tts: Arc<dyn TtsProvider> =
        Arc::from(create_tts_provider(&config.tts, config.audio.sample_rate));
    let publisher = Arc::new(RemotePublisher::new(&config.room));
    let speaker = Arc::new(SpeakerEngine::new(
        narration_bus.clone(),
        tts,
        player,
        publisher,
        alerts,
    ));

    let mic = Arc::new(Microphone::new(&config.voice, config.audio.sample_rate));
    let stt = Arc::new(SttClient::new(&config.stt));
    let dispatcher = Arc::new(Dispatcher::new(&config.voice.dispatch_method));
    let voice = Arc::new(VoiceEngine::new(
        raw_bus.clone(),
        response_bus.clone(),
        mic,
        stt,
        dispatcher,
        Some(speaker.narrator()),
        &config.voice,
    ));

    let watcher = Arc::new(TranscriptWatcher::new(
        raw_bus.clone(),
        &config.watcher.transcripts_dir,
    ));

    AppState {
        raw_bus,
        narration_bus,
        response_bus,
        watcher,
        summarizer,
        speaker,
        voice,
    }
}
