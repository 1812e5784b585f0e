//! Cloud TTS providers behind a common capability.
//!
//! Providers synthesize text to raw PCM 16 kHz signed-16 mono bytes, return
//! `None` on any failure, and never propagate errors. Availability is probed
//! at start and periodically re-probed while unavailable; a missing API key
//! means permanently unavailable until restart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use crate::config::TtsConfig;

/// Capability shared by all TTS providers.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Initialize the HTTP client and run the initial health probe.
    async fn start(&self);
    /// Whether the provider can currently synthesize.
    fn is_available(&self) -> bool;
    /// Synthesize text to PCM 16 kHz int16 mono bytes. `None` on failure.
    async fn synthesize(&self, text: &str) -> Option<Vec<u8>>;
    /// Provider name for health/status display.
    fn name(&self) -> &'static str;
}

/// Select the provider from the configuration key. Unknown keys warn and
/// fall back to the default provider.
pub fn create_tts_provider(config: &TtsConfig, sample_rate: u32) -> Box<dyn TtsProvider> {
    match config.provider.to_lowercase().as_str() {
        "inworld" => {
            info!("Creating Inworld TTS provider");
            Box::new(InworldClient::new(config, sample_rate))
        }
        "elevenlabs" => {
            info!("Creating ElevenLabs TTS provider");
            Box::new(ElevenLabsClient::new(config))
        }
        other => {
            warn!("Unknown TTS provider {other:?} — defaulting to elevenlabs");
            Box::new(ElevenLabsClient::new(config))
        }
    }
}

// ---------------------------------------------------------------------------
// ElevenLabs
// ---------------------------------------------------------------------------

pub struct ElevenLabsClient {
    config: TtsConfig,
    client: Option<Client>,
    available: AtomicBool,
    last_health_check: Mutex<Instant>,
}

impl ElevenLabsClient {
    pub fn new(config: &TtsConfig) -> Self {
        let client = if config.api_key.is_empty() {
            None
        } else {
            let mut headers = reqwest::header::HeaderMap::new();
            if let Ok(value) = reqwest::header::HeaderValue::from_str(&config.api_key) {
                headers.insert("xi-api-key", value);
            }
            Client::builder()
                .timeout(Duration::from_secs_f64(config.timeout))
                .default_headers(headers)
                .build()
                .ok()
        };

        Self {
            config: config.clone(),
            client,
            available: AtomicBool::new(false),
            last_health_check: Mutex::new(Instant::now()),
        }
    }

    async fn check_health(&self) {
        *self.last_health_check.lock().unwrap() = Instant::now();
        let Some(client) = &self.client else {
            self.available.store(false, Ordering::Relaxed);
            return;
        };

        let url = format!("{}/v1/user", self.config.base_url);
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                self.available.store(true, Ordering::Relaxed);
                info!(
                    "ElevenLabs TTS available at {} (voice: {}, model: {})",
                    self.config.base_url, self.config.voice_id, self.config.model
                );
            }
            Ok(resp) => {
                self.available.store(false, Ordering::Relaxed);
                warn!(
                    "ElevenLabs returned status {} — TTS unavailable",
                    resp.status()
                );
            }
            Err(e) => {
                self.available.store(false, Ordering::Relaxed);
                warn!(
                    "ElevenLabs not available at {} — TTS disabled: {e}",
                    self.config.base_url
                );
            }
        }
    }

    async fn maybe_recheck_health(&self) {
        if self.is_available() || self.client.is_none() {
            return;
        }
        let due = {
            let last = self.last_health_check.lock().unwrap();
            last.elapsed().as_secs_f64() >= self.config.health_check_interval
        };
        if due {
            self.check_health().await;
        }
    }
}

#[async_trait]
impl TtsProvider for ElevenLabsClient {
    async fn start(&self) {
        if self.client.is_none() {
            info!("No TTS API key — synthesis disabled");
            return;
        }
        self.check_health().await;
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        self.maybe_recheck_health().await;
        if !self.is_available() {
            return None;
        }
        let client = self.client.as_ref()?;

        let url = format!(
            "{}/v1/text-to-speech/{}",
            self.config.base_url, self.config.voice_id
        );
        let result = client
            .post(&url)
            .query(&[("output_format", "pcm_16000")])
            .json(&json!({"text": text, "model_id": self.config.model}))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(bytes) => Some(bytes.to_vec()),
                Err(e) => {
                    warn!("ElevenLabs synthesis body read failed: {e}");
                    None
                }
            },
            Ok(resp) => {
                warn!("ElevenLabs synthesis returned status {}", resp.status());
                None
            }
            Err(e) => {
                warn!("ElevenLabs synthesis failed: {e}");
                None
            }
        }
    }

    fn name(&self) -> &'static str {
        "elevenlabs"
    }
}

// ---------------------------------------------------------------------------
// Inworld
// ---------------------------------------------------------------------------

pub struct InworldClient {
    config: TtsConfig,
    sample_rate: u32,
    client: Option<Client>,
    available: AtomicBool,
    last_health_check: Mutex<Instant>,
}

impl InworldClient {
    pub fn new(config: &TtsConfig, sample_rate: u32) -> Self {
        let client = if config.inworld_api_key.is_empty() {
            None
        } else {
            let mut headers = reqwest::header::HeaderMap::new();
            let auth = format!("Basic {}", config.inworld_api_key);
            if let Ok(value) = reqwest::header::HeaderValue::from_str(&auth) {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
            Client::builder()
                .timeout(Duration::from_secs_f64(config.timeout))
                .default_headers(headers)
                .build()
                .ok()
        };

        Self {
            config: config.clone(),
            sample_rate,
            client,
            available: AtomicBool::new(false),
            last_health_check: Mutex::new(Instant::now()),
        }
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        json!({
            "text": text,
            "voiceId": self.config.inworld_voice_id,
            "modelId": self.config.inworld_model,
            "audioConfig": {
                "audioEncoding": "LINEAR16",
                "sampleRateHertz": self.sample_rate,
            },
        })
    }

    /// Inworld has no dedicated health endpoint; a minimal synthesis request
    /// verifies the key actually works.
    async fn check_health(&self) {
        *self.last_health_check.lock().unwrap() = Instant::now();
        let Some(client) = &self.client else {
            self.available.store(false, Ordering::Relaxed);
            return;
        };

        let url = format!("{}/tts/v1/voice", self.config.inworld_base_url);
        match client.post(&url).json(&self.request_body(".")).send().await {
            Ok(resp) if resp.status().is_success() => {
                self.available.store(true, Ordering::Relaxed);
                info!(
                    "Inworld TTS available at {} (voice: {})",
                    self.config.inworld_base_url, self.config.inworld_voice_id
                );
            }
            Ok(resp) => {
                self.available.store(false, Ordering::Relaxed);
                warn!(
                    "Inworld health check returned status {} — TTS unavailable",
                    resp.status()
                );
            }
            Err(e) => {
                self.available.store(false, Ordering::Relaxed);
                warn!(
                    "Inworld not available at {} — TTS disabled: {e}",
                    self.config.inworld_base_url
                );
            }
        }
    }

    async fn maybe_recheck_health(&self) {
        if self.is_available() || self.client.is_none() {
            return;
        }
        let due = {
            let last = self.last_health_check.lock().unwrap();
            last.elapsed().as_secs_f64() >= self.config.health_check_interval
        };
        if due {
            self.check_health().await;
        }
    }
}

#[async_trait]
impl TtsProvider for InworldClient {
    async fn start(&self) {
        if self.client.is_none() {
            info!("No Inworld API key — synthesis disabled");
            return;
        }
        self.check_health().await;
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        self.maybe_recheck_health().await;
        if !self.is_available() {
            return None;
        }
        let client = self.client.as_ref()?;

        let url = format!("{}/tts/v1/voice", self.config.inworld_base_url);
        let resp = match client.post(&url).json(&self.request_body(text)).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!("Inworld synthesis returned status {}", resp.status());
                return None;
            }
            Err(e) => {
                warn!("Inworld synthesis failed: {e}");
                return None;
            }
        };

        let data: serde_json::Value = match resp.json().await {
            Ok(data) => data,
            Err(e) => {
                warn!("Inworld response decode failed: {e}");
                return None;
            }
        };

        let audio_content = data["result"]["audioContent"].as_str()?;
        let mut audio = match BASE64.decode(audio_content) {
            Ok(audio) => audio,
            Err(e) => {
                warn!("Inworld audio decode failed: {e}");
                return None;
            }
        };

        // Inworld wraps LINEAR16 in a WAV container; strip the header.
        if audio.starts_with(b"RIFF") && audio.len() > 44 {
            audio.drain(..44);
        }

        Some(audio)
    }

    fn name(&self) -> &'static str {
        "inworld"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_api_key_means_permanently_unavailable() {
        let config = TtsConfig::default(); // empty api_key
        let client = ElevenLabsClient::new(&config);
        client.start().await;
        assert!(!client.is_available());
        assert!(client.synthesize("hello").await.is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_marks_unavailable() {
        let config = TtsConfig {
            api_key: "test-key".into(),
            base_url: "http://127.0.0.1:1".into(),
            timeout: 0.5,
            ..TtsConfig::default()
        };
        let client = ElevenLabsClient::new(&config);
        client.start().await;
        assert!(!client.is_available());
        assert!(client.synthesize("hello").await.is_none());
    }

    #[test]
    fn factory_selects_by_key() {
        let mut config = TtsConfig::default();
        assert_eq!(create_tts_provider(&config, 16000).name(), "elevenlabs");
        config.provider = "inworld".into();
        assert_eq!(create_tts_provider(&config, 16000).name(), "inworld");
        config.provider = "something-else".into();
        assert_eq!(create_tts_provider(&config, 16000).name(), "elevenlabs");
    }
}
