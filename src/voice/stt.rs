//! Speech-to-text HTTP client.
//!
//! Uploads captured PCM (wrapped in a WAV container) to a Whisper-style
//! transcription API. Returns `None` on any failure and re-probes
//! availability periodically while down, like the other cloud clients.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::SttConfig;

pub struct SttClient {
    config: SttConfig,
    client: Option<Client>,
    available: AtomicBool,
    last_health_check: Mutex<Instant>,
}

impl SttClient {
    pub fn new(config: &SttConfig) -> Self {
        let client = if config.api_key.is_empty() {
            None
        } else {
            let mut headers = reqwest::header::HeaderMap::new();
            let auth = format!("Bearer {}", config.api_key);
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
            client,
            available: AtomicBool::new(false),
            last_health_check: Mutex::new(Instant::now()),
        }
    }

    pub async fn start(&self) {
        if self.client.is_none() {
            info!("No STT API key — transcription disabled");
            return;
        }
        self.check_health().await;
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Send PCM16 audio to the transcription API. Returns the transcript,
    /// or `None` on any failure or an empty result.
    pub async fn transcribe(&self, pcm: &[u8]) -> Option<String> {
        self.maybe_recheck_health().await;
        if !self.is_available() {
            return None;
        }
        let client = self.client.as_ref()?;

        let wav = wrap_wav(pcm, 16000);
        let form = Form::new().text("model", self.config.model.clone()).part(
            "file",
            Part::bytes(wav)
                .file_name("audio.wav")
                .mime_str("audio/wav")
                .ok()?,
        );

        let url = format!("{}/v1/audio/transcriptions", self.config.base_url);
        let resp = match client.post(&url).multipart(form).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!("STT returned status {}", resp.status());
                return None;
            }
            Err(e) => {
                warn!("STT transcription failed: {e}");
                return None;
            }
        };

        let data: serde_json::Value = match resp.json().await {
            Ok(data) => data,
            Err(e) => {
                warn!("STT response decode failed: {e}");
                return None;
            }
        };

        let transcript = data["text"].as_str().unwrap_or("").trim().to_string();
        if transcript.is_empty() {
            return None;
        }
        debug!("STT transcript: {transcript}");
        Some(transcript)
    }

    async fn check_health(&self) {
        *self.last_health_check.lock().unwrap() = Instant::now();
        let Some(client) = &self.client else {
            self.available.store(false, Ordering::Relaxed);
            return;
        };

        let url = format!("{}/v1/models", self.config.base_url);
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                self.available.store(true, Ordering::Relaxed);
                info!(
                    "STT available at {} (model: {})",
                    self.config.base_url, self.config.model
                );
            }
            Ok(resp) => {
                self.available.store(false, Ordering::Relaxed);
                warn!("STT returned status {} — transcription unavailable", resp.status());
            }
            Err(e) => {
                self.available.store(false, Ordering::Relaxed);
                warn!(
                    "STT not available at {} — transcription disabled: {e}",
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

/// Wrap raw PCM16 mono bytes in a standard 44-byte RIFF/WAV header.
fn wrap_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let byte_rate = sample_rate * 2;

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}
