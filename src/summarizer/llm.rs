//! LLM summarization of free-text agent messages.
//!
//! Sends assistant text to a local Ollama instance and asks for a single
//! short sentence suitable for narration. Falls back to plain truncation
//! whenever Ollama is unreachable, slow, or returns garbage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use crate::config::LlmConfig;
use crate::events::SummaryMethod;

const SUMMARIZATION_PROMPT: &str = "Summarize this AI coding assistant message in one short sentence \
(under 20 words) suitable for text-to-speech narration. \
Focus on what was done or decided, not how.\n\n\
Message:\n{text}\n\nSummary:";

/// Inputs longer than this are truncated in the fallback path.
const MAX_TRUNCATION_LENGTH: usize = 150;
const TRUNCATED_LENGTH: usize = 140;

pub struct LlmSummarizer {
    config: LlmConfig,
    client: Client,
    available: AtomicBool,
    last_health_check: Mutex<Instant>,
}

impl LlmSummarizer {
    pub fn new(config: &LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs_f64(config.timeout))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            config: config.clone(),
            client,
            available: AtomicBool::new(false),
            last_health_check: Mutex::new(Instant::now()),
        }
    }

    /// Run the initial health probe.
    pub async fn start(&self) {
        self.check_health().await;
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Summarize free text. Tries the LLM first; any failure falls back to
    /// truncation. Returns the text plus how it was produced.
    pub async fn summarize(&self, text: &str) -> (String, SummaryMethod) {
        self.maybe_recheck_health().await;

        if self.is_available() {
            match self.call_generate(text).await {
                Ok(summary) if !summary.is_empty() => {
                    info!(
                        "Summarized {} chars into {} chars",
                        text.len(),
                        summary.len()
                    );
                    return (summary, SummaryMethod::Llm);
                }
                Ok(_) => warn!("LLM returned an empty summary — falling back to truncation"),
                Err(e) => warn!("LLM summarization failed — falling back to truncation: {e}"),
            }
        }

        (truncate(text), SummaryMethod::Truncation)
    }

    async fn call_generate(&self, text: &str) -> Result<String, String> {
        let prompt = SUMMARIZATION_PROMPT.replace("{text}", text);
        let body = json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
            "options": {"num_predict": 50, "temperature": 0.3},
        });

        let url = format!("{}/api/generate", self.config.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        if !resp.status().is_success() {
            return Err(format!("status {}", resp.status()));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| format!("bad response body: {e}"))?;

        Ok(data["response"].as_str().unwrap_or("").trim().to_string())
    }

    async fn check_health(&self) {
        *self.last_health_check.lock().unwrap() = Instant::now();

        let url = format!("{}/api/tags", self.config.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                self.available.store(true, Ordering::Relaxed);
                info!(
                    "LLM available at {} (model: {})",
                    self.config.base_url, self.config.model
                );
            }
            Ok(resp) => {
                self.available.store(false, Ordering::Relaxed);
                warn!(
                    "LLM returned status {} — using truncation fallback",
                    resp.status()
                );
            }
            Err(e) => {
                self.available.store(false, Ordering::Relaxed);
                warn!(
                    "LLM not available at {} — using truncation fallback: {e}",
                    self.config.base_url
                );
            }
        }
    }

    /// Re-probe availability, but only while unavailable and only after the
    /// configured interval has passed.
    async fn maybe_recheck_health(&self) {
        if self.is_available() {
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

/// Truncation fallback: short text passes through verbatim, longer text is
/// cut to the first 140 chars plus an ellipsis.
pub fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_TRUNCATION_LENGTH {
        return text.to_string();
    }
    let head: String = text.chars().take(TRUNCATED_LENGTH).collect();
    format!("{}…", head.trim_end())
}
