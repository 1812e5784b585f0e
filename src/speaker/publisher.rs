//! Remote room audio publisher.
//!
//! Ships narration PCM frames to a remote listening room over HTTP so the
//! developer can hear the sidecar away from the desk. Disabled when the
//! room URL or credentials are missing; connect and publish failures are
//! contained to a warning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::Client;
use tracing::{info, warn};

use crate::config::RoomConfig;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RemotePublisher {
    config: RoomConfig,
    client: Option<Client>,
    connected: AtomicBool,
}

impl RemotePublisher {
    pub fn new(config: &RoomConfig) -> Self {
        let configured =
            !config.url.is_empty() && !config.api_key.is_empty() && !config.api_secret.is_empty();

        let client = if configured {
            let mut headers = reqwest::header::HeaderMap::new();
            if let Ok(value) = reqwest::header::HeaderValue::from_str(&config.api_key) {
                headers.insert("x-room-key", value);
            }
            if let Ok(value) = reqwest::header::HeaderValue::from_str(&config.api_secret) {
                headers.insert("x-room-secret", value);
            }
            Client::builder()
                .timeout(PUBLISH_TIMEOUT)
                .default_headers(headers)
                .build()
                .ok()
        } else {
            None
        };

        Self {
            config: config.clone(),
            client,
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Verify the room endpoint is reachable. Unconfigured publishers stay
    /// disabled without complaint.
    pub async fn start(&self) {
        let Some(client) = &self.client else {
            info!("Remote room not configured — remote audio disabled");
            return;
        };

        match client.get(&self.config.url).send().await {
            Ok(resp) if resp.status().is_success() => {
                self.connected.store(true, Ordering::Relaxed);
                info!("Connected to remote room at {}", self.config.url);
            }
            Ok(resp) => {
                warn!(
                    "Remote room returned status {} — remote audio disabled",
                    resp.status()
                );
            }
            Err(e) => {
                warn!("Failed to connect to remote room: {e}");
            }
        }
    }

    pub async fn stop(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            info!("Disconnected from remote room");
        }
    }

    /// Publish raw PCM16 audio to the room. A failure warns and moves on;
    /// the local pipeline never depends on the room.
    pub async fn publish(&self, pcm: &[u8]) {
        if !self.is_connected() {
            return;
        }
        let Some(client) = &self.client else { return };

        let url = format!("{}/audio", self.config.url.trim_end_matches('/'));
        let result = client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "audio/l16")
            .body(pcm.to_vec())
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!("Remote publish returned status {}", resp.status()),
            Err(e) => warn!("Failed to publish audio to remote room: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_publisher_is_disabled() {
        let publisher = RemotePublisher::new(&RoomConfig::default());
        assert!(!publisher.is_configured());
        publisher.start().await;
        assert!(!publisher.is_connected());
        // Publishing while disabled is a silent no-op.
        publisher.publish(&[0, 0]).await;
    }

    #[tokio::test]
    async fn unreachable_room_stays_disconnected() {
        let config = RoomConfig {
            url: "http://127.0.0.1:1".into(),
            api_key: "k".into(),
            api_secret: "s".into(),
        };
        let publisher = RemotePublisher::new(&config);
        assert!(publisher.is_configured());
        publisher.start().await;
        assert!(!publisher.is_connected());
    }

    #[tokio::test]
    async fn partial_credentials_disable_publisher() {
        let config = RoomConfig {
            url: "http://127.0.0.1:1".into(),
            api_key: "k".into(),
            api_secret: String::new(),
        };
        let publisher = RemotePublisher::new(&config);
        assert!(!publisher.is_configured());
    }
}
