//! Configuration for echo-rs.
//!
//! All behavior is parameterized by `ECHO_*` environment variables with
//! documented defaults. Configuration is read once at startup.

use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 7865;

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP bind port (localhost only).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Provider factory key: "elevenlabs" (default) or "inworld".
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    pub voice_id: String,
    pub model: String,
    /// Per-call timeout, seconds.
    pub timeout: f64,
    /// Re-probe interval while unavailable, seconds.
    pub health_check_interval: f64,
    pub inworld_base_url: String,
    pub inworld_api_key: String,
    pub inworld_voice_id: String,
    pub inworld_model: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: "elevenlabs".into(),
            base_url: "https://api.elevenlabs.io".into(),
            api_key: String::new(),
            voice_id: "21m00Tcm4TlvDq8ikWAM".into(),
            model: "eleven_turbo_v2_5".into(),
            timeout: 10.0,
            health_check_interval: 60.0,
            inworld_base_url: "https://api.inworld.ai".into(),
            inworld_api_key: String::new(),
            inworld_voice_id: "Ashley".into(),
            inworld_model: "inworld-tts-1".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: f64,
    pub health_check_interval: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "qwen2.5:0.5b".into(),
            timeout: 5.0,
            health_check_interval: 60.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SttConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: f64,
    pub health_check_interval: f64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".into(),
            api_key: String::new(),
            model: "whisper-1".into(),
            timeout: 10.0,
            health_check_interval: 60.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Seconds to wait for speech onset before giving up.
    pub listen_timeout: f64,
    /// RMS threshold separating speech from silence (0.0-1.0).
    pub silence_threshold: f64,
    /// Seconds of trailing silence that end a recording.
    pub silence_duration: f64,
    /// Hard cap on a single recording, seconds.
    pub max_record_duration: f64,
    /// Minimum match confidence required to dispatch.
    pub confidence_threshold: f64,
    /// Force a dispatch method ("tmux", "applescript", "xdotool");
    /// empty means auto-detect.
    pub dispatch_method: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            listen_timeout: 10.0,
            silence_threshold: 0.01,
            silence_duration: 1.5,
            max_record_duration: 15.0,
            confidence_threshold: 0.6,
            dispatch_method: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Seconds between repeat alerts. 0 disables repeating.
    pub repeat_interval: f64,
    /// Maximum repeat alerts before the timer stops on its own.
    pub max_repeats: u32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            repeat_interval: 30.0,
            max_repeats: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Output and capture sample rate, Hz.
    pub sample_rate: u32,
    /// Queue depth above which LOW-priority narrations are shed.
    pub backlog_threshold: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            backlog_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoomConfig {
    /// Remote room ingest base URL. Empty disables remote publishing.
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Directory holding per-session JSONL transcripts.
    pub transcripts_dir: PathBuf,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            transcripts_dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".claude/projects"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub tts: TtsConfig,
    pub llm: LlmConfig,
    pub stt: SttConfig,
    pub voice: VoiceConfig,
    pub alert: AlertConfig,
    pub audio: AudioConfig,
    pub room: RoomConfig,
    pub watcher: WatcherConfig,
}

impl Config {
    /// Read the full configuration from the environment.
    pub fn from_env() -> Self {
        let d = Self::default();
        let health_interval = env_f64("ECHO_HEALTH_CHECK_INTERVAL", 60.0);

        Self {
            server: ServerConfig {
                port: env_u32("ECHO_PORT", d.server.port as u32) as u16,
            },
            tts: TtsConfig {
                provider: env_string("ECHO_TTS_PROVIDER", &d.tts.provider),
                base_url: env_string("ECHO_ELEVENLABS_BASE_URL", &d.tts.base_url),
                api_key: env_string("ECHO_ELEVENLABS_API_KEY", ""),
                voice_id: env_string("ECHO_TTS_VOICE_ID", &d.tts.voice_id),
                model: env_string("ECHO_TTS_MODEL", &d.tts.model),
                timeout: env_f64("ECHO_TTS_TIMEOUT", d.tts.timeout),
                health_check_interval: health_interval,
                inworld_base_url: env_string("ECHO_INWORLD_BASE_URL", &d.tts.inworld_base_url),
                inworld_api_key: env_string("ECHO_INWORLD_API_KEY", ""),
                inworld_voice_id: env_string("ECHO_INWORLD_VOICE_ID", &d.tts.inworld_voice_id),
                inworld_model: env_string("ECHO_INWORLD_MODEL", &d.tts.inworld_model),
            },
            llm: LlmConfig {
                base_url: env_string("OLLAMA_BASE_URL", &d.llm.base_url),
                model: env_string("ECHO_LLM_MODEL", &d.llm.model),
                timeout: env_f64("ECHO_LLM_TIMEOUT", d.llm.timeout),
                health_check_interval: health_interval,
            },
            stt: SttConfig {
                base_url: env_string("ECHO_STT_BASE_URL", &d.stt.base_url),
                api_key: env_string("ECHO_STT_API_KEY", ""),
                model: env_string("ECHO_STT_MODEL", &d.stt.model),
                timeout: env_f64("ECHO_STT_TIMEOUT", d.stt.timeout),
                health_check_interval: health_interval,
            },
            voice: VoiceConfig {
                listen_timeout: env_f64("ECHO_LISTEN_TIMEOUT", d.voice.listen_timeout),
                silence_threshold: env_f64("ECHO_SILENCE_THRESHOLD", d.voice.silence_threshold),
                silence_duration: env_f64("ECHO_SILENCE_DURATION", d.voice.silence_duration),
                max_record_duration: env_f64(
                    "ECHO_MAX_RECORD_DURATION",
                    d.voice.max_record_duration,
                ),
                confidence_threshold: env_f64(
                    "ECHO_CONFIDENCE_THRESHOLD",
                    d.voice.confidence_threshold,
                ),
                dispatch_method: env_string("ECHO_DISPATCH_METHOD", ""),
            },
            alert: AlertConfig {
                repeat_interval: env_f64("ECHO_ALERT_REPEAT_INTERVAL", d.alert.repeat_interval),
                max_repeats: env_u32("ECHO_ALERT_MAX_REPEATS", d.alert.max_repeats),
            },
            audio: AudioConfig {
                sample_rate: env_u32("ECHO_AUDIO_SAMPLE_RATE", d.audio.sample_rate),
                backlog_threshold: env_usize(
                    "ECHO_AUDIO_BACKLOG_THRESHOLD",
                    d.audio.backlog_threshold,
                ),
            },
            room: RoomConfig {
                url: env_string("ECHO_ROOM_URL", ""),
                api_key: env_string("ECHO_ROOM_API_KEY", ""),
                api_secret: env_string("ECHO_ROOM_API_SECRET", ""),
            },
            watcher: WatcherConfig {
                transcripts_dir: std::env::var("ECHO_TRANSCRIPTS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(d.watcher.transcripts_dir),
            },
        }
    }
}
