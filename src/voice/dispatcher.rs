//! Keystroke injection into the agent's terminal.
//!
//! Sends the chosen response text plus Enter to whatever terminal the agent
//! is running in. The mechanism is auto-selected at start, first available
//! wins: tmux send-keys, AppleScript on macOS, xdotool on X11. A method can
//! be forced via configuration.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMethod {
    Tmux,
    AppleScript,
    Xdotool,
}

impl DispatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tmux => "tmux",
            Self::AppleScript => "applescript",
            Self::Xdotool => "xdotool",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "tmux" => Some(Self::Tmux),
            "applescript" => Some(Self::AppleScript),
            "xdotool" => Some(Self::Xdotool),
            _ => None,
        }
    }
}

pub struct Dispatcher {
    method: Option<DispatchMethod>,
}

impl Dispatcher {
    /// Detect the injection method. A non-empty `forced` overrides
    /// auto-detection.
    pub fn new(forced: &str) -> Self {
        let method = if forced.is_empty() {
            detect_method()
        } else {
            match DispatchMethod::from_name(forced) {
                Some(method) => {
                    info!("Response dispatch method forced: {forced}");
                    Some(method)
                }
                None => {
                    warn!("Unknown dispatch method {forced:?} — falling back to auto-detect");
                    detect_method()
                }
            }
        };

        match method {
            Some(m) => info!("Response dispatch method: {}", m.as_str()),
            None => warn!("No response dispatch method available"),
        }

        Self { method }
    }

    pub fn is_available(&self) -> bool {
        self.method.is_some()
    }

    pub fn method(&self) -> Option<DispatchMethod> {
        self.method
    }

    /// Inject `text` followed by Enter into the agent's terminal.
    /// Returns true iff the subprocess exited successfully.
    pub async fn dispatch(&self, text: &str) -> bool {
        let Some(method) = self.method else {
            warn!("Dispatch unavailable — cannot send response");
            return false;
        };

        let result = match method {
            DispatchMethod::Tmux => dispatch_tmux(text).await,
            DispatchMethod::AppleScript => dispatch_applescript(text).await,
            DispatchMethod::Xdotool => dispatch_xdotool(text).await,
        };

        match result {
            Ok(true) => true,
            Ok(false) => {
                warn!("Dispatch subprocess exited with failure ({})", method.as_str());
                false
            }
            Err(e) => {
                warn!("Dispatch failed ({}): {e}", method.as_str());
                false
            }
        }
    }
}

async fn dispatch_tmux(text: &str) -> Result<bool, String> {
    let status = Command::new("tmux")
        .args(["send-keys", text, "Enter"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| format!("failed to spawn tmux: {e}"))?;
    Ok(status.success())
}

async fn dispatch_applescript(text: &str) -> Result<bool, String> {
    let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
    let script = format!(
        "tell application \"System Events\"\n    keystroke \"{escaped}\"\n    delay 0.1\n    keystroke return\nend tell"
    );
    let status = Command::new("osascript")
        .args(["-e", &script])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| format!("failed to spawn osascript: {e}"))?;
    Ok(status.success())
}

async fn dispatch_xdotool(text: &str) -> Result<bool, String> {
    let status = Command::new("xdotool")
        .args(["type", "--delay", "0", text])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| format!("failed to spawn xdotool: {e}"))?;
    if !status.success() {
        return Ok(false);
    }

    let status = Command::new("xdotool")
        .args(["key", "Return"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| format!("failed to spawn xdotool: {e}"))?;
    Ok(status.success())
}

/// First available wins: tmux session, then AppleScript on macOS, then
/// xdotool under X11.
fn detect_method() -> Option<DispatchMethod> {
    if std::env::var("TMUX").is_ok() && binary_on_path("tmux") {
        return Some(DispatchMethod::Tmux);
    }

    if cfg!(target_os = "macos") && binary_on_path("osascript") {
        return Some(DispatchMethod::AppleScript);
    }

    if binary_on_path("xdotool") && std::env::var("DISPLAY").is_ok() {
        return Some(DispatchMethod::Xdotool);
    }

    None
}

fn binary_on_path(name: &str) -> bool {
    let Ok(path) = std::env::var("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| dir.join(name).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_round_trip() {
        for method in [
            DispatchMethod::Tmux,
            DispatchMethod::AppleScript,
            DispatchMethod::Xdotool,
        ] {
            assert_eq!(DispatchMethod::from_name(method.as_str()), Some(method));
        }
        assert_eq!(DispatchMethod::from_name("telepathy"), None);
    }

    #[test]
    fn forced_method_overrides_detection() {
        let dispatcher = Dispatcher::new("tmux");
        assert_eq!(dispatcher.method(), Some(DispatchMethod::Tmux));
        assert!(dispatcher.is_available());
    }

    #[tokio::test]
    async fn dispatch_without_method_returns_false() {
        let dispatcher = Dispatcher { method: None };
        assert!(!dispatcher.dispatch("Allow").await);
    }
}
