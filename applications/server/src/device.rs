/// Device control - the speaker's own playback and speech surface
///
/// The speaker is commanded through shell-level calls on the device side
/// (`tts_play.sh`, `ubus`, `mphelper`). Everything behind this trait is
/// asynchronous and opaque: the orchestrator never awaits playback
/// completion, it only fires commands and tracks time itself.
use crate::config::DeviceSettings;
use crate::error::DeviceError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::process::Command;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Speak `text` through the device TTS
    async fn speak(&self, text: &str) -> Result<Value, DeviceError>;

    /// Hand `text` to the built-in assistant for understanding and reply
    async fn ask(&self, text: &str) -> Result<Value, DeviceError>;

    /// Fetch and play a URL with the device media player
    async fn play_url(&self, url: &str) -> Result<Value, DeviceError>;

    /// Pause/stop whatever the device is currently playing or saying
    async fn stop(&self) -> Result<Value, DeviceError>;
}

/// Device control that renders configured shell templates and runs them
/// through `sh -c`.
pub struct ShellDevice {
    settings: DeviceSettings,
}

impl ShellDevice {
    pub fn new(settings: DeviceSettings) -> Self {
        Self { settings }
    }

    async fn run_shell(&self, script: &str) -> Result<Value, DeviceError> {
        let output = tokio::time::timeout(
            COMMAND_TIMEOUT,
            Command::new("sh").arg("-c").arg(script).output(),
        )
        .await
        .map_err(|_| DeviceError::Timeout)??;

        if !output.status.success() {
            return Err(DeviceError::Command(format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        Ok(serde_json::from_str(stdout).unwrap_or_else(|_| json!({ "raw": stdout })))
    }
}

#[async_trait]
impl DeviceControl for ShellDevice {
    async fn speak(&self, text: &str) -> Result<Value, DeviceError> {
        let script = self
            .settings
            .speak_command
            .replace("{text}", &escape_single_quotes(text));
        self.run_shell(&script).await
    }

    async fn ask(&self, text: &str) -> Result<Value, DeviceError> {
        let script = self
            .settings
            .ask_command
            .replace("{text}", &escape_single_quotes(&escape_json_fragment(text)));
        self.run_shell(&script).await
    }

    async fn play_url(&self, url: &str) -> Result<Value, DeviceError> {
        let script = self
            .settings
            .play_command
            .replace("{url}", &escape_single_quotes(&escape_json_fragment(url)));
        self.run_shell(&script).await
    }

    async fn stop(&self) -> Result<Value, DeviceError> {
        self.run_shell(&self.settings.stop_command).await
    }
}

/// Make `text` safe inside a single-quoted shell argument.
fn escape_single_quotes(text: &str) -> String {
    text.replace('\'', "'\"'\"'")
}

/// Make `text` safe inside a double-quoted JSON string literal.
fn escape_json_fragment(text: &str) -> String {
    let quoted = serde_json::to_string(text).unwrap_or_default();
    quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or("")
        .to_string()
}
