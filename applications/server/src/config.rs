/// Daemon configuration
use crate::error::{Result, ServerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Directories scanned recursively into the index
    #[serde(default)]
    pub music_dirs: Vec<PathBuf>,

    /// Indexable extensions (lowercase, leading dot)
    #[serde(default = "default_extensions")]
    pub supported_audio_extensions: Vec<String>,

    /// Slack added on top of a song's duration before auto-advancing
    #[serde(default = "default_timer_buffer_sec")]
    pub timer_buffer_sec: f64,

    #[serde(default = "default_search")]
    pub search: SearchSettings,

    #[serde(default = "default_commands")]
    pub commands: CommandSettings,

    #[serde(default = "default_http")]
    pub http: HttpSettings,

    #[serde(default = "default_speaker")]
    pub speaker: SpeakerSettings,

    #[serde(default = "default_device")]
    pub device: DeviceSettings,

    #[serde(default = "default_logging")]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchSettings {
    /// Cap on search / random-pick results
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Periodic index refresh interval; 0 disables the loop
    #[serde(default = "default_refresh_interval_sec")]
    pub refresh_interval_sec: f64,

    /// Index cache path; empty disables persistence
    #[serde(default = "default_index_file")]
    pub index_file: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandSettings {
    /// Prefixes that start a play-by-keyword command
    #[serde(default = "default_play_keywords")]
    pub play_keywords: Vec<String>,

    /// Exact (space-insensitive) stop commands
    #[serde(default = "default_stop_keywords")]
    pub stop_keywords: Vec<String>,

    /// Exact commands triggering an index refresh
    #[serde(default = "default_refresh_keywords")]
    pub refresh_keywords: Vec<String>,

    /// Exact commands triggering random playback
    #[serde(default = "default_random_play_keywords")]
    pub random_play_keywords: Vec<String>,

    /// Utterances allowed to reach the assistant without stopping playback
    #[serde(default)]
    pub interrupt_whitelist_keywords: Vec<String>,

    /// Reply-interrupt window lifetime
    #[serde(default = "default_reply_interrupt_timeout_sec")]
    pub reply_interrupt_timeout_sec: f64,

    /// Minimum gap between two reply interruptions
    #[serde(default = "default_reply_interrupt_cooldown_sec")]
    pub reply_interrupt_cooldown_sec: f64,

    /// Delay before playback resumes after a whitelisted utterance
    #[serde(default = "default_auto_resume_delay_sec")]
    pub auto_resume_delay_sec: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL the speaker uses to reach the gateway; preferred when set
    #[serde(default)]
    pub base_url: String,

    /// Convenience alternative to `base_url`: builds `http://{device_ip}:{port}`
    #[serde(default)]
    pub device_ip: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpeakerSettings {
    /// TCP address where the speaker bridge delivers event envelopes
    #[serde(default = "default_event_listen")]
    pub event_listen: String,
}

/// Shell templates for the four device operations. `{text}` / `{url}` are
/// substituted with escaped values before the template runs via `sh -c`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceSettings {
    #[serde(default = "default_speak_command")]
    pub speak_command: String,

    #[serde(default = "default_ask_command")]
    pub ask_command: String,

    #[serde(default = "default_play_command")]
    pub play_command: String,

    #[serde(default = "default_stop_command")]
    pub stop_command: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl AppConfig {
    /// Load configuration from an optional TOML file and `ARIA_`-prefixed
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("config.toml"));
        if config_path.exists() {
            settings = settings.add_source(config::File::from(config_path));
        } else if path.is_some() {
            return Err(ServerError::Config(format!(
                "config file not found: {}",
                config_path.display()
            )));
        }

        settings = settings.add_source(
            config::Environment::with_prefix("ARIA")
                .separator("__")
                .try_parsing(true),
        );

        let config = settings
            .build()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.timer_buffer_sec < 0.0 {
            return Err(ServerError::Config(
                "timer_buffer_sec must not be negative".to_string(),
            ));
        }
        if self.search.max_results == 0 {
            return Err(ServerError::Config(
                "search.max_results must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// Default values
fn default_extensions() -> Vec<String> {
    [".mp3", ".flac", ".wav", ".m4a", ".aac", ".ogg"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_timer_buffer_sec() -> f64 {
    1.5
}

fn default_search() -> SearchSettings {
    SearchSettings {
        max_results: default_max_results(),
        refresh_interval_sec: default_refresh_interval_sec(),
        index_file: default_index_file(),
    }
}

fn default_max_results() -> usize {
    20
}

fn default_refresh_interval_sec() -> f64 {
    0.0
}

fn default_index_file() -> String {
    ".cache/music_index.json".to_string()
}

fn default_commands() -> CommandSettings {
    CommandSettings {
        play_keywords: default_play_keywords(),
        stop_keywords: default_stop_keywords(),
        refresh_keywords: default_refresh_keywords(),
        random_play_keywords: default_random_play_keywords(),
        interrupt_whitelist_keywords: Vec::new(),
        reply_interrupt_timeout_sec: default_reply_interrupt_timeout_sec(),
        reply_interrupt_cooldown_sec: default_reply_interrupt_cooldown_sec(),
        auto_resume_delay_sec: default_auto_resume_delay_sec(),
    }
}

fn default_play_keywords() -> Vec<String> {
    vec!["播放".to_string()]
}

fn default_stop_keywords() -> Vec<String> {
    [
        "停止播放",
        "暂停播放",
        "停止",
        "暂停",
        "闭嘴",
        "别放了",
        "不要放了",
        "关机",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

fn default_refresh_keywords() -> Vec<String> {
    vec!["刷新曲库".to_string()]
}

fn default_random_play_keywords() -> Vec<String> {
    vec!["随便听听".to_string()]
}

fn default_reply_interrupt_timeout_sec() -> f64 {
    20.0
}

fn default_reply_interrupt_cooldown_sec() -> f64 {
    1.2
}

fn default_auto_resume_delay_sec() -> f64 {
    1.8
}

fn default_http() -> HttpSettings {
    HttpSettings {
        host: default_host(),
        port: default_port(),
        base_url: String::new(),
        device_ip: String::new(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    18080
}

fn default_speaker() -> SpeakerSettings {
    SpeakerSettings {
        event_listen: default_event_listen(),
    }
}

fn default_event_listen() -> String {
    "0.0.0.0:4399".to_string()
}

fn default_device() -> DeviceSettings {
    DeviceSettings {
        speak_command: default_speak_command(),
        ask_command: default_ask_command(),
        play_command: default_play_command(),
        stop_command: default_stop_command(),
    }
}

fn default_speak_command() -> String {
    "/usr/sbin/tts_play.sh '{text}'".to_string()
}

fn default_ask_command() -> String {
    r#"ubus call mibrain ai_service '{"tts": 1, "nlp": 1, "nlp_text": "{text}"}'"#.to_string()
}

fn default_play_command() -> String {
    r#"ubus call mediaplayer player_play_url '{"url": "{url}", "type": 1}'"#.to_string()
}

fn default_stop_command() -> String {
    "mphelper pause".to_string()
}

fn default_logging() -> LoggingSettings {
    LoggingSettings {
        level: default_log_level(),
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            music_dirs: Vec::new(),
            supported_audio_extensions: default_extensions(),
            timer_buffer_sec: default_timer_buffer_sec(),
            search: default_search(),
            commands: default_commands(),
            http: default_http(),
            speaker: default_speaker(),
            device: default_device(),
            logging: default_logging(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.search.max_results, 20);
        assert_eq!(config.search.refresh_interval_sec, 0.0);
        assert_eq!(config.timer_buffer_sec, 1.5);
        assert_eq!(config.commands.reply_interrupt_timeout_sec, 20.0);
        assert_eq!(config.commands.reply_interrupt_cooldown_sec, 1.2);
        assert_eq!(config.commands.auto_resume_delay_sec, 1.8);
        assert_eq!(config.http.port, 18080);
        assert!(config.commands.interrupt_whitelist_keywords.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_explicit_config_file_is_an_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/aria.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_zero_max_results() {
        let mut config = AppConfig::default();
        config.search.max_results = 0;
        assert!(config.validate().is_err());
    }
}
