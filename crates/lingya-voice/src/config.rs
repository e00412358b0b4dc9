//! Client configuration loaded from `.env` / environment, or a TOML file.

use crate::codec::DEFAULT_MIME_PREFERENCES;
use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_gateway_url() -> String {
    "ws://127.0.0.1:8000/api/realtime/ws".to_string()
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_role() -> String {
    "huangrong".to_string()
}

fn default_mime_preferences() -> Vec<String> {
    DEFAULT_MIME_PREFERENCES.iter().map(|s| s.to_string()).collect()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_keepalive_secs() -> u64 {
    20
}

fn default_pre_ack_buffer() -> usize {
    32
}

fn default_tts_timeout_secs() -> u64 {
    60
}

/// Voice client configuration.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | LINGYA_GATEWAY_URL | ws://127.0.0.1:8000/api/realtime/ws | Realtime gateway websocket. |
/// | LINGYA_API_BASE_URL | http://127.0.0.1:8000 | Base for one-shot TTS requests. |
/// | LINGYA_SERVICE_API_KEY / VITE_SERVICE_API_KEY | unset | Sent as `Service-Api-Key`. |
/// | LINGYA_GATEWAY_TOKEN | unset | Sent as `Authorization: Bearer`. |
/// | LINGYA_DEFAULT_ROLE | huangrong | Persona requested by `voice.start`. |
/// | LINGYA_MIME_PREFERENCES | opus webm, webm, ogg opus, mp4 | Comma list, most preferred first. |
/// | LINGYA_CONNECT_TIMEOUT_MS | 10000 | Websocket connect timeout. |
/// | LINGYA_KEEPALIVE_SECS | 20 | `voice.ping` interval; 0 disables. |
/// | LINGYA_PRE_ACK_BUFFER | 32 | Fragments held before `voice.ack`. |
/// | LINGYA_TTS_ROLE | huangrong | Voice used by one-shot TTS. |
/// | LINGYA_TTS_TIMEOUT_SECS | 60 | One-shot TTS request timeout. |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceClientConfig {
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub service_api_key: Option<String>,
    #[serde(default)]
    pub gateway_token: Option<String>,
    #[serde(default = "default_role")]
    pub default_role: String,
    #[serde(default = "default_mime_preferences")]
    pub mime_preferences: Vec<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    #[serde(default = "default_pre_ack_buffer")]
    pub pre_ack_buffer: usize,
    #[serde(default = "default_role")]
    pub tts_role: String,
    #[serde(default = "default_tts_timeout_secs")]
    pub tts_timeout_secs: u64,
}

impl Default for VoiceClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            api_base_url: default_api_base_url(),
            service_api_key: None,
            gateway_token: None,
            default_role: default_role(),
            mime_preferences: default_mime_preferences(),
            connect_timeout_ms: default_connect_timeout_ms(),
            keepalive_secs: default_keepalive_secs(),
            pre_ack_buffer: default_pre_ack_buffer(),
            tts_role: default_role(),
            tts_timeout_secs: default_tts_timeout_secs(),
        }
    }
}

impl VoiceClientConfig {
    /// Load from environment. Unset or unparsable values fall back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            gateway_url: env_opt_string("LINGYA_GATEWAY_URL").unwrap_or(defaults.gateway_url),
            api_base_url: env_opt_string("LINGYA_API_BASE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base_url),
            service_api_key: env_opt_string("LINGYA_SERVICE_API_KEY")
                .or_else(|| env_opt_string("VITE_SERVICE_API_KEY")),
            gateway_token: env_opt_string("LINGYA_GATEWAY_TOKEN"),
            default_role: env_opt_string("LINGYA_DEFAULT_ROLE").unwrap_or(defaults.default_role),
            mime_preferences: env_opt_string("LINGYA_MIME_PREFERENCES")
                .map(|s| parse_list(&s))
                .unwrap_or(defaults.mime_preferences),
            connect_timeout_ms: env_parse("LINGYA_CONNECT_TIMEOUT_MS", defaults.connect_timeout_ms),
            keepalive_secs: env_parse("LINGYA_KEEPALIVE_SECS", defaults.keepalive_secs),
            pre_ack_buffer: env_parse("LINGYA_PRE_ACK_BUFFER", defaults.pre_ack_buffer),
            tts_role: env_opt_string("LINGYA_TTS_ROLE").unwrap_or(defaults.tts_role),
            tts_timeout_secs: env_parse("LINGYA_TTS_TIMEOUT_SECS", defaults.tts_timeout_secs),
        }
    }

    /// Load from a TOML file; missing keys take defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> VoiceResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> VoiceResult<Self> {
        toml::from_str(raw).map_err(|e| VoiceError::Config(e.to_string()))
    }

    pub fn validate(&self) -> VoiceResult<()> {
        let url = self.gateway_url.trim();
        if url.is_empty() {
            return Err(VoiceError::Config("gateway_url is empty".to_string()));
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(VoiceError::Config(format!(
                "gateway_url must be ws:// or wss://, got {}",
                url
            )));
        }
        if self.mime_preferences.is_empty() {
            return Err(VoiceError::Config("mime_preferences is empty".to_string()));
        }
        if self.default_role.trim().is_empty() {
            return Err(VoiceError::Config("default_role is empty".to_string()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` when keepalive is disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }

    pub fn tts_timeout(&self) -> Duration {
        Duration::from_secs(self.tts_timeout_secs)
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
