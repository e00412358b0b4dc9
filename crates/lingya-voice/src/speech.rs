//! One-shot text-to-speech over the gateway's HTTP API.
//!
//! Independent of any realtime session: `POST {api_base}/api/voice/{role}/stream`
//! with `{text, emotion_auto}` returns the whole reply as `audio/mpeg`.

use crate::config::VoiceClientConfig;
use crate::error::{VoiceError, VoiceResult};
use std::time::Duration;
use tracing::{debug, info};

/// Header carrying the service key on every gateway request.
pub const SERVICE_KEY_HEADER: &str = "Service-Api-Key";

#[derive(Debug, Clone)]
pub struct SpeechClient {
    /// Base URL without trailing slash (e.g. http://127.0.0.1:8000).
    pub base_url: String,
    /// Voice used for synthesis (huangrong, xiaoruan, pipi...).
    pub role_id: String,
    pub service_api_key: Option<String>,
    /// Let the gateway pick the delivery emotion from the text.
    pub emotion_auto: bool,
    client: reqwest::Client,
}

impl SpeechClient {
    pub fn new(
        base_url: impl Into<String>,
        role_id: impl Into<String>,
        service_api_key: Option<String>,
        timeout: Duration,
    ) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            role_id: role_id.into(),
            service_api_key,
            emotion_auto: true,
            client,
        })
    }

    pub fn from_config(config: &VoiceClientConfig) -> VoiceResult<Self> {
        Self::new(
            config.api_base_url.clone(),
            config.tts_role.clone(),
            config.service_api_key.clone(),
            config.tts_timeout(),
        )
    }

    /// Use a different voice for subsequent requests.
    pub fn with_role(mut self, role_id: impl Into<String>) -> Self {
        self.role_id = role_id.into();
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/voice/{}/stream", self.base_url, self.role_id)
    }

    /// Synthesize `text`. Blank text returns empty audio without a request.
    pub async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            debug!(target: "lingya::voice", "speech: blank text, nothing to synthesize");
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "text": text,
            "emotion_auto": self.emotion_auto,
        });
        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = self.service_api_key.as_deref() {
            request = request.header(SERVICE_KEY_HEADER, key);
        }
        let res = request.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {}: {}", status, body)));
        }
        let bytes = res.bytes().await?;
        info!(
            target: "lingya::voice",
            role_id = %self.role_id,
            bytes = bytes.len(),
            "speech: one-shot synthesis complete"
        );
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_uses_role_and_trims_base() {
        let client =
            SpeechClient::new("http://gw:8000/", "pipi", None, Duration::from_secs(5)).unwrap();
        assert_eq!(client.endpoint(), "http://gw:8000/api/voice/pipi/stream");
        let client = client.with_role("xiaoruan");
        assert_eq!(client.endpoint(), "http://gw:8000/api/voice/xiaoruan/stream");
    }

    #[tokio::test]
    async fn blank_text_skips_request() {
        // Port 9 (discard) is never contacted for blank input.
        let client =
            SpeechClient::new("http://127.0.0.1:9", "huangrong", None, Duration::from_secs(1))
                .unwrap();
        let audio = client.synthesize("   \n").await.unwrap();
        assert!(audio.is_empty());
    }
}
