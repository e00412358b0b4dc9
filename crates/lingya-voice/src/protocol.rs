//! Wire protocol between the client and the realtime gateway.
//!
//! Every frame is a JSON text message tagged by `type`. Field names are
//! snake_case; the camelCase spellings some older gateways emit are accepted as
//! aliases on inbound messages and never produced.

use crate::error::{VoiceError, VoiceResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Milliseconds since the Unix epoch, as the gateway expects in `timestamp`.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Encode an audio fragment for a `chunk` field.
pub fn encode_chunk(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a `chunk` field back into raw audio bytes.
pub fn decode_chunk(chunk: &str) -> VoiceResult<Vec<u8>> {
    Ok(BASE64.decode(chunk.trim())?)
}

/// Messages sent from the client to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Begin a session and request a persona.
    #[serde(rename = "voice.start")]
    Start {
        role_id: String,
        mime_type: String,
        timestamp: i64,
    },
    /// One captured audio fragment.
    #[serde(rename = "voice.data")]
    Data {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        chunk: String,
        timestamp: i64,
        sequence: u64,
    },
    /// Request a persona change mid-session.
    #[serde(rename = "voice.switch")]
    Switch { role_id: String },
    /// Graceful stop.
    #[serde(rename = "voice.end")]
    End {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Keepalive; answered with `gateway.pong`.
    #[serde(rename = "voice.ping")]
    Ping { timestamp: i64 },
    /// Ask for the role catalog.
    #[serde(rename = "voice.roles")]
    Roles,
    /// Change the encoding the gateway should expect.
    #[serde(rename = "config")]
    Config { mime_type: String },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Start { .. } => "voice.start",
            ClientMessage::Data { .. } => "voice.data",
            ClientMessage::Switch { .. } => "voice.switch",
            ClientMessage::End { .. } => "voice.end",
            ClientMessage::Ping { .. } => "voice.ping",
            ClientMessage::Roles => "voice.roles",
            ClientMessage::Config { .. } => "config",
        }
    }

    pub fn to_json(&self) -> VoiceResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Outcome reported by the gateway for a role request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleStatusKind {
    Active,
    Switching,
    Error,
    #[serde(other)]
    Other,
}

impl RoleStatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleStatusKind::Active => "active",
            RoleStatusKind::Switching => "switching",
            RoleStatusKind::Error => "error",
            RoleStatusKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckPayload {
    #[serde(alias = "sessionId")]
    pub session_id: String,
    #[serde(default, alias = "roleId")]
    pub role_id: Option<String>,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default, alias = "voiceId")]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleStatusPayload {
    #[serde(default, alias = "roleId")]
    pub role_id: Option<String>,
    pub status: RoleStatusKind,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "latencyMs")]
    pub latency_ms: Option<u64>,
    #[serde(default, alias = "previousRole")]
    pub previous_role: Option<String>,
    #[serde(default)]
    pub phase: Option<String>,
}

/// Streaming signal sample. Any field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsPayload {
    #[serde(default, alias = "avgEnergy", skip_serializing_if = "Option::is_none")]
    pub avg_energy: Option<f64>,
    #[serde(default, alias = "peakEnergy", skip_serializing_if = "Option::is_none")]
    pub peak_energy: Option<f64>,
    #[serde(default, alias = "emotionEstimate", skip_serializing_if = "Option::is_none")]
    pub emotion_estimate: Option<String>,
    #[serde(default, alias = "pitchHz", skip_serializing_if = "Option::is_none")]
    pub pitch_hz: Option<f64>,
    #[serde(default, alias = "emotionConfidence", skip_serializing_if = "Option::is_none")]
    pub emotion_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, alias = "isFinal", skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,
    #[serde(default, alias = "latencyMs", skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, alias = "roleId", skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,
}

/// Per-session summary the gateway attaches to `session.closed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummaryMetrics {
    /// Reduced STT latency samples; shape is gateway-defined.
    #[serde(default)]
    pub stt_latency_ms: Option<serde_json::Value>,
    #[serde(default)]
    pub tts_first_chunk_ms: Option<u64>,
    #[serde(default)]
    pub avg_energy: Option<f64>,
    #[serde(default)]
    pub peak_energy: Option<f64>,
    #[serde(default)]
    pub emotion_estimate: Option<String>,
    #[serde(default)]
    pub pitch_hz: Option<f64>,
    #[serde(default)]
    pub emotion_confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionClosedPayload {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub errors: Option<u32>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metrics: Option<SessionSummaryMetrics>,
}

/// One entry of the gateway's role catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleDescriptor {
    #[serde(default)]
    pub role_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub max_sessions: Option<u32>,
    #[serde(default)]
    pub active_sessions: Option<u32>,
    #[serde(default)]
    pub emotion_state: Option<String>,
}

/// Messages sent from the gateway to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "gateway.ready")]
    Ready {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    #[serde(rename = "gateway.pong")]
    Pong {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    #[serde(rename = "voice.ack")]
    Ack(AckPayload),
    #[serde(rename = "voice.role_status")]
    RoleStatus(RoleStatusPayload),
    #[serde(rename = "voice.roles")]
    Roles {
        #[serde(default)]
        roles: BTreeMap<String, RoleDescriptor>,
    },
    #[serde(rename = "metrics")]
    Metrics(MetricsPayload),
    #[serde(rename = "assistant.reply")]
    AssistantReply {
        text: String,
        #[serde(default)]
        tags: Vec<String>,
    },
    #[serde(rename = "tts.stream")]
    TtsStream {
        chunk: String,
        #[serde(default)]
        mime: Option<String>,
        #[serde(default)]
        sequence: Option<u64>,
    },
    #[serde(rename = "tts.stream.completed")]
    TtsCompleted {
        #[serde(default)]
        role_id: Option<String>,
    },
    #[serde(rename = "session.closed")]
    SessionClosed(SessionClosedPayload),
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: String,
    },
    /// Any tag this client doesn't know. Ignored by the dispatcher.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Ready { .. } => "gateway.ready",
            ServerMessage::Pong { .. } => "gateway.pong",
            ServerMessage::Ack(_) => "voice.ack",
            ServerMessage::RoleStatus(_) => "voice.role_status",
            ServerMessage::Roles { .. } => "voice.roles",
            ServerMessage::Metrics(_) => "metrics",
            ServerMessage::AssistantReply { .. } => "assistant.reply",
            ServerMessage::TtsStream { .. } => "tts.stream",
            ServerMessage::TtsCompleted { .. } => "tts.stream.completed",
            ServerMessage::SessionClosed(_) => "session.closed",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Unknown => "unknown",
        }
    }

    /// Parse one inbound text frame.
    pub fn decode(raw: &str) -> VoiceResult<Self> {
        serde_json::from_str(raw).map_err(|e| VoiceError::MalformedMessage(e.to_string()))
    }

    pub fn to_json(&self) -> VoiceResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_serializes_with_dotted_tag() {
        let msg = ClientMessage::Start {
            role_id: "huangrong".into(),
            mime_type: "audio/webm".into(),
            timestamp: 42,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "voice.start", "role_id": "huangrong", "mime_type": "audio/webm", "timestamp": 42})
        );
    }

    #[test]
    fn data_without_session_omits_field() {
        let msg = ClientMessage::Data {
            session_id: None,
            chunk: encode_chunk(b"abc"),
            timestamp: 1,
            sequence: 0,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert!(value.get("session_id").is_none());
        assert_eq!(value["chunk"], "YWJj");
    }

    #[test]
    fn roles_request_is_bare_tag() {
        assert_eq!(ClientMessage::Roles.to_json().unwrap(), r#"{"type":"voice.roles"}"#);
    }

    #[test]
    fn unknown_tag_decodes_to_unknown() {
        let msg = ServerMessage::decode(r#"{"type":"voice.telepathy","x":1}"#).unwrap();
        assert_eq!(msg, ServerMessage::Unknown);
    }

    #[test]
    fn malformed_json_is_malformed_message() {
        let err = ServerMessage::decode("{not json").unwrap_err();
        assert!(matches!(err, VoiceError::MalformedMessage(_)));
    }

    #[test]
    fn ack_decodes_gateway_shape() {
        let raw = json!({
            "type": "voice.ack",
            "session_id": "s-1",
            "voice_id": "v",
            "role_id": "huangrong",
            "phase": "listen",
            "timestamp": 10
        })
        .to_string();
        match ServerMessage::decode(&raw).unwrap() {
            ServerMessage::Ack(ack) => {
                assert_eq!(ack.session_id, "s-1");
                assert_eq!(ack.role_id.as_deref(), Some("huangrong"));
                assert_eq!(ack.phase.as_deref(), Some("listen"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn metrics_accepts_camel_case_shim() {
        let raw = r#"{"type":"metrics","avgEnergy":12.5,"pitchHz":220.0}"#;
        match ServerMessage::decode(raw).unwrap() {
            ServerMessage::Metrics(m) => {
                assert_eq!(m.avg_energy, Some(12.5));
                assert_eq!(m.pitch_hz, Some(220.0));
                assert_eq!(m.peak_energy, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn role_status_unknown_kind_is_other() {
        let raw = r#"{"type":"voice.role_status","role_id":"b","status":"draining"}"#;
        match ServerMessage::decode(raw).unwrap() {
            ServerMessage::RoleStatus(s) => assert_eq!(s.status, RoleStatusKind::Other),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn completed_and_closed_tolerate_extra_fields() {
        let done = ServerMessage::decode(
            r#"{"type":"tts.stream.completed","session_id":"s","role_id":"pipi"}"#,
        )
        .unwrap();
        assert_eq!(
            done,
            ServerMessage::TtsCompleted {
                role_id: Some("pipi".into())
            }
        );

        let closed = ServerMessage::decode(
            r#"{"type":"session.closed","reason":"client_end","duration_ms":1200,"errors":0,
                "metrics":{"tts_first_chunk_ms":300,"stt_latency_ms":{"p50":120}}}"#,
        )
        .unwrap();
        match closed {
            ServerMessage::SessionClosed(p) => {
                assert_eq!(p.reason.as_deref(), Some("client_end"));
                let m = p.metrics.unwrap();
                assert_eq!(m.tts_first_chunk_ms, Some(300));
                assert!(m.stt_latency_ms.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn chunk_codec_rejects_garbage() {
        assert_eq!(decode_chunk(&encode_chunk(&[1, 2, 3])).unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            decode_chunk("***"),
            Err(VoiceError::MalformedMessage(_))
        ));
    }
}
