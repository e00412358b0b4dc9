//! # Lingya Voice - Realtime Voice Session Client
//!
//! Client side of the Lingya realtime voice protocol: streams encoded
//! microphone fragments to the gateway over a websocket, follows the session
//! lifecycle, reconciles streaming transcripts, reassembles synthesized reply
//! audio, and coordinates persona (role) switches mid-session.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         VoiceClient                            │
//! │   ws frames ─┐     fragments ─┐      commands ─┐   keepalive   │
//! │              ↓                ↓                ↓       ↓       │
//! │  ┌──────────────────────────────────────────────────────────┐  │
//! │  │                      VoiceSession                        │  │
//! │  │   dispatch ─→ RoleSwitchCoordinator   ChunkUplink ──→ ws │  │
//! │  │            ─→ TranscriptReconciler                       │  │
//! │  │            ─→ MetricsAggregator                          │  │
//! │  │            ─→ TtsReassembly ──→ ReplyAudio ──→ AudioSink │  │
//! │  └──────────────────────────────────────────────────────────┘  │
//! │                         ↓ SessionEvent                         │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`VoiceSession`] is transport-agnostic and fully synchronous; [`VoiceClient`]
//! drives it from a tokio websocket. [`SpeechClient`] is the one-shot HTTP TTS
//! path and needs no session.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod metrics;
pub mod playback;
pub mod protocol;
pub mod role;
pub mod session;
pub mod speech;
pub mod transcript;
pub mod transport;
pub mod tts;
pub mod uplink;

pub use client::{CaptureStream, Command, GatewayTransport, VoiceClient};
pub use codec::{
    file_suffix, negotiate_mime_type, select_mime_type, RecorderCapability, StaticCapability,
    DEFAULT_MIME_PREFERENCES, DEFAULT_MIME_TYPE,
};
pub use config::VoiceClientConfig;
pub use error::{VoiceError, VoiceResult};
pub use metrics::{emotion_from_tags, Emotion, EnergyMetrics, MetricsAggregator};
#[cfg(feature = "playback")]
pub use playback::SpeakerSink;
pub use playback::{AudioSink, FileSink};
pub use protocol::{ClientMessage, RoleStatusKind, ServerMessage};
pub use role::{RoleOutcome, RoleStatus, RoleSwitchCoordinator, SwitchDecision};
pub use session::{Phase, Session, SessionEvent, SessionOptions, VoiceSession};
pub use speech::SpeechClient;
pub use transcript::{EntryRole, TranscriptEntry, TranscriptReconciler};
pub use transport::{CaptureControl, NoopCapture, Transport};
pub use tts::{ReplyAudio, TtsReassembly};
pub use uplink::{ChunkUplink, UplinkOutcome, UplinkStats};
