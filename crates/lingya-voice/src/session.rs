//! Session state machine.
//!
//! Owns the session identity, phase, transport and capture handles, and every
//! per-session component. All three event sources (captured fragments,
//! inbound frames, caller actions) enter through `&mut self` methods, one at a
//! time, so the components need no locking.
//!
//! ```text
//! idle → connecting → awaiting_ack → active ⇄ switching
//!                                        │
//!            (stop / close / session.closed) → closed
//!            (error frame / transport error)  → errored
//! ```

use crate::error::{VoiceError, VoiceResult};
use crate::metrics::{Emotion, EnergyMetrics, MetricsAggregator};
use crate::protocol::{
    now_ms, AckPayload, ClientMessage, MetricsPayload, RoleDescriptor, RoleStatusPayload,
    ServerMessage, SessionClosedPayload,
};
use crate::role::{RoleOutcome, RoleStatus, RoleSwitchCoordinator, SwitchDecision};
use crate::transcript::{TranscriptEntry, TranscriptReconciler};
use crate::transport::{CaptureControl, Transport};
use crate::tts::{ReplyAudio, TtsReassembly};
use crate::uplink::{ChunkUplink, UplinkOutcome, UplinkStats};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "lingya::voice";

/// Lifecycle phase of the voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Connecting,
    AwaitingAck,
    Active,
    Switching,
    Closed,
    Errored,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::AwaitingAck => "awaiting_ack",
            Phase::Active => "active",
            Phase::Switching => "switching",
            Phase::Closed => "closed",
            Phase::Errored => "errored",
        }
    }

    /// Audio upload and TTS playback are only allowed here.
    pub fn allows_audio(&self) -> bool {
        matches!(self, Phase::Active | Phase::Switching)
    }

    /// A session exists and owns a transport.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Phase::Connecting | Phase::AwaitingAck | Phase::Active | Phase::Switching
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the current session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Local connection counter; a new connection always gets a new one.
    pub generation: u64,
    pub id: Option<String>,
    pub phase: Phase,
    pub active_role: Option<String>,
    pub pending_role: Option<String>,
    pub mime_type: Option<String>,
    pub voice_id: Option<String>,
}

/// Events surfaced to the caller (UI, console, visualizer).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged {
        from: Phase,
        to: Phase,
    },
    GatewayReady,
    Acknowledged {
        session_id: String,
        role_id: String,
    },
    Transcript(TranscriptEntry),
    AssistantReply {
        text: String,
        tags: Vec<String>,
        emotion: Option<Emotion>,
    },
    Metrics(EnergyMetrics),
    RoleStatus(RoleStatus),
    RoleSwitchFailed {
        role_id: String,
        message: String,
    },
    RoleCatalog(BTreeMap<String, RoleDescriptor>),
    ReplyAudio(ReplyAudio),
    PlaybackReleased {
        id: u64,
    },
    Closed {
        phase: Phase,
        reason: String,
        duration_ms: Option<u64>,
        summary: Option<SessionClosedPayload>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Persona requested by `voice.start` when nothing else is pending.
    pub default_role: String,
    /// Fragments held while waiting for `voice.ack`.
    pub pre_ack_buffer: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            default_role: "huangrong".to_string(),
            pre_ack_buffer: 32,
        }
    }
}

pub struct VoiceSession {
    options: SessionOptions,
    generation: u64,
    phase: Phase,
    session_id: Option<String>,
    voice_id: Option<String>,
    mime_type: Option<String>,
    started_at: Option<Instant>,
    retired_ids: HashSet<String>,

    transport: Option<Box<dyn Transport>>,
    capture: Option<Box<dyn CaptureControl>>,

    uplink: ChunkUplink,
    transcript: TranscriptReconciler,
    tts: TtsReassembly,
    roles: RoleSwitchCoordinator,
    metrics: MetricsAggregator,

    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl VoiceSession {
    pub fn new(options: SessionOptions) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let session = Self {
            uplink: ChunkUplink::new(options.pre_ack_buffer),
            options,
            generation: 0,
            phase: Phase::Idle,
            session_id: None,
            voice_id: None,
            mime_type: None,
            started_at: None,
            retired_ids: HashSet::new(),
            transport: None,
            capture: None,
            transcript: TranscriptReconciler::new(),
            tts: TtsReassembly::new(),
            roles: RoleSwitchCoordinator::new(),
            metrics: MetricsAggregator::new(),
            event_tx,
        };
        (session, event_rx)
    }

    // ── accessors ────────────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn active_role(&self) -> Option<&str> {
        self.roles.active_role()
    }

    pub fn pending_role(&self) -> Option<&str> {
        self.roles.pending_role()
    }

    pub fn snapshot(&self) -> Session {
        Session {
            generation: self.generation,
            id: self.session_id.clone(),
            phase: self.phase,
            active_role: self.roles.active_role().map(str::to_string),
            pending_role: self.roles.pending_role().map(str::to_string),
            mime_type: self.mime_type.clone(),
            voice_id: self.voice_id.clone(),
        }
    }

    pub fn transcript(&self) -> &TranscriptReconciler {
        &self.transcript
    }

    pub fn metrics(&self) -> &MetricsAggregator {
        &self.metrics
    }

    pub fn roles(&self) -> &RoleSwitchCoordinator {
        &self.roles
    }

    pub fn live_reply(&self) -> Option<&ReplyAudio> {
        self.tts.live()
    }

    pub fn buffered_reply_fragments(&self) -> usize {
        self.tts.buffered_fragments()
    }

    pub fn uplink_stats(&self) -> UplinkStats {
        self.uplink.stats()
    }

    // ── caller actions ───────────────────────────────────────────────────

    /// Begin a new session over `transport`. The persona requested is the
    /// pending one if the caller picked a role beforehand, else the default.
    pub fn start(
        &mut self,
        transport: Box<dyn Transport>,
        mut capture: Box<dyn CaptureControl>,
        mime_type: &str,
    ) -> VoiceResult<()> {
        if self.phase.is_live() {
            return Err(VoiceError::InvalidPhase(self.phase.to_string()));
        }
        if !capture.is_permitted() {
            let mut transport = transport;
            if let Err(e) = transport.close() {
                debug!(target: LOG_TARGET, "close after permission failure: {}", e);
            }
            if let Err(e) = capture.stop() {
                debug!(target: LOG_TARGET, "capture stop after permission failure: {}", e);
            }
            let message = "microphone permission not granted".to_string();
            self.emit(SessionEvent::Error {
                message: message.clone(),
            });
            return Err(VoiceError::CapturePermission(message));
        }

        self.generation += 1;
        self.session_id = None;
        self.voice_id = None;
        self.mime_type = Some(mime_type.to_string());
        self.started_at = Some(Instant::now());
        self.uplink.reset();
        self.transcript.resume();
        let open = transport.is_open();
        self.transport = Some(transport);
        self.capture = Some(capture);
        info!(target: LOG_TARGET, generation = self.generation, mime_type, "session: starting");
        self.set_phase(Phase::Connecting);

        if open {
            self.on_transport_open()?;
        }
        Ok(())
    }

    /// Transport became usable: send `voice.start`.
    pub fn on_transport_open(&mut self) -> VoiceResult<()> {
        if self.phase != Phase::Connecting {
            return Err(VoiceError::InvalidPhase(self.phase.to_string()));
        }
        let role_id = self
            .roles
            .pending_role()
            .unwrap_or(self.options.default_role.as_str())
            .to_string();
        let start = ClientMessage::Start {
            role_id: role_id.clone(),
            mime_type: self
                .mime_type
                .clone()
                .unwrap_or_else(|| crate::codec::DEFAULT_MIME_TYPE.to_string()),
            timestamp: now_ms(),
        };
        self.set_phase(Phase::AwaitingAck);
        match self.send(&start) {
            Ok(()) => {
                info!(target: LOG_TARGET, role_id = %role_id, "session: voice.start sent");
                Ok(())
            }
            Err(e) => {
                self.fail(&VoiceError::Transport(format!("voice.start failed: {}", e)));
                Err(e)
            }
        }
    }

    /// Graceful stop: halt capture, tell the peer, close the transport, reset.
    pub fn stop(&mut self) {
        self.teardown(Phase::Closed, "client_stop", None, true);
    }

    /// Hand one captured fragment to the uplink.
    pub fn on_capture_fragment(&mut self, bytes: Vec<u8>) -> UplinkOutcome {
        let phase = self.phase;
        let session_id = self.session_id.clone();
        self.uplink
            .push(phase, session_id.as_deref(), bytes, self.transport.as_deref_mut())
    }

    /// Ask for a persona change. Outside a live session the choice is kept
    /// for the next `voice.start`.
    pub fn request_switch(&mut self, role_id: &str) -> SwitchDecision {
        let can_send = self.phase.allows_audio() && self.transport_open();
        let decision = self.roles.request_switch(role_id, can_send);
        if decision == SwitchDecision::Send {
            let message = ClientMessage::Switch {
                role_id: role_id.trim().to_string(),
            };
            match self.send(&message) {
                Ok(()) => self.set_phase(Phase::Switching),
                Err(e) => {
                    self.roles.abandon_pending();
                    self.absorb(VoiceError::RoleSwitch {
                        role_id: role_id.trim().to_string(),
                        message: format!("switch request not sent: {}", e),
                    });
                }
            }
        }
        decision
    }

    /// Keepalive.
    pub fn ping(&mut self) -> VoiceResult<()> {
        self.send(&ClientMessage::Ping { timestamp: now_ms() })
    }

    /// Ask the gateway for its role catalog.
    pub fn request_catalog(&mut self) -> VoiceResult<()> {
        self.send(&ClientMessage::Roles)
    }

    /// Switch the outgoing encoding on a live session.
    pub fn update_mime_type(&mut self, mime_type: &str) -> VoiceResult<()> {
        self.mime_type = Some(mime_type.to_string());
        if self.phase.is_live() && self.phase != Phase::Connecting {
            self.send(&ClientMessage::Config {
                mime_type: mime_type.to_string(),
            })?;
        }
        Ok(())
    }

    /// The playback boundary started playing the live reply.
    pub fn playback_started(&mut self) {
        self.metrics.pulse_for_playback();
        let snapshot = self.metrics.snapshot().clone();
        self.emit(SessionEvent::Metrics(snapshot));
    }

    /// The playback boundary finished (or failed) playing.
    pub fn playback_finished(&mut self) {
        self.metrics.decay_after_playback();
        let snapshot = self.metrics.snapshot().clone();
        self.emit(SessionEvent::Metrics(snapshot));
    }

    // ── transport events ─────────────────────────────────────────────────

    /// One inbound text frame. Undecodable frames are logged and dropped.
    pub fn handle_text(&mut self, raw: &str) {
        match ServerMessage::decode(raw) {
            Ok(message) => self.dispatch(message),
            Err(e) => self.absorb(e),
        }
    }

    pub fn on_transport_closed(&mut self, reason: &str) {
        if self.phase.is_live() {
            info!(target: LOG_TARGET, reason, "session: transport closed");
        }
        self.teardown(Phase::Closed, reason, None, false);
    }

    pub fn on_transport_error(&mut self, error: &VoiceError) {
        if !self.phase.is_live() {
            return;
        }
        warn!(target: LOG_TARGET, "session: transport error: {}", error);
        self.fail(error);
    }

    /// Route one inbound message to exactly one handler.
    pub fn dispatch(&mut self, message: ServerMessage) {
        let kind = message.kind();
        match message {
            ServerMessage::Ready { .. } => self.on_ready(),
            ServerMessage::Pong { timestamp } => {
                debug!(target: LOG_TARGET, ?timestamp, "session: pong");
            }
            ServerMessage::Roles { roles } => {
                self.roles.set_catalog(roles.clone());
                self.emit(SessionEvent::RoleCatalog(roles));
            }
            _ if !self.phase.is_live() => {
                debug!(target: LOG_TARGET, kind, phase = %self.phase, "session: ignored outside a live session");
            }
            ServerMessage::Ack(ack) => self.on_ack(ack),
            ServerMessage::RoleStatus(status) => self.on_role_status(status),
            ServerMessage::Metrics(sample) => self.on_metrics(sample),
            ServerMessage::AssistantReply { text, tags } => self.on_assistant_reply(text, tags),
            ServerMessage::TtsStream {
                chunk,
                mime,
                sequence,
            } => self.on_tts_fragment(&chunk, mime.as_deref(), sequence),
            ServerMessage::TtsCompleted { .. } => self.on_tts_completed(),
            ServerMessage::SessionClosed(summary) => {
                let reason = summary
                    .reason
                    .clone()
                    .unwrap_or_else(|| "peer_closed".to_string());
                self.teardown(Phase::Closed, &reason, Some(summary), false);
            }
            ServerMessage::Error { message } => {
                warn!(target: LOG_TARGET, %message, "session: peer error");
                self.fail(&VoiceError::PeerError(message));
            }
            ServerMessage::Unknown => {
                debug!(target: LOG_TARGET, "session: unknown message type ignored");
            }
        }
    }

    // ── handlers ─────────────────────────────────────────────────────────

    fn on_ready(&mut self) {
        info!(target: LOG_TARGET, "session: gateway ready");
        self.emit(SessionEvent::GatewayReady);
        if let Some(entry) = self.transcript.append_system("gateway ready").cloned() {
            self.emit(SessionEvent::Transcript(entry));
        }
    }

    fn on_ack(&mut self, ack: AckPayload) {
        match self.phase {
            Phase::AwaitingAck => {}
            Phase::Active | Phase::Switching
                if self.session_id.as_deref() == Some(ack.session_id.as_str()) =>
            {
                debug!(target: LOG_TARGET, session_id = %ack.session_id, "session: repeated ack ignored");
                return;
            }
            phase => {
                warn!(target: LOG_TARGET, %phase, session_id = %ack.session_id, "session: unexpected ack ignored");
                return;
            }
        }
        if ack.session_id.trim().is_empty() {
            self.fail(&VoiceError::Protocol("voice.ack without session_id".to_string()));
            return;
        }
        if self.retired_ids.contains(&ack.session_id) {
            self.fail(&VoiceError::Protocol(format!(
                "gateway reused session id {}",
                ack.session_id
            )));
            return;
        }

        let role_id = ack
            .role_id
            .clone()
            .or_else(|| self.roles.pending_role().map(str::to_string))
            .unwrap_or_else(|| self.options.default_role.clone());
        self.roles.adopt_acknowledged(&role_id);
        self.session_id = Some(ack.session_id.clone());
        self.voice_id = ack.voice_id.clone();
        info!(
            target: LOG_TARGET,
            session_id = %ack.session_id,
            role_id = %role_id,
            peer_phase = ?ack.phase,
            "session: acknowledged"
        );
        self.set_phase(Phase::Active);

        if let Some(transport) = self.transport.as_deref_mut() {
            self.uplink.flush(&ack.session_id, transport);
        }
        self.emit(SessionEvent::Acknowledged {
            session_id: ack.session_id,
            role_id,
        });
    }

    fn on_role_status(&mut self, payload: RoleStatusPayload) {
        let (status, outcome) = self.roles.on_status(&payload);
        self.emit(SessionEvent::RoleStatus(status));
        match outcome {
            RoleOutcome::Activated { .. } => {
                if self.phase == Phase::Switching {
                    self.set_phase(Phase::Active);
                }
            }
            RoleOutcome::Rejected { role_id, message } => {
                if self.phase == Phase::Switching {
                    self.set_phase(Phase::Active);
                }
                self.absorb(VoiceError::RoleSwitch { role_id, message });
            }
            RoleOutcome::PassThrough => {}
        }
    }

    fn on_metrics(&mut self, sample: MetricsPayload) {
        let snapshot = self.metrics.merge(&sample).clone();
        self.emit(SessionEvent::Metrics(snapshot));
        if let Some(text) = sample.transcript.as_deref() {
            let is_final = sample.is_final.unwrap_or(false);
            if let Some(entry) = self.transcript.upsert_user(text, is_final).cloned() {
                self.emit(SessionEvent::Transcript(entry));
            }
        }
    }

    fn on_assistant_reply(&mut self, text: String, tags: Vec<String>) {
        if let Some(entry) = self.transcript.append_assistant(&text).cloned() {
            self.emit(SessionEvent::Transcript(entry));
        }
        let emotion = self.metrics.apply_tags(&tags);
        self.tts.announce();
        self.emit(SessionEvent::AssistantReply {
            text,
            tags,
            emotion,
        });
        if emotion.is_some() {
            let snapshot = self.metrics.snapshot().clone();
            self.emit(SessionEvent::Metrics(snapshot));
        }
    }

    fn on_tts_fragment(&mut self, chunk: &str, mime: Option<&str>, sequence: Option<u64>) {
        if !self.phase.allows_audio() {
            debug!(target: LOG_TARGET, phase = %self.phase, "session: tts fragment ignored");
            return;
        }
        if let Err(e) = self.tts.push_encoded(chunk, mime, sequence) {
            debug!(target: LOG_TARGET, ?sequence, "session: tts fragment dropped");
            self.absorb(e);
        }
    }

    fn on_tts_completed(&mut self) {
        if !self.phase.allows_audio() {
            return;
        }
        let previous = self.tts.live().map(|audio| audio.id);
        if let Some(audio) = self.tts.complete() {
            if let Some(id) = previous {
                self.emit(SessionEvent::PlaybackReleased { id });
            }
            info!(target: LOG_TARGET, id = audio.id, bytes = audio.len(), "session: reply audio ready");
            self.emit(SessionEvent::ReplyAudio(audio));
        } else {
            debug!(target: LOG_TARGET, "session: tts completed with no fragments");
        }
    }

    // ── internals ────────────────────────────────────────────────────────

    /// Recoverable errors stay with the session; fatal ones end it.
    fn absorb(&mut self, error: VoiceError) {
        if error.is_session_fatal() {
            self.fail(&error);
            return;
        }
        warn!(target: LOG_TARGET, phase = %self.phase, "session: {}", error);
        if let VoiceError::RoleSwitch { role_id, message } = error {
            self.emit(SessionEvent::RoleSwitchFailed { role_id, message });
        }
    }

    fn fail(&mut self, error: &VoiceError) {
        let message = match error {
            VoiceError::PeerError(message) => message.clone(),
            other => other.to_string(),
        };
        if let Some(entry) = self.transcript.append_error(&message).cloned() {
            self.emit(SessionEvent::Transcript(entry));
        }
        self.emit(SessionEvent::Error {
            message: message.clone(),
        });
        self.teardown(Phase::Errored, &message, None, false);
    }

    /// Single teardown path. Each step runs even if an earlier one failed.
    fn teardown(
        &mut self,
        final_phase: Phase,
        reason: &str,
        summary: Option<SessionClosedPayload>,
        notify_peer: bool,
    ) {
        if !self.phase.is_live() {
            return;
        }

        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.stop() {
                warn!(target: LOG_TARGET, "teardown: capture stop failed: {}", e);
            }
        }

        if let Some(mut transport) = self.transport.take() {
            if notify_peer && transport.is_open() {
                let end = ClientMessage::End {
                    session_id: self.session_id.clone(),
                };
                if let Err(e) = transport.send(&end) {
                    warn!(target: LOG_TARGET, "teardown: voice.end not sent: {}", e);
                }
            }
            if let Err(e) = transport.close() {
                warn!(target: LOG_TARGET, "teardown: transport close failed: {}", e);
            }
        }

        if let Some(id) = self.session_id.take() {
            self.retired_ids.insert(id);
        }
        self.voice_id = None;
        self.uplink.reset();
        if let Some(released) = self.tts.reset() {
            self.emit(SessionEvent::PlaybackReleased { id: released.id });
        }
        self.transcript.freeze();
        self.roles.reset();

        let duration_ms = self
            .started_at
            .take()
            .map(|t| t.elapsed().as_millis() as u64);
        info!(target: LOG_TARGET, phase = %final_phase, reason, ?duration_ms, "session: torn down");
        self.set_phase(final_phase);
        self.emit(SessionEvent::Closed {
            phase: final_phase,
            reason: reason.to_string(),
            duration_ms: summary
                .as_ref()
                .and_then(|s| s.duration_ms)
                .or(duration_ms),
            summary,
        });
    }

    fn transport_open(&self) -> bool {
        self.transport.as_ref().map(|t| t.is_open()).unwrap_or(false)
    }

    fn send(&mut self, message: &ClientMessage) -> VoiceResult<()> {
        match self.transport.as_deref_mut() {
            Some(transport) if transport.is_open() => transport.send(message),
            _ => Err(VoiceError::TransportClosed),
        }
    }

    fn set_phase(&mut self, to: Phase) {
        let from = self.phase;
        if from == to {
            return;
        }
        self.phase = to;
        debug!(target: LOG_TARGET, %from, %to, "session: phase");
        self.emit(SessionEvent::PhaseChanged { from, to });
    }

    fn emit(&self, event: SessionEvent) {
        if self.event_tx.send(event).is_err() {
            debug!(target: LOG_TARGET, "session: event receiver dropped");
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        if self.phase.is_live() {
            self.teardown(Phase::Closed, "dropped", None, true);
        }
    }
}
