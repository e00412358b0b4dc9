//! Async driver: owns the websocket and feeds the session from one loop.
//!
//! Inbound frames, captured fragments, caller commands and the keepalive tick
//! are multiplexed with `tokio::select!` and applied to the [`VoiceSession`]
//! one at a time. Outbound frames go through an unbounded queue to a writer
//! task so `Transport::send` never blocks the loop.

use crate::config::VoiceClientConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::protocol::ClientMessage;
use crate::session::{SessionEvent, SessionOptions, VoiceSession};
use crate::speech::SERVICE_KEY_HEADER;
use crate::transport::{CaptureControl, NoopCapture, Transport};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, AUTHORIZATION};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Caller actions delivered to a running client.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Switch(String),
    Roles,
    Ping,
    SetMimeType(String),
    PlaybackStarted,
    PlaybackFinished,
    Stop,
}

/// A stream of encoded fragments plus the handle that stops it.
pub struct CaptureStream {
    pub mime_type: String,
    pub fragments: mpsc::Receiver<Vec<u8>>,
    pub control: Box<dyn CaptureControl>,
}

impl CaptureStream {
    /// Channel-backed capture for callers that produce fragments themselves.
    pub fn channel(mime_type: impl Into<String>, buffer: usize) -> (Self, mpsc::Sender<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let stream = Self {
            mime_type: mime_type.into(),
            fragments: rx,
            control: Box::new(NoopCapture),
        };
        (stream, tx)
    }
}

/// Outbound half of the gateway websocket.
pub struct GatewayTransport {
    tx: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
}

impl GatewayTransport {
    fn new() -> (Self, mpsc::UnboundedReceiver<Message>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        (
            Self {
                tx,
                open: open.clone(),
            },
            rx,
            open,
        )
    }
}

impl Transport for GatewayTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    fn send(&mut self, message: &ClientMessage) -> VoiceResult<()> {
        if !self.is_open() {
            return Err(VoiceError::TransportClosed);
        }
        let json = message.to_json()?;
        self.tx
            .send(Message::Text(json.into()))
            .map_err(|_| VoiceError::TransportClosed)
    }

    fn close(&mut self) -> VoiceResult<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            // writer may already be gone
            let _ = self.tx.send(Message::Close(None));
        }
        Ok(())
    }
}

pub struct VoiceClient {
    config: VoiceClientConfig,
    session: VoiceSession,
    event_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl VoiceClient {
    pub fn new(config: VoiceClientConfig) -> VoiceResult<Self> {
        config.validate()?;
        let (session, event_rx) = VoiceSession::new(SessionOptions {
            default_role: config.default_role.clone(),
            pre_ack_buffer: config.pre_ack_buffer,
        });
        Ok(Self {
            config,
            session,
            event_rx: Some(event_rx),
        })
    }

    /// Take the session event receiver (can only be called once).
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.event_rx.take()
    }

    pub fn config(&self) -> &VoiceClientConfig {
        &self.config
    }

    pub fn session(&self) -> &VoiceSession {
        &self.session
    }

    /// Pick the persona for the next session before calling `run`.
    pub fn prefer_role(&mut self, role_id: &str) {
        self.session.request_switch(role_id);
    }

    /// Run one session to completion: connect, start, pump events until the
    /// session is torn down (stop command, peer close, or failure).
    pub async fn run(
        &mut self,
        capture: CaptureStream,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) -> VoiceResult<()> {
        let CaptureStream {
            mime_type,
            fragments: mut capture_rx,
            control,
        } = capture;

        let (transport, out_rx, open) = GatewayTransport::new();
        self.session.start(Box::new(transport), control, &mime_type)?;

        let ws = match self.connect().await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(target: "lingya::voice", url = %self.config.gateway_url, "client: connect failed: {}", e);
                self.session.on_transport_error(&e);
                return Err(e);
            }
        };
        open.store(true, Ordering::SeqCst);
        let (ws_tx, mut ws_rx) = ws.split();
        let writer = tokio::spawn(write_loop(ws_tx, out_rx));

        self.session.on_transport_open()?;

        let mut keepalive = self
            .config
            .keepalive_interval()
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));
        let mut capture_open = true;
        let mut commands_open = true;

        while self.session.phase().is_live() {
            tokio::select! {
                frame = ws_rx.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.session.handle_text(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        open.store(false, Ordering::SeqCst);
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "socket_closed".to_string());
                        self.session.on_transport_closed(&reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        open.store(false, Ordering::SeqCst);
                        self.session.on_transport_error(&VoiceError::from(e));
                    }
                    None => {
                        open.store(false, Ordering::SeqCst);
                        self.session.on_transport_closed("socket_closed");
                    }
                },
                fragment = capture_rx.recv(), if capture_open => match fragment {
                    Some(bytes) => {
                        self.session.on_capture_fragment(bytes);
                    }
                    None => {
                        debug!(target: "lingya::voice", "client: capture stream ended");
                        capture_open = false;
                    }
                },
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.apply(command),
                    None => {
                        commands_open = false;
                        self.session.stop();
                    }
                },
                _ = tick(&mut keepalive) => {
                    if let Err(e) = self.session.ping() {
                        debug!(target: "lingya::voice", "client: keepalive not sent: {}", e);
                    }
                }
            }
        }

        if tokio::time::timeout(Duration::from_secs(2), writer).await.is_err() {
            debug!(target: "lingya::voice", "client: writer did not finish in time");
        }
        info!(target: "lingya::voice", phase = %self.session.phase(), "client: session finished");
        Ok(())
    }

    fn apply(&mut self, command: Command) {
        debug!(target: "lingya::voice", ?command, "client: command");
        let result = match command {
            Command::Switch(role_id) => {
                self.session.request_switch(&role_id);
                Ok(())
            }
            Command::Roles => self.session.request_catalog(),
            Command::Ping => self.session.ping(),
            Command::SetMimeType(mime_type) => self.session.update_mime_type(&mime_type),
            Command::PlaybackStarted => {
                self.session.playback_started();
                Ok(())
            }
            Command::PlaybackFinished => {
                self.session.playback_finished();
                Ok(())
            }
            Command::Stop => {
                self.session.stop();
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(target: "lingya::voice", "client: command failed: {}", e);
        }
    }

    async fn connect(&self) -> VoiceResult<WsStream> {
        let mut request = self.config.gateway_url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        if let Some(key) = self.config.service_api_key.as_deref() {
            let value = HeaderValue::from_str(key)
                .map_err(|e| VoiceError::Config(format!("service api key: {}", e)))?;
            headers.insert(
                HeaderName::from_bytes(SERVICE_KEY_HEADER.as_bytes())
                    .map_err(|e| VoiceError::Config(e.to_string()))?,
                value,
            );
        }
        if let Some(token) = self.config.gateway_token.as_deref() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| VoiceError::Config(format!("gateway token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let timeout = self.config.connect_timeout();
        match tokio::time::timeout(timeout, connect_async(request)).await {
            Ok(Ok((ws, _response))) => {
                info!(target: "lingya::voice", url = %self.config.gateway_url, "client: connected");
                Ok(ws)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(VoiceError::ConnectTimeout(timeout.as_millis() as u64)),
        }
    }
}

async fn write_loop(
    mut ws_tx: futures_util::stream::SplitSink<WsStream, Message>,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = out_rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = ws_tx.send(message).await {
            warn!(target: "lingya::voice", "client: websocket write failed: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
    let _ = ws_tx.close().await;
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_refuses_before_open_and_after_close() {
        let (mut transport, mut rx, open) = GatewayTransport::new();
        assert!(matches!(
            transport.send(&ClientMessage::Roles),
            Err(VoiceError::TransportClosed)
        ));
        open.store(true, Ordering::SeqCst);
        transport.send(&ClientMessage::Roles).unwrap();
        assert!(matches!(rx.try_recv(), Ok(Message::Text(_))));
        transport.close().unwrap();
        assert!(matches!(rx.try_recv(), Ok(Message::Close(None))));
        assert!(!transport.is_open());
        assert!(transport.send(&ClientMessage::Roles).is_err());
    }

    #[test]
    fn new_rejects_invalid_config() {
        let config = VoiceClientConfig {
            gateway_url: "http://nope".into(),
            ..Default::default()
        };
        assert!(VoiceClient::new(config).is_err());
    }

    #[tokio::test]
    async fn connect_failure_errors_the_session() {
        let config = VoiceClientConfig {
            // nothing listens on port 1
            gateway_url: "ws://127.0.0.1:1/api/realtime/ws".into(),
            connect_timeout_ms: 2_000,
            ..Default::default()
        };
        let mut client = VoiceClient::new(config).unwrap();
        let (capture, _tx) = CaptureStream::channel("audio/webm", 4);
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let result = client.run(capture, cmd_rx).await;
        assert!(result.is_err());
        assert_eq!(client.session().phase(), crate::session::Phase::Errored);
    }
}
