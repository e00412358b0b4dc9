//! Scripted session: replays a gateway conversation through `VoiceSession`
//! without a network, printing every event the caller would see.
//!
//! Useful for checking how transcripts, role switches and reply audio surface
//! before wiring a real capture layer.

use lingya_voice::protocol::encode_chunk;
use lingya_voice::{
    ClientMessage, NoopCapture, SessionEvent, SessionOptions, Transport, VoiceResult,
    VoiceSession,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Prints outbound frames instead of sending them.
struct ConsoleTransport {
    open: bool,
}

impl Transport for ConsoleTransport {
    fn is_open(&self) -> bool {
        self.open
    }

    fn send(&mut self, message: &ClientMessage) -> VoiceResult<()> {
        println!("  → {}", message.to_json()?);
        Ok(())
    }

    fn close(&mut self) -> VoiceResult<()> {
        self.open = false;
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let (mut session, mut events) = VoiceSession::new(SessionOptions::default());
    session.start(
        Box::new(ConsoleTransport { open: true }),
        Box::new(NoopCapture),
        "audio/webm;codecs=opus",
    )?;
    session.on_capture_fragment(b"early".to_vec());

    let inbound = vec![
        r#"{"type":"gateway.ready"}"#.to_string(),
        r#"{"type":"voice.ack","session_id":"demo-1","role_id":"huangrong","phase":"active"}"#
            .to_string(),
        r#"{"type":"metrics","transcript":"给我讲个","is_final":false,"avg_energy":22.5}"#
            .to_string(),
        r#"{"type":"metrics","transcript":"给我讲个故事","is_final":true}"#.to_string(),
        r#"{"type":"assistant.reply","text":"好呀，听着。","tags":["gentle"]}"#.to_string(),
        format!(
            r#"{{"type":"tts.stream","chunk":"{}","mime":"audio/mpeg","sequence":0}}"#,
            encode_chunk(b"ID3")
        ),
        r#"{"type":"tts.stream.completed"}"#.to_string(),
    ];

    for raw in &inbound {
        println!("  ← {}", raw);
        session.handle_text(raw);
    }
    session.request_switch("xiaoruan");
    session.handle_text(
        r#"{"type":"voice.role_status","role_id":"xiaoruan","status":"active","latency_ms":95}"#,
    );
    session.stop();

    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Transcript(entry) => info!(role = ?entry.role, final_ = entry.is_final, "{}", entry.text),
            SessionEvent::ReplyAudio(audio) => info!(bytes = audio.len(), mime = %audio.mime_type, "reply audio"),
            other => info!("{:?}", other),
        }
    }
    Ok(())
}
