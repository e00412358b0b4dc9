//! Full client run against a local websocket gateway.

use futures_util::{SinkExt, StreamExt};
use lingya_voice::protocol::encode_chunk;
use lingya_voice::{
    CaptureStream, EntryRole, Phase, SessionEvent, VoiceClient, VoiceClientConfig,
};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// Minimal gateway: ack the start, answer the first audio fragment with a
/// transcript, a reply and two audio fragments, then close the session.
async fn fake_gateway(listener: TcpListener) -> (Vec<Value>, Option<String>) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut auth = None;
    let callback = |req: &Request, res: Response| -> Result<Response, ErrorResponse> {
        auth = req
            .headers()
            .get("service-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(res)
    };
    let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .unwrap();

    let outgoing = |value: Value| Message::Text(value.to_string().into());
    let mut received = Vec::new();
    let mut replied = false;

    while let Some(message) = ws.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        received.push(value.clone());
        match value["type"].as_str().unwrap_or_default() {
            "voice.start" => {
                let role = value["role_id"].clone();
                ws.send(outgoing(json!({"type": "gateway.ready"})))
                    .await
                    .unwrap();
                ws.send(outgoing(json!({
                    "type": "voice.ack",
                    "session_id": "srv-1",
                    "role_id": role,
                    "phase": "active",
                    "voice_id": "v-77"
                })))
                .await
                .unwrap();
                ws.send(outgoing(json!({
                    "type": "voice.role_status",
                    "role_id": role,
                    "status": "active",
                    "message": "role_initialized",
                    "latency_ms": 0
                })))
                .await
                .unwrap();
            }
            "voice.data" if !replied => {
                replied = true;
                let script = vec![
                    json!({"type": "metrics", "transcript": "你", "is_final": false, "avg_energy": 30.0}),
                    json!({"type": "metrics", "transcript": "你好", "is_final": true}),
                    json!({"type": "assistant.reply", "text": "哼，来啦", "tags": ["laugh"]}),
                    json!({"type": "tts.stream", "chunk": encode_chunk(b"hello "), "mime": "audio/mpeg", "sequence": 0}),
                    json!({"type": "tts.stream", "chunk": encode_chunk(b"world"), "mime": "audio/mpeg", "sequence": 1}),
                    json!({"type": "tts.stream.completed", "role_id": "pipi"}),
                    json!({"type": "session.closed", "reason": "server_done", "duration_ms": 1234, "errors": 0}),
                ];
                for message in script {
                    ws.send(outgoing(message)).await.unwrap();
                }
            }
            _ => {}
        }
    }
    (received, auth)
}

#[tokio::test]
async fn client_runs_one_session_against_gateway() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(fake_gateway(listener));

    let config = VoiceClientConfig {
        gateway_url: format!("ws://{}/api/realtime/ws", addr),
        service_api_key: Some("secret-key".into()),
        keepalive_secs: 0,
        ..Default::default()
    };
    let mut client = VoiceClient::new(config).unwrap();
    client.prefer_role("pipi");
    let mut events = client.take_event_receiver().unwrap();
    assert!(client.take_event_receiver().is_none());

    let (capture, fragments) = CaptureStream::channel("audio/webm", 8);
    fragments.send(b"frag-1".to_vec()).await.unwrap();
    fragments.send(b"frag-2".to_vec()).await.unwrap();
    let (_commands, command_rx) = mpsc::unbounded_channel();

    let run = tokio::time::timeout(Duration::from_secs(10), client.run(capture, command_rx))
        .await
        .expect("session should finish");
    tokio_test::assert_ok!(run);
    assert_eq!(client.session().phase(), Phase::Closed);

    let (received, auth) = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(auth.as_deref(), Some("secret-key"));

    assert_eq!(received[0]["type"], "voice.start");
    assert_eq!(received[0]["role_id"], "pipi");
    assert_eq!(received[0]["mime_type"], "audio/webm");
    let data: Vec<&Value> = received
        .iter()
        .filter(|v| v["type"] == "voice.data")
        .collect();
    assert!(!data.is_empty());
    assert!(data.iter().all(|v| v["session_id"] == "srv-1"));
    assert_eq!(data[0]["chunk"], encode_chunk(b"frag-1"));

    let mut all = Vec::new();
    while let Ok(event) = events.try_recv() {
        all.push(event);
    }
    assert!(all.contains(&SessionEvent::GatewayReady));
    assert!(all.contains(&SessionEvent::Acknowledged {
        session_id: "srv-1".into(),
        role_id: "pipi".into()
    }));
    let audio = all
        .iter()
        .find_map(|e| match e {
            SessionEvent::ReplyAudio(audio) => Some(audio.clone()),
            _ => None,
        })
        .expect("reply audio");
    assert_eq!(audio.bytes(), b"hello world");
    assert!(all.iter().any(|e| matches!(
        e,
        SessionEvent::Closed { phase: Phase::Closed, reason, duration_ms: Some(1234), .. } if reason == "server_done"
    )));

    let transcript = client.session().transcript().entries();
    let user: Vec<_> = transcript
        .iter()
        .filter(|e| e.role == EntryRole::User)
        .collect();
    assert_eq!(user.len(), 1);
    assert_eq!(user[0].text, "你好");
    assert!(transcript
        .iter()
        .any(|e| e.role == EntryRole::Assistant && e.text == "哼，来啦"));
    assert_eq!(client.session().metrics().emotion_label(), "happy");
}
