//! One-shot TTS against a local HTTP responder.

use lingya_voice::{SpeechClient, VoiceClientConfig, VoiceError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Accept one request, answer with `status_line` and `body`, return the raw
/// request text.
async fn respond_once(listener: TcpListener, status_line: &'static str, body: &'static [u8]) -> String {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
        if let Some(end) = find(&request, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if request.len() >= end + 4 + length {
                break;
            }
        }
    }
    let head = format!(
        "{}\r\ncontent-type: audio/mpeg\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        status_line,
        body.len()
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();
    let _ = stream.shutdown().await;
    String::from_utf8_lossy(&request).to_string()
}

#[tokio::test]
async fn synthesize_posts_text_and_returns_audio() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(respond_once(listener, "HTTP/1.1 200 OK", b"ID3-audio"));

    let config = VoiceClientConfig {
        api_base_url: format!("http://{}", addr),
        service_api_key: Some("k-123".into()),
        tts_role: "xiaoruan".into(),
        ..Default::default()
    };
    let speech = SpeechClient::from_config(&config).unwrap();
    let audio = speech.synthesize("  你好呀  ").await.unwrap();
    assert_eq!(audio, b"ID3-audio".to_vec());

    let request = server.await.unwrap();
    let lowered = request.to_ascii_lowercase();
    assert!(lowered.starts_with("post /api/voice/xiaoruan/stream "));
    assert!(lowered.contains("service-api-key: k-123"));
    assert!(request.contains("\"emotion_auto\":true"));
    assert!(request.contains("你好呀"));
    assert!(!request.contains("  你好呀"));
}

#[tokio::test]
async fn non_success_status_is_a_tts_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(respond_once(
        listener,
        "HTTP/1.1 503 Service Unavailable",
        b"voice backend offline",
    ));

    let speech = SpeechClient::new(
        format!("http://{}", addr),
        "huangrong",
        None,
        Duration::from_secs(5),
    )
    .unwrap();
    let result = speech.synthesize("hello").await;
    tokio_test::assert_err!(&result);
    match result {
        Err(VoiceError::Tts(message)) => {
            assert!(message.contains("503"));
            assert!(message.contains("voice backend offline"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    server.await.unwrap();
}
