//! Lingya Console: drive a realtime voice session from the terminal.
//!
//! Streams a pre-encoded audio file (or nothing, for a listen-only session) to
//! the gateway, prints transcripts and role status, and writes each reply to
//! disk (or plays it with `--features playback --speaker`).
//!
//! Commands on stdin while running:
//!   /switch <role>   request a persona change
//!   /roles           fetch the role catalog
//!   /ping            send a keepalive now
//!   /mime <type>     change the outgoing encoding
//!   /stop            end the session

use anyhow::{bail, Context};
use lingya_voice::{
    negotiate_mime_type, AudioSink, CaptureStream, Command, EntryRole, FileSink, Phase,
    ReplyAudio, SessionEvent, SpeechClient, StaticCapability, VoiceClient, VoiceClientConfig,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CHUNK_BYTES: usize = 4096;
const DEFAULT_CHUNK_MS: u64 = 250;
const PLAYBACK_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    role: Option<String>,
    input: Option<PathBuf>,
    mime: Option<String>,
    out: Option<PathBuf>,
    say: Option<String>,
    chunk_bytes: Option<usize>,
    chunk_ms: Option<u64>,
    speaker: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut parsed = Args::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || -> anyhow::Result<String> {
            i += 1;
            args.get(i)
                .cloned()
                .with_context(|| format!("{} needs a value", flag))
        };
        match flag {
            "--config" => parsed.config = Some(PathBuf::from(value()?)),
            "--role" => parsed.role = Some(value()?),
            "--input" => parsed.input = Some(PathBuf::from(value()?)),
            "--mime" => parsed.mime = Some(value()?),
            "--out" => parsed.out = Some(PathBuf::from(value()?)),
            "--say" => parsed.say = Some(value()?),
            "--chunk-bytes" => parsed.chunk_bytes = Some(value()?.parse()?),
            "--chunk-ms" => parsed.chunk_ms = Some(value()?.parse()?),
            "--speaker" => parsed.speaker = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => bail!("unknown argument: {}", other),
        }
        i += 1;
    }
    Ok(parsed)
}

fn print_usage() {
    println!("Usage: lingya-console [--config file.toml] [--role ID] [--input audio.webm]");
    println!("                      [--mime TYPE] [--out DIR] [--chunk-bytes N] [--chunk-ms MS]");
    println!("                      [--speaker] [--say TEXT]");
}

/// Guess the encoding of a pre-encoded file from its extension.
fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("ogg") | Some("opus") => "audio/ogg;codecs=opus",
        Some("m4a") | Some("mp4") => "audio/mp4",
        _ => "audio/webm;codecs=opus",
    }
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match head {
        "/switch" if !rest.is_empty() => Some(Command::Switch(rest.to_string())),
        "/roles" => Some(Command::Roles),
        "/ping" => Some(Command::Ping),
        "/mime" if !rest.is_empty() => Some(Command::SetMimeType(rest.to_string())),
        "/stop" | "/quit" => Some(Command::Stop),
        _ => None,
    }
}

#[cfg(feature = "playback")]
fn make_sink(out_dir: &Path, speaker: bool) -> anyhow::Result<Box<dyn AudioSink>> {
    if speaker {
        return Ok(Box::new(lingya_voice::SpeakerSink::new()?));
    }
    Ok(Box::new(FileSink::new(out_dir)?))
}

#[cfg(not(feature = "playback"))]
fn make_sink(out_dir: &Path, speaker: bool) -> anyhow::Result<Box<dyn AudioSink>> {
    if speaker {
        tracing::warn!("--speaker needs the `playback` feature; writing replies to disk");
    }
    Ok(Box::new(FileSink::new(out_dir)?))
}

/// Reports playback start and end back to the session. Sinks that play in
/// the background (the speaker) finish later, on a `poll` tick.
#[derive(Debug, Default)]
struct PlaybackTracker {
    playing: bool,
}

impl PlaybackTracker {
    fn on_reply(
        &mut self,
        audio: &ReplyAudio,
        sink: &mut dyn AudioSink,
        commands: &mpsc::UnboundedSender<Command>,
    ) {
        let _ = commands.send(Command::PlaybackStarted);
        if let Err(e) = sink.play(audio) {
            tracing::warn!(error = %e, "reply playback failed");
        }
        self.playing = true;
        self.poll(sink, commands);
    }

    fn poll(&mut self, sink: &dyn AudioSink, commands: &mpsc::UnboundedSender<Command>) {
        if self.playing && !sink.is_playing() {
            self.playing = false;
            let _ = commands.send(Command::PlaybackFinished);
        }
    }
}

fn handle_event(
    event: SessionEvent,
    sink: &mut dyn AudioSink,
    playback: &mut PlaybackTracker,
    commands: &mpsc::UnboundedSender<Command>,
) {
    match event {
        SessionEvent::PhaseChanged { to, .. } => println!("[phase] {}", to),
        SessionEvent::GatewayReady => println!("[gateway] ready"),
        SessionEvent::Acknowledged {
            session_id,
            role_id,
        } => println!("[session] {} as {}", session_id, role_id),
        SessionEvent::Transcript(entry) => {
            let marker = if entry.is_final { "" } else { " …" };
            match entry.role {
                EntryRole::User => println!("[you] {}{}", entry.text, marker),
                EntryRole::Assistant => println!("[assistant] {}", entry.text),
                EntryRole::System => println!("[system] {}", entry.text),
                EntryRole::Error => println!("[error] {}", entry.text),
            }
        }
        SessionEvent::AssistantReply { tags, emotion, .. } => {
            if !tags.is_empty() {
                println!(
                    "[tags] {} ({})",
                    tags.join(", "),
                    emotion.map(|e| e.label()).unwrap_or("neutral")
                );
            }
        }
        SessionEvent::Metrics(metrics) => tracing::debug!(
            avg = metrics.avg_energy,
            peak = metrics.peak_energy,
            emotion = ?metrics.emotion,
            "metrics"
        ),
        SessionEvent::RoleStatus(status) => println!(
            "[role] {} {}{}",
            status.role_id,
            status.status.as_str(),
            status
                .latency_ms
                .map(|ms| format!(" ({}ms)", ms))
                .unwrap_or_default()
        ),
        SessionEvent::RoleSwitchFailed { role_id, message } => {
            println!("[role] switch to {} failed: {}", role_id, message)
        }
        SessionEvent::RoleCatalog(roles) => {
            for (id, role) in roles {
                println!(
                    "[roles] {} {}",
                    id,
                    role.display_name.as_deref().unwrap_or_default()
                );
            }
        }
        SessionEvent::ReplyAudio(audio) => playback.on_reply(&audio, sink, commands),
        SessionEvent::PlaybackReleased { .. } => sink.stop(),
        SessionEvent::Closed {
            phase,
            reason,
            duration_ms,
            summary,
        } => {
            println!(
                "[session] {} ({}){}",
                phase,
                reason,
                duration_ms
                    .map(|ms| format!(" after {}ms", ms))
                    .unwrap_or_default()
            );
            if let Some(summary) = summary.and_then(|s| serde_json::to_string(&s).ok()) {
                println!("[summary] {}", summary);
            }
        }
        SessionEvent::Error { message } => eprintln!("[error] {}", message),
    }
}

async fn say(config: &VoiceClientConfig, text: &str, args: &Args) -> anyhow::Result<()> {
    let mut speech = SpeechClient::from_config(config)?;
    if let Some(role) = args.role.as_deref() {
        speech = speech.with_role(role);
    }
    let audio = speech.synthesize(text).await?;
    if audio.is_empty() {
        println!("[say] nothing to synthesize");
        return Ok(());
    }
    let out_dir = args.out.clone().unwrap_or_else(|| PathBuf::from("replies"));
    tokio::fs::create_dir_all(&out_dir).await?;
    let path = out_dir.join(format!("say-{}.mp3", speech.role_id));
    tokio::fs::write(&path, &audio).await?;
    println!("[say] {} bytes -> {}", audio.len(), path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[lingya-console] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;
    let mut config = match args.config.as_deref() {
        Some(path) => VoiceClientConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => VoiceClientConfig::from_env(),
    };
    if let Some(role) = args.role.as_deref() {
        config.default_role = role.to_string();
    }
    config.validate()?;

    if let Some(text) = args.say.as_deref() {
        return say(&config, text, &args).await;
    }

    let mime_type = match (&args.mime, &args.input) {
        (Some(mime), _) => mime.clone(),
        (None, Some(path)) => {
            let capability = StaticCapability::new([mime_for_path(path)]);
            negotiate_mime_type(&config.mime_preferences, Some(&capability))
        }
        (None, None) => negotiate_mime_type::<String>(&config.mime_preferences, None),
    };

    let mut client = VoiceClient::new(config)?;
    let mut events = client
        .take_event_receiver()
        .context("event receiver already taken")?;
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (capture, fragment_tx) = CaptureStream::channel(mime_type.clone(), 64);

    if let Some(path) = args.input.clone() {
        let chunk_bytes = args.chunk_bytes.unwrap_or(DEFAULT_CHUNK_BYTES).max(1);
        let pause = Duration::from_millis(args.chunk_ms.unwrap_or(DEFAULT_CHUNK_MS));
        tokio::spawn(async move {
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "input not readable");
                    return;
                }
            };
            for chunk in bytes.chunks(chunk_bytes) {
                if fragment_tx.send(chunk.to_vec()).await.is_err() {
                    break;
                }
                tokio::time::sleep(pause).await;
            }
            tracing::info!(path = %path.display(), "input fully streamed");
        });
    } else {
        drop(fragment_tx);
    }

    let stdin_tx = cmd_tx.clone();
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_command(&line) {
                Some(command) => {
                    if stdin_tx.send(command).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => println!("commands: /switch <role> /roles /ping /mime <type> /stop"),
            }
        }
    });

    let out_dir = args.out.clone().unwrap_or_else(|| PathBuf::from("replies"));
    let mut sink = make_sink(&out_dir, args.speaker)?;
    let mut playback = PlaybackTracker::default();
    let mut playback_tick = tokio::time::interval(PLAYBACK_POLL);

    println!("[lingya] connecting ({}), /stop to end", mime_type);
    let result = {
        let run = client.run(capture, cmd_rx);
        tokio::pin!(run);
        loop {
            tokio::select! {
                result = &mut run => break result,
                Some(event) = events.recv() => {
                    handle_event(event, &mut *sink, &mut playback, &cmd_tx)
                }
                _ = playback_tick.tick() => playback.poll(&*sink, &cmd_tx),
                _ = tokio::signal::ctrl_c() => {
                    let _ = cmd_tx.send(Command::Stop);
                }
            }
        }
    };
    while let Ok(event) = events.try_recv() {
        handle_event(event, &mut *sink, &mut playback, &cmd_tx);
    }
    result?;

    if client.session().phase() == Phase::Errored {
        bail!("session ended with an error");
    }
    Ok(())
}
