//! Playback boundary for reassembled replies.
//!
//! The session hands each [`ReplyAudio`] to an [`AudioSink`]. A new reply
//! replaces whatever the sink was playing; `stop()` is the kill-switch used on
//! teardown and interruption.

use crate::codec::file_suffix;
use crate::error::VoiceResult;
use crate::tts::ReplyAudio;
use std::path::{Path, PathBuf};
use tracing::info;

pub trait AudioSink {
    /// Start playing `audio`, replacing the current reply.
    fn play(&mut self, audio: &ReplyAudio) -> VoiceResult<()>;

    /// Stop playback and clear anything queued.
    fn stop(&mut self);

    /// Whether audio is still queued or playing.
    fn is_playing(&self) -> bool {
        false
    }
}

/// Writes every reply to `dir/reply-<id>.<ext>`. Useful headless and in tests.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl FileSink {
    pub fn new(dir: impl AsRef<Path>) -> VoiceResult<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            written: Vec::new(),
        })
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    pub fn path_for(&self, audio: &ReplyAudio) -> PathBuf {
        self.dir
            .join(format!("reply-{}.{}", audio.id, file_suffix(&audio.mime_type)))
    }
}

impl AudioSink for FileSink {
    fn play(&mut self, audio: &ReplyAudio) -> VoiceResult<()> {
        if audio.is_empty() {
            return Ok(());
        }
        let path = self.path_for(audio);
        std::fs::write(&path, audio.bytes())?;
        info!(target: "lingya::voice", path = %path.display(), bytes = audio.len(), "playback: reply written");
        self.written.push(path);
        Ok(())
    }

    fn stop(&mut self) {}
}

#[cfg(feature = "playback")]
pub use speaker::SpeakerSink;

#[cfg(feature = "playback")]
mod speaker {
    use super::AudioSink;
    use crate::error::{VoiceError, VoiceResult};
    use crate::tts::ReplyAudio;
    use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
    use std::io::Cursor;
    use tracing::info;

    /// Default output device via rodio.
    pub struct SpeakerSink {
        _stream: OutputStream,
        _stream_handle: OutputStreamHandle,
        sink: Sink,
    }

    impl SpeakerSink {
        pub fn new() -> VoiceResult<Self> {
            let (stream, stream_handle) =
                OutputStream::try_default().map_err(|e| VoiceError::Playback(e.to_string()))?;
            let sink =
                Sink::try_new(&stream_handle).map_err(|e| VoiceError::Playback(e.to_string()))?;
            info!(target: "lingya::voice", "playback: speaker sink ready");
            Ok(Self {
                _stream: stream,
                _stream_handle: stream_handle,
                sink,
            })
        }
    }

    impl AudioSink for SpeakerSink {
        fn play(&mut self, audio: &ReplyAudio) -> VoiceResult<()> {
            if audio.is_empty() {
                return Ok(());
            }
            let source = rodio::Decoder::new(Cursor::new(audio.bytes().to_vec()))
                .map_err(|e| VoiceError::Playback(format!("Decode failed: {}", e)))?;
            // last reply wins
            self.sink.clear();
            self.sink.append(source.convert_samples::<f32>());
            self.sink.play();
            Ok(())
        }

        fn stop(&mut self) {
            self.sink.stop();
        }

        fn is_playing(&self) -> bool {
            !self.sink.empty()
        }
    }
}
