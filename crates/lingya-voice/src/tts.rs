//! Reassembly of streamed TTS audio into one playable object per reply.
//!
//! Fragments arrive in order on one connection, so they're appended as they
//! come and joined in that order. A new reply announcement discards whatever
//! was left of the previous one.

use crate::error::VoiceResult;
use crate::protocol::decode_chunk;
use std::sync::Arc;
use tracing::debug;

/// Mime type the gateway streams replies in unless it says otherwise.
pub const DEFAULT_REPLY_MIME: &str = "audio/mpeg";

/// One reassembled reply, ready for the playback boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyAudio {
    /// Increments per reassembled reply within a client.
    pub id: u64,
    pub mime_type: String,
    bytes: Arc<[u8]>,
}

impl ReplyAudio {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TtsReassembly {
    fragments: Vec<Vec<u8>>,
    mime_type: Option<String>,
    expected_sequence: u64,
    live: Option<ReplyAudio>,
    next_id: u64,
}

impl TtsReassembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new reply is coming; last reply wins.
    pub fn announce(&mut self) {
        if !self.fragments.is_empty() {
            debug!(
                discarded = self.fragments.len(),
                "tts: unfinished reply discarded by new announcement"
            );
        }
        self.clear_buffer();
    }

    /// Append one decoded fragment.
    pub fn push_fragment(&mut self, bytes: Vec<u8>, mime: Option<&str>, sequence: Option<u64>) {
        if let Some(seq) = sequence {
            if seq != self.expected_sequence {
                debug!(
                    expected = self.expected_sequence,
                    got = seq,
                    "tts: sequence gap, keeping arrival order"
                );
            }
            self.expected_sequence = seq.wrapping_add(1);
        } else {
            self.expected_sequence = self.expected_sequence.wrapping_add(1);
        }
        if self.mime_type.is_none() {
            self.mime_type = mime.map(str::to_string);
        }
        self.fragments.push(bytes);
    }

    /// Decode a base64 `chunk` field and append it. Undecodable fragments
    /// leave the buffer untouched.
    pub fn push_encoded(&mut self, chunk: &str, mime: Option<&str>, sequence: Option<u64>) -> VoiceResult<()> {
        let bytes = decode_chunk(chunk)?;
        self.push_fragment(bytes, mime, sequence);
        Ok(())
    }

    /// Join the buffered fragments into the new live object. `None` when
    /// nothing was buffered.
    pub fn complete(&mut self) -> Option<ReplyAudio> {
        if self.fragments.is_empty() {
            self.clear_buffer();
            return None;
        }
        let total: usize = self.fragments.iter().map(Vec::len).sum();
        let mut joined = Vec::with_capacity(total);
        for fragment in self.fragments.drain(..) {
            joined.extend_from_slice(&fragment);
        }
        let audio = ReplyAudio {
            id: self.next_id,
            mime_type: self
                .mime_type
                .take()
                .unwrap_or_else(|| DEFAULT_REPLY_MIME.to_string()),
            bytes: Arc::from(joined),
        };
        self.next_id += 1;
        self.clear_buffer();
        if let Some(previous) = self.live.replace(audio.clone()) {
            debug!(previous = previous.id, current = audio.id, "tts: live reply superseded");
        }
        Some(audio)
    }

    /// The reply currently handed to playback, if any.
    pub fn live(&self) -> Option<&ReplyAudio> {
        self.live.as_ref()
    }

    pub fn buffered_fragments(&self) -> usize {
        self.fragments.len()
    }

    /// Teardown: drop the buffer and release the live object.
    pub fn reset(&mut self) -> Option<ReplyAudio> {
        self.clear_buffer();
        self.live.take()
    }

    fn clear_buffer(&mut self) {
        self.fragments.clear();
        self.mime_type = None;
        self.expected_sequence = 0;
    }
}
