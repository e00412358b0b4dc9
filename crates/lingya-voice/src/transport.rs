//! Owned resources a voice session drives: the gateway connection and the
//! local capture layer. Both are handed to [`crate::VoiceSession::start`] and
//! released by its teardown.

use crate::error::VoiceResult;
use crate::protocol::ClientMessage;

/// Outbound half of one gateway connection.
///
/// `send` must not block; implementations queue the frame and report a closed
/// or broken connection as an error.
pub trait Transport: Send {
    fn is_open(&self) -> bool;

    fn send(&mut self, message: &ClientMessage) -> VoiceResult<()>;

    fn close(&mut self) -> VoiceResult<()>;
}

/// Handle to the external capture layer (microphone + encoder).
pub trait CaptureControl: Send {
    /// False when the user denied microphone access.
    fn is_permitted(&self) -> bool {
        true
    }

    /// Stop producing fragments and release the device.
    fn stop(&mut self) -> VoiceResult<()>;
}

/// Capture handle for callers that feed fragments themselves.
#[derive(Debug, Default)]
pub struct NoopCapture;

impl CaptureControl for NoopCapture {
    fn stop(&mut self) -> VoiceResult<()> {
        Ok(())
    }
}
