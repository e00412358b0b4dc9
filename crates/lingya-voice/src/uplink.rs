//! Chunk uplink: captured fragment → `voice.data` frame.
//!
//! Fragments produced before the gateway acknowledges the session are held in
//! a bounded queue and flushed, in order, with the assigned session id. A send
//! failure drops that one fragment and the pipeline keeps going.

use crate::protocol::{encode_chunk, now_ms, ClientMessage};
use crate::session::Phase;
use crate::transport::Transport;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// What happened to one fragment handed to the uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkOutcome {
    Sent,
    Buffered,
    Dropped,
    /// Empty fragment; nothing to send.
    Skipped,
}

/// Running counters, reset with the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UplinkStats {
    pub sent: u64,
    pub dropped: u64,
    pub skipped: u64,
    pub buffered: usize,
}

#[derive(Debug)]
struct PendingFragment {
    bytes: Vec<u8>,
    timestamp: i64,
}

#[derive(Debug)]
pub struct ChunkUplink {
    pre_ack_limit: usize,
    pending: VecDeque<PendingFragment>,
    next_sequence: u64,
    sent: u64,
    dropped: u64,
    skipped: u64,
}

impl ChunkUplink {
    pub fn new(pre_ack_limit: usize) -> Self {
        Self {
            pre_ack_limit,
            pending: VecDeque::new(),
            next_sequence: 0,
            sent: 0,
            dropped: 0,
            skipped: 0,
        }
    }

    /// Route one captured fragment according to the session phase.
    pub fn push(
        &mut self,
        phase: Phase,
        session_id: Option<&str>,
        bytes: Vec<u8>,
        transport: Option<&mut (dyn Transport + '_)>,
    ) -> UplinkOutcome {
        if bytes.is_empty() {
            self.skipped += 1;
            return UplinkOutcome::Skipped;
        }
        let timestamp = now_ms();

        match (phase.allows_audio(), session_id, transport) {
            (true, Some(id), Some(transport)) => {
                self.flush(id, transport);
                self.transmit(id, bytes, timestamp, transport)
            }
            _ if matches!(phase, Phase::Connecting | Phase::AwaitingAck) => {
                self.buffer(bytes, timestamp)
            }
            _ => {
                debug!(phase = %phase, "uplink: fragment outside a live session, dropped");
                self.dropped += 1;
                UplinkOutcome::Dropped
            }
        }
    }

    /// Send everything held since before the ack, oldest first.
    pub fn flush(&mut self, session_id: &str, transport: &mut (dyn Transport + '_)) -> usize {
        let mut flushed = 0;
        while let Some(fragment) = self.pending.pop_front() {
            if self.transmit(session_id, fragment.bytes, fragment.timestamp, transport)
                == UplinkOutcome::Sent
            {
                flushed += 1;
            }
        }
        if flushed > 0 {
            debug!(session_id, flushed, "uplink: flushed pre-ack fragments");
        }
        flushed
    }

    pub fn stats(&self) -> UplinkStats {
        UplinkStats {
            sent: self.sent,
            dropped: self.dropped,
            skipped: self.skipped,
            buffered: self.pending.len(),
        }
    }

    /// Forget queued fragments and counters; called on teardown.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.next_sequence = 0;
        self.sent = 0;
        self.dropped = 0;
        self.skipped = 0;
    }

    fn buffer(&mut self, bytes: Vec<u8>, timestamp: i64) -> UplinkOutcome {
        if self.pre_ack_limit == 0 {
            self.dropped += 1;
            return UplinkOutcome::Dropped;
        }
        if self.pending.len() >= self.pre_ack_limit {
            self.pending.pop_front();
            self.dropped += 1;
            warn!(limit = self.pre_ack_limit, "uplink: pre-ack buffer full, oldest fragment dropped");
        }
        self.pending.push_back(PendingFragment { bytes, timestamp });
        UplinkOutcome::Buffered
    }

    fn transmit(
        &mut self,
        session_id: &str,
        bytes: Vec<u8>,
        timestamp: i64,
        transport: &mut (dyn Transport + '_),
    ) -> UplinkOutcome {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let message = ClientMessage::Data {
            session_id: Some(session_id.to_string()),
            chunk: encode_chunk(&bytes),
            timestamp,
            sequence,
        };
        match transport.send(&message) {
            Ok(()) => {
                self.sent += 1;
                UplinkOutcome::Sent
            }
            Err(e) => {
                warn!(session_id, sequence, "uplink: fragment send failed, dropped: {}", e);
                self.dropped += 1;
                UplinkOutcome::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{VoiceError, VoiceResult};

    #[derive(Default)]
    struct Recorder {
        sent: Vec<ClientMessage>,
        fail_next: bool,
    }

    impl Transport for Recorder {
        fn is_open(&self) -> bool {
            true
        }
        fn send(&mut self, message: &ClientMessage) -> VoiceResult<()> {
            if self.fail_next {
                self.fail_next = false;
                return Err(VoiceError::Transport("broken pipe".into()));
            }
            self.sent.push(message.clone());
            Ok(())
        }
        fn close(&mut self) -> VoiceResult<()> {
            Ok(())
        }
    }

    fn sequences(t: &Recorder) -> Vec<u64> {
        t.sent
            .iter()
            .filter_map(|m| match m {
                ClientMessage::Data { sequence, .. } => Some(*sequence),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn buffers_until_ack_then_flushes_in_order() {
        let mut uplink = ChunkUplink::new(8);
        let mut t = Recorder::default();

        assert_eq!(
            uplink.push(Phase::AwaitingAck, None, vec![1], Some(&mut t)),
            UplinkOutcome::Buffered
        );
        assert_eq!(
            uplink.push(Phase::AwaitingAck, None, vec![2], Some(&mut t)),
            UplinkOutcome::Buffered
        );
        assert!(t.sent.is_empty());

        assert_eq!(
            uplink.push(Phase::Active, Some("s-1"), vec![3], Some(&mut t)),
            UplinkOutcome::Sent
        );
        assert_eq!(sequences(&t), vec![0, 1, 2]);
        let chunks: Vec<_> = t
            .sent
            .iter()
            .map(|m| match m {
                ClientMessage::Data { chunk, session_id, .. } => {
                    assert_eq!(session_id.as_deref(), Some("s-1"));
                    crate::protocol::decode_chunk(chunk).unwrap()
                }
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(chunks, vec![vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn send_failure_drops_one_fragment_only() {
        let mut uplink = ChunkUplink::new(4);
        let mut t = Recorder {
            fail_next: true,
            ..Default::default()
        };
        assert_eq!(
            uplink.push(Phase::Active, Some("s"), vec![1], Some(&mut t)),
            UplinkOutcome::Dropped
        );
        assert_eq!(
            uplink.push(Phase::Switching, Some("s"), vec![2], Some(&mut t)),
            UplinkOutcome::Sent
        );
        let stats = uplink.stats();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut uplink = ChunkUplink::new(2);
        for b in 1..=3u8 {
            uplink.push(Phase::Connecting, None, vec![b], None);
        }
        let mut t = Recorder::default();
        uplink.flush("s", &mut t);
        assert_eq!(t.sent.len(), 2);
        match &t.sent[0] {
            ClientMessage::Data { chunk, .. } => {
                assert_eq!(crate::protocol::decode_chunk(chunk).unwrap(), vec![2])
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn closed_session_drops() {
        let mut uplink = ChunkUplink::new(4);
        let mut t = Recorder::default();
        assert_eq!(
            uplink.push(Phase::Closed, Some("s"), vec![1], Some(&mut t)),
            UplinkOutcome::Dropped
        );
        assert_eq!(
            uplink.push(Phase::Active, Some("s"), Vec::new(), Some(&mut t)),
            UplinkOutcome::Skipped
        );
        assert!(t.sent.is_empty());
        let stats = uplink.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.skipped, 1);
    }
}
