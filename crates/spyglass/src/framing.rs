//! Stateful framing of the server's byte stream.
//!
//! TCP delivers the server's message frames in arbitrary segments: a single
//! read may carry half a header, several complete frames, or the tail of one
//! body and the head of the next. [`FrameDecoder`] is a two-phase state
//! machine that survives any such re-chunking -- leftover bytes stay buffered
//! in the decoder and are completed by the next feed.
//!
//! [`SequenceTracker`] watches the sequence numbers of the IQ message family
//! and reports gaps, which indicate frames the server dropped upstream.

use bytes::BytesMut;

use crate::codec::MessageHeader;
use crate::error::{Error, Result};
use crate::protocol::{version_compatible, MAX_MESSAGE_BODY_SIZE, MESSAGE_HEADER_SIZE};

/// Decoder phase: either accumulating a header or accumulating the body the
/// last header announced.
#[derive(Debug)]
enum Phase {
    AcquiringHeader,
    ReadingData(MessageHeader),
}

/// Incremental decoder splitting a byte stream into (header, body) records.
///
/// `feed` consumes its entire input and never blocks. Complete messages are
/// handed to the caller's sink as they materialize; a sink error (or a fatal
/// protocol violation) aborts the feed and poisons nothing -- the session is
/// expected to terminate on any error from here.
#[derive(Debug)]
pub struct FrameDecoder {
    phase: Phase,
    /// Bytes of the in-progress header, filled up to `header_position`.
    header_buf: [u8; MESSAGE_HEADER_SIZE],
    header_position: usize,
    /// Body staging buffer. Capacity grows to the largest body seen and is
    /// never shrunk, so steady-state streaming does not reallocate.
    body: BytesMut,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder in the header-acquisition phase.
    pub fn new() -> Self {
        FrameDecoder {
            phase: Phase::AcquiringHeader,
            header_buf: [0u8; MESSAGE_HEADER_SIZE],
            header_position: 0,
            body: BytesMut::new(),
        }
    }

    /// Consume `input` completely, emitting every message that completes.
    ///
    /// Partial records remain buffered for the next call. Returns an error on
    /// a protocol-version mismatch, an oversize body announcement, or an
    /// error from the sink; all are fatal to the session.
    pub fn feed<F>(&mut self, mut input: &[u8], mut sink: F) -> Result<()>
    where
        F: FnMut(&MessageHeader, &[u8]) -> Result<()>,
    {
        while !input.is_empty() {
            match &self.phase {
                Phase::AcquiringHeader => {
                    let want = MESSAGE_HEADER_SIZE - self.header_position;
                    let take = want.min(input.len());
                    self.header_buf[self.header_position..self.header_position + take]
                        .copy_from_slice(&input[..take]);
                    self.header_position += take;
                    input = &input[take..];

                    if self.header_position == MESSAGE_HEADER_SIZE {
                        self.header_position = 0;
                        let header = MessageHeader::decode(&self.header_buf);
                        self.validate(&header)?;

                        if header.body_size == 0 {
                            sink(&header, &[])?;
                        } else {
                            self.body.clear();
                            self.body.reserve(header.body_size as usize);
                            self.phase = Phase::ReadingData(header);
                        }
                    }
                }
                Phase::ReadingData(header) => {
                    let want = header.body_size as usize - self.body.len();
                    let take = want.min(input.len());
                    self.body.extend_from_slice(&input[..take]);
                    input = &input[take..];

                    if self.body.len() == header.body_size as usize {
                        let Phase::ReadingData(header) =
                            std::mem::replace(&mut self.phase, Phase::AcquiringHeader)
                        else {
                            unreachable!("phase checked above");
                        };
                        sink(&header, &self.body)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Header-complete validation: version gate and body-size bound, applied
    /// to every header including those announcing an empty body.
    fn validate(&self, header: &MessageHeader) -> Result<()> {
        if !version_compatible(header.protocol_id) {
            return Err(Error::Protocol(format!(
                "server is running an unsupported protocol version: {}.{}",
                header.protocol_id >> 24,
                (header.protocol_id >> 16) & 0xFF,
            )));
        }
        if header.body_size > MAX_MESSAGE_BODY_SIZE {
            return Err(Error::Protocol(format!(
                "message body of {} bytes exceeds the {} byte limit",
                header.body_size, MAX_MESSAGE_BODY_SIZE
            )));
        }
        Ok(())
    }
}

/// Detects dropped frames in the IQ stream by watching sequence numbers.
///
/// All members of the IQ message family share one counter. Initialized as if
/// the previous sequence number were `u32::MAX`, so the conventional first
/// frame (sequence 0) reports no gap; arithmetic is wrapping throughout.
#[derive(Debug)]
pub struct SequenceTracker {
    last: u32,
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceTracker {
    pub fn new() -> Self {
        SequenceTracker { last: u32::MAX }
    }

    /// Record `sequence` and return how many frames were skipped since the
    /// previous one (0 when the stream is contiguous).
    pub fn observe(&mut self, sequence: u32) -> u32 {
        let gap = sequence.wrapping_sub(self.last).wrapping_sub(1) as i32;
        self.last = sequence;
        if gap > 0 {
            gap as u32
        } else {
            0
        }
    }
}
