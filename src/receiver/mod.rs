//! Frame receiver
//!
//! Assembles one complete header + payload frame per call from whichever
//! transport is active and decodes it into a caller-owned `SampleFrame`.

pub mod frame;

pub use frame::SampleFrame;

use crate::error::Result;
use crate::protocol::{FrameHeader, HEADER_SIZE};
use crate::transport::{AcquiredBuffer, SharedBufferTransport, StreamTransport, Transport};

/// Result of one receive cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Samples were decoded into the frame
    Frame(FrameHeader),
    /// The header announced no payload; the frame is left untouched
    Empty(FrameHeader),
}

impl FrameOutcome {
    pub fn header(&self) -> &FrameHeader {
        match self {
            Self::Frame(header) | Self::Empty(header) => header,
        }
    }

    pub fn has_samples(&self) -> bool {
        matches!(self, Self::Frame(_))
    }
}

/// Frame receiver
pub struct FrameReceiver {
    /// Payload scratch buffer, oversized to avoid regrowth
    scratch: Vec<u8>,
    scratch_slack: usize,
    /// Channel count latched from the first header (M)
    channel_count: usize,
    frames_received: u64,
    empty_frames: u64,
    bytes_received: u64,
}

impl FrameReceiver {
    /// `scratch_slack` extra bytes are allocated whenever the scratch buffer grows
    pub fn new(scratch_slack: usize) -> Self {
        Self {
            scratch: Vec::new(),
            scratch_slack,
            channel_count: 0,
            frames_received: 0,
            empty_frames: 0,
            bytes_received: 0,
        }
    }

    /// Latched channel count, 0 until a header has been seen
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Forget the latched channel count
    pub fn reset_channel_count(&mut self) {
        self.channel_count = 0;
    }

    pub fn scratch_capacity(&self) -> usize {
        self.scratch.len()
    }

    /// Receive one frame from `transport` into `frame`
    pub fn receive(
        &mut self,
        transport: &mut Transport,
        frame: &mut SampleFrame,
    ) -> Result<FrameOutcome> {
        match transport {
            Transport::Stream(stream) => self.receive_stream(stream, frame),
            Transport::SharedBuffer(shared) => self.receive_shared(shared, frame),
        }
    }

    /// Stream path: exact header read, then exact payload read
    pub fn receive_stream(
        &mut self,
        stream: &mut StreamTransport,
        frame: &mut SampleFrame,
    ) -> Result<FrameOutcome> {
        tracing::trace!("Starting IQ header reception");
        let mut header_bytes = [0u8; HEADER_SIZE];
        stream.receive_into(&mut header_bytes)?;

        let header = match FrameHeader::decode(&header_bytes) {
            Ok(header) => header,
            Err(e) => {
                // The byte stream is out of sync; it cannot be trusted again.
                tracing::error!("Malformed IQ header on data stream: {}", e);
                stream.close();
                return Err(e.into());
            }
        };
        self.latch(&header);

        let payload_size = header.payload_size();
        if payload_size == 0 {
            self.empty_frames += 1;
            return Ok(FrameOutcome::Empty(header));
        }

        if self.scratch.len() < payload_size {
            self.scratch.resize(payload_size + self.scratch_slack, 0);
        }
        tracing::trace!("Total bytes to receive: {}", payload_size);
        stream.receive_into(&mut self.scratch[..payload_size])?;

        frame.load(&header, &self.scratch[..payload_size]);
        self.count(payload_size);
        Ok(FrameOutcome::Frame(header))
    }

    /// Shared memory path: decode in place, copy out, release the slot
    pub fn receive_shared(
        &mut self,
        shared: &mut SharedBufferTransport,
        frame: &mut SampleFrame,
    ) -> Result<FrameOutcome> {
        let acquired = match shared.acquire_next_buffer() {
            Ok(acquired) => acquired,
            Err(e) => {
                if let Some(index) = shared.granted() {
                    let _ = shared.release_buffer(index);
                }
                return Err(e.into());
            }
        };
        let index = acquired.index();
        let outcome = self.decode_acquired(&acquired, frame);

        // Released even when decoding failed so the producer never starves.
        shared.release_buffer(index)?;
        outcome
    }

    fn decode_acquired(
        &mut self,
        acquired: &AcquiredBuffer<'_>,
        frame: &mut SampleFrame,
    ) -> Result<FrameOutcome> {
        let header = FrameHeader::decode(acquired.header_bytes())?;
        self.latch(&header);

        let payload_size = header.payload_size();
        if payload_size == 0 {
            self.empty_frames += 1;
            return Ok(FrameOutcome::Empty(header));
        }
        let payload = acquired.payload(payload_size)?;
        frame.load(&header, payload);
        self.count(payload_size);
        Ok(FrameOutcome::Frame(header))
    }

    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            frames_received: self.frames_received,
            empty_frames: self.empty_frames,
            bytes_received: self.bytes_received,
            channel_count: self.channel_count,
        }
    }

    fn latch(&mut self, header: &FrameHeader) {
        if self.channel_count == 0 && header.active_ant_chs > 0 {
            self.channel_count = header.channel_count();
            tracing::info!("Channel count latched: M = {}", self.channel_count);
        }
    }

    fn count(&mut self, payload_size: usize) {
        self.frames_received += 1;
        self.bytes_received += payload_size as u64;
    }
}

/// Receiver statistics
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    pub frames_received: u64,
    pub empty_frames: u64,
    pub bytes_received: u64,
    pub channel_count: usize,
}
