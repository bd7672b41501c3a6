//! Shared memory transport for IQ frames
//!
//! The firmware writes complete frames (header + payload) into one of two
//! shared memory slots and signals which slot is ready. The consumer reads
//! the slot in place and hands it back, after which the producer may reuse
//! it. A slot is touched only between its grant and its release, and it is
//! released exactly once.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::constants::SHMEM_SLOTS;
use crate::error::TransportError;
use crate::protocol::{FrameHeader, HEADER_SIZE};

/// Signal value the firmware uses to stop its consumers
pub const TERMINATE_SIGNAL: u8 = 255;

/// Outcome of waiting on the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSignal {
    /// Slot `index` holds a complete frame
    Ready(usize),
    /// The producer is shutting down
    Terminate(u8),
}

/// Interface of a shared memory segment provided by the firmware side
pub trait SharedMemory: Send {
    /// Attach to the segment
    fn init(&mut self) -> Result<(), TransportError>;

    /// Block until the producer grants a slot or terminates
    fn wait_buffer_free(&mut self) -> Result<BufferSignal, TransportError>;

    /// Raw bytes of a granted slot
    fn buffer(&self, index: usize) -> Option<&[u8]>;

    /// Hand slot `index` back to the producer
    fn signal_buffer_ready(&mut self, index: usize) -> Result<(), TransportError>;

    /// Detach from the segment
    fn destroy(&mut self);
}

/// A granted slot: header region plus a zero-copy payload window
pub struct AcquiredBuffer<'a> {
    index: usize,
    bytes: &'a [u8],
}

impl<'a> AcquiredBuffer<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn header_bytes(&self) -> &'a [u8] {
        &self.bytes[..HEADER_SIZE]
    }

    /// The first `len` payload bytes, borrowed from the slot
    pub fn payload(&self, len: usize) -> Result<&'a [u8], TransportError> {
        let available = self.bytes.len() - HEADER_SIZE;
        if len > available {
            return Err(TransportError::PayloadOverrun {
                needed: len,
                available,
            });
        }
        Ok(&self.bytes[HEADER_SIZE..HEADER_SIZE + len])
    }
}

/// Shared buffer transport
pub struct SharedBufferTransport {
    segment: Box<dyn SharedMemory>,
    connected: bool,
    granted: Option<usize>,
}

impl SharedBufferTransport {
    pub fn new(segment: impl SharedMemory + 'static) -> Self {
        Self {
            segment: Box::new(segment),
            connected: false,
            granted: None,
        }
    }

    pub fn connect(&mut self) -> Result<(), TransportError> {
        if self.connected {
            return Ok(());
        }
        self.segment.init()?;
        self.connected = true;
        tracing::info!("Shared memory interface attached");
        Ok(())
    }

    /// Release any held slot and detach from the segment
    pub fn close(&mut self) {
        if let Some(index) = self.granted.take() {
            if let Err(e) = self.segment.signal_buffer_ready(index) {
                tracing::warn!("Failed to release slot {} on close: {}", index, e);
            }
        }
        if self.connected {
            self.segment.destroy();
            self.connected = false;
            tracing::info!("Shared memory interface released");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Slot currently held by the consumer
    pub fn granted(&self) -> Option<usize> {
        self.granted
    }

    /// Block until the producer grants the next slot
    pub fn acquire_next_buffer(&mut self) -> Result<AcquiredBuffer<'_>, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(index) = self.granted {
            return Err(TransportError::SharedMemory(format!(
                "slot {} must be released before acquiring another",
                index
            )));
        }

        let index = match self.segment.wait_buffer_free()? {
            BufferSignal::Ready(index) if index < SHMEM_SLOTS => index,
            BufferSignal::Ready(index) => {
                tracing::info!("Terminating, unexpected slot signal {}", index);
                return Err(TransportError::Terminated(TERMINATE_SIGNAL));
            }
            BufferSignal::Terminate(signal) => {
                tracing::info!("Terminating, signal: {}", signal);
                return Err(TransportError::Terminated(signal));
            }
        };
        self.granted = Some(index);

        let bytes = self.segment.buffer(index).ok_or_else(|| {
            TransportError::SharedMemory(format!("slot {} is not mapped", index))
        })?;
        if bytes.len() < HEADER_SIZE {
            return Err(TransportError::PayloadOverrun {
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        }
        Ok(AcquiredBuffer { index, bytes })
    }

    /// Signal the producer that slot `index` may be reused
    pub fn release_buffer(&mut self, index: usize) -> Result<(), TransportError> {
        if self.granted != Some(index) {
            return Err(TransportError::InvalidRelease { index });
        }
        self.granted = None;
        self.segment.signal_buffer_ready(index)
    }
}

enum ProducerSignal {
    Filled(usize, Vec<u8>),
    Terminate,
}

/// In-process double-buffered segment
///
/// Slots move between producer and consumer by ownership, so neither side
/// can touch a slot it was not granted.
pub struct MemorySegment {
    slots: Vec<Option<Vec<u8>>>,
    ready_rx: Receiver<ProducerSignal>,
    free_tx: Sender<(usize, Vec<u8>)>,
    attached: bool,
}

/// Producer half of a `MemorySegment`
pub struct MemoryProducer {
    ready_tx: Sender<ProducerSignal>,
    free_rx: Receiver<(usize, Vec<u8>)>,
    /// Slot whose fill failed, reused by the next publish
    spare: Mutex<Option<(usize, Vec<u8>)>>,
}

/// Create a segment with `slot_size` byte slots and its producer
pub fn memory_segment(slot_size: usize) -> (MemorySegment, MemoryProducer) {
    let (ready_tx, ready_rx) = bounded(SHMEM_SLOTS + 1);
    let (free_tx, free_rx) = bounded(SHMEM_SLOTS);
    for index in 0..SHMEM_SLOTS {
        // Capacity equals the slot count, so this cannot block.
        let _ = free_tx.send((index, vec![0u8; slot_size]));
    }

    let segment = MemorySegment {
        slots: (0..SHMEM_SLOTS).map(|_| None).collect(),
        ready_rx,
        free_tx,
        attached: false,
    };
    let producer = MemoryProducer {
        ready_tx,
        free_rx,
        spare: Mutex::new(None),
    };
    (segment, producer)
}

impl SharedMemory for MemorySegment {
    fn init(&mut self) -> Result<(), TransportError> {
        self.attached = true;
        Ok(())
    }

    fn wait_buffer_free(&mut self) -> Result<BufferSignal, TransportError> {
        if !self.attached {
            return Err(TransportError::NotConnected);
        }
        match self.ready_rx.recv() {
            Ok(ProducerSignal::Filled(index, bytes)) => {
                self.slots[index] = Some(bytes);
                Ok(BufferSignal::Ready(index))
            }
            Ok(ProducerSignal::Terminate) | Err(_) => Ok(BufferSignal::Terminate(TERMINATE_SIGNAL)),
        }
    }

    fn buffer(&self, index: usize) -> Option<&[u8]> {
        self.slots.get(index)?.as_deref()
    }

    fn signal_buffer_ready(&mut self, index: usize) -> Result<(), TransportError> {
        let bytes = self
            .slots
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(TransportError::InvalidRelease { index })?;
        self.free_tx
            .send((index, bytes))
            .map_err(|_| TransportError::SharedMemory("producer is gone".into()))
    }

    fn destroy(&mut self) {
        // Slots still held go back so a blocked producer can finish.
        for index in 0..self.slots.len() {
            if let Some(bytes) = self.slots[index].take() {
                let _ = self.free_tx.try_send((index, bytes));
            }
        }
        self.attached = false;
    }
}

impl MemoryProducer {
    /// Wait for a free slot, fill it with `fill` and publish it
    pub fn publish<F>(&self, fill: F) -> Result<usize, TransportError>
    where
        F: FnOnce(&mut [u8]) -> Result<(), TransportError>,
    {
        let spare = self.spare.lock().take();
        let (index, mut bytes) = match spare {
            Some(slot) => slot,
            None => self
                .free_rx
                .recv()
                .map_err(|_| TransportError::SharedMemory("consumer is gone".into()))?,
        };
        if let Err(e) = fill(&mut bytes) {
            *self.spare.lock() = Some((index, bytes));
            return Err(e);
        }
        self.ready_tx
            .send(ProducerSignal::Filled(index, bytes))
            .map_err(|_| TransportError::SharedMemory("consumer is gone".into()))?;
        Ok(index)
    }

    /// Publish a header followed by its payload
    pub fn publish_frame(
        &self,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<usize, TransportError> {
        self.publish(|slot| {
            let needed = HEADER_SIZE + payload.len();
            if needed > slot.len() {
                return Err(TransportError::PayloadOverrun {
                    needed,
                    available: slot.len(),
                });
            }
            slot[..HEADER_SIZE].copy_from_slice(&header.encode());
            slot[HEADER_SIZE..needed].copy_from_slice(payload);
            Ok(())
        })
    }

    /// Tell the consumer to stop
    pub fn terminate(&self) {
        let _ = self.ready_tx.send(ProducerSignal::Terminate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached(slot_size: usize) -> (SharedBufferTransport, MemoryProducer) {
        let (segment, producer) = memory_segment(slot_size);
        let mut transport = SharedBufferTransport::new(segment);
        transport.connect().unwrap();
        (transport, producer)
    }

    #[test]
    fn test_slots_ping_pong() {
        let (mut transport, producer) = attached(HEADER_SIZE + 64);
        let header = FrameHeader::new(1, 8, 32);

        assert_eq!(producer.publish_frame(&header, &[1; 64]).unwrap(), 0);
        assert_eq!(producer.publish_frame(&header, &[2; 64]).unwrap(), 1);

        for expected in [0usize, 1] {
            let acquired = transport.acquire_next_buffer().unwrap();
            let index = acquired.index();
            assert_eq!(index, expected);
            assert_eq!(acquired.payload(64).unwrap()[0], expected as u8 + 1);
            transport.release_buffer(index).unwrap();
        }

        // Slot 0 came back, so the producer can publish again.
        assert_eq!(producer.publish_frame(&header, &[3; 64]).unwrap(), 0);
    }

    #[test]
    fn test_terminate_signal() {
        let (mut transport, producer) = attached(HEADER_SIZE);
        producer.terminate();
        assert!(matches!(
            transport.acquire_next_buffer(),
            Err(TransportError::Terminated(TERMINATE_SIGNAL))
        ));
        assert_eq!(transport.granted(), None);
    }

    #[test]
    fn test_release_exactly_once() {
        let (mut transport, producer) = attached(HEADER_SIZE);
        producer
            .publish_frame(&FrameHeader::new(0, 0, 0), &[])
            .unwrap();
        let index = transport.acquire_next_buffer().unwrap().index();
        transport.release_buffer(index).unwrap();
        assert!(matches!(
            transport.release_buffer(index),
            Err(TransportError::InvalidRelease { .. })
        ));
    }

    #[test]
    fn test_acquire_requires_release() {
        let (mut transport, producer) = attached(HEADER_SIZE);
        let header = FrameHeader::new(0, 0, 0);
        producer.publish_frame(&header, &[]).unwrap();
        producer.publish_frame(&header, &[]).unwrap();
        let _ = transport.acquire_next_buffer().unwrap().index();
        assert!(matches!(
            transport.acquire_next_buffer(),
            Err(TransportError::SharedMemory(_))
        ));
    }

    #[test]
    fn test_payload_window_bounds() {
        let (mut transport, producer) = attached(HEADER_SIZE + 16);
        producer
            .publish_frame(&FrameHeader::new(1, 2, 32), &[0; 16])
            .unwrap();
        let acquired = transport.acquire_next_buffer().unwrap();
        assert!(acquired.payload(16).is_ok());
        assert!(matches!(
            acquired.payload(17),
            Err(TransportError::PayloadOverrun { .. })
        ));
    }

    #[test]
    fn test_oversized_frame_keeps_slot() {
        let (mut transport, producer) = attached(HEADER_SIZE + 8);
        assert!(matches!(
            producer.publish_frame(&FrameHeader::new(1, 2, 32), &[0; 16]),
            Err(TransportError::PayloadOverrun { .. })
        ));
        producer.publish_frame(&FrameHeader::new(1, 1, 32), &[0; 8]).unwrap();
        producer.publish_frame(&FrameHeader::new(1, 1, 32), &[0; 8]).unwrap();
        let index = transport.acquire_next_buffer().unwrap().index();
        assert_eq!(index, 0);
    }
}
