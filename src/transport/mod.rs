//! IQ data transports
//!
//! The client receives frames either over a byte stream or through shared
//! memory. Both variants share the connect/close lifecycle; the frame
//! receiver matches on the variant to pick the read path.

pub mod shared;
pub mod stream;

pub use shared::{
    memory_segment, AcquiredBuffer, BufferSignal, MemoryProducer, MemorySegment,
    SharedBufferTransport, SharedMemory,
};
pub use stream::{open_tcp, ByteStream, StreamConnector, StreamTransport, TcpConnector};

use crate::config::DataInterface;
use crate::error::TransportError;

/// Data path to the firmware
pub enum Transport {
    Stream(StreamTransport),
    SharedBuffer(SharedBufferTransport),
}

impl Transport {
    pub fn connect(&mut self) -> Result<(), TransportError> {
        match self {
            Self::Stream(stream) => stream.connect(),
            Self::SharedBuffer(shared) => shared.connect(),
        }
    }

    pub fn close(&mut self) {
        match self {
            Self::Stream(stream) => stream.close(),
            Self::SharedBuffer(shared) => shared.close(),
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Self::Stream(stream) => stream.is_connected(),
            Self::SharedBuffer(shared) => shared.is_connected(),
        }
    }

    pub fn interface(&self) -> DataInterface {
        match self {
            Self::Stream(_) => DataInterface::Ethernet,
            Self::SharedBuffer(_) => DataInterface::SharedMemory,
        }
    }
}

impl From<StreamTransport> for Transport {
    fn from(stream: StreamTransport) -> Self {
        Self::Stream(stream)
    }
}

impl From<SharedBufferTransport> for Transport {
    fn from(shared: SharedBufferTransport) -> Self {
        Self::SharedBuffer(shared)
    }
}
