//! Error types for the DAQ client

use thiserror::Error;

/// Main error type for the client
#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed header: {0}")]
    MalformedHeader(#[from] HeaderError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The shared-memory producer asked the consumer to stop.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Error::Transport(TransportError::Terminated(_)))
    }

    /// The data connection stayed silent past its read timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Transport(TransportError::Timeout(_)))
    }

    /// The peer closed a socket or an I/O error broke it.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Error::Transport(TransportError::ConnectionLost(_)))
            || matches!(self, Error::Command(CommandError::ConnectionLost(_)))
    }
}

/// IQ header decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("header too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("bad sync word: 0x{0:08x}")]
    BadSyncWord(u32),

    #[error("too many active channels: {0}")]
    TooManyChannels(u32),

    #[error("unsupported sample bit depth: {0}")]
    UnsupportedBitDepth(u32),

    #[error("payload of {0} bytes exceeds the frame size limit")]
    PayloadTooLarge(u64),
}

/// Data path errors (stream socket or shared memory)
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out waiting for data: {0}")]
    Timeout(String),

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Producer terminated the stream (signal {0})")]
    Terminated(u8),

    #[error("Shared memory error: {0}")]
    SharedMemory(String),

    #[error("Release of buffer {index} that was not acquired")]
    InvalidRelease { index: usize },

    #[error("Frame payload of {needed} bytes exceeds buffer of {available} bytes")]
    PayloadOverrun { needed: usize, available: usize },
}

/// Control channel errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("DAQ rejected command {opcode}: status {status:?}")]
    Failed { opcode: String, status: String },

    #[error("Timed out waiting for acknowledgement")]
    Timeout,

    #[error("Control connection lost: {0}")]
    ConnectionLost(String),

    #[error("Command payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Unknown opcode: {0:?}")]
    UnknownOpcode([u8; 4]),

    #[error("{0} is never acknowledged and cannot be queued")]
    Unacknowledged(String),

    #[error("Command dispatcher is closed")]
    DispatcherClosed,
}

/// Result type alias for the client
pub type Result<T> = std::result::Result<T, Error>;
