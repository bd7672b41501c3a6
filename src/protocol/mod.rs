//! Wire formats shared with the DAQ firmware
//!
//! - `header`: the 1024 byte IQ frame header
//! - `command`: 128 byte control commands and acknowledgements
//! - `DataToken`: ASCII requests sent on the IQ data socket

pub mod command;
pub mod header;

pub use command::{AckFrame, AckStatus, CommandFrame, Opcode};
pub use header::{FrameHeader, FrameType, HEADER_SIZE};

/// ASCII requests understood by the firmware's IQ data server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataToken {
    /// Switch the server into IQ streaming mode
    Streaming,
    /// Request the next IQ frame
    IqDownload,
    /// Close the data connection
    Quit,
}

impl DataToken {
    pub const ALL: [DataToken; 3] = [Self::Streaming, Self::IqDownload, Self::Quit];

    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Streaming => b"streaming",
            Self::IqDownload => b"IQDownload",
            Self::Quit => b"q",
        }
    }

    /// Match a token at the start of `bytes`, returning it and its length
    pub fn parse_prefix(bytes: &[u8]) -> Option<(Self, usize)> {
        Self::ALL.iter().find_map(|token| {
            let raw = token.as_bytes();
            bytes.starts_with(raw).then_some((*token, raw.len()))
        })
    }
}
