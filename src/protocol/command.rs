//! Control interface command and acknowledgement frames
//!
//! Commands are always exactly 128 bytes: a 4 byte ASCII opcode followed by
//! the opcode specific payload, zero padded. The firmware answers every
//! command except `EXIT` with a 128 byte acknowledgement whose first four
//! bytes carry an ASCII status.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CommandError;

/// Size of every command frame
pub const COMMAND_FRAME_SIZE: usize = 128;

/// Size of every acknowledgement frame
pub const ACK_FRAME_SIZE: usize = 128;

/// Length of the ASCII opcode and status fields
pub const TAG_LEN: usize = 4;

/// Largest payload that fits behind the opcode
pub const MAX_PAYLOAD: usize = COMMAND_FRAME_SIZE - TAG_LEN;

/// Most channels a single `GAIN` command can address
pub const MAX_GAIN_CHANNELS: usize = MAX_PAYLOAD / 4;

/// Status reported when a command finished successfully
pub const STATUS_FINISHED: [u8; TAG_LEN] = *b"FNSD";

/// Command opcodes understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Opcode {
    Init,
    Freq,
    Gain,
    Agc,
    Exit,
}

impl Opcode {
    pub const fn tag(self) -> [u8; TAG_LEN] {
        match self {
            Self::Init => *b"INIT",
            Self::Freq => *b"FREQ",
            Self::Gain => *b"GAIN",
            Self::Agc => *b"AGC ",
            Self::Exit => *b"EXIT",
        }
    }

    pub fn from_tag(tag: [u8; TAG_LEN]) -> Option<Self> {
        match &tag {
            b"INIT" => Some(Self::Init),
            b"FREQ" => Some(Self::Freq),
            b"GAIN" => Some(Self::Gain),
            b"AGC " => Some(Self::Agc),
            b"EXIT" => Some(Self::Exit),
            _ => None,
        }
    }

    /// Whether the firmware replies to this command
    pub fn expects_ack(self) -> bool {
        self != Self::Exit
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        f.write_str(String::from_utf8_lossy(&tag).trim_end())
    }
}

/// A fixed size command frame
#[derive(Clone, PartialEq, Eq)]
pub struct CommandFrame {
    bytes: [u8; COMMAND_FRAME_SIZE],
}

impl CommandFrame {
    /// Build a frame from an opcode and its payload
    pub fn new(opcode: Opcode, payload: &[u8]) -> Result<Self, CommandError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(CommandError::PayloadTooLarge(payload.len()));
        }
        let mut bytes = [0u8; COMMAND_FRAME_SIZE];
        bytes[..TAG_LEN].copy_from_slice(&opcode.tag());
        bytes[TAG_LEN..TAG_LEN + payload.len()].copy_from_slice(payload);
        Ok(Self { bytes })
    }

    pub fn init() -> Self {
        Self::bare(Opcode::Init)
    }

    /// `FREQ` with the center frequency in Hz
    pub fn frequency(hz: u64) -> Self {
        let mut bytes = [0u8; COMMAND_FRAME_SIZE];
        bytes[..TAG_LEN].copy_from_slice(&Opcode::Freq.tag());
        bytes[TAG_LEN..TAG_LEN + 8].copy_from_slice(&hz.to_le_bytes());
        Self { bytes }
    }

    /// `GAIN` with one value per channel, in tenths of dB
    pub fn gains(gains_tenths: &[u32]) -> Result<Self, CommandError> {
        if gains_tenths.len() > MAX_GAIN_CHANNELS {
            return Err(CommandError::PayloadTooLarge(gains_tenths.len() * 4));
        }
        let payload: Vec<u8> = gains_tenths
            .iter()
            .flat_map(|gain| gain.to_le_bytes())
            .collect();
        Self::new(Opcode::Gain, &payload)
    }

    pub fn agc() -> Self {
        Self::bare(Opcode::Agc)
    }

    pub fn exit() -> Self {
        Self::bare(Opcode::Exit)
    }

    fn bare(opcode: Opcode) -> Self {
        let mut bytes = [0u8; COMMAND_FRAME_SIZE];
        bytes[..TAG_LEN].copy_from_slice(&opcode.tag());
        Self { bytes }
    }

    /// Parse a received frame, rejecting unknown opcodes
    pub fn from_bytes(bytes: [u8; COMMAND_FRAME_SIZE]) -> Result<Self, CommandError> {
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&bytes[..TAG_LEN]);
        if Opcode::from_tag(tag).is_none() {
            return Err(CommandError::UnknownOpcode(tag));
        }
        Ok(Self { bytes })
    }

    pub fn opcode(&self) -> Opcode {
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&self.bytes[..TAG_LEN]);
        // Constructors and from_bytes only admit known tags.
        Opcode::from_tag(tag).unwrap_or(Opcode::Exit)
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[TAG_LEN..]
    }

    pub fn as_bytes(&self) -> &[u8; COMMAND_FRAME_SIZE] {
        &self.bytes
    }

    /// Center frequency carried by a `FREQ` frame
    pub fn frequency_hz(&self) -> Option<u64> {
        if self.opcode() != Opcode::Freq {
            return None;
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.payload()[..8]);
        Some(u64::from_le_bytes(raw))
    }

    /// Gain values carried by a `GAIN` frame for `channels` channels
    pub fn gain_values(&self, channels: usize) -> Option<Vec<u32>> {
        if self.opcode() != Opcode::Gain || channels > MAX_GAIN_CHANNELS {
            return None;
        }
        let values = self.payload()[..channels * 4]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(values)
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandFrame")
            .field("opcode", &self.opcode())
            .finish_non_exhaustive()
    }
}

/// Acknowledgement status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Finished,
    Other([u8; TAG_LEN]),
}

impl AckStatus {
    pub fn is_success(self) -> bool {
        self == Self::Finished
    }

    pub fn raw(self) -> [u8; TAG_LEN] {
        match self {
            Self::Finished => STATUS_FINISHED,
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.raw()))
    }
}

/// Acknowledgement frame received on the control channel
#[derive(Clone, PartialEq, Eq)]
pub struct AckFrame {
    bytes: [u8; ACK_FRAME_SIZE],
}

impl AckFrame {
    /// Build a reply carrying `status`
    pub fn new(status: [u8; TAG_LEN]) -> Self {
        let mut bytes = [0u8; ACK_FRAME_SIZE];
        bytes[..TAG_LEN].copy_from_slice(&status);
        Self { bytes }
    }

    pub fn finished() -> Self {
        Self::new(STATUS_FINISHED)
    }

    pub fn from_bytes(bytes: [u8; ACK_FRAME_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn status(&self) -> AckStatus {
        let mut raw = [0u8; TAG_LEN];
        raw.copy_from_slice(&self.bytes[..TAG_LEN]);
        if raw == STATUS_FINISHED {
            AckStatus::Finished
        } else {
            AckStatus::Other(raw)
        }
    }

    pub fn as_bytes(&self) -> &[u8; ACK_FRAME_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for AckFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckFrame")
            .field("status", &self.status().to_string())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_fixed_size() {
        let frames = [
            CommandFrame::init(),
            CommandFrame::frequency(433_000_000),
            CommandFrame::gains(&[100, 200, 300]).unwrap(),
            CommandFrame::agc(),
            CommandFrame::exit(),
        ];
        for frame in &frames {
            assert_eq!(frame.as_bytes().len(), COMMAND_FRAME_SIZE);
        }
    }

    #[test]
    fn test_frequency_layout() {
        let frame = CommandFrame::frequency(416_588_000);
        let bytes = frame.as_bytes();
        assert_eq!(&bytes[..4], b"FREQ");
        assert_eq!(&bytes[4..12], &416_588_000u64.to_le_bytes());
        assert!(bytes[12..].iter().all(|&b| b == 0));
        assert_eq!(frame.frequency_hz(), Some(416_588_000));
    }

    #[test]
    fn test_gain_layout() {
        let frame = CommandFrame::gains(&[496, 496, 0, 77, 12]).unwrap();
        let bytes = frame.as_bytes();
        assert_eq!(&bytes[..4], b"GAIN");
        assert_eq!(&bytes[4..8], &496u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &12u32.to_le_bytes());
        assert!(bytes[24..].iter().all(|&b| b == 0));
        assert_eq!(frame.gain_values(5).unwrap(), vec![496, 496, 0, 77, 12]);
    }

    #[test]
    fn test_agc_tag_has_trailing_space() {
        let frame = CommandFrame::agc();
        assert_eq!(&frame.as_bytes()[..4], b"AGC ");
        assert!(frame.payload().iter().all(|&b| b == 0));
        assert_eq!(Opcode::Agc.to_string(), "AGC");
    }

    #[test]
    fn test_gain_channel_limit() {
        assert!(CommandFrame::gains(&[0; MAX_GAIN_CHANNELS]).is_ok());
        assert!(matches!(
            CommandFrame::gains(&[0; MAX_GAIN_CHANNELS + 1]),
            Err(CommandError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_from_bytes_rejects_unknown_opcode() {
        let mut bytes = [0u8; COMMAND_FRAME_SIZE];
        bytes[..4].copy_from_slice(b"OFST");
        assert_eq!(
            CommandFrame::from_bytes(bytes),
            Err(CommandError::UnknownOpcode(*b"OFST"))
        );
    }

    #[test]
    fn test_only_exit_goes_unacknowledged() {
        assert!(!Opcode::Exit.expects_ack());
        for opcode in [Opcode::Init, Opcode::Freq, Opcode::Gain, Opcode::Agc] {
            assert!(opcode.expects_ack());
        }
    }

    #[test]
    fn test_ack_status() {
        assert!(AckFrame::finished().status().is_success());
        let fail = AckFrame::new(*b"FAIL");
        assert_eq!(fail.status(), AckStatus::Other(*b"FAIL"));
        assert_eq!(fail.status().to_string(), "FAIL");
    }
}
