//! IQ frame header codec
//!
//! Every frame produced by the DAQ firmware starts with a fixed 1024 byte,
//! little-endian header. The header describes the payload that follows it:
//! how many channels are active, how many complex samples each channel
//! carries and how wide each real/imaginary component is.
//!
//! ```text
//! offset  field                  offset  field
//!      0  sync_word                 80  daq_block_index
//!      4  frame_type                84  cpi_index
//!      8  hardware_id[16]           88  ext_integration_cntr (u64)
//!     24  unit_id                   96  data_type
//!     28  active_ant_chs           100  sample_bit_depth
//!     32  ioo_type                 104  adc_overdrive_flags
//!     36  (pad)                    108  if_gains[32]
//!     40  rf_center_freq (u64)     236  delay_sync_flag
//!     48  adc_sampling_freq (u64)  240  iq_sync_flag
//!     56  sampling_freq (u64)      244  sync_state
//!     64  cpi_length               248  noise_source_state
//!     68  (pad)                    252  reserved[768]
//!     72  time_stamp (u64)        1020  header_version
//! ```

use bytes::{Buf, BufMut};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::HeaderError;

/// Size of the encoded header in bytes
pub const HEADER_SIZE: usize = 1024;

/// Sync word marking the start of a valid header
pub const SYNC_WORD: u32 = 0x2bf7_b95a;

/// Maximum number of receiver channels a header can describe
pub const MAX_CHANNELS: usize = 32;

/// Largest payload a header may announce (1 GiB)
pub const MAX_PAYLOAD_SIZE: u64 = 1 << 30;

/// Sample component widths the firmware can produce
pub const SUPPORTED_BIT_DEPTHS: [u32; 3] = [8, 16, 32];

/// Header layout version written by `FrameHeader::new`
pub const DEFAULT_HEADER_VERSION: u32 = 7;

const HARDWARE_ID_LEN: usize = 16;
const RESERVED_BYTES: usize = 768;

/// Frame type field of the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Regular IQ data
    Data,
    /// Keep-alive frame without usable samples
    Dummy,
    /// Test ramp pattern
    Ramp,
    /// Calibration frame (noise source enabled)
    Calibration,
    /// Waiting for an external trigger
    TriggerWait,
    /// Frame type this client does not know about
    Unknown(u32),
}

impl FrameType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Data,
            1 => Self::Dummy,
            2 => Self::Ramp,
            3 => Self::Calibration,
            4 => Self::TriggerWait,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Data => 0,
            Self::Dummy => 1,
            Self::Ramp => 2,
            Self::Calibration => 3,
            Self::TriggerWait => 4,
            Self::Unknown(other) => other,
        }
    }

    pub fn is_data(self) -> bool {
        self == Self::Data
    }
}

/// Decoded IQ frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub sync_word: u32,
    pub frame_type: FrameType,
    pub hardware_id: [u8; HARDWARE_ID_LEN],
    pub unit_id: u32,
    /// Number of active receiver channels (M)
    pub active_ant_chs: u32,
    pub ioo_type: u32,
    /// RF center frequency in Hz
    pub rf_center_freq: u64,
    /// ADC sampling frequency in Hz
    pub adc_sampling_freq: u64,
    /// Sampling frequency after decimation in Hz
    pub sampling_freq: u64,
    /// Complex samples per channel (CPI length)
    pub cpi_length: u32,
    /// Milliseconds since the Unix epoch
    pub time_stamp: u64,
    pub daq_block_index: u32,
    pub cpi_index: u32,
    pub ext_integration_cntr: u64,
    pub data_type: u32,
    /// Width of one real or imaginary component in bits
    pub sample_bit_depth: u32,
    pub adc_overdrive_flags: u32,
    /// Per-channel IF gains in tenths of dB
    pub if_gains: [u32; MAX_CHANNELS],
    pub delay_sync_flag: u32,
    pub iq_sync_flag: u32,
    pub sync_state: u32,
    pub noise_source_state: u32,
    pub header_version: u32,
}

impl FrameHeader {
    /// Encoded size in bytes
    pub const SIZE: usize = HEADER_SIZE;

    /// Create a data frame header for the given payload shape
    pub fn new(channels: u32, samples_per_channel: u32, sample_bit_depth: u32) -> Self {
        Self {
            sync_word: SYNC_WORD,
            frame_type: FrameType::Data,
            hardware_id: [0; HARDWARE_ID_LEN],
            unit_id: 0,
            active_ant_chs: channels,
            ioo_type: 0,
            rf_center_freq: 0,
            adc_sampling_freq: 0,
            sampling_freq: 0,
            cpi_length: samples_per_channel,
            time_stamp: 0,
            daq_block_index: 0,
            cpi_index: 0,
            ext_integration_cntr: 0,
            data_type: 0,
            sample_bit_depth,
            adc_overdrive_flags: 0,
            if_gains: [0; MAX_CHANNELS],
            delay_sync_flag: 0,
            iq_sync_flag: 0,
            sync_state: 0,
            noise_source_state: 0,
            header_version: DEFAULT_HEADER_VERSION,
        }
    }

    /// Decode a header from the first `HEADER_SIZE` bytes of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < HEADER_SIZE {
            return Err(HeaderError::TooShort {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..HEADER_SIZE];

        let sync_word = buf.get_u32_le();
        if sync_word != SYNC_WORD {
            return Err(HeaderError::BadSyncWord(sync_word));
        }

        let frame_type = FrameType::from_u32(buf.get_u32_le());
        let mut hardware_id = [0u8; HARDWARE_ID_LEN];
        buf.copy_to_slice(&mut hardware_id);
        let unit_id = buf.get_u32_le();
        let active_ant_chs = buf.get_u32_le();
        let ioo_type = buf.get_u32_le();
        buf.advance(4);
        let rf_center_freq = buf.get_u64_le();
        let adc_sampling_freq = buf.get_u64_le();
        let sampling_freq = buf.get_u64_le();
        let cpi_length = buf.get_u32_le();
        buf.advance(4);
        let time_stamp = buf.get_u64_le();
        let daq_block_index = buf.get_u32_le();
        let cpi_index = buf.get_u32_le();
        let ext_integration_cntr = buf.get_u64_le();
        let data_type = buf.get_u32_le();
        let sample_bit_depth = buf.get_u32_le();
        let adc_overdrive_flags = buf.get_u32_le();
        let mut if_gains = [0u32; MAX_CHANNELS];
        for gain in if_gains.iter_mut() {
            *gain = buf.get_u32_le();
        }
        let delay_sync_flag = buf.get_u32_le();
        let iq_sync_flag = buf.get_u32_le();
        let sync_state = buf.get_u32_le();
        let noise_source_state = buf.get_u32_le();
        buf.advance(RESERVED_BYTES);
        let header_version = buf.get_u32_le();
        debug_assert!(!buf.has_remaining());

        let header = Self {
            sync_word,
            frame_type,
            hardware_id,
            unit_id,
            active_ant_chs,
            ioo_type,
            rf_center_freq,
            adc_sampling_freq,
            sampling_freq,
            cpi_length,
            time_stamp,
            daq_block_index,
            cpi_index,
            ext_integration_cntr,
            data_type,
            sample_bit_depth,
            adc_overdrive_flags,
            if_gains,
            delay_sync_flag,
            iq_sync_flag,
            sync_state,
            noise_source_state,
            header_version,
        };
        header.validate()?;
        Ok(header)
    }

    /// Encode into a fresh header-sized array
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut buf = &mut out[..];
        self.encode_into(&mut buf);
        out
    }

    /// Append the encoded header to `buf`
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.sync_word);
        buf.put_u32_le(self.frame_type.as_u32());
        buf.put_slice(&self.hardware_id);
        buf.put_u32_le(self.unit_id);
        buf.put_u32_le(self.active_ant_chs);
        buf.put_u32_le(self.ioo_type);
        buf.put_bytes(0, 4);
        buf.put_u64_le(self.rf_center_freq);
        buf.put_u64_le(self.adc_sampling_freq);
        buf.put_u64_le(self.sampling_freq);
        buf.put_u32_le(self.cpi_length);
        buf.put_bytes(0, 4);
        buf.put_u64_le(self.time_stamp);
        buf.put_u32_le(self.daq_block_index);
        buf.put_u32_le(self.cpi_index);
        buf.put_u64_le(self.ext_integration_cntr);
        buf.put_u32_le(self.data_type);
        buf.put_u32_le(self.sample_bit_depth);
        buf.put_u32_le(self.adc_overdrive_flags);
        for gain in &self.if_gains {
            buf.put_u32_le(*gain);
        }
        buf.put_u32_le(self.delay_sync_flag);
        buf.put_u32_le(self.iq_sync_flag);
        buf.put_u32_le(self.sync_state);
        buf.put_u32_le(self.noise_source_state);
        buf.put_bytes(0, RESERVED_BYTES);
        buf.put_u32_le(self.header_version);
    }

    fn validate(&self) -> Result<(), HeaderError> {
        if self.active_ant_chs as usize > MAX_CHANNELS {
            return Err(HeaderError::TooManyChannels(self.active_ant_chs));
        }
        let carries_samples = self.active_ant_chs > 0 && self.cpi_length > 0;
        if carries_samples && !SUPPORTED_BIT_DEPTHS.contains(&self.sample_bit_depth) {
            return Err(HeaderError::UnsupportedBitDepth(self.sample_bit_depth));
        }
        let announced = self.cpi_length as u64
            * self.active_ant_chs as u64
            * 2
            * (self.sample_bit_depth as u64 / 8);
        if announced > MAX_PAYLOAD_SIZE {
            return Err(HeaderError::PayloadTooLarge(announced));
        }
        Ok(())
    }

    /// Exact number of payload bytes following this header
    pub fn payload_size(&self) -> usize {
        self.cpi_length as usize
            * self.active_ant_chs as usize
            * 2
            * (self.sample_bit_depth as usize / 8)
    }

    /// True when the frame carries no samples
    pub fn is_empty(&self) -> bool {
        self.payload_size() == 0
    }

    pub fn channel_count(&self) -> usize {
        self.active_ant_chs as usize
    }

    pub fn samples_per_channel(&self) -> usize {
        self.cpi_length as usize
    }

    /// Sequence number of the coherent processing interval
    pub fn sequence(&self) -> u32 {
        self.cpi_index
    }

    /// Decimation ratio between the ADC and the delivered sample rate
    pub fn decimation(&self) -> u64 {
        if self.sampling_freq == 0 {
            1
        } else {
            (self.adc_sampling_freq / self.sampling_freq).max(1)
        }
    }

    /// Acquisition time of the frame, if the timestamp is representable
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.time_stamp)
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    /// Hardware identifier with NUL padding stripped
    pub fn hardware_id_str(&self) -> String {
        let end = self
            .hardware_id
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(HARDWARE_ID_LEN);
        String::from_utf8_lossy(&self.hardware_id[..end]).into_owned()
    }

    /// Set the hardware identifier, truncating to 16 bytes
    pub fn set_hardware_id(&mut self, id: &str) {
        self.hardware_id = [0; HARDWARE_ID_LEN];
        let bytes = id.as_bytes();
        let len = bytes.len().min(HARDWARE_ID_LEN);
        self.hardware_id[..len].copy_from_slice(&bytes[..len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_payload_size_scenario() {
        let header = FrameHeader::new(5, 128, 16);
        assert_eq!(header.payload_size(), 2560);
    }

    #[test]
    fn test_layout_offsets() {
        let mut header = FrameHeader::new(5, 1024, 32);
        header.rf_center_freq = 0x1122_3344_5566_7788;
        header.time_stamp = 42;
        header.header_version = 9;
        let bytes = header.encode();

        assert_eq!(&bytes[0..4], &SYNC_WORD.to_le_bytes());
        assert_eq!(&bytes[28..32], &5u32.to_le_bytes());
        assert_eq!(&bytes[40..48], &0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(&bytes[64..68], &1024u32.to_le_bytes());
        assert_eq!(&bytes[72..80], &42u64.to_le_bytes());
        assert_eq!(&bytes[100..104], &32u32.to_le_bytes());
        assert_eq!(&bytes[1020..1024], &9u32.to_le_bytes());
    }

    #[test]
    fn test_decode_too_short() {
        let bytes = FrameHeader::new(1, 1, 8).encode();
        let err = FrameHeader::decode(&bytes[..HEADER_SIZE - 1]).unwrap_err();
        assert_eq!(
            err,
            HeaderError::TooShort {
                expected: HEADER_SIZE,
                actual: HEADER_SIZE - 1
            }
        );
    }

    #[test]
    fn test_decode_bad_sync_word() {
        let mut bytes = FrameHeader::new(4, 16, 32).encode();
        bytes[0] ^= 0xff;
        assert!(matches!(
            FrameHeader::decode(&bytes),
            Err(HeaderError::BadSyncWord(_))
        ));
    }

    #[test]
    fn test_decode_rejects_odd_bit_depth() {
        let bytes = FrameHeader::new(4, 16, 12).encode();
        assert_eq!(
            FrameHeader::decode(&bytes),
            Err(HeaderError::UnsupportedBitDepth(12))
        );
    }

    #[test]
    fn test_decode_rejects_too_many_channels() {
        let bytes = FrameHeader::new(MAX_CHANNELS as u32 + 1, 16, 16).encode();
        assert_eq!(
            FrameHeader::decode(&bytes),
            Err(HeaderError::TooManyChannels(33))
        );
    }

    #[test]
    fn test_decode_rejects_oversized_payload() {
        let bytes = FrameHeader::new(32, u32::MAX, 32).encode();
        assert_eq!(
            FrameHeader::decode(&bytes),
            Err(HeaderError::PayloadTooLarge(u32::MAX as u64 * 32 * 8))
        );

        // Exactly at the limit is still accepted.
        let at_limit = FrameHeader::new(32, (MAX_PAYLOAD_SIZE / (32 * 8)) as u32, 32);
        assert_eq!(at_limit.payload_size() as u64, MAX_PAYLOAD_SIZE);
        assert!(FrameHeader::decode(&at_limit.encode()).is_ok());
    }

    #[test]
    fn test_empty_frame_allows_zero_bit_depth() {
        let mut header = FrameHeader::new(5, 0, 0);
        header.frame_type = FrameType::Dummy;
        let decoded = FrameHeader::decode(&header.encode()).unwrap();
        assert!(decoded.is_empty());
        assert!(!decoded.frame_type.is_data());
    }

    #[test]
    fn test_decode_ignores_trailing_payload() {
        let header = FrameHeader::new(2, 4, 8);
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(&[0xaa; 16]);
        assert_eq!(FrameHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_hardware_id_and_derived_fields() {
        let mut header = FrameHeader::new(5, 1024, 32);
        header.set_hardware_id("K5");
        header.adc_sampling_freq = 2_400_000;
        header.sampling_freq = 300_000;
        header.time_stamp = 1_700_000_000_000;
        assert_eq!(header.hardware_id_str(), "K5");
        assert_eq!(header.decimation(), 8);
        assert_eq!(header.timestamp().unwrap().timestamp(), 1_700_000_000);
    }

    prop_compose! {
        fn arb_header()(
            channels in 1u32..=MAX_CHANNELS as u32,
            samples in 1u32..65536,
            depth in prop::sample::select(SUPPORTED_BIT_DEPTHS.to_vec()),
            frame_type in 0u32..8,
            rf_center_freq in any::<u64>(),
            time_stamp in any::<u64>(),
            cpi_index in any::<u32>(),
            gains in prop::array::uniform32(0u32..500),
            version in any::<u32>(),
        ) -> FrameHeader {
            let mut header = FrameHeader::new(channels, samples, depth);
            header.frame_type = FrameType::from_u32(frame_type);
            header.rf_center_freq = rf_center_freq;
            header.time_stamp = time_stamp;
            header.cpi_index = cpi_index;
            header.if_gains = gains;
            header.header_version = version;
            header
        }
    }

    proptest! {
        #[test]
        fn prop_header_roundtrip(header in arb_header()) {
            let decoded = FrameHeader::decode(&header.encode()).unwrap();
            prop_assert_eq!(decoded, header);
        }

        #[test]
        fn prop_payload_size_formula(
            channels in 0u32..=MAX_CHANNELS as u32,
            samples in 0u32..1_000_000,
            depth in prop::sample::select(SUPPORTED_BIT_DEPTHS.to_vec()),
        ) {
            let header = FrameHeader::new(channels, samples, depth);
            let expected = samples as usize * channels as usize * 2 * (depth as usize / 8);
            prop_assert_eq!(header.payload_size(), expected);
        }
    }
}
