//! Shape-stable complex sample buffer
//!
//! Holds one frame as `[channels][samples_per_channel]` complex samples in a
//! single row-major allocation. Frames of the same shape reuse the
//! allocation; a shape change replaces it.

use num_complex::Complex32;

use crate::protocol::FrameHeader;

/// Decoded multichannel IQ frame
#[derive(Debug, Clone, Default)]
pub struct SampleFrame {
    data: Vec<Complex32>,
    channels: usize,
    samples_per_channel: usize,
    header: Option<FrameHeader>,
    reallocations: u64,
}

impl SampleFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-allocate for a known shape
    pub fn with_shape(channels: usize, samples_per_channel: usize) -> Self {
        let mut frame = Self::new();
        frame.reshape(channels, samples_per_channel);
        frame
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.channels, self.samples_per_channel)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn samples_per_channel(&self) -> usize {
        self.samples_per_channel
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Samples of one channel
    pub fn channel(&self, index: usize) -> Option<&[Complex32]> {
        if index >= self.channels {
            return None;
        }
        let start = index * self.samples_per_channel;
        Some(&self.data[start..start + self.samples_per_channel])
    }

    /// Iterate over the channels in order
    pub fn rows(&self) -> impl Iterator<Item = &[Complex32]> {
        (0..self.channels).filter_map(move |ch| self.channel(ch))
    }

    pub fn as_slice(&self) -> &[Complex32] {
        &self.data
    }

    /// Address of the backing allocation
    pub fn as_ptr(&self) -> *const Complex32 {
        self.data.as_ptr()
    }

    /// Header of the frame currently held
    pub fn header(&self) -> Option<&FrameHeader> {
        self.header.as_ref()
    }

    /// Number of times the backing allocation was replaced
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    /// Resize for a new shape; returns true if the buffer was reallocated
    pub fn reshape(&mut self, channels: usize, samples_per_channel: usize) -> bool {
        if self.shape() == (channels, samples_per_channel) && !self.data.is_empty() {
            return false;
        }
        self.data = vec![Complex32::default(); channels * samples_per_channel];
        self.channels = channels;
        self.samples_per_channel = samples_per_channel;
        self.reallocations += 1;
        true
    }

    /// Copy a raw payload described by `header` into the buffer
    pub fn load(&mut self, header: &FrameHeader, payload: &[u8]) {
        debug_assert_eq!(payload.len(), header.payload_size());
        self.reshape(header.channel_count(), header.samples_per_channel());
        decode_samples(&mut self.data, payload, header.sample_bit_depth);
        self.header = Some(header.clone());
    }
}

/// Convert interleaved real/imaginary components into complex samples
///
/// 32 bit components are little-endian `f32`; 16 and 8 bit components are
/// signed integers widened to `f32` without scaling.
pub fn decode_samples(out: &mut [Complex32], payload: &[u8], bit_depth: u32) {
    match bit_depth {
        32 => {
            for (sample, c) in out.iter_mut().zip(payload.chunks_exact(8)) {
                let re = f32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                let im = f32::from_le_bytes([c[4], c[5], c[6], c[7]]);
                *sample = Complex32::new(re, im);
            }
        }
        16 => {
            for (sample, c) in out.iter_mut().zip(payload.chunks_exact(4)) {
                let re = i16::from_le_bytes([c[0], c[1]]);
                let im = i16::from_le_bytes([c[2], c[3]]);
                *sample = Complex32::new(re as f32, im as f32);
            }
        }
        8 => {
            for (sample, c) in out.iter_mut().zip(payload.chunks_exact(2)) {
                *sample = Complex32::new(c[0] as i8 as f32, c[1] as i8 as f32);
            }
        }
        other => {
            tracing::warn!("Dropping samples with unsupported bit depth {}", other);
            out.fill(Complex32::default());
        }
    }
}

/// Encode complex samples as interleaved little-endian `f32` pairs
pub fn encode_samples_f32(samples: &[Complex32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 8);
    for sample in samples {
        out.extend_from_slice(&sample.re.to_le_bytes());
        out.extend_from_slice(&sample.im.to_le_bytes());
    }
    out
}
