//! Entropy-decoder boundary: PCM frame type and codec traits.
//!
//! Engines own framing, seeking and repacking. Each compressed frame they
//! locate is handed to a [`FrameDecoder`] (or, for ALAC, a
//! [`PackedFrameDecoder`]); whatever sits behind the trait is a third-party
//! library. Tests substitute scripted fakes.

use crate::error::FrameError;

/// One decoded compressed frame.
///
/// `samples` holds `len * channels` interleaved, left-justified 32-bit signed
/// samples: the MSBs carry the audio regardless of source bit depth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PcmFrame {
    /// Interleaved sample storage. May be longer than the valid region.
    pub samples: Vec<i32>,
    /// Number of valid frames (samples per channel).
    pub len: usize,
    /// Sample rate of this frame in Hz.
    pub sample_rate: u32,
    /// Channel count (1 = mono, 2 = stereo).
    pub channels: u8,
}

impl PcmFrame {
    /// Empty frame with room for `samples` interleaved samples.
    pub fn with_capacity(samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(samples),
            ..Self::default()
        }
    }

    /// Mark the frame empty, keeping the allocation.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.len = 0;
    }

    /// The valid interleaved samples.
    pub fn interleaved(&self) -> &[i32] {
        let n = self.len.saturating_mul(usize::from(self.channels));
        self.samples.get(..n).unwrap_or(&self.samples)
    }

    /// Replace the contents with float samples in `[-1.0, 1.0]`.
    ///
    /// `src` is interleaved; `len` becomes `src.len() / channels`.
    pub fn fill_from_f32(&mut self, src: &[f32], channels: u8, sample_rate: u32) {
        self.samples.clear();
        self.samples.extend(src.iter().map(|&s| f32_to_i32(s)));
        self.channels = channels;
        self.sample_rate = sample_rate;
        self.len = src.len().checked_div(usize::from(channels)).unwrap_or(0);
    }
}

/// Float to left-justified i32: scale by 2^31 and truncate.
///
/// `as` saturates, so +1.0 lands on `i32::MAX` and out-of-range input clips.
#[allow(clippy::cast_possible_truncation)] // saturating float->int cast
pub fn f32_to_i32(sample: f32) -> i32 {
    (sample * 2_147_483_648.0) as i32
}

/// Parameters handed to a decoder factory when an engine opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecSetup<'a> {
    /// Codec configuration blob: AudioSpecificConfig or ALAC magic cookie.
    /// Empty when the codec needs none.
    pub config: &'a [u8],
    /// Sample rate declared by the container.
    pub sample_rate: u32,
    /// Channel count declared by the container.
    pub channels: u8,
    /// Bit depth declared by the container (0 when not applicable).
    pub bits_per_sample: u8,
}

/// Stateful, frame-by-frame audio decoder.
///
/// Each call to [`decode_frame`] consumes bytes from `input` and writes one
/// decoded frame to `output`, returning the number of input bytes consumed.
///
/// [`decode_frame`]: FrameDecoder::decode_frame
pub trait FrameDecoder: Send {
    /// Decode one frame from `input` into `output`.
    ///
    /// # Returns
    ///
    /// `Ok(bytes_consumed)` on success, where `bytes_consumed <= input.len()`.
    /// A successful call may produce `output.len == 0` (decoder priming).
    ///
    /// # Errors
    ///
    /// Returns `Err` on bitstream errors, format mismatches, or when `input`
    /// holds no decodable frame.
    fn decode_frame(&mut self, input: &[u8], output: &mut PcmFrame) -> Result<usize, FrameError>;

    /// Sample rate of the stream being decoded, in Hz. 0 before the first frame.
    fn sample_rate(&self) -> u32;

    /// Number of audio channels in the stream. 0 before the first frame.
    fn channels(&self) -> u8;

    /// Drop inter-frame state (bit reservoir, overlap) after a discontinuity.
    fn reset(&mut self) {}
}

/// Decoder whose output is packed little-endian integers (ALAC).
///
/// Samples are interleaved, `bit_depth.div_ceil(8)` bytes each, signed,
/// right-justified within their byte width.
pub trait PackedFrameDecoder: Send {
    /// Decode one compressed frame, replacing `output`. Returns frames produced.
    ///
    /// # Errors
    ///
    /// Returns `Err` when the frame cannot be decoded.
    fn decode_packed(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<usize, FrameError>;

    /// Bit depth of the packed samples.
    fn bit_depth(&self) -> u8;

    /// Channels per packed frame.
    fn channels(&self) -> u8;
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_frame_default_is_zero() {
        let frame = PcmFrame::default();
        assert_eq!(frame.len, 0);
        assert_eq!(frame.sample_rate, 0);
        assert_eq!(frame.channels, 0);
        assert!(frame.interleaved().is_empty());
    }

    #[test]
    fn test_float_conversion_scales_by_two_pow_31() {
        assert_eq!(f32_to_i32(0.0), 0);
        assert_eq!(f32_to_i32(-1.0), i32::MIN);
        assert_eq!(f32_to_i32(1.0), i32::MAX);
        assert_eq!(f32_to_i32(0.5), 1 << 30);
        assert_eq!(f32_to_i32(4.0), i32::MAX);
    }

    #[test]
    fn test_fill_from_f32_sets_len_per_channel() {
        let mut frame = PcmFrame::with_capacity(8);
        frame.fill_from_f32(&[0.0, 0.5, -0.5, 0.25], 2, 48_000);
        assert_eq!(frame.len, 2);
        assert_eq!(frame.channels, 2);
        assert_eq!(frame.sample_rate, 48_000);
        assert_eq!(frame.interleaved()[1], 1 << 30);
    }

    #[test]
    fn test_interleaved_ignores_stale_tail() {
        let frame = PcmFrame {
            samples: vec![1, 2, 3, 4, 5, 6],
            len: 2,
            sample_rate: 44_100,
            channels: 1,
        };
        assert_eq!(frame.interleaved(), &[1, 2]);
    }
}
