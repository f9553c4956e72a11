//! MPEG audio frames through nanomp3.
//!
//! Feeds the engine's contiguous input window to `nanomp3::Decoder` and
//! converts its float output to left-justified `i32`.

use crate::error::FrameError;
use crate::frame::{FrameDecoder, PcmFrame};

/// Layer I/II/III decoder over nanomp3.
///
/// Holds no input of its own. Each call sees the unread part of the window
/// and reports how far to advance; the bit reservoir carries over to the next
/// call, so consecutive windows must join without gaps.
pub struct Mp3FrameDecoder {
    sample_rate: u32,
    channels: u8,
    inner: nanomp3::Decoder,
    pcm: Vec<f32>,
}

impl Mp3FrameDecoder {
    /// Decoder with no stream parameters yet; the first decoded frame sets them.
    pub fn new() -> Self {
        Self {
            sample_rate: 0,
            channels: 0,
            inner: nanomp3::Decoder::new(),
            pcm: vec![0.0; nanomp3::MAX_SAMPLES_PER_FRAME],
        }
    }
}

impl Default for Mp3FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for Mp3FrameDecoder {
    /// Returns the bytes to advance by. Junk that nanomp3 stepped over counts
    /// as progress with an empty frame; a call that moves nothing is
    /// `EndOfStream`, meaning the window needs more input.
    fn decode_frame(&mut self, input: &[u8], output: &mut PcmFrame) -> Result<usize, FrameError> {
        if input.is_empty() {
            return Err(FrameError::EndOfStream);
        }
        output.clear();

        let (consumed, decoded) = self.inner.decode(input, &mut self.pcm);
        let Some(info) = decoded else {
            return if consumed > 0 { Ok(consumed) } else { Err(FrameError::EndOfStream) };
        };

        #[allow(clippy::cast_possible_truncation)] // 1 or 2
        let channels = info.channels.num() as u8;
        self.sample_rate = info.sample_rate;
        self.channels = channels;

        // per-channel count
        let total = info
            .samples_produced
            .saturating_mul(usize::from(channels))
            .min(self.pcm.len());
        output.fill_from_f32(self.pcm.get(..total).unwrap_or_default(), channels, self.sample_rate);
        Ok(consumed)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u8 {
        self.channels
    }

    fn reset(&mut self) {
        self.inner = nanomp3::Decoder::new();
    }
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
    fn test_parameters_unknown_before_first_frame() {
        let decoder = Mp3FrameDecoder::new();
        assert_eq!(decoder.sample_rate(), 0);
        assert_eq!(decoder.channels(), 0);
    }

    #[test]
    fn test_empty_window_needs_input() {
        let mut decoder = Mp3FrameDecoder::new();
        let mut output = PcmFrame::default();
        assert_eq!(decoder.decode_frame(&[], &mut output), Err(FrameError::EndOfStream));
    }

    #[test]
    fn test_zero_bytes_yield_no_samples() {
        let mut decoder = Mp3FrameDecoder::new();
        let mut output = PcmFrame::default();
        let zeros = [0x00u8; 100];
        match decoder.decode_frame(&zeros, &mut output) {
            Ok(consumed) => {
                assert!(consumed <= zeros.len());
                assert_eq!(output.len, 0);
            }
            Err(e) => assert_eq!(e, FrameError::EndOfStream),
        }
    }
}
