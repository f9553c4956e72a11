//! libopus packet decoder (via [`audiopus`]).

use audiopus::coder::{Decoder as AudiopusDecoder, GenericCtl};
use audiopus::{Channels, Error as OpusError, ErrorCode, SampleRate};

use crate::error::FrameError;
use crate::frame::{CodecSetup, FrameDecoder, PcmFrame};

/// Output rate of every Opus stream.
pub const OPUS_RATE: u32 = 48_000;

/// Largest packet duration Opus allows: 120 ms at 48 kHz.
const MAX_FRAME_SAMPLES: usize = 5760;

/// Opus decoder emitting float PCM converted to left-justified i32.
pub struct LibOpusDecoder {
    inner: AudiopusDecoder,
    rawbuf: Vec<f32>,
    channels: u8,
}

impl LibOpusDecoder {
    /// Create a 48 kHz decoder with `setup.channels` (1 or 2) output channels.
    pub fn new(setup: &CodecSetup<'_>) -> Result<Self, FrameError> {
        let channels = match setup.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => return Err(FrameError::UnsupportedFormat),
        };
        let inner = AudiopusDecoder::new(SampleRate::Hz48000, channels)
            .map_err(|e| FrameError::Backend(e.to_string()))?;
        Ok(Self {
            inner,
            rawbuf: vec![0.0; MAX_FRAME_SAMPLES.saturating_mul(usize::from(setup.channels))],
            channels: setup.channels,
        })
    }
}

impl FrameDecoder for LibOpusDecoder {
    /// Decode one complete Opus packet. Always consumes the whole input.
    fn decode_frame(&mut self, input: &[u8], output: &mut PcmFrame) -> Result<usize, FrameError> {
        if input.is_empty() {
            return Err(FrameError::EndOfStream);
        }
        let per_channel = match self.inner.decode_float(Some(input), self.rawbuf.as_mut_slice(), false) {
            Ok(n) => n,
            Err(OpusError::Opus(ErrorCode::InvalidPacket)) => return Err(FrameError::InvalidData),
            Err(OpusError::Opus(ErrorCode::BufferTooSmall)) => return Err(FrameError::BufferTooSmall),
            Err(e) => return Err(FrameError::Backend(e.to_string())),
        };
        let total = per_channel
            .saturating_mul(usize::from(self.channels))
            .min(self.rawbuf.len());
        let pcm = self.rawbuf.get(..total).unwrap_or(&[]);
        output.fill_from_f32(pcm, self.channels, OPUS_RATE);
        Ok(input.len())
    }

    fn sample_rate(&self) -> u32 {
        OPUS_RATE
    }

    fn channels(&self) -> u8 {
        self.channels
    }

    fn reset(&mut self) {
        let _ = self.inner.reset_state();
    }
}
