//! ALAC decoder backed by symphonia, re-packed to little-endian integers.

use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_ALAC};
use symphonia::core::formats::Packet;
use symphonia::default::codecs::AlacDecoder;

use super::{backend_error, symphonia_channels};
use crate::error::FrameError;
use crate::frame::{CodecSetup, PackedFrameDecoder};

/// Bytes of the ALACSpecificConfig proper.
const ALAC_CONFIG_LEN: usize = 24;

/// ALAC decoder producing packed little-endian samples.
pub struct SymphoniaAlacDecoder {
    inner: AlacDecoder,
    sample_buf: Option<SampleBuffer<i32>>,
    bit_depth: u8,
    channels: u8,
}

impl SymphoniaAlacDecoder {
    /// Configure from the magic cookie in `setup.config`.
    ///
    /// Accepts either the bare 24-byte ALACSpecificConfig or the 28-byte
    /// `alac` FullBox payload (version/flags first).
    pub fn new(setup: &CodecSetup<'_>) -> Result<Self, FrameError> {
        let cookie = match setup.config.len() {
            ALAC_CONFIG_LEN => setup.config,
            n if n > ALAC_CONFIG_LEN => setup
                .config
                .get(n.saturating_sub(ALAC_CONFIG_LEN)..)
                .ok_or(FrameError::InvalidData)?,
            _ => return Err(FrameError::InvalidData),
        };
        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_ALAC)
            .with_sample_rate(setup.sample_rate)
            .with_bits_per_sample(u32::from(setup.bits_per_sample))
            .with_channels(symphonia_channels(setup.channels))
            .with_extra_data(cookie.to_vec().into_boxed_slice());
        let inner = AlacDecoder::try_new(&params, &DecoderOptions::default()).map_err(backend_error)?;
        Ok(Self {
            inner,
            sample_buf: None,
            bit_depth: setup.bits_per_sample,
            channels: setup.channels,
        })
    }
}

impl PackedFrameDecoder for SymphoniaAlacDecoder {
    fn decode_packed(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<usize, FrameError> {
        output.clear();
        let packet = Packet::new_from_slice(0, 0, 0, input);
        let decoded = self.inner.decode(&packet).map_err(backend_error)?;
        let spec: SignalSpec = *decoded.spec();
        let frames = decoded.frames();
        let needed = frames.saturating_mul(spec.channels.count());
        if self.sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
            self.sample_buf = Some(SampleBuffer::new(frames as u64, spec));
        }
        let Some(buf) = self.sample_buf.as_mut() else {
            return Err(FrameError::BufferTooSmall);
        };
        buf.copy_interleaved_ref(decoded);

        // symphonia hands back samples scaled to the full 32-bit range; the
        // packed form is right-justified at the stream's bit depth.
        let width = usize::from(self.bit_depth.div_ceil(8)).clamp(2, 4);
        let shift = 32u32.saturating_sub(u32::from(self.bit_depth));
        output
            .try_reserve(buf.samples().len().saturating_mul(width))
            .map_err(|_| FrameError::BufferTooSmall)?;
        for &s in buf.samples() {
            let v = s.checked_shr(shift).unwrap_or(0);
            output.extend_from_slice(v.to_le_bytes().get(..width).unwrap_or(&[]));
        }
        Ok(frames)
    }

    fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    fn channels(&self) -> u8 {
        self.channels
    }
}
