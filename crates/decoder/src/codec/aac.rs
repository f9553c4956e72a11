//! AAC-LC frame decoder backed by symphonia.
//!
//! The engines do all framing (ADTS headers, MP4 sample table); this adapter
//! sees raw access units only.

use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_AAC};
use symphonia::core::formats::Packet;
use symphonia::default::codecs::AacDecoder;

use super::{backend_error, symphonia_channels};
use crate::error::FrameError;
use crate::frame::{CodecSetup, FrameDecoder, PcmFrame};

/// AAC decoder fed one raw access unit per call.
pub struct SymphoniaAacDecoder {
    inner: AacDecoder,
    sample_buf: Option<SampleBuffer<f32>>,
    sample_rate: u32,
    channels: u8,
    ts: u64,
}

impl SymphoniaAacDecoder {
    /// Configure from the AudioSpecificConfig in `setup.config`.
    pub fn new(setup: &CodecSetup<'_>) -> Result<Self, FrameError> {
        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_AAC)
            .with_sample_rate(setup.sample_rate)
            .with_channels(symphonia_channels(setup.channels));
        if !setup.config.is_empty() {
            params.with_extra_data(setup.config.to_vec().into_boxed_slice());
        }
        let inner = AacDecoder::try_new(&params, &DecoderOptions::default()).map_err(backend_error)?;
        Ok(Self {
            inner,
            sample_buf: None,
            sample_rate: setup.sample_rate,
            channels: setup.channels,
            ts: 0,
        })
    }
}

impl FrameDecoder for SymphoniaAacDecoder {
    fn decode_frame(&mut self, input: &[u8], output: &mut PcmFrame) -> Result<usize, FrameError> {
        if input.is_empty() {
            return Err(FrameError::EndOfStream);
        }
        let packet = Packet::new_from_slice(0, self.ts, 1024, input);
        let decoded = self.inner.decode(&packet).map_err(backend_error)?;
        let spec: SignalSpec = *decoded.spec();
        let frames = decoded.frames();
        self.ts = self.ts.wrapping_add(frames as u64);

        let needed = frames.saturating_mul(spec.channels.count());
        if self.sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
            self.sample_buf = Some(SampleBuffer::new(frames as u64, spec));
        }
        let Some(buf) = self.sample_buf.as_mut() else {
            return Err(FrameError::BufferTooSmall);
        };
        buf.copy_interleaved_ref(decoded);

        #[allow(clippy::cast_possible_truncation)] // AAC is at most 2 channels here
        let channels = spec.channels.count() as u8;
        self.channels = channels;
        self.sample_rate = spec.rate;
        output.fill_from_f32(buf.samples(), channels, spec.rate);
        Ok(input.len())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u8 {
        self.channels
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}
