//! AAC in an ISO-BMFF container.
//!
//! The sample table gives random access to every access unit, so seek is
//! exact: the target unit is located by index and the remainder discarded
//! from its output. One unit of pre-roll primes the decoder's overlap.

use super::DecoderEngine;
use crate::codec::BoxedDecoder;
use crate::config::AAC_FRAME_SAMPLES;
use crate::error::{DecodeError, FrameError, InitError, OpenError, SeekError};
use crate::format::FormatTag;
use crate::frame::{CodecSetup, PcmFrame};
use crate::info::StreamInfo;
use crate::mp4::descriptor::parse_audio_specific_config;
use crate::mp4::sample_table::SampleTable;
use crate::mp4::{read_sample, Mp4Codec, Mp4Track};
use crate::ring_buffer::PcmRing;
use crate::stream::ByteStream;

/// Object types that signal SBR explicitly (HE-AAC v1/v2).
const SBR_OBJECT_TYPES: [u8; 2] = [5, 29];

/// M4A-AAC decoding state.
pub struct M4aAacEngine {
    stream: Box<dyn ByteStream>,
    decoder: BoxedDecoder,
    table: SampleTable,
    frame: PcmFrame,
    ring: PcmRing,
    buf: Vec<u8>,
    frames_per_sample: u64,
    next_sample: usize,
    /// Leading units decoded only to prime the decoder after a seek.
    preroll: usize,
    discard: u64,
    position: u64,
}

impl M4aAacEngine {
    /// Take ownership of a demuxed AAC track and create its decoder.
    pub fn open<F>(
        stream: Box<dyn ByteStream>,
        track: Mp4Track,
        make_decoder: F,
    ) -> Result<(Self, StreamInfo), OpenError>
    where
        F: FnOnce(&CodecSetup<'_>) -> Result<BoxedDecoder, FrameError>,
    {
        let Mp4Codec::Aac { asc } = &track.codec else {
            return Err(InitError::InvalidHeader("m4a: track is not AAC").into());
        };
        let parsed = parse_audio_specific_config(asc);
        let channels = match parsed.map_or(track.channels, |c| c.channels) {
            0 => track.channels,
            n => n,
        };
        if channels == 0 || channels > 2 {
            return Err(InitError::Unsupported("m4a: more than two channels").into());
        }
        let upsampling = match parsed {
            Some(c) if SBR_OBJECT_TYPES.contains(&c.object_type) => 2,
            _ => 1,
        };
        let frames_per_sample = AAC_FRAME_SAMPLES.saturating_mul(upsampling);

        let decoder = make_decoder(&CodecSetup {
            config: asc,
            sample_rate: track.sample_rate,
            channels,
            bits_per_sample: 16,
        })?;

        let ring = PcmRing::with_capacity((AAC_FRAME_SAMPLES as usize).saturating_mul(2))?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(track.table.max_size() as usize)?;

        let mut info = StreamInfo::new(FormatTag::Aac);
        info.sample_rate = track.sample_rate;
        info.bits_per_sample = 16;
        info.source_channels = channels;
        info.total_frames = (track.table.len() as u64).saturating_mul(frames_per_sample);

        tracing::debug!(
            rate = track.sample_rate,
            channels,
            samples = track.table.len(),
            frames_per_sample,
            total_frames = info.total_frames,
            "m4a-aac: opened"
        );
        Ok((
            Self {
                stream,
                decoder,
                table: track.table,
                frame: PcmFrame::with_capacity((AAC_FRAME_SAMPLES as usize).saturating_mul(4)),
                ring,
                buf,
                frames_per_sample,
                next_sample: 0,
                preroll: 0,
                discard: 0,
                position: 0,
            },
            info,
        ))
    }

    /// Decode access units until the ring holds output. `Ok(false)` past the
    /// last table entry.
    fn refill(&mut self) -> Result<bool, DecodeError> {
        while let Some((offset, size)) = self.table.get(self.next_sample) {
            self.next_sample = self.next_sample.saturating_add(1);
            read_sample(&mut self.stream, offset, size, &mut self.buf)?;
            let result = self.decoder.decode_frame(&self.buf, &mut self.frame);
            if self.preroll > 0 {
                self.preroll = self.preroll.saturating_sub(1);
                continue;
            }
            match result {
                Ok(_) if self.frame.len == 0 => {}
                Ok(_) => {
                    // HE-AAC reports twice the core frame; keep seek arithmetic in step.
                    let upsampling = (self.frame.len as u64).checked_div(AAC_FRAME_SAMPLES).unwrap_or(1).max(1);
                    self.frames_per_sample = AAC_FRAME_SAMPLES.saturating_mul(upsampling);
                    self.ring.push_interleaved(self.frame.interleaved(), self.frame.channels)?;
                    if self.discard > 0 {
                        let n = self.ring.discard(usize::try_from(self.discard).unwrap_or(usize::MAX));
                        self.discard = self.discard.saturating_sub(n as u64);
                    }
                    if !self.ring.is_empty() {
                        return Ok(true);
                    }
                }
                Err(e) => {
                    tracing::warn!(sample = self.next_sample.saturating_sub(1), error = %e, "m4a-aac: frame dropped");
                    return Err(DecodeError::FrameDropped);
                }
            }
        }
        Ok(false)
    }
}

impl DecoderEngine for M4aAacEngine {
    fn decode(&mut self, out: &mut [i32], max_frames: usize) -> Result<usize, DecodeError> {
        if max_frames == 0 {
            return Ok(0);
        }
        if self.ring.is_empty() && !self.refill()? {
            return Ok(0);
        }
        let n = self.ring.pop_frames(out, max_frames);
        self.position = self.position.saturating_add(n as u64);
        Ok(n)
    }

    fn seek(&mut self, frame: u64) -> Result<(), SeekError> {
        let total = (self.table.len() as u64).saturating_mul(self.frames_per_sample);
        if frame > total {
            return Err(SeekError::OutOfRange { frame, total });
        }
        let index = usize::try_from(frame.checked_div(self.frames_per_sample).unwrap_or(0)).unwrap_or(usize::MAX);
        let start = index.saturating_sub(1);
        self.ring.clear();
        self.decoder.reset();
        self.next_sample = start;
        self.preroll = index.saturating_sub(start);
        self.discard = frame.checked_rem(self.frames_per_sample).unwrap_or(0);
        self.position = frame;
        tracing::debug!(frame, sample = index, "m4a-aac: seek");
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }
}
