//! Apple Lossless in an ISO-BMFF container.

use super::DecoderEngine;
use crate::codec::BoxedPackedDecoder;
use crate::error::{DecodeError, FrameError, InitError, OpenError, SeekError};
use crate::format::FormatTag;
use crate::frame::CodecSetup;
use crate::info::StreamInfo;
use crate::mp4::sample_table::SampleTable;
use crate::mp4::{read_sample, Mp4Codec, Mp4Track};
use crate::ring_buffer::PcmRing;
use crate::stream::ByteStream;

/// Widen packed little-endian samples to left-justified i32.
///
/// Two-byte samples shift up 16, three-byte samples up 8, four-byte samples
/// pass through. Returns the number of samples written.
#[allow(clippy::arithmetic_side_effects)] // Safety: an i16 shifted left 16 fits in i32
pub fn unpack_le(packed: &[u8], bit_depth: u8, out: &mut Vec<i32>) -> usize {
    out.clear();
    let width = usize::from(bit_depth.div_ceil(8)).clamp(2, 4);
    out.extend(packed.chunks_exact(width).map(|b| match b {
        [a, b] => i32::from(i16::from_le_bytes([*a, *b])) << 16,
        [a, b, c] => i32::from_le_bytes([0, *a, *b, *c]),
        [a, b, c, d] => i32::from_le_bytes([*a, *b, *c, *d]),
        _ => 0,
    }));
    out.len()
}

/// ALAC decoding state.
pub struct AlacEngine {
    stream: Box<dyn ByteStream>,
    decoder: BoxedPackedDecoder,
    table: SampleTable,
    ring: PcmRing,
    buf: Vec<u8>,
    packed: Vec<u8>,
    pcm: Vec<i32>,
    frame_length: u64,
    channels: u8,
    next_sample: usize,
    total_frames: u64,
    discard: u64,
    position: u64,
}

impl AlacEngine {
    /// Take ownership of a demuxed ALAC track and create its decoder.
    pub fn open<F>(
        stream: Box<dyn ByteStream>,
        track: Mp4Track,
        make_decoder: F,
    ) -> Result<(Self, StreamInfo), OpenError>
    where
        F: FnOnce(&CodecSetup<'_>) -> Result<BoxedPackedDecoder, FrameError>,
    {
        let Mp4Codec::Alac { cookie, frame_length } = &track.codec else {
            return Err(InitError::InvalidHeader("alac: track is not ALAC").into());
        };
        let frame_length = u64::from(*frame_length);
        if frame_length == 0 {
            return Err(InitError::InvalidHeader("alac: zero frame length").into());
        }
        if track.channels == 0 || track.channels > 2 {
            return Err(InitError::Unsupported("alac: more than two channels").into());
        }

        let decoder = make_decoder(&CodecSetup {
            config: cookie,
            sample_rate: track.sample_rate,
            channels: track.channels,
            bits_per_sample: track.bits_per_sample,
        })?;

        let by_table = (track.table.len() as u64).saturating_mul(frame_length);
        let by_duration = u128::from(track.duration)
            .saturating_mul(u128::from(track.sample_rate))
            .checked_div(u128::from(track.timescale))
            .and_then(|d| u64::try_from(d).ok())
            .unwrap_or(0);
        // The last frame is usually short; mdhd knows by how much.
        let total_frames = match by_duration {
            d if d > 0 && d <= by_table => d,
            _ => by_table,
        };

        let frame_samples = usize::try_from(frame_length)
            .map_err(|_| InitError::Unsupported("alac: frame length"))?
            .saturating_mul(usize::from(track.channels));
        let ring = PcmRing::with_capacity(usize::try_from(frame_length).unwrap_or(0))?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(track.table.max_size() as usize)?;
        let mut packed = Vec::new();
        packed.try_reserve_exact(frame_samples.saturating_mul(4))?;
        let mut pcm = Vec::new();
        pcm.try_reserve_exact(frame_samples)?;

        let mut info = StreamInfo::new(FormatTag::Alac);
        info.sample_rate = track.sample_rate;
        info.bits_per_sample = track.bits_per_sample;
        info.source_channels = track.channels;
        info.total_frames = total_frames;

        tracing::debug!(
            rate = track.sample_rate,
            bits = track.bits_per_sample,
            channels = track.channels,
            frame_length,
            total_frames,
            "alac: opened"
        );
        Ok((
            Self {
                stream,
                decoder,
                table: track.table,
                ring,
                buf,
                packed,
                pcm,
                frame_length,
                channels: track.channels,
                next_sample: 0,
                total_frames,
                discard: 0,
                position: 0,
            },
            info,
        ))
    }

    fn refill(&mut self) -> Result<bool, DecodeError> {
        while let Some((offset, size)) = self.table.get(self.next_sample) {
            self.next_sample = self.next_sample.saturating_add(1);
            read_sample(&mut self.stream, offset, size, &mut self.buf)?;
            if let Err(e) = self.decoder.decode_packed(&self.buf, &mut self.packed) {
                tracing::warn!(sample = self.next_sample.saturating_sub(1), error = %e, "alac: frame dropped");
                return Err(DecodeError::FrameDropped);
            }
            unpack_le(&self.packed, self.decoder.bit_depth(), &mut self.pcm);
            self.ring.push_interleaved(&self.pcm, self.channels)?;
            if self.discard > 0 {
                let n = self.ring.discard(usize::try_from(self.discard).unwrap_or(usize::MAX));
                self.discard = self.discard.saturating_sub(n as u64);
            }
            if !self.ring.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl DecoderEngine for AlacEngine {
    fn decode(&mut self, out: &mut [i32], max_frames: usize) -> Result<usize, DecodeError> {
        let left = usize::try_from(self.total_frames.saturating_sub(self.position)).unwrap_or(usize::MAX);
        let want = max_frames.min(left);
        if want == 0 {
            return Ok(0);
        }
        if self.ring.is_empty() && !self.refill()? {
            return Ok(0);
        }
        let n = self.ring.pop_frames(out, want);
        self.position = self.position.saturating_add(n as u64);
        Ok(n)
    }

    fn seek(&mut self, frame: u64) -> Result<(), SeekError> {
        if frame > self.total_frames {
            return Err(SeekError::OutOfRange {
                frame,
                total: self.total_frames,
            });
        }
        self.ring.clear();
        let index = frame.checked_div(self.frame_length).unwrap_or(0);
        self.next_sample = usize::try_from(index).unwrap_or(usize::MAX);
        self.discard = frame.checked_rem(self.frame_length).unwrap_or(0);
        self.position = frame;
        tracing::debug!(frame, sample = self.next_sample, "alac: seek");
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
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
    fn test_unpack_16_bit() {
        let mut out = Vec::new();
        let packed = [0x34, 0x12, 0xFF, 0xFF];
        assert_eq!(unpack_le(&packed, 16, &mut out), 2);
        assert_eq!(out, vec![0x1234 << 16, -1 << 16]);
    }

    #[test]
    fn test_unpack_24_bit_sign_extends() {
        let mut out = Vec::new();
        let packed = [0x56, 0x34, 0x12, 0x00, 0x00, 0x80];
        unpack_le(&packed, 24, &mut out);
        assert_eq!(out, vec![0x1234_5600, i32::MIN]);
    }

    #[test]
    fn test_unpack_20_bit_uses_three_bytes() {
        let mut out = Vec::new();
        unpack_le(&[0x01, 0x00, 0x00], 20, &mut out);
        assert_eq!(out, vec![0x100]);
    }

    #[test]
    fn test_unpack_32_bit_passes_through() {
        let mut out = Vec::new();
        unpack_le(&(-5i32).to_le_bytes(), 32, &mut out);
        assert_eq!(out, vec![-5]);
    }
}
