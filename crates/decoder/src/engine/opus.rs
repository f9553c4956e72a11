//! Opus in Ogg.
//!
//! Headers come from the first two packets of the first logical stream.
//! Totals come from the last granule position; seeks other than to the start
//! interpolate a byte offset and resynchronise on the next page.

use std::io::{Seek, SeekFrom};

use byteorder::{ByteOrder, LittleEndian};

use super::DecoderEngine;
use crate::codec::BoxedDecoder;
use crate::config::OPUS_MAX_FAILED_PACKETS;
use crate::error::{DecodeError, FrameError, InitError, OpenError, SeekError};
use crate::format::FormatTag;
use crate::frame::{CodecSetup, PcmFrame};
use crate::info::StreamInfo;
use crate::ogg::{last_granule, resync, OggReader};
use crate::ring_buffer::PcmRing;
use crate::stream::ByteStream;

/// Opus always decodes at 48 kHz.
pub const OPUS_OUTPUT_RATE: u32 = 48_000;

/// Largest packet duration: 120 ms at 48 kHz.
const MAX_PACKET_FRAMES: usize = 5760;

/// Identification header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpusHead {
    /// Output channels.
    pub channels: u8,
    /// Samples to discard at the start of decode.
    pub pre_skip: u16,
    /// Original input rate (informational).
    pub input_rate: u32,
    /// Output gain in Q7.8 dB.
    pub output_gain: i16,
    /// Channel mapping family.
    pub mapping_family: u8,
}

impl OpusHead {
    /// Parse an `OpusHead` packet.
    #[allow(clippy::indexing_slicing)] // Safety: length checked against 19 first
    pub fn parse(packet: &[u8]) -> Option<Self> {
        if packet.get(..8)? != b"OpusHead" || packet.len() < 19 {
            return None;
        }
        // Major version 0 only; minor versions are compatible.
        if packet[8] & 0xF0 != 0 {
            return None;
        }
        Some(Self {
            channels: packet[9],
            pre_skip: LittleEndian::read_u16(&packet[10..12]),
            input_rate: LittleEndian::read_u32(&packet[12..16]),
            output_gain: LittleEndian::read_i16(&packet[16..18]),
            mapping_family: packet[18],
        })
    }
}

/// `R128_TRACK_GAIN` from an `OpusTags` packet, in Q7.8 dB.
pub fn r128_track_gain(packet: &[u8]) -> Option<i16> {
    let body = packet.strip_prefix(b"OpusTags")?;
    let vendor_len = LittleEndian::read_u32(body.get(..4)?) as usize;
    let mut p = 4usize.checked_add(vendor_len)?;
    let count = LittleEndian::read_u32(body.get(p..p.checked_add(4)?)?);
    p = p.checked_add(4)?;
    for _ in 0..count {
        let len = LittleEndian::read_u32(body.get(p..p.checked_add(4)?)?) as usize;
        p = p.checked_add(4)?;
        let comment = body.get(p..p.checked_add(len)?)?;
        p = p.checked_add(len)?;
        let Some(eq) = comment.iter().position(|&b| b == b'=') else {
            continue;
        };
        let (key, value) = comment.split_at(eq);
        if key.eq_ignore_ascii_case(b"R128_TRACK_GAIN") {
            return std::str::from_utf8(value.get(1..)?).ok()?.trim().parse().ok();
        }
    }
    None
}

/// Opus decoding state.
pub struct OpusEngine {
    stream: Box<dyn ByteStream>,
    reader: OggReader,
    decoder: BoxedDecoder,
    packet: Vec<u8>,
    frame: PcmFrame,
    ring: PcmRing,
    audio_start: u64,
    file_len: u64,
    pre_skip: u64,
    discard: u64,
    total_frames: u64,
    position: u64,
}

impl OpusEngine {
    /// Read `OpusHead` and `OpusTags`, find the last granule and create the decoder.
    pub fn open<F>(mut stream: Box<dyn ByteStream>, make_decoder: F) -> Result<(Self, StreamInfo), OpenError>
    where
        F: FnOnce(&CodecSetup<'_>) -> Result<BoxedDecoder, FrameError>,
    {
        let file_len = stream.byte_len()?;
        stream.seek(SeekFrom::Start(0))?;
        let mut reader = OggReader::new();
        let mut packet = Vec::new();

        if !reader.next_packet(&mut stream, &mut packet)? {
            return Err(InitError::InvalidHeader("opus: no packets").into());
        }
        let head = OpusHead::parse(&packet).ok_or(InitError::InvalidHeader("opus: missing OpusHead"))?;
        if head.channels == 0 || head.channels > 2 {
            return Err(InitError::Unsupported("opus: more than two channels").into());
        }
        if head.mapping_family != 0 {
            return Err(InitError::Unsupported("opus: channel mapping family").into());
        }

        if !reader.next_packet(&mut stream, &mut packet)? || !packet.starts_with(b"OpusTags") {
            return Err(InitError::InvalidHeader("opus: missing OpusTags").into());
        }
        let track_gain = r128_track_gain(&packet).unwrap_or(0);
        let gain_db = (f32::from(head.output_gain) + f32::from(track_gain)) / 256.0;

        // Audio begins on a fresh page unless the muxer packed it behind the tags.
        let audio_start = if reader.page_exhausted() {
            stream.stream_position()?
        } else {
            0
        };

        let serial = reader.serial().unwrap_or(0);
        let pre_skip = u64::from(head.pre_skip);
        let total_frames = match last_granule(&mut stream, serial)? {
            Some(g) => {
                let g = u64::try_from(g).unwrap_or(0);
                if g < pre_skip {
                    tracing::warn!(granule = g, pre_skip, "opus: pre-skip exceeds stream length");
                }
                g.saturating_sub(pre_skip)
            }
            None => 0,
        };

        let decoder = make_decoder(&CodecSetup {
            config: &[],
            sample_rate: OPUS_OUTPUT_RATE,
            channels: head.channels,
            bits_per_sample: 16,
        })?;
        let ring = PcmRing::with_capacity(MAX_PACKET_FRAMES)?;

        let mut info = StreamInfo::new(FormatTag::Opus);
        info.sample_rate = OPUS_OUTPUT_RATE;
        info.bits_per_sample = 16;
        info.source_channels = head.channels;
        info.total_frames = total_frames;
        info.gain_db = gain_db;

        tracing::debug!(
            channels = head.channels,
            pre_skip,
            input_rate = head.input_rate,
            gain_db,
            total_frames,
            "opus: opened"
        );
        Ok((
            Self {
                stream,
                reader,
                decoder,
                packet,
                frame: PcmFrame::with_capacity(MAX_PACKET_FRAMES.saturating_mul(2)),
                ring,
                audio_start,
                file_len,
                pre_skip,
                discard: pre_skip,
                total_frames,
                position: 0,
            },
            info,
        ))
    }

    /// Decode packets until the ring holds output. `Ok(false)` at end of stream.
    fn refill(&mut self) -> Result<bool, DecodeError> {
        let mut failed: usize = 0;
        loop {
            if !self.reader.next_packet(&mut self.stream, &mut self.packet)? {
                return Ok(false);
            }
            if self.packet.is_empty()
                || self.packet.starts_with(b"OpusHead")
                || self.packet.starts_with(b"OpusTags")
            {
                continue;
            }
            match self.decoder.decode_frame(&self.packet, &mut self.frame) {
                Ok(_) if self.frame.len == 0 => {}
                Ok(_) => {
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
                    failed = failed.saturating_add(1);
                    tracing::warn!(error = %e, granule = self.reader.page_granule(), "opus: packet skipped");
                    if failed >= OPUS_MAX_FAILED_PACKETS {
                        return Err(DecodeError::FrameDropped);
                    }
                }
            }
        }
    }
}

impl DecoderEngine for OpusEngine {
    fn decode(&mut self, out: &mut [i32], max_frames: usize) -> Result<usize, DecodeError> {
        let mut want = max_frames;
        if self.total_frames > 0 {
            let left = self.total_frames.saturating_sub(self.position);
            want = want.min(usize::try_from(left).unwrap_or(usize::MAX));
        }
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
        if frame > 0 && self.total_frames == 0 {
            return Err(SeekError::Unsupported);
        }
        if frame > self.total_frames {
            return Err(SeekError::OutOfRange {
                frame,
                total: self.total_frames,
            });
        }
        self.ring.clear();
        self.reader.reset();
        self.decoder.reset();
        if frame == 0 {
            self.stream.seek(SeekFrom::Start(self.audio_start))?;
            self.discard = self.pre_skip;
            self.position = 0;
            return Ok(());
        }

        let span = u128::from(self.file_len.saturating_sub(self.audio_start));
        let offset = u128::from(frame)
            .saturating_mul(span)
            .checked_div(u128::from(self.total_frames))
            .unwrap_or(0);
        let target = self.audio_start.saturating_add(u64::try_from(offset).unwrap_or(0));
        self.discard = 0;
        match resync(&mut self.stream, target)? {
            Some(at) => {
                self.position = frame;
                tracing::debug!(frame, offset = at, "opus: seek");
            }
            None => {
                tracing::warn!(frame, target, "opus: no page after seek target, rewinding");
                self.stream.seek(SeekFrom::Start(self.audio_start))?;
                self.discard = self.pre_skip;
                self.position = 0;
            }
        }
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

    fn tags(comments: &[&str]) -> Vec<u8> {
        let mut p = b"OpusTags".to_vec();
        p.extend_from_slice(&4u32.to_le_bytes());
        p.extend_from_slice(b"test");
        p.extend_from_slice(&(comments.len() as u32).to_le_bytes());
        for c in comments {
            p.extend_from_slice(&(c.len() as u32).to_le_bytes());
            p.extend_from_slice(c.as_bytes());
        }
        p
    }

    #[test]
    fn test_head_fields() {
        let mut p = b"OpusHead".to_vec();
        p.push(1);
        p.push(2);
        p.extend_from_slice(&312u16.to_le_bytes());
        p.extend_from_slice(&44_100u32.to_le_bytes());
        p.extend_from_slice(&(-256i16).to_le_bytes());
        p.push(0);
        let h = OpusHead::parse(&p).unwrap();
        assert_eq!(h.channels, 2);
        assert_eq!(h.pre_skip, 312);
        assert_eq!(h.input_rate, 44_100);
        assert_eq!(h.output_gain, -256);
        assert_eq!(h.mapping_family, 0);
    }

    #[test]
    fn test_head_rejects_short_or_wrong_magic() {
        assert!(OpusHead::parse(b"OpusHead\x01\x02").is_none());
        assert!(OpusHead::parse(b"OpusTags\x01\x02\x00\x00\x00\x00\x00\x00\x00\x00\x00").is_none());
    }

    #[test]
    fn test_r128_gain_found_case_insensitive() {
        let p = tags(&["TITLE=x", "r128_track_gain=-1280"]);
        assert_eq!(r128_track_gain(&p), Some(-1280));
    }

    #[test]
    fn test_r128_gain_absent_or_truncated() {
        assert_eq!(r128_track_gain(&tags(&["ARTIST=y"])), None);
        let mut p = tags(&["R128_TRACK_GAIN=512"]);
        p.truncate(p.len() - 3);
        assert_eq!(r128_track_gain(&p), None);
    }
}
