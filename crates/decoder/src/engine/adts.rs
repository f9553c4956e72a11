//! Raw AAC in ADTS framing.
//!
//! ADTS carries no index, so seeking is approximate: the target byte offset is
//! estimated from the average frame size measured at open, then the nearest
//! sync word is searched within a short forward window.

use std::io::{Seek, SeekFrom};

use super::DecoderEngine;
use crate::codec::BoxedDecoder;
use crate::config::{
    AAC_FRAME_SAMPLES, AAC_INPUT_BUFFER_BYTES, ADTS_AVG_SAMPLE_FRAMES, ADTS_RESYNC_ATTEMPTS,
    ADTS_SEEK_SCAN_BYTES, ADTS_SYNC_SCAN_BYTES,
};
use crate::error::{DecodeError, FrameError, InitError, OpenError, SeekError};
use crate::format::FormatTag;
use crate::frame::{CodecSetup, PcmFrame};
use crate::info::StreamInfo;
use crate::mp4::descriptor::{sample_rate_for_index, synthesize_asc};
use crate::ring_buffer::PcmRing;
use crate::stream::{read_full, skip_id3v2, ByteStream};

/// Fixed ADTS header length without CRC.
pub const ADTS_HEADER_LEN: usize = 7;

/// Decoded ADTS fixed + variable header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// Audio object type (profile + 1).
    pub object_type: u8,
    /// Sampling-frequency index.
    pub sfi: u8,
    /// Sample rate from the index table.
    pub sample_rate: u32,
    /// Channel configuration.
    pub channels: u8,
    /// Header bytes including the CRC when present.
    pub header_len: usize,
    /// Whole frame length, header included.
    pub frame_len: usize,
}

impl AdtsHeader {
    /// Parse and validate a header at the start of `b`.
    ///
    /// Rejects reserved sampling indices and frame lengths the decoder input
    /// buffer cannot hold.
    #[allow(clippy::indexing_slicing)] // Safety: h is exactly ADTS_HEADER_LEN bytes
    #[allow(clippy::arithmetic_side_effects)] // Safety: object_type is a 2-bit field plus one
    pub fn parse(b: &[u8]) -> Option<Self> {
        let h = b.get(..ADTS_HEADER_LEN)?;
        if h[0] != 0xFF || h[1] & 0xF6 != 0xF0 {
            return None;
        }
        let protection_absent = h[1] & 0x01 != 0;
        let object_type = (h[2] >> 6) + 1;
        let sfi = (h[2] >> 2) & 0x0F;
        let sample_rate = sample_rate_for_index(sfi)?;
        let channels = ((h[2] & 0x01) << 2) | (h[3] >> 6);
        let frame_len =
            (usize::from(h[3] & 0x03) << 11) | (usize::from(h[4]) << 3) | usize::from(h[5] >> 5);
        let header_len = if protection_absent { 7 } else { 9 };
        if frame_len <= header_len || frame_len > AAC_INPUT_BUFFER_BYTES {
            return None;
        }
        Some(Self {
            object_type,
            sfi,
            sample_rate,
            channels,
            header_len,
            frame_len,
        })
    }
}

/// First offset in `buf` holding a valid header. With `confirm`, the
/// following header must also parse when it lies inside `buf`.
pub fn find_sync(buf: &[u8], confirm: bool) -> Option<(usize, AdtsHeader)> {
    (0..buf.len().saturating_sub(ADTS_HEADER_LEN.saturating_sub(1))).find_map(|i| {
        let h = AdtsHeader::parse(buf.get(i..)?)?;
        if confirm {
            let next = i.saturating_add(h.frame_len);
            if let Some(n) = buf.get(next..next.saturating_add(ADTS_HEADER_LEN)) {
                AdtsHeader::parse(n)?;
            }
        }
        Some((i, h))
    })
}

/// ADTS decoding state.
pub struct AdtsEngine {
    stream: Box<dyn ByteStream>,
    decoder: BoxedDecoder,
    frame: PcmFrame,
    ring: PcmRing,
    buf: Vec<u8>,
    sync_offset: u64,
    avg_frame_bytes: u64,
    file_len: u64,
    pos: u64,
    position: u64,
}

impl AdtsEngine {
    /// Find the first sync word, measure the average frame size and create the
    /// decoder from a synthesized AudioSpecificConfig.
    pub fn open<F>(mut stream: Box<dyn ByteStream>, make_decoder: F) -> Result<(Self, StreamInfo), OpenError>
    where
        F: FnOnce(&CodecSetup<'_>) -> Result<BoxedDecoder, FrameError>,
    {
        let file_len = stream.byte_len()?;
        stream.seek(SeekFrom::Start(0))?;
        let tag_end = skip_id3v2(&mut stream)?;

        let mut head = vec![0u8; ADTS_SYNC_SCAN_BYTES];
        let n = read_full(&mut stream, &mut head)?;
        let (at, header) = head
            .get(..n)
            .and_then(|head| find_sync(head, true))
            .ok_or(InitError::InvalidHeader("adts: no sync word"))?;
        let sync_offset = tag_end.saturating_add(at as u64);
        if header.channels == 0 || header.channels > 2 {
            return Err(InitError::Unsupported("adts: channel configuration").into());
        }

        let avg_frame_bytes = average_frame_bytes(&mut stream, sync_offset)?.max(1);
        let total_frames = estimated_total(file_len, sync_offset, avg_frame_bytes);

        let asc = synthesize_asc(header.object_type, header.sfi, header.channels);
        let decoder = make_decoder(&CodecSetup {
            config: &asc,
            sample_rate: header.sample_rate,
            channels: header.channels,
            bits_per_sample: 16,
        })?;

        let ring = PcmRing::with_capacity((AAC_FRAME_SAMPLES as usize).saturating_mul(2))?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(AAC_INPUT_BUFFER_BYTES)?;
        stream.seek(SeekFrom::Start(sync_offset))?;

        let mut info = StreamInfo::new(FormatTag::Aac);
        info.sample_rate = header.sample_rate;
        info.bits_per_sample = 16;
        info.source_channels = header.channels;
        info.total_frames = total_frames;

        tracing::debug!(
            rate = header.sample_rate,
            channels = header.channels,
            sync_offset,
            avg_frame_bytes,
            total_frames,
            "adts: opened"
        );
        Ok((
            Self {
                stream,
                decoder,
                frame: PcmFrame::with_capacity((AAC_FRAME_SAMPLES as usize).saturating_mul(4)),
                ring,
                buf,
                sync_offset,
                avg_frame_bytes,
                file_len,
                pos: sync_offset,
                position: 0,
            },
            info,
        ))
    }

    /// Scan forward from `self.pos + 1` for the next sync word, bounded by
    /// the resync attempt cap. `Ok(false)` at end of stream.
    #[allow(clippy::arithmetic_side_effects)] // Safety: pos < file_len; i and n are bounded by the window
    fn resync(&mut self) -> Result<bool, DecodeError> {
        let from = self.pos + 1;
        self.stream.seek(SeekFrom::Start(from))?;
        let mut window = vec![0u8; ADTS_RESYNC_ATTEMPTS + ADTS_HEADER_LEN];
        let n = read_full(&mut self.stream, &mut window)?;
        match find_sync(window.get(..n).unwrap_or_default(), false) {
            Some((i, _)) => {
                self.pos = from + i as u64;
                tracing::warn!(offset = self.pos, skipped = i + 1, "adts: resynchronised");
                Ok(true)
            }
            None if n < window.len() => {
                self.pos = from + n as u64;
                Ok(false)
            }
            None => {
                self.pos = from + ADTS_RESYNC_ATTEMPTS as u64;
                tracing::warn!(offset = self.pos, "adts: no sync within resync window");
                Err(DecodeError::LostSync)
            }
        }
    }

    /// Decode one ADTS frame into the ring. `Ok(false)` at end of stream.
    #[allow(clippy::arithmetic_side_effects)] // Safety: header_len <= ADTS_HEADER_LEN + 2 < frame_len; pos < file_len
    fn refill(&mut self) -> Result<bool, DecodeError> {
        loop {
            self.stream.seek(SeekFrom::Start(self.pos))?;
            let mut raw = [0u8; ADTS_HEADER_LEN];
            if read_full(&mut self.stream, &mut raw)? < ADTS_HEADER_LEN {
                return Ok(false);
            }
            let Some(header) = AdtsHeader::parse(&raw) else {
                if !self.resync()? {
                    return Ok(false);
                }
                continue;
            };

            self.buf.clear();
            self.buf.resize(header.frame_len - ADTS_HEADER_LEN, 0);
            if read_full(&mut self.stream, &mut self.buf)? < self.buf.len() {
                return Ok(false);
            }
            self.pos += header.frame_len as u64;

            // CRC bytes, when present, precede the raw data block.
            let payload = self.buf.get(header.header_len - ADTS_HEADER_LEN..).unwrap_or_default();
            match self.decoder.decode_frame(payload, &mut self.frame) {
                Ok(_) if self.frame.len == 0 => continue,
                Ok(_) => {
                    self.ring.push_interleaved(self.frame.interleaved(), self.frame.channels)?;
                    return Ok(true);
                }
                Err(FrameError::EndOfStream) => return Ok(false),
                Err(e) => {
                    tracing::warn!(offset = self.pos - header.frame_len as u64, error = %e, "adts: frame dropped");
                    return Err(DecodeError::FrameDropped);
                }
            }
        }
    }
}

/// Frames implied by the payload length at `avg_frame_bytes` per AAC frame.
fn estimated_total(file_len: u64, sync_offset: u64, avg_frame_bytes: u64) -> u64 {
    file_len
        .saturating_sub(sync_offset)
        .checked_div(avg_frame_bytes)
        .unwrap_or(0)
        .saturating_mul(AAC_FRAME_SAMPLES)
}

/// Mean frame length over up to [`ADTS_AVG_SAMPLE_FRAMES`] frames from `start`.
fn average_frame_bytes<S: ByteStream + ?Sized>(s: &mut S, start: u64) -> std::io::Result<u64> {
    let mut pos = start;
    let mut total = 0u64;
    let mut count = 0u64;
    let mut raw = [0u8; ADTS_HEADER_LEN];
    for _ in 0..ADTS_AVG_SAMPLE_FRAMES {
        s.seek(SeekFrom::Start(pos))?;
        if read_full(s, &mut raw)? < ADTS_HEADER_LEN {
            break;
        }
        let Some(h) = AdtsHeader::parse(&raw) else {
            break;
        };
        total = total.saturating_add(h.frame_len as u64);
        count = count.saturating_add(1);
        pos = pos.saturating_add(h.frame_len as u64);
    }
    Ok(total.checked_div(count).unwrap_or(0))
}

impl DecoderEngine for AdtsEngine {
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
        self.ring.clear();
        self.decoder.reset();
        if frame == 0 {
            self.pos = self.sync_offset;
            self.position = 0;
            return Ok(());
        }
        let aac_frame = frame / AAC_FRAME_SAMPLES;
        let estimate = aac_frame
            .checked_mul(self.avg_frame_bytes)
            .and_then(|bytes| bytes.checked_add(self.sync_offset))
            .filter(|&offset| offset < self.file_len);
        let Some(estimate) = estimate else {
            return Err(SeekError::OutOfRange {
                frame,
                total: estimated_total(self.file_len, self.sync_offset, self.avg_frame_bytes),
            });
        };
        self.stream.seek(SeekFrom::Start(estimate))?;
        let mut window = vec![0u8; ADTS_SEEK_SCAN_BYTES.saturating_add(ADTS_HEADER_LEN)];
        let n = read_full(&mut self.stream, &mut window)?;
        match find_sync(window.get(..n).unwrap_or_default(), true) {
            Some((i, _)) => {
                self.pos = estimate.saturating_add(i as u64);
                self.position = aac_frame.saturating_mul(AAC_FRAME_SAMPLES);
            }
            None => {
                tracing::warn!(frame, estimate, "adts: no sync near seek target, rewinding");
                self.pos = self.sync_offset;
                self.position = 0;
            }
        }
        tracing::debug!(frame, offset = self.pos, "adts: seek");
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

    fn header(sfi: u8, channels: u8, frame_len: usize, crc: bool) -> [u8; 7] {
        let mut h = [0u8; 7];
        h[0] = 0xFF;
        h[1] = if crc { 0xF0 } else { 0xF1 };
        h[2] = (1 << 6) | (sfi << 2) | (channels >> 2);
        h[3] = ((channels & 3) << 6) | ((frame_len >> 11) as u8 & 0x03);
        h[4] = (frame_len >> 3) as u8;
        h[5] = ((frame_len & 7) as u8) << 5 | 0x1F;
        h[6] = 0xFC;
        h
    }

    #[test]
    fn test_parse_lc_44k_stereo() {
        let h = AdtsHeader::parse(&header(4, 2, 371, false)).unwrap();
        assert_eq!(h.object_type, 2);
        assert_eq!(h.sample_rate, 44_100);
        assert_eq!(h.channels, 2);
        assert_eq!(h.frame_len, 371);
        assert_eq!(h.header_len, 7);
    }

    #[test]
    fn test_parse_with_crc() {
        let h = AdtsHeader::parse(&header(3, 1, 200, true)).unwrap();
        assert_eq!(h.header_len, 9);
        assert_eq!(h.sample_rate, 48_000);
    }

    #[test]
    fn test_parse_rejects_bad_fields() {
        assert!(AdtsHeader::parse(&header(13, 2, 300, false)).is_none());
        assert!(AdtsHeader::parse(&header(4, 2, 5, false)).is_none());
        assert!(AdtsHeader::parse(&header(4, 2, AAC_INPUT_BUFFER_BYTES + 1, false)).is_none());
        assert!(AdtsHeader::parse(&[0xFF, 0xF1, 0x50]).is_none());
    }

    #[test]
    fn test_find_sync_confirms_successor() {
        let mut buf = vec![0u8; 3];
        // Lone header whose successor is garbage.
        buf.extend_from_slice(&header(4, 2, 20, false));
        buf.extend_from_slice(&[0u8; 13]);
        buf.extend_from_slice(&[0x11; 4]);
        let good = buf.len();
        for _ in 0..2 {
            buf.extend_from_slice(&header(4, 2, 20, false));
            buf.extend_from_slice(&[0u8; 13]);
        }
        let (at, _) = find_sync(&buf, true).unwrap();
        assert_eq!(at, good);
        let (loose, _) = find_sync(&buf, false).unwrap();
        assert_eq!(loose, 3);
    }

    proptest::proptest! {
        #[test]
        fn prop_header_parse_never_panics(bytes in proptest::collection::vec(proptest::num::u8::ANY, 0..16)) {
            if let Some(h) = AdtsHeader::parse(&bytes) {
                proptest::prop_assert!(h.frame_len > h.header_len);
                proptest::prop_assert!(h.frame_len <= AAC_INPUT_BUFFER_BYTES);
            }
        }
    }
}
