//! MP3 engine: frame-header parsing, Xing/LAME gapless info, exact seek by
//! frame index.
//!
//! The engine feeds a contiguous input window to the decoder and advances by
//! the bytes it consumes. Encoder delay is trimmed from the front and the
//! padding from the back, so the decoded frame sum matches the Xing total.
//!
//! Seeking walks frame headers to build an offset index, extended only as far
//! as each target needs and capped at [`MP3_SEEK_INDEX_MAX_FRAMES`]. Targets
//! past the cap are estimated from the indexed average frame size and synced
//! within [`MP3_SYNC_SCAN_BYTES`], like ADTS.

use std::io::{Seek, SeekFrom};

use byteorder::{BigEndian, ByteOrder};

use super::DecoderEngine;
use crate::codec::BoxedDecoder;
use crate::config::{
    MP3_INPUT_BUFFER_BYTES, MP3_SEEK_INDEX_MAX_FRAMES, MP3_SEEK_PREROLL_FRAMES, MP3_SYNC_SCAN_BYTES,
};
use crate::error::{DecodeError, FrameError, InitError, OpenError, SeekError};
use crate::format::FormatTag;
use crate::frame::{CodecSetup, PcmFrame};
use crate::info::StreamInfo;
use crate::ring_buffer::PcmRing;
use crate::stream::{read_full, skip_id3v2, ByteStream};

/// MPEG audio version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    /// MPEG-1
    V1,
    /// MPEG-2 LSF
    V2,
    /// MPEG-2.5
    V25,
}

/// Fields of a 4-byte MPEG audio frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// MPEG version.
    pub version: MpegVersion,
    /// Layer (1, 2 or 3).
    pub layer: u8,
    /// Bitrate in kbit/s.
    pub bitrate_kbps: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channels (1 for the mono mode, else 2).
    pub channels: u8,
    /// Total frame length in bytes, header included.
    pub frame_len: usize,
    /// PCM frames produced by this frame.
    pub samples_per_frame: u32,
}

const BITRATES_V1: [[u32; 15]; 3] = [
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];
const BITRATES_V2: [[u32; 15]; 2] = [
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];
const RATES: [[u32; 3]; 3] = [
    [44_100, 48_000, 32_000],
    [22_050, 24_000, 16_000],
    [11_025, 12_000, 8_000],
];

/// Parse a frame header at the start of `b`. Free-format and reserved
/// values are rejected.
#[allow(clippy::indexing_slicing)] // Safety: h is 4 bytes; br_idx in 1..15, sr_idx < 3, layer in 1..=3
#[allow(clippy::arithmetic_side_effects)] // Safety: bitrate <= 448 kbit/s and rate >= 8 kHz keep frame_len small
pub fn parse_header(b: &[u8]) -> Option<FrameHeader> {
    let h = b.get(..4)?;
    if h[0] != 0xFF || h[1] & 0xE0 != 0xE0 {
        return None;
    }
    let version = match (h[1] >> 3) & 0x03 {
        0 => MpegVersion::V25,
        2 => MpegVersion::V2,
        3 => MpegVersion::V1,
        _ => return None,
    };
    let layer = match (h[1] >> 1) & 0x03 {
        1 => 3,
        2 => 2,
        3 => 1,
        _ => return None,
    };
    let br_idx = usize::from(h[2] >> 4);
    let sr_idx = usize::from((h[2] >> 2) & 0x03);
    if br_idx == 0 || br_idx == 15 || sr_idx == 3 {
        return None;
    }
    let layer_idx = usize::from(layer - 1);
    let bitrate_kbps = match version {
        MpegVersion::V1 => BITRATES_V1[layer_idx][br_idx],
        _ => BITRATES_V2[usize::from(layer != 1)][br_idx],
    };
    let sample_rate = match version {
        MpegVersion::V1 => RATES[0][sr_idx],
        MpegVersion::V2 => RATES[1][sr_idx],
        MpegVersion::V25 => RATES[2][sr_idx],
    };
    let padding = u32::from((h[2] >> 1) & 0x01);
    let channels = if h[3] >> 6 == 3 { 1 } else { 2 };
    let bps = bitrate_kbps * 1000;
    let (frame_len, samples_per_frame) = match (layer, version) {
        (1, _) => ((12 * bps / sample_rate + padding) * 4, 384),
        (2, _) => (144 * bps / sample_rate + padding, 1152),
        (_, MpegVersion::V1) => (144 * bps / sample_rate + padding, 1152),
        _ => (72 * bps / sample_rate + padding, 576),
    };
    Some(FrameHeader {
        version,
        layer,
        bitrate_kbps,
        sample_rate,
        channels,
        frame_len: frame_len as usize,
        samples_per_frame,
    })
}

/// Gapless information from a Xing/Info frame and its LAME extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XingInfo {
    /// Audio frames in the stream, excluding the Xing frame itself.
    pub frames: Option<u32>,
    /// Encoder delay in samples.
    pub delay: u32,
    /// Encoder end padding in samples.
    pub padding: u32,
}

/// Look for a Xing/Info tag in the first frame `frame` (header included).
#[allow(clippy::indexing_slicing)] // Safety: tag is 8 bytes, lame is 24
#[allow(clippy::arithmetic_side_effects)] // Safety: p grows by at most 112 past a sub-64 side-info offset
pub fn parse_xing(frame: &[u8], header: &FrameHeader) -> Option<XingInfo> {
    let side = match (header.version, header.channels) {
        (MpegVersion::V1, 1) => 17,
        (MpegVersion::V1, _) => 32,
        (_, 1) => 9,
        _ => 17,
    };
    let at = 4 + side;
    let tag = frame.get(at..at + 8)?;
    if &tag[..4] != b"Xing" && &tag[..4] != b"Info" {
        return None;
    }
    let flags = BigEndian::read_u32(&tag[4..8]);
    let mut p = at + 8;
    let mut info = XingInfo::default();
    if flags & 0x1 != 0 {
        info.frames = Some(BigEndian::read_u32(frame.get(p..p + 4)?));
        p += 4;
    }
    if flags & 0x2 != 0 {
        p += 4;
    }
    if flags & 0x4 != 0 {
        p += 100;
    }
    if flags & 0x8 != 0 {
        p += 4;
    }
    // LAME extension: 9-byte encoder string, then at +21 the 12/12-bit
    // delay and padding.
    if let Some(lame) = frame.get(p..p + 24) {
        if &lame[..4] == b"LAME" || &lame[..4] == b"Lavf" || &lame[..4] == b"Lavc" {
            let d = &lame[21..24];
            info.delay = (u32::from(d[0]) << 4) | (u32::from(d[1]) >> 4);
            info.padding = (u32::from(d[1] & 0x0F) << 8) | u32::from(d[2]);
        }
    }
    Some(info)
}

/// Offset of the first plausible frame in `buf`: a valid header whose
/// successor (when it lies inside `buf`) is also valid.
pub fn find_first_frame(buf: &[u8]) -> Option<(usize, FrameHeader)> {
    (0..buf.len().saturating_sub(3)).find_map(|i| {
        let h = parse_header(buf.get(i..)?)?;
        let next = i.saturating_add(h.frame_len);
        match buf.get(next..next.saturating_add(4)) {
            Some(n) if parse_header(n).is_none() => None,
            _ => Some((i, h)),
        }
    })
}

/// Append the byte offsets of frames in `[start, end)` to `offsets` until it
/// holds `limit` entries, skipping junk between frames.
///
/// Returns the offset to resume from when `limit` stopped the walk, `None`
/// once the range is exhausted.
#[allow(clippy::indexing_slicing)] // Safety: want <= window.len(); off + 4 <= win_len checked before use
#[allow(clippy::arithmetic_side_effects)] // Safety: pos < end; off and i are below win_len
pub fn scan_frames<S: ByteStream + ?Sized>(
    s: &mut S,
    start: u64,
    end: u64,
    limit: usize,
    offsets: &mut Vec<u64>,
) -> std::io::Result<Option<u64>> {
    let mut window = vec![0u8; 64 * 1024];
    let mut win_start = 0u64;
    let mut win_len = 0usize;
    let mut pos = start;
    while pos.saturating_add(4) <= end {
        if offsets.len() >= limit {
            return Ok(Some(pos));
        }
        if pos < win_start || pos + 4 > win_start + win_len as u64 {
            s.seek(SeekFrom::Start(pos))?;
            let want = usize::try_from(end - pos).unwrap_or(usize::MAX).min(window.len());
            win_len = read_full(s, &mut window[..want])?;
            win_start = pos;
            if win_len < 4 {
                break;
            }
        }
        let off = (pos - win_start) as usize;
        let buf = &window[..win_len];
        match parse_header(&buf[off..]) {
            Some(h) => {
                offsets
                    .try_reserve(1)
                    .map_err(|_| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;
                offsets.push(pos);
                pos += h.frame_len as u64;
            }
            None => match (off + 1..win_len - 3).find(|&i| parse_header(&buf[i..]).is_some()) {
                Some(i) => pos = win_start + i as u64,
                None if win_len < window.len() => break,
                None => pos = win_start + (win_len - 3) as u64,
            },
        }
    }
    Ok(None)
}

/// Lazily built frame-offset index.
#[derive(Debug)]
struct FrameIndex {
    offsets: Vec<u64>,
    /// Where the next extension resumes; `None` once the file is fully indexed.
    resume: Option<u64>,
}

impl FrameIndex {
    fn new(audio_start: u64) -> Self {
        Self {
            offsets: Vec::new(),
            resume: Some(audio_start),
        }
    }

    /// Index frames up to and including `fi`, never past the cap.
    fn extend_to<S: ByteStream + ?Sized>(&mut self, s: &mut S, fi: usize, end: u64) -> std::io::Result<()> {
        let Some(from) = self.resume else {
            return Ok(());
        };
        let limit = fi.saturating_add(1).min(MP3_SEEK_INDEX_MAX_FRAMES);
        if self.offsets.len() >= limit {
            return Ok(());
        }
        self.resume = scan_frames(s, from, end, limit, &mut self.offsets)?;
        tracing::debug!(frames = self.offsets.len(), complete = self.resume.is_none(), "mp3: frame index extended");
        Ok(())
    }

    /// The cap stopped the walk before the end of the file.
    fn truncated(&self) -> bool {
        self.resume.is_some() && self.offsets.len() >= MP3_SEEK_INDEX_MAX_FRAMES
    }

    /// Mean distance between indexed frames.
    fn average_frame_bytes(&self) -> Option<u64> {
        let (first, last) = (self.offsets.first()?, self.offsets.last()?);
        let gaps = u64::try_from(self.offsets.len().checked_sub(1)?).ok()?;
        last.checked_sub(*first)?.checked_div(gaps)
    }
}

/// MP3 decoding state.
pub struct Mp3Engine {
    stream: Box<dyn ByteStream>,
    decoder: BoxedDecoder,
    frame: PcmFrame,
    ring: PcmRing,
    inbuf: Vec<u8>,
    in_base: u64,
    in_pos: usize,
    in_len: usize,
    eof: bool,
    audio_start: u64,
    audio_end: u64,
    samples_per_frame: u64,
    delay: u64,
    exact_total: bool,
    total_frames: u64,
    position: u64,
    discard: u64,
    drop_before: u64,
    index: FrameIndex,
}

impl Mp3Engine {
    /// Locate the first frame, read gapless info and create the decoder via `make_decoder`.
    #[allow(clippy::arithmetic_side_effects)] // Safety: offsets are bounded by file_len; frames * spf < 2^43; u128 bit counts
    pub fn open<F>(mut stream: Box<dyn ByteStream>, make_decoder: F) -> Result<(Self, StreamInfo), OpenError>
    where
        F: FnOnce(&CodecSetup<'_>) -> Result<BoxedDecoder, FrameError>,
    {
        let file_len = stream.byte_len()?;
        stream.seek(SeekFrom::Start(0))?;
        let tag_end = skip_id3v2(&mut stream)?;

        let mut audio_end = file_len;
        if file_len >= tag_end.saturating_add(128) {
            stream.seek(SeekFrom::Start(file_len - 128))?;
            let mut tag = [0u8; 3];
            if read_full(&mut stream, &mut tag)? == 3 && &tag == b"TAG" {
                audio_end = file_len - 128;
            }
        }

        stream.seek(SeekFrom::Start(tag_end))?;
        let mut head = vec![0u8; MP3_SYNC_SCAN_BYTES];
        let n = read_full(&mut stream, &mut head)?;
        head.truncate(n);
        let (first, header) =
            find_first_frame(&head).ok_or(InitError::InvalidHeader("mp3: no frame sync"))?;
        let first_frame = tag_end + first as u64;

        let spf = u64::from(header.samples_per_frame);
        let xing = parse_xing(head.get(first..).unwrap_or_default(), &header);
        let (audio_start, delay, exact_total, total_frames) = match xing {
            Some(XingInfo {
                frames: Some(frames),
                delay,
                padding,
            }) => {
                let total = (u64::from(frames) * spf)
                    .saturating_sub(u64::from(delay))
                    .saturating_sub(u64::from(padding));
                (first_frame + header.frame_len as u64, u64::from(delay), true, total)
            }
            Some(_) => (first_frame + header.frame_len as u64, 0, false, 0),
            None => (first_frame, 0, false, 0),
        };
        let total_frames = if exact_total {
            total_frames
        } else {
            let bytes = u128::from(audio_end.saturating_sub(audio_start));
            let bps = u128::from(header.bitrate_kbps) * 1000;
            u64::try_from(bytes * 8 * u128::from(header.sample_rate) / bps).unwrap_or(0)
        };

        let decoder = make_decoder(&CodecSetup {
            config: &[],
            sample_rate: header.sample_rate,
            channels: header.channels,
            bits_per_sample: 16,
        })?;

        let ring = PcmRing::with_capacity(1152 * 2)?;
        let mut inbuf = Vec::new();
        inbuf.try_reserve_exact(MP3_INPUT_BUFFER_BYTES)?;
        inbuf.resize(MP3_INPUT_BUFFER_BYTES, 0);
        stream.seek(SeekFrom::Start(audio_start))?;

        let mut info = StreamInfo::new(FormatTag::Mp3);
        info.sample_rate = header.sample_rate;
        info.bits_per_sample = 16;
        info.source_channels = header.channels;
        info.total_frames = total_frames;

        tracing::debug!(
            rate = header.sample_rate,
            channels = header.channels,
            bitrate_kbps = header.bitrate_kbps,
            total_frames,
            exact_total,
            delay,
            "mp3: opened"
        );
        Ok((
            Self {
                stream,
                decoder,
                frame: PcmFrame::with_capacity(1152 * 2),
                ring,
                inbuf,
                in_base: audio_start,
                in_pos: 0,
                in_len: 0,
                eof: false,
                audio_start,
                audio_end,
                samples_per_frame: spf,
                delay,
                exact_total,
                total_frames,
                position: 0,
                discard: delay,
                drop_before: 0,
                index: FrameIndex::new(audio_start),
            },
            info,
        ))
    }

    /// Top up the input window. With `force`, compact even when the window
    /// still holds data. Returns bytes added.
    #[allow(clippy::indexing_slicing)] // Safety: in_pos <= in_len and in_len + room <= inbuf.len()
    #[allow(clippy::arithmetic_side_effects)] // Safety: in_pos <= in_len <= inbuf.len(); in_base + in_len <= audio_end
    fn fill_input(&mut self, force: bool) -> std::io::Result<usize> {
        let held = self.in_len - self.in_pos;
        if self.eof || (!force && held >= self.inbuf.len() / 2) {
            return Ok(0);
        }
        if self.in_pos > 0 {
            self.inbuf.copy_within(self.in_pos..self.in_len, 0);
            self.in_base += self.in_pos as u64;
            self.in_len = held;
            self.in_pos = 0;
        }
        let limit = usize::try_from(self.audio_end.saturating_sub(self.in_base + self.in_len as u64))
            .unwrap_or(usize::MAX);
        let room = (self.inbuf.len() - self.in_len).min(limit);
        let got = read_full(&mut self.stream, &mut self.inbuf[self.in_len..self.in_len + room])?;
        self.in_len += got;
        if got < room || limit <= room {
            self.eof = true;
        }
        Ok(got)
    }

    /// Decode until the ring holds output. `Ok(false)` at end of stream.
    #[allow(clippy::indexing_slicing)] // Safety: in_pos <= in_len <= inbuf.len()
    #[allow(clippy::arithmetic_side_effects)] // Safety: in_pos only advances up to in_len; dropped <= discard
    fn refill(&mut self) -> Result<bool, DecodeError> {
        loop {
            self.fill_input(false)?;
            if self.in_pos >= self.in_len {
                return Ok(false);
            }
            let frame_at = self.in_base + self.in_pos as u64;
            let avail = &self.inbuf[self.in_pos..self.in_len];
            match self.decoder.decode_frame(avail, &mut self.frame) {
                Ok(0) | Err(FrameError::EndOfStream) => {
                    if self.eof {
                        self.in_pos = self.in_len;
                        return Ok(false);
                    }
                    if self.in_pos == 0 && self.in_len == self.inbuf.len() {
                        tracing::warn!(offset = frame_at, "mp3: no frame in input window, dropping it");
                        self.in_pos = self.in_len;
                        return Err(DecodeError::LostSync);
                    }
                    self.fill_input(true)?;
                }
                Ok(consumed) => {
                    self.in_pos += consumed.min(self.in_len - self.in_pos);
                    if self.frame.len == 0 || frame_at < self.drop_before {
                        continue;
                    }
                    self.ring.push_interleaved(self.frame.interleaved(), self.frame.channels)?;
                    if self.discard > 0 {
                        let dropped = self.ring.discard(usize::try_from(self.discard).unwrap_or(usize::MAX));
                        self.discard -= dropped as u64;
                    }
                    if !self.ring.is_empty() {
                        return Ok(true);
                    }
                }
                Err(e) => {
                    let skip = parse_header(avail).map_or(1, |h| h.frame_len.max(1));
                    self.in_pos += skip.min(self.in_len - self.in_pos);
                    tracing::warn!(offset = frame_at, error = %e, "mp3: frame dropped");
                    return Err(DecodeError::FrameDropped);
                }
            }
        }
    }

    fn reposition(&mut self, offset: u64) -> std::io::Result<()> {
        self.stream.seek(SeekFrom::Start(offset))?;
        self.in_base = offset;
        self.in_pos = 0;
        self.in_len = 0;
        self.eof = offset >= self.audio_end;
        Ok(())
    }

    /// Upper bound reported with `OutOfRange` when the total is not exact.
    fn indexed_total(&self) -> u64 {
        u64::try_from(self.index.offsets.len())
            .unwrap_or(u64::MAX)
            .saturating_mul(self.samples_per_frame)
            .saturating_sub(self.delay)
    }

    /// Land on MPEG frame `fi` beyond the indexed range: extrapolate from the
    /// last indexed frame at the average frame size, then sync forward.
    fn seek_estimated(&mut self, frame: u64, fi: usize) -> Result<(), SeekError> {
        let out_of_range = SeekError::OutOfRange {
            frame,
            total: if self.exact_total { self.total_frames } else { self.total_frames.max(self.indexed_total()) },
        };
        let (Some(avg), Some(&last)) = (self.index.average_frame_bytes(), self.index.offsets.last()) else {
            return Err(out_of_range);
        };
        let beyond = fi.saturating_sub(self.index.offsets.len().saturating_sub(1));
        let estimate = u64::try_from(beyond)
            .ok()
            .and_then(|n| n.checked_mul(avg))
            .and_then(|bytes| bytes.checked_add(last))
            .filter(|&offset| offset < self.audio_end);
        let Some(estimate) = estimate else {
            return Err(out_of_range);
        };

        self.stream.seek(SeekFrom::Start(estimate))?;
        let mut window = vec![0u8; MP3_SYNC_SCAN_BYTES];
        let n = read_full(&mut self.stream, &mut window)?;
        window.truncate(n);
        let Some((at, _)) = find_first_frame(&window) else {
            tracing::debug!(frame, estimate, "mp3: no sync near estimated seek target");
            return Err(out_of_range);
        };
        let target = estimate.saturating_add(at as u64);
        let preroll = avg.saturating_mul(MP3_SEEK_PREROLL_FRAMES as u64);
        self.reposition(target.saturating_sub(preroll).max(self.audio_start))?;
        self.drop_before = target;
        self.discard = 0;
        self.position = u64::try_from(fi)
            .unwrap_or(u64::MAX)
            .saturating_mul(self.samples_per_frame)
            .saturating_sub(self.delay);
        tracing::debug!(frame, offset = target, position = self.position, "mp3: estimated seek");
        Ok(())
    }
}

impl DecoderEngine for Mp3Engine {
    fn decode(&mut self, out: &mut [i32], max_frames: usize) -> Result<usize, DecodeError> {
        let mut want = max_frames;
        if self.exact_total {
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
        if self.exact_total && frame > self.total_frames {
            return Err(SeekError::OutOfRange {
                frame,
                total: self.total_frames,
            });
        }
        let sample = frame.saturating_add(self.delay);
        let spf = self.samples_per_frame;
        let fi = usize::try_from(sample.checked_div(spf).unwrap_or(0)).unwrap_or(usize::MAX);
        let rem = sample.checked_rem(spf).unwrap_or(0);

        self.index.extend_to(&mut self.stream, fi, self.audio_end)?;
        self.ring.clear();
        self.decoder.reset();

        let offsets = &self.index.offsets;
        let target = offsets.get(fi).copied();
        let start = offsets.get(fi.saturating_sub(MP3_SEEK_PREROLL_FRAMES)).copied();
        let Some(target) = target else {
            if self.exact_total && frame == self.total_frames {
                let end = self.audio_end;
                self.reposition(end)?;
                self.position = frame;
                self.discard = 0;
                return Ok(());
            }
            if self.index.truncated() {
                return self.seek_estimated(frame, fi);
            }
            return Err(SeekError::OutOfRange {
                frame,
                total: self.indexed_total(),
            });
        };
        self.reposition(start.unwrap_or(target))?;
        self.drop_before = target;
        self.discard = rem;
        self.position = frame;
        tracing::debug!(frame, offset = target, "mp3: seek");
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
    fn test_header_128k_44k_stereo() {
        let h = parse_header(&[0xFF, 0xFB, 0x90, 0x00]).unwrap();
        assert_eq!(h.version, MpegVersion::V1);
        assert_eq!(h.layer, 3);
        assert_eq!(h.bitrate_kbps, 128);
        assert_eq!(h.sample_rate, 44_100);
        assert_eq!(h.channels, 2);
        assert_eq!(h.frame_len, 417);
        assert_eq!(h.samples_per_frame, 1152);
    }

    #[test]
    fn test_header_padding_and_mono() {
        let h = parse_header(&[0xFF, 0xFB, 0x92, 0xC0]).unwrap();
        assert_eq!(h.frame_len, 418);
        assert_eq!(h.channels, 1);
    }

    #[test]
    fn test_header_mpeg2_layer3() {
        // MPEG-2, layer 3, 64 kbit/s, 22.05 kHz
        let h = parse_header(&[0xFF, 0xF3, 0x80, 0x00]).unwrap();
        assert_eq!(h.version, MpegVersion::V2);
        assert_eq!(h.bitrate_kbps, 64);
        assert_eq!(h.sample_rate, 22_050);
        assert_eq!(h.samples_per_frame, 576);
        assert_eq!(h.frame_len, 72 * 64_000 / 22_050);
    }

    #[test]
    fn test_header_rejects_reserved() {
        assert!(parse_header(&[0xFF, 0xFB, 0xF0, 0x00]).is_none()); // bad bitrate
        assert!(parse_header(&[0xFF, 0xFB, 0x0C, 0x00]).is_none()); // free format
        assert!(parse_header(&[0xFF, 0xFB, 0x9C, 0x00]).is_none()); // reserved rate
        assert!(parse_header(&[0xFF, 0xF9, 0x90, 0x00]).is_none()); // reserved layer
        assert!(parse_header(&[0xFF, 0xEB, 0x90, 0x00]).is_none()); // reserved version
        assert!(parse_header(&[0xFF, 0xFB]).is_none());
    }

    #[test]
    fn test_xing_with_lame_gapless() {
        let header = parse_header(&[0xFF, 0xFB, 0x90, 0x00]).unwrap();
        let mut frame = vec![0u8; header.frame_len];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
        let at = 4 + 32;
        frame[at..at + 4].copy_from_slice(b"Info");
        frame[at + 4..at + 8].copy_from_slice(&1u32.to_be_bytes());
        frame[at + 8..at + 12].copy_from_slice(&1000u32.to_be_bytes());
        let lame = at + 12;
        frame[lame..lame + 4].copy_from_slice(b"LAME");
        // delay 576 (0x240), padding 1000 (0x3E8)
        frame[lame + 21] = 0x24;
        frame[lame + 22] = 0x03;
        frame[lame + 23] = 0xE8;
        let x = parse_xing(&frame, &header).unwrap();
        assert_eq!(x.frames, Some(1000));
        assert_eq!(x.delay, 576);
        assert_eq!(x.padding, 1000);
    }

    #[test]
    fn test_first_frame_requires_consistent_successor() {
        let mut buf = vec![0u8; 10];
        // False sync followed by garbage.
        buf[2] = 0xFF;
        buf[3] = 0xFB;
        buf[4] = 0x90;
        let start = buf.len();
        for _ in 0..2 {
            let mut f = vec![0u8; 417];
            f[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
            buf.extend(f);
        }
        let (i, h) = find_first_frame(&buf).unwrap();
        assert_eq!(i, start);
        assert_eq!(h.frame_len, 417);
    }

    #[test]
    fn test_scan_frames_skips_junk() {
        let mut data = Vec::new();
        for k in 0..3 {
            let mut f = vec![0u8; 417];
            f[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
            data.extend(f);
            if k == 0 {
                data.extend_from_slice(&[0x00; 5]);
            }
        }
        let end = data.len() as u64;
        let mut c = std::io::Cursor::new(data);
        let mut offs = Vec::new();
        assert_eq!(scan_frames(&mut c, 0, end, usize::MAX, &mut offs).unwrap(), None);
        assert_eq!(offs, vec![0, 422, 839]);
    }

    #[test]
    fn test_scan_frames_stops_at_limit_and_resumes() {
        let mut data = Vec::new();
        for _ in 0..5 {
            let mut f = vec![0u8; 417];
            f[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
            data.extend(f);
        }
        let end = data.len() as u64;
        let mut c = std::io::Cursor::new(data);
        let mut offs = Vec::new();
        let resume = scan_frames(&mut c, 0, end, 2, &mut offs).unwrap();
        assert_eq!(offs, vec![0, 417]);
        assert_eq!(resume, Some(834));

        assert_eq!(scan_frames(&mut c, 834, end, usize::MAX, &mut offs).unwrap(), None);
        assert_eq!(offs, vec![0, 417, 834, 1251, 1668]);
    }

    #[test]
    fn test_frame_index_average_spacing() {
        let mut index = FrameIndex::new(0);
        assert_eq!(index.average_frame_bytes(), None);
        index.offsets = vec![100, 517, 934];
        assert_eq!(index.average_frame_bytes(), Some(417));
        assert!(!index.truncated());
    }
}
