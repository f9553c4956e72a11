//! DSD (DSF and DSDIFF) repacked to DSD-over-PCM.
//!
//! Each output word carries a marker byte in bits 23..16 and two consecutive
//! DSD bytes below it, earlier byte in the low octet. The marker alternates
//! 0x05/0xFA per frame, starting at 0x05 after open and after every seek.
//! The PCM carrier rate is the DSD clock over 16.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};

use super::DecoderEngine;
use crate::config::{DecoderConfig, DSD_SILENCE};
use crate::error::{DecodeError, InitError, OpenError, SeekError};
use crate::format::FormatTag;
use crate::info::StreamInfo;
use crate::stream::{read_full, ByteStream};

/// DSD64, DSD128 and DSD256 clock rates.
pub const DSD_RATES: [u32; 3] = [2_822_400, 5_644_800, 11_289_600];

/// DSD bits carried per DoP word and channel.
const BITS_PER_WORD: u64 = 16;

/// Alternating DoP marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DopMarker(u8);

impl DopMarker {
    /// Marker of the first frame after open or seek.
    pub const FIRST: u8 = 0x05;
    /// The other marker.
    pub const SECOND: u8 = 0xFA;

    /// Marker at its initial phase.
    pub const fn new() -> Self {
        Self(Self::FIRST)
    }

    /// Back to the initial phase.
    pub fn reset(&mut self) {
        self.0 = Self::FIRST;
    }

    /// Marker the next frame will carry.
    pub fn current(&self) -> u8 {
        self.0
    }

    fn advance(&mut self) -> u8 {
        let m = self.0;
        self.0 = if m == Self::FIRST { Self::SECOND } else { Self::FIRST };
        m
    }
}

impl Default for DopMarker {
    fn default() -> Self {
        Self::new()
    }
}

/// One DoP word: `marker << 16 | later << 8 | earlier`.
#[inline]
pub fn dop_word(marker: u8, earlier: u8, later: u8) -> i32 {
    i32::from_be_bytes([0, marker, later, earlier])
}

/// Repack byte-interleaved stereo DSD (`L0 R0 L1 R1 ...`) into DoP frames.
/// Returns frames written; each frame consumes four input bytes.
#[allow(clippy::indexing_slicing)] // Safety: chunks_exact yields 4-byte and 2-word chunks
#[allow(clippy::arithmetic_side_effects)] // Safety: n counts zipped chunks, <= out.len() / 2
pub fn repack_interleaved(src: &[u8], out: &mut [i32], marker: &mut DopMarker) -> usize {
    let mut n = 0;
    for (bytes, dst) in src.chunks_exact(4).zip(out.chunks_exact_mut(2)) {
        let m = marker.advance();
        dst[0] = dop_word(m, bytes[0], bytes[2]);
        dst[1] = dop_word(m, bytes[1], bytes[3]);
        n += 1;
    }
    n
}

/// Repack per-channel DSD runs into DoP frames. Returns frames written;
/// each frame consumes two bytes of each channel.
#[allow(clippy::indexing_slicing)] // Safety: chunks_exact yields 2-byte and 2-word chunks
#[allow(clippy::arithmetic_side_effects)] // Safety: n counts zipped chunks, <= out.len() / 2
pub fn repack_planar(left: &[u8], right: &[u8], out: &mut [i32], marker: &mut DopMarker) -> usize {
    let mut n = 0;
    for ((l, r), dst) in left
        .chunks_exact(2)
        .zip(right.chunks_exact(2))
        .zip(out.chunks_exact_mut(2))
    {
        let m = marker.advance();
        dst[0] = dop_word(m, l[0], l[1]);
        dst[1] = dop_word(m, r[0], r[1]);
        n += 1;
    }
    n
}

/// Layout of a DSD payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DsdHeader {
    /// DSD clock rate in Hz.
    pub dsd_rate: u32,
    /// First payload byte.
    pub data_start: u64,
    /// Payload length in bytes.
    pub data_len: u64,
    /// DSD samples per channel.
    pub sample_count: u64,
    /// DSF only: bytes per channel block (0 for DFF).
    pub block_size: u32,
    /// DSF only: payload is LSB-first.
    pub lsb_first: bool,
}

fn check_rate_and_channels(rate: u32, channels: u32) -> Result<(), InitError> {
    if channels != 2 {
        return Err(InitError::Unsupported("dsd: only stereo is supported"));
    }
    if !DSD_RATES.contains(&rate) {
        return Err(InitError::Unsupported("dsd: unsupported clock rate"));
    }
    Ok(())
}

/// Parse a DSF (Sony DSD Stream File) header. All fields are little-endian.
pub fn parse_dsf<R: Read + Seek + ?Sized>(r: &mut R) -> Result<DsdHeader, InitError> {
    r.seek(SeekFrom::Start(0))?;
    let mut id = [0u8; 4];
    r.read_exact(&mut id)?;
    if &id != b"DSD " {
        return Err(InitError::InvalidHeader("dsf: missing DSD chunk"));
    }
    let dsd_chunk = r.read_u64::<LittleEndian>()?;

    r.seek(SeekFrom::Start(dsd_chunk))?;
    r.read_exact(&mut id)?;
    if &id != b"fmt " {
        return Err(InitError::InvalidHeader("dsf: missing fmt chunk"));
    }
    let fmt_size = r.read_u64::<LittleEndian>()?;
    let _version = r.read_u32::<LittleEndian>()?;
    let format_id = r.read_u32::<LittleEndian>()?;
    let _channel_type = r.read_u32::<LittleEndian>()?;
    let channels = r.read_u32::<LittleEndian>()?;
    let dsd_rate = r.read_u32::<LittleEndian>()?;
    let bits = r.read_u32::<LittleEndian>()?;
    let sample_count = r.read_u64::<LittleEndian>()?;
    let block_size = r.read_u32::<LittleEndian>()?;
    if format_id != 0 {
        return Err(InitError::Unsupported("dsf: not raw DSD"));
    }
    check_rate_and_channels(dsd_rate, channels)?;
    if bits != 1 && bits != 8 {
        return Err(InitError::InvalidHeader("dsf: bits per sample"));
    }
    if block_size == 0 || block_size & 1 != 0 {
        return Err(InitError::InvalidHeader("dsf: block size"));
    }

    let data_chunk = dsd_chunk
        .checked_add(fmt_size)
        .ok_or(InitError::InvalidHeader("dsf: chunk size"))?;
    let data_start = data_chunk
        .checked_add(12)
        .ok_or(InitError::InvalidHeader("dsf: chunk size"))?;
    r.seek(SeekFrom::Start(data_chunk))?;
    r.read_exact(&mut id)?;
    if &id != b"data" {
        return Err(InitError::InvalidHeader("dsf: missing data chunk"));
    }
    let data_size = r.read_u64::<LittleEndian>()?;
    Ok(DsdHeader {
        dsd_rate,
        data_start,
        data_len: data_size.saturating_sub(12),
        sample_count,
        block_size,
        lsb_first: bits == 1,
    })
}

/// Parse a DSDIFF (`FRM8`) header. All fields are big-endian.
pub fn parse_dff<R: Read + Seek + ?Sized>(r: &mut R, file_len: u64) -> Result<DsdHeader, InitError> {
    r.seek(SeekFrom::Start(0))?;
    let mut id = [0u8; 4];
    r.read_exact(&mut id)?;
    let form_size = r.read_u64::<BigEndian>()?;
    r.read_exact(&mut id)?;
    if &id != b"DSD " {
        return Err(InitError::InvalidHeader("dff: form type is not DSD"));
    }
    let end = form_size
        .checked_add(12)
        .ok_or(InitError::InvalidHeader("dff: chunk size"))?
        .min(file_len);

    let mut rate = None;
    let mut channels = None;
    let mut pos = 16u64;
    while pos.saturating_add(12) <= end {
        r.seek(SeekFrom::Start(pos))?;
        r.read_exact(&mut id)?;
        let size = r.read_u64::<BigEndian>()?;
        let body = pos.saturating_add(12);
        match &id {
            b"PROP" => {
                let mut kind = [0u8; 4];
                r.read_exact(&mut kind)?;
                if &kind == b"SND " {
                    let prop_end = body
                        .checked_add(size)
                        .ok_or(InitError::InvalidHeader("dff: chunk size"))?;
                    parse_dff_prop(r, body.saturating_add(4), prop_end, &mut rate, &mut channels)?;
                }
            }
            b"DST " => return Err(InitError::Unsupported("dff: DST compression")),
            b"DSD " => {
                let dsd_rate = rate.ok_or(InitError::InvalidHeader("dff: no sample rate"))?;
                let ch = channels.ok_or(InitError::InvalidHeader("dff: no channel count"))?;
                check_rate_and_channels(dsd_rate, u32::from(ch))?;
                let data_len = size.min(file_len.saturating_sub(body));
                return Ok(DsdHeader {
                    dsd_rate,
                    data_start: body,
                    data_len,
                    sample_count: (data_len / 2).saturating_mul(8),
                    block_size: 0,
                    lsb_first: false,
                });
            }
            _ => tracing::trace!(chunk = %String::from_utf8_lossy(&id), size, "dff: skip chunk"),
        }
        pos = body.saturating_add(size).saturating_add(size & 1);
    }
    Err(InitError::InvalidHeader("dff: no DSD data chunk"))
}

fn parse_dff_prop<R: Read + Seek + ?Sized>(
    r: &mut R,
    start: u64,
    end: u64,
    rate: &mut Option<u32>,
    channels: &mut Option<u16>,
) -> Result<(), InitError> {
    let mut pos = start;
    let mut id = [0u8; 4];
    while pos.saturating_add(12) <= end {
        r.seek(SeekFrom::Start(pos))?;
        r.read_exact(&mut id)?;
        let size = r.read_u64::<BigEndian>()?;
        match &id {
            b"FS  " => *rate = Some(r.read_u32::<BigEndian>()?),
            b"CHNL" => *channels = Some(r.read_u16::<BigEndian>()?),
            b"CMPR" => {
                r.read_exact(&mut id)?;
                if &id != b"DSD " {
                    return Err(InitError::Unsupported("dff: compressed payload"));
                }
            }
            _ => {}
        }
        pos = pos.saturating_add(12).saturating_add(size).saturating_add(size & 1);
    }
    Ok(())
}

/// Container-specific read state.
enum Payload {
    /// DSF: `[L block][R block]` groups of `block_size` bytes per channel.
    Blocks {
        block_size: usize,
        lsb_first: bool,
        chunk: Vec<u8>,
        chunk_index: u64,
        frame_in_chunk: usize,
        loaded: bool,
    },
    /// DFF: `L0 R0 L1 R1 ...`
    Interleaved { scratch: Vec<u8>, scratch_frames: usize },
}

/// DSD decoding state.
pub struct DsdEngine {
    stream: Box<dyn ByteStream>,
    payload: Payload,
    data_start: u64,
    data_len: u64,
    total_frames: u64,
    position: u64,
    marker: DopMarker,
}

impl DsdEngine {
    /// Detect DSF or DFF by magic and validate the payload.
    pub fn open(
        mut stream: Box<dyn ByteStream>,
        config: &DecoderConfig,
    ) -> Result<(Self, StreamInfo), OpenError> {
        let file_len = stream.byte_len()?;
        stream.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; 4];
        if read_full(&mut stream, &mut magic)? < 4 {
            return Err(InitError::InvalidHeader("dsd: file too short").into());
        }
        let header = match &magic {
            b"DSD " => parse_dsf(&mut stream)?,
            b"FRM8" => parse_dff(&mut stream, file_len)?,
            _ => return Err(InitError::InvalidHeader("dsd: unknown container").into()),
        };

        #[allow(clippy::arithmetic_side_effects)] // Safety: constant non-zero divisor
        let by_samples = header.sample_count / BITS_PER_WORD;
        let payload = if header.block_size > 0 {
            let block_size = header.block_size as usize;
            let mut chunk = Vec::new();
            chunk.try_reserve_exact(block_size.saturating_mul(2))?;
            Payload::Blocks {
                block_size,
                lsb_first: header.lsb_first,
                chunk,
                chunk_index: 0,
                frame_in_chunk: 0,
                loaded: false,
            }
        } else {
            let scratch_frames = config.scratch_frames.max(1);
            let mut scratch = Vec::new();
            scratch.try_reserve_exact(scratch_frames.saturating_mul(4))?;
            Payload::Interleaved {
                scratch,
                scratch_frames,
            }
        };
        let by_bytes = match &payload {
            // block_size is even and non-zero, checked in parse_dsf
            #[allow(clippy::arithmetic_side_effects)]
            Payload::Blocks { block_size, .. } => {
                let group = *block_size as u64 * 2;
                header.data_len.div_ceil(group).saturating_mul(*block_size as u64 / 2)
            }
            #[allow(clippy::arithmetic_side_effects)]
            Payload::Interleaved { .. } => header.data_len / 4,
        };
        let total_frames = by_samples.min(by_bytes);
        stream.seek(SeekFrom::Start(header.data_start))?;

        let mut info = StreamInfo::new(FormatTag::Dsd);
        info.sample_rate = header.dsd_rate.checked_shr(4).unwrap_or(0);
        info.bits_per_sample = 32;
        info.source_channels = 2;
        info.total_frames = total_frames;
        info.is_dsd = true;

        tracing::debug!(
            dsd_rate = header.dsd_rate,
            dop_rate = info.sample_rate,
            container = if header.block_size > 0 { "dsf" } else { "dff" },
            total_frames,
            "dsd: opened"
        );
        Ok((
            Self {
                stream,
                payload,
                data_start: header.data_start,
                data_len: header.data_len,
                total_frames,
                position: 0,
                marker: DopMarker::new(),
            },
            info,
        ))
    }
}

/// Load DSF block group `index` into `chunk`, padding a short read with DSD
/// silence. `Ok(false)` when the group lies past the payload.
#[allow(clippy::indexing_slicing)] // Safety: want <= group == chunk.len(); got <= want
fn load_chunk<S: ByteStream + ?Sized>(
    stream: &mut S,
    data_start: u64,
    data_len: u64,
    block_size: usize,
    lsb_first: bool,
    index: u64,
    chunk: &mut Vec<u8>,
) -> std::io::Result<bool> {
    let group = (block_size as u64).saturating_mul(2);
    let offset = index.saturating_mul(group);
    if offset >= data_len {
        return Ok(false);
    }
    stream.seek(SeekFrom::Start(data_start.saturating_add(offset)))?;
    let want = usize::try_from(data_len.saturating_sub(offset).min(group)).unwrap_or(0);
    chunk.clear();
    chunk.resize(block_size.saturating_mul(2), DSD_SILENCE);
    let got = read_full(stream, &mut chunk[..want])?;
    if got == 0 {
        return Ok(false);
    }
    if lsb_first {
        for b in &mut chunk[..got] {
            *b = b.reverse_bits();
        }
    }
    Ok(true)
}

impl DecoderEngine for DsdEngine {
    #[allow(clippy::indexing_slicing)] // Safety: from/to stay within one block; produced + take <= want <= out.len() / 2
    #[allow(clippy::arithmetic_side_effects)] // Safety: take <= remaining frames in the block and in the request
    fn decode(&mut self, out: &mut [i32], max_frames: usize) -> Result<usize, DecodeError> {
        let left = usize::try_from(self.total_frames.saturating_sub(self.position)).unwrap_or(usize::MAX);
        let want = max_frames.min(left).min(out.len() / 2);
        let mut produced = 0;
        match &mut self.payload {
            Payload::Blocks {
                block_size,
                lsb_first,
                chunk,
                chunk_index,
                frame_in_chunk,
                loaded,
            } => {
                let per_chunk = *block_size / 2;
                while produced < want {
                    if !*loaded || *frame_in_chunk >= per_chunk {
                        if *loaded {
                            *chunk_index += 1;
                            *frame_in_chunk = 0;
                        }
                        *loaded = load_chunk(
                            &mut self.stream,
                            self.data_start,
                            self.data_len,
                            *block_size,
                            *lsb_first,
                            *chunk_index,
                            chunk,
                        )?;
                        if !*loaded {
                            break;
                        }
                    }
                    let take = (want - produced).min(per_chunk - *frame_in_chunk);
                    let (l, r) = chunk.split_at(*block_size);
                    let from = *frame_in_chunk * 2;
                    let to = from + take * 2;
                    repack_planar(
                        &l[from..to],
                        &r[from..to],
                        &mut out[produced * 2..(produced + take) * 2],
                        &mut self.marker,
                    );
                    produced += take;
                    *frame_in_chunk += take;
                }
            }
            Payload::Interleaved {
                scratch,
                scratch_frames,
            } => {
                while produced < want {
                    let take = (want - produced).min(*scratch_frames);
                    scratch.resize(take * 4, 0);
                    let got = read_full(&mut self.stream, scratch)? / 4;
                    if got == 0 {
                        break;
                    }
                    repack_interleaved(
                        &scratch[..got * 4],
                        &mut out[produced * 2..(produced + got) * 2],
                        &mut self.marker,
                    );
                    produced += got;
                    if got < take {
                        break;
                    }
                }
            }
        }
        self.position += produced as u64;
        Ok(produced)
    }

    #[allow(clippy::arithmetic_side_effects)] // Safety: per_chunk >= 1; frame <= total_frames <= data_len / 4
    fn seek(&mut self, frame: u64) -> Result<(), SeekError> {
        if frame > self.total_frames {
            return Err(SeekError::OutOfRange {
                frame,
                total: self.total_frames,
            });
        }
        match &mut self.payload {
            Payload::Blocks {
                block_size,
                lsb_first,
                chunk,
                chunk_index,
                frame_in_chunk,
                loaded,
            } => {
                let per_chunk = (*block_size as u64 / 2).max(1);
                *chunk_index = frame / per_chunk;
                *frame_in_chunk = usize::try_from(frame % per_chunk).unwrap_or(0);
                *loaded = frame < self.total_frames
                    && load_chunk(
                        &mut self.stream,
                        self.data_start,
                        self.data_len,
                        *block_size,
                        *lsb_first,
                        *chunk_index,
                        chunk,
                    )?;
            }
            Payload::Interleaved { .. } => {
                self.stream.seek(SeekFrom::Start(self.data_start + frame * 4))?;
            }
        }
        self.marker.reset();
        self.position = frame;
        tracing::debug!(frame, "dsd: seek");
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
    fn test_dop_word_layout() {
        let w = dop_word(0x05, 0x12, 0x34);
        assert_eq!(w, 0x0005_3412);
        assert_eq!((w >> 16) & 0xFF, 0x05);
        assert_eq!(dop_word(0xFA, 0, 0), 0x00FA_0000);
    }

    #[test]
    fn test_interleaved_marker_alternates() {
        let src = [0x11, 0x21, 0x12, 0x22, 0x13, 0x23, 0x14, 0x24];
        let mut out = [0i32; 4];
        let mut m = DopMarker::new();
        assert_eq!(repack_interleaved(&src, &mut out, &mut m), 2);
        assert_eq!(out, [0x0005_1211, 0x0005_2221, 0x00FA_1413, 0x00FA_2423]);
        assert_eq!(m.current(), DopMarker::FIRST);
    }

    #[test]
    fn test_planar_reads_each_channel_run() {
        let left = [0xA0, 0xA1, 0xA2, 0xA3];
        let right = [0xB0, 0xB1, 0xB2, 0xB3];
        let mut out = [0i32; 4];
        let mut m = DopMarker::new();
        assert_eq!(repack_planar(&left, &right, &mut out, &mut m), 2);
        assert_eq!(out[0], 0x0005_A1A0);
        assert_eq!(out[1], 0x0005_B1B0);
        assert_eq!(out[2], 0x00FA_A3A2);
        assert_eq!(out[3], 0x00FA_B3B2);
    }

    #[test]
    fn test_repack_never_writes_past_output() {
        let src = [0u8; 16];
        let mut out = [7i32; 3];
        let mut m = DopMarker::new();
        assert_eq!(repack_interleaved(&src, &mut out, &mut m), 1);
        assert_eq!(out[2], 7);
    }

    #[test]
    fn test_dsf_rejects_mono() {
        let mut data = Vec::new();
        data.extend_from_slice(b"DSD ");
        data.extend_from_slice(&28u64.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(b"fmt ");
        data.extend_from_slice(&52u64.to_le_bytes());
        for v in [1u32, 0, 1, 1, 2_822_400, 1] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&4096u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        let err = parse_dsf(&mut std::io::Cursor::new(data)).unwrap_err();
        assert!(matches!(err, InitError::Unsupported(_)));
    }

    proptest::proptest! {
        #[test]
        fn prop_marker_alternates(src in proptest::collection::vec(proptest::num::u8::ANY, 0..256)) {
            let mut out = vec![0i32; src.len() / 2];
            let mut m = DopMarker::new();
            let n = repack_interleaved(&src, &mut out, &mut m);
            for (i, frame) in out[..n * 2].chunks_exact(2).enumerate() {
                let expected = if i % 2 == 0 { 0x05 } else { 0xFA };
                proptest::prop_assert_eq!((frame[0] >> 16) & 0xFF, expected);
                proptest::prop_assert_eq!((frame[1] >> 16) & 0xFF, expected);
            }
        }
    }
}
