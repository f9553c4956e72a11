//! WAV / AIFF engine: chunk parser and integer/float PCM conversion.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};

use super::DecoderEngine;
use crate::config::DecoderConfig;
use crate::error::{DecodeError, InitError, OpenError, SeekError};
use crate::format::FormatTag;
use crate::frame::f32_to_i32;
use crate::info::StreamInfo;
use crate::stream::{read_full, ByteStream};

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// On-disk sample encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// Unsigned 8-bit (WAV).
    U8,
    /// Signed integer of the given byte width (1..=4).
    Int(u8),
    /// IEEE 754 single precision.
    F32,
}

/// Layout of the PCM payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmLayout {
    /// Sample encoding.
    pub encoding: SampleEncoding,
    /// Samples are big-endian (AIFF `NONE`/`twos`/`fl32`).
    pub big_endian: bool,
    /// Channels per frame (1 or 2).
    pub channels: u8,
    /// Declared bits per sample.
    pub bits: u8,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl PcmLayout {
    fn bytes_per_sample(&self) -> usize {
        match self.encoding {
            SampleEncoding::U8 => 1,
            SampleEncoding::Int(w) => usize::from(w),
            SampleEncoding::F32 => 4,
        }
    }

    /// Bytes per interleaved frame.
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample().saturating_mul(usize::from(self.channels))
    }

    /// Convert one encoded sample to a left-justified i32.
    #[allow(clippy::arithmetic_side_effects)] // Safety: w is 1..=4 and a u8 minus 128 fits in i32
    pub fn sample(&self, b: &[u8]) -> i32 {
        match (self.encoding, self.big_endian) {
            (SampleEncoding::U8, _) => (i32::from(b.first().copied().unwrap_or(0x80)) - 128) << 24,
            (SampleEncoding::F32, false) => f32_to_i32(LittleEndian::read_f32(b)),
            (SampleEncoding::F32, true) => f32_to_i32(BigEndian::read_f32(b)),
            (SampleEncoding::Int(w), big) => {
                let w = usize::from(w);
                let v = if big {
                    BigEndian::read_int(b, w)
                } else {
                    LittleEndian::read_int(b, w)
                };
                #[allow(clippy::cast_possible_truncation)] // w <= 4 so v fits in i32
                let v = v as i32;
                v << (32 - 8 * w)
            }
        }
    }
}

/// Where the PCM payload lives and how it is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmContainer {
    /// Payload layout.
    pub layout: PcmLayout,
    /// Absolute offset of the first frame.
    pub data_start: u64,
    /// Payload length in bytes.
    pub data_len: u64,
    /// `Wav` or `Aiff`.
    pub format: FormatTag,
}

/// Parse a RIFF/WAVE or FORM/AIFF(-C) header.
pub fn parse_container<S: ByteStream + ?Sized>(s: &mut S) -> Result<PcmContainer, InitError> {
    let len = s.byte_len()?;
    s.seek(SeekFrom::Start(0))?;
    let mut head = [0u8; 12];
    s.read_exact(&mut head)?;
    match (&head[..4], &head[8..12]) {
        (b"RIFF", b"WAVE") => parse_wav(s, len),
        (b"FORM", b"AIFF") => parse_aiff(s, len, false),
        (b"FORM", b"AIFC") => parse_aiff(s, len, true),
        _ => Err(InitError::InvalidHeader("not a RIFF/WAVE or AIFF file")),
    }
}

fn int_encoding(bits: u16, unsigned_8: bool) -> Result<SampleEncoding, InitError> {
    match bits {
        1..=8 if unsigned_8 => Ok(SampleEncoding::U8),
        1..=8 => Ok(SampleEncoding::Int(1)),
        9..=16 => Ok(SampleEncoding::Int(2)),
        17..=24 => Ok(SampleEncoding::Int(3)),
        25..=32 => Ok(SampleEncoding::Int(4)),
        _ => Err(InitError::Unsupported("pcm bit depth")),
    }
}

fn check_channels(channels: u16) -> Result<u8, InitError> {
    match channels {
        1 | 2 => Ok(channels as u8),
        0 => Err(InitError::InvalidHeader("zero channels")),
        _ => Err(InitError::Unsupported("more than two channels")),
    }
}

fn parse_wav<S: ByteStream + ?Sized>(s: &mut S, len: u64) -> Result<PcmContainer, InitError> {
    let mut pos = 12u64;
    let mut layout: Option<PcmLayout> = None;
    while pos.saturating_add(8) <= len {
        s.seek(SeekFrom::Start(pos))?;
        let mut id = [0u8; 4];
        s.read_exact(&mut id)?;
        let size = s.read_u32::<LittleEndian>()?;
        let body = pos.saturating_add(8);
        match &id {
            b"fmt " => {
                if size < 16 {
                    return Err(InitError::InvalidHeader("fmt chunk too short"));
                }
                let mut tag = s.read_u16::<LittleEndian>()?;
                let channels = check_channels(s.read_u16::<LittleEndian>()?)?;
                let sample_rate = s.read_u32::<LittleEndian>()?;
                let _byte_rate = s.read_u32::<LittleEndian>()?;
                let _block_align = s.read_u16::<LittleEndian>()?;
                let bits = s.read_u16::<LittleEndian>()?;
                if tag == WAVE_FORMAT_EXTENSIBLE {
                    if size < 40 {
                        return Err(InitError::InvalidHeader("extensible fmt too short"));
                    }
                    // cbSize, validBits, channelMask, then the sub-format GUID.
                    s.seek(SeekFrom::Current(8))?;
                    tag = s.read_u16::<LittleEndian>()?;
                }
                let encoding = match tag {
                    WAVE_FORMAT_PCM => int_encoding(bits, true)?,
                    WAVE_FORMAT_IEEE_FLOAT if bits == 32 => SampleEncoding::F32,
                    _ => return Err(InitError::Unsupported("wav sample format")),
                };
                if sample_rate == 0 {
                    return Err(InitError::InvalidHeader("zero sample rate"));
                }
                layout = Some(PcmLayout {
                    encoding,
                    big_endian: false,
                    channels,
                    bits: u8::try_from(bits).unwrap_or(32),
                    sample_rate,
                });
            }
            b"data" => {
                let layout = layout.ok_or(InitError::InvalidHeader("data before fmt"))?;
                let data_len = if size == 0 || size == u32::MAX {
                    len.saturating_sub(body)
                } else {
                    u64::from(size).min(len.saturating_sub(body))
                };
                return Ok(PcmContainer {
                    layout,
                    data_start: body,
                    data_len,
                    format: FormatTag::Wav,
                });
            }
            _ => {}
        }
        pos = body.saturating_add(u64::from(size)).saturating_add(u64::from(size & 1));
    }
    Err(InitError::InvalidHeader("no data chunk"))
}

/// 80-bit IEEE 754 extended float (AIFF sample rate) to an integer.
#[allow(clippy::arithmetic_side_effects)] // Safety: exponent is masked to 15 bits
pub fn extended_to_u32(raw: &[u8; 10]) -> u32 {
    let exponent = BigEndian::read_u16(&raw[..2]) & 0x7FFF;
    let mantissa = BigEndian::read_u64(&raw[2..]);
    if raw[0] & 0x80 != 0 || exponent < 16_383 {
        return 0;
    }
    let shift = 16_383 + 63 - i32::from(exponent);
    if shift <= 0 {
        return u32::MAX;
    }
    u32::try_from(mantissa.checked_shr(shift as u32).unwrap_or(0)).unwrap_or(u32::MAX)
}

fn parse_aiff<S: ByteStream + ?Sized>(s: &mut S, len: u64, aifc: bool) -> Result<PcmContainer, InitError> {
    let mut pos = 12u64;
    let mut layout: Option<PcmLayout> = None;
    while pos.saturating_add(8) <= len {
        s.seek(SeekFrom::Start(pos))?;
        let mut id = [0u8; 4];
        s.read_exact(&mut id)?;
        let size = s.read_u32::<BigEndian>()?;
        let body = pos.saturating_add(8);
        match &id {
            b"COMM" => {
                let channels = check_channels(s.read_u16::<BigEndian>()?)?;
                let _frames = s.read_u32::<BigEndian>()?;
                let bits = s.read_u16::<BigEndian>()?;
                let mut rate = [0u8; 10];
                s.read_exact(&mut rate)?;
                let sample_rate = extended_to_u32(&rate);
                if sample_rate == 0 {
                    return Err(InitError::InvalidHeader("zero sample rate"));
                }
                let mut compression = *b"NONE";
                if aifc && size >= 22 {
                    s.read_exact(&mut compression)?;
                }
                let (encoding, big_endian) = match &compression {
                    b"NONE" | b"twos" => (int_encoding(bits, false)?, true),
                    b"sowt" => (int_encoding(bits, false)?, false),
                    b"fl32" | b"FL32" => (SampleEncoding::F32, true),
                    _ => return Err(InitError::Unsupported("aiff-c compression")),
                };
                layout = Some(PcmLayout {
                    encoding,
                    big_endian,
                    channels,
                    bits: u8::try_from(bits).unwrap_or(32),
                    sample_rate,
                });
            }
            b"SSND" => {
                let layout = layout.ok_or(InitError::InvalidHeader("SSND before COMM"))?;
                let offset = s.read_u32::<BigEndian>()?;
                let _block = s.read_u32::<BigEndian>()?;
                let data_start = body.saturating_add(8).saturating_add(u64::from(offset));
                let declared = u64::from(size).saturating_sub(u64::from(offset).saturating_add(8));
                return Ok(PcmContainer {
                    layout,
                    data_start,
                    data_len: declared.min(len.saturating_sub(data_start)),
                    format: FormatTag::Aiff,
                });
            }
            _ => {}
        }
        pos = body.saturating_add(u64::from(size)).saturating_add(u64::from(size & 1));
    }
    Err(InitError::InvalidHeader("no SSND chunk"))
}

/// WAV/AIFF decoding state.
pub struct WavEngine {
    stream: Box<dyn ByteStream>,
    container: PcmContainer,
    total_frames: u64,
    position: u64,
    scratch: Vec<u8>,
    scratch_frames: usize,
}

impl WavEngine {
    /// Parse the header and position at the first frame.
    pub fn open(
        mut stream: Box<dyn ByteStream>,
        config: &DecoderConfig,
    ) -> Result<(Self, StreamInfo), OpenError> {
        let container = parse_container(&mut stream)?;
        let layout = container.layout;
        let align = layout.block_align() as u64;
        let total_frames = container.data_len.checked_div(align).unwrap_or(0);

        let scratch_frames = config.scratch_frames.max(1);
        let mut scratch = Vec::new();
        scratch.try_reserve_exact(scratch_frames.saturating_mul(layout.block_align()))?;
        stream.seek(SeekFrom::Start(container.data_start))?;

        let mut info = StreamInfo::new(container.format);
        info.sample_rate = layout.sample_rate;
        info.bits_per_sample = layout.bits;
        info.source_channels = layout.channels;
        info.total_frames = total_frames;

        tracing::debug!(
            format = container.format.as_str(),
            rate = layout.sample_rate,
            bits = layout.bits,
            channels = layout.channels,
            total_frames,
            "pcm: opened"
        );
        Ok((
            Self {
                stream,
                container,
                total_frames,
                position: 0,
                scratch,
                scratch_frames,
            },
            info,
        ))
    }
}

impl DecoderEngine for WavEngine {
    fn decode(&mut self, out: &mut [i32], max_frames: usize) -> Result<usize, DecodeError> {
        let layout = self.container.layout;
        let remaining = usize::try_from(self.total_frames.saturating_sub(self.position)).unwrap_or(usize::MAX);
        let want = max_frames.min(remaining).min(self.scratch_frames);
        if want == 0 {
            return Ok(0);
        }
        let align = layout.block_align();
        self.scratch.resize(want.saturating_mul(align), 0);
        let got = read_full(&mut self.stream, &mut self.scratch)?
            .checked_div(align)
            .unwrap_or(0);

        let width = layout.bytes_per_sample();
        for (frame, dst) in self.scratch.chunks_exact(align).take(got).zip(out.chunks_exact_mut(2)) {
            let (first, rest) = frame.split_at(width.min(frame.len()));
            let left = layout.sample(first);
            let right = if layout.channels == 2 { layout.sample(rest) } else { left };
            if let [l, r] = dst {
                *l = left;
                *r = right;
            }
        }
        self.position = self.position.saturating_add(got as u64);
        Ok(got)
    }

    fn seek(&mut self, frame: u64) -> Result<(), SeekError> {
        let target = frame.min(self.total_frames);
        let align = self.container.layout.block_align() as u64;
        self.stream
            .seek(SeekFrom::Start(
                self.container.data_start.saturating_add(target.saturating_mul(align)),
            ))?;
        self.position = target;
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
    fn test_extended_rates() {
        // 44100 Hz
        let r44 = [0x40, 0x0E, 0xAC, 0x44, 0, 0, 0, 0, 0, 0];
        assert_eq!(extended_to_u32(&r44), 44_100);
        // 48000 Hz
        let r48 = [0x40, 0x0E, 0xBB, 0x80, 0, 0, 0, 0, 0, 0];
        assert_eq!(extended_to_u32(&r48), 48_000);
        assert_eq!(extended_to_u32(&[0; 10]), 0);
    }

    #[test]
    fn test_sample_conversion_left_justifies() {
        let mut l = PcmLayout {
            encoding: SampleEncoding::Int(2),
            big_endian: false,
            channels: 2,
            bits: 16,
            sample_rate: 44_100,
        };
        assert_eq!(l.sample(&[0x01, 0x80]), i32::from(0x8001u16 as i16) << 16);
        l.big_endian = true;
        assert_eq!(l.sample(&[0x7F, 0xFF]), 0x7FFF << 16);
        l.encoding = SampleEncoding::Int(3);
        assert_eq!(l.sample(&[0xFF, 0xFF, 0xFF]), -1 << 8);
        l.encoding = SampleEncoding::U8;
        assert_eq!(l.sample(&[0x80]), 0);
        assert_eq!(l.sample(&[0x00]), i32::MIN);
        l.encoding = SampleEncoding::Int(1);
        assert_eq!(l.sample(&[0x80]), i32::MIN);
        l.encoding = SampleEncoding::F32;
        assert_eq!(l.sample(&0.5f32.to_be_bytes()), 1 << 30);
    }

    #[test]
    fn test_bit_depth_mapping() {
        assert_eq!(int_encoding(8, true).unwrap(), SampleEncoding::U8);
        assert_eq!(int_encoding(8, false).unwrap(), SampleEncoding::Int(1));
        assert_eq!(int_encoding(20, false).unwrap(), SampleEncoding::Int(3));
        assert!(int_encoding(64, false).is_err());
        assert!(check_channels(6).is_err());
    }
}
