//! FLAC fixtures built from VERBATIM subframes.
//!
//! No prediction, so the encoder is trivial, but the framing (UTF-8 frame
//! numbers, CRC-8 header check, CRC-16 frame check) is real and a conforming
//! reader accepts it.

use byteorder::{BigEndian, WriteBytesExt};

const BLOCK_STREAMINFO: u8 = 0;
const BLOCK_VORBIS_COMMENT: u8 = 4;

/// CRC-8, polynomial 0x07, as used by FLAC frame headers.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |mut crc, &b| {
        crc ^= b;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
        }
        crc
    })
}

/// CRC-16, polynomial 0x8005, as used over whole FLAC frames.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |mut crc, &b| {
        crc ^= u16::from(b) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x8005 } else { crc << 1 };
        }
        crc
    })
}

/// FLAC's "UTF-8" coding of a frame number (up to 31 bits).
fn utf8_number(n: u32, out: &mut Vec<u8>) {
    if n < 0x80 {
        out.push(n as u8);
        return;
    }
    let bytes = match n {
        0..=0x7FF => 2,
        0x800..=0xFFFF => 3,
        0x1_0000..=0x1F_FFFF => 4,
        0x20_0000..=0x3FF_FFFF => 5,
        _ => 6,
    };
    let lead_mask: u8 = !(0xFFu8 >> bytes);
    let lead_bits = 6 * (bytes - 1);
    out.push(lead_mask | (n >> lead_bits) as u8);
    for i in (0..bytes - 1).rev() {
        out.push(0x80 | ((n >> (6 * i)) & 0x3F) as u8);
    }
}

fn block(kind: u8, last: bool, body: &[u8], out: &mut Vec<u8>) {
    out.push(if last { 0x80 | kind } else { kind });
    out.write_u24::<BigEndian>(body.len() as u32).ok();
    out.extend_from_slice(body);
}

/// Stream parameters for [`flac_bytes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlacSpec {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// 1 or 2.
    pub channels: u8,
    /// PCM frames per FLAC frame (the last may be shorter).
    pub block_size: u16,
    /// Vorbis comments as `KEY=value`.
    pub comments: Vec<String>,
}

impl Default for FlacSpec {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            block_size: 1152,
            comments: Vec::new(),
        }
    }
}

fn streaminfo(spec: &FlacSpec, total: u64) -> Vec<u8> {
    let mut b = Vec::with_capacity(34);
    b.write_u16::<BigEndian>(spec.block_size).ok();
    b.write_u16::<BigEndian>(spec.block_size).ok();
    b.write_u24::<BigEndian>(0).ok();
    b.write_u24::<BigEndian>(0).ok();
    // rate(20) | channels-1 (3) | bps-1 (5) | total samples (36)
    let packed: u64 = (u64::from(spec.sample_rate) << 44)
        | (u64::from(spec.channels - 1) << 41)
        | (15u64 << 36)
        | (total & 0xF_FFFF_FFFF);
    b.write_u64::<BigEndian>(packed).ok();
    b.extend_from_slice(&[0u8; 16]);
    b
}

fn vorbis_comment(comments: &[String]) -> Vec<u8> {
    let vendor = b"decoder-testing";
    let mut b = Vec::new();
    b.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    b.extend_from_slice(vendor);
    b.extend_from_slice(&(comments.len() as u32).to_le_bytes());
    for c in comments {
        b.extend_from_slice(&(c.len() as u32).to_le_bytes());
        b.extend_from_slice(c.as_bytes());
    }
    b
}

/// One frame of 16-bit VERBATIM subframes. `samples` is interleaved.
fn frame(spec: &FlacSpec, number: u32, samples: &[i16], out: &mut Vec<u8>) {
    let channels = usize::from(spec.channels);
    let frames = samples.len() / channels;
    let start = out.len();
    // sync + fixed blocking strategy
    out.extend_from_slice(&[0xFF, 0xF8]);
    // block size: 16-bit value at end of header; rate: from STREAMINFO
    out.push(0x70);
    // independent channels, 16 bits per sample
    out.push(((spec.channels - 1) << 4) | (0b100 << 1));
    utf8_number(number, out);
    out.write_u16::<BigEndian>((frames - 1) as u16).ok();
    let header_crc = crc8(&out[start..]);
    out.push(header_crc);

    for c in 0..channels {
        out.push(0x02);
        for f in 0..frames {
            out.write_i16::<BigEndian>(samples[f * channels + c]).ok();
        }
    }
    let crc = crc16(&out[start..]);
    out.write_u16::<BigEndian>(crc).ok();
}

/// A complete `.flac` stream holding `samples` (interleaved, 16 bit).
pub fn flac_bytes(spec: &FlacSpec, samples: &[i16]) -> Vec<u8> {
    let channels = usize::from(spec.channels);
    let total = (samples.len() / channels) as u64;
    let mut out = b"fLaC".to_vec();
    let has_comments = !spec.comments.is_empty();
    block(BLOCK_STREAMINFO, !has_comments, &streaminfo(spec, total), &mut out);
    if has_comments {
        block(BLOCK_VORBIS_COMMENT, true, &vorbis_comment(&spec.comments), &mut out);
    }
    let per_frame = usize::from(spec.block_size) * channels;
    for (i, chunk) in samples.chunks(per_frame).enumerate() {
        frame(spec, i as u32, chunk, &mut out);
    }
    out
}

/// Interleaved 16-bit test signal: frame `i`, channel `c` is `i * 3 + c`
/// wrapped into `i16`.
pub fn counting_signal(frames: usize, channels: u8) -> Vec<i16> {
    (0..frames)
        .flat_map(|i| (0..channels).map(move |c| (i * 3 + usize::from(c)) as i16))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_check_values() {
        assert_eq!(crc8(b"123456789"), 0xF4);
        assert_eq!(crc16(b"123456789"), 0xFEE8);
    }

    #[test]
    fn utf8_frame_numbers() {
        let mut v = Vec::new();
        utf8_number(0x7F, &mut v);
        assert_eq!(v, [0x7F]);
        v.clear();
        utf8_number(0x80, &mut v);
        assert_eq!(v, [0xC2, 0x80]);
        v.clear();
        utf8_number(0x800, &mut v);
        assert_eq!(v, [0xE0, 0xA0, 0x80]);
    }

    #[test]
    fn stream_starts_with_marker_and_streaminfo() {
        let spec = FlacSpec::default();
        let bytes = flac_bytes(&spec, &counting_signal(2000, 2));
        assert_eq!(&bytes[..4], b"fLaC");
        assert_eq!(bytes[4], 0x80);
        assert_eq!(&bytes[5..8], &[0, 0, 34]);
        assert_eq!(&bytes[42..44], &[0xFF, 0xF8]);
    }
}
