//! MP3 and ADTS fixtures with tagged payloads.
//!
//! The payloads are not real compressed audio. Each frame carries its index
//! as a big-endian `u32` where the fakes in [`crate::fakes`] look for it.

/// MPEG-1 Layer III, 128 kbit/s, 44.1 kHz, stereo, no CRC, no padding.
pub const MP3_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];

/// Bytes per frame for [`MP3_HEADER`]: `144 * 128000 / 44100`.
pub const MP3_FRAME_LEN: usize = 417;

/// PCM frames per MPEG-1 Layer III frame.
pub const MP3_SAMPLES_PER_FRAME: u32 = 1152;

/// Gapless info written into a Xing/Info frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gapless {
    /// Encoder delay in samples.
    pub delay: u16,
    /// End padding in samples.
    pub padding: u16,
}

/// Options for [`mp3_bytes`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mp3Spec {
    /// Audio frames to write.
    pub frames: u32,
    /// Prepend an ID3v2 tag with this many body bytes.
    pub id3_body: Option<usize>,
    /// Write an `Info` frame with a frame count and LAME gapless fields.
    pub gapless: Option<Gapless>,
    /// Append a 128-byte ID3v1 tag.
    pub id3v1: bool,
}

/// One audio frame tagged with `index`.
pub fn mp3_frame(index: u32) -> Vec<u8> {
    let mut f = vec![0u8; MP3_FRAME_LEN];
    f[..4].copy_from_slice(&MP3_HEADER);
    f[4..8].copy_from_slice(&index.to_be_bytes());
    f
}

/// `Info` frame: side info (32 bytes for MPEG-1 stereo), the tag, flags
/// (frames present), the frame count and a LAME extension.
fn info_frame(frames: u32, gapless: Gapless) -> Vec<u8> {
    let mut f = vec![0u8; MP3_FRAME_LEN];
    f[..4].copy_from_slice(&MP3_HEADER);
    let p = 4 + 32;
    f[p..p + 4].copy_from_slice(b"Info");
    f[p + 4..p + 8].copy_from_slice(&1u32.to_be_bytes());
    f[p + 8..p + 12].copy_from_slice(&frames.to_be_bytes());
    let lame = p + 12;
    f[lame..lame + 9].copy_from_slice(b"LAME3.100");
    // 12-bit delay then 12-bit padding, 21 bytes into the LAME tag.
    let d = u32::from(gapless.delay & 0xFFF);
    let pd = u32::from(gapless.padding & 0xFFF);
    let packed = (d << 12) | pd;
    f[lame + 21] = (packed >> 16) as u8;
    f[lame + 22] = (packed >> 8) as u8;
    f[lame + 23] = packed as u8;
    f
}

/// A complete MP3 stream per `spec`.
pub fn mp3_bytes(spec: &Mp3Spec) -> Vec<u8> {
    let mut out = spec.id3_body.map(crate::id3v2).unwrap_or_default();
    if let Some(g) = spec.gapless {
        out.extend_from_slice(&info_frame(spec.frames, g));
    }
    for i in 0..spec.frames {
        out.extend_from_slice(&mp3_frame(i));
    }
    if spec.id3v1 {
        let mut tag = vec![0u8; 128];
        tag[..3].copy_from_slice(b"TAG");
        out.extend_from_slice(&tag);
    }
    out
}

/// ADTS sampling-frequency index for 44.1 kHz.
pub const SFI_44100: u8 = 4;

/// Seven-byte ADTS header (no CRC), AAC-LC.
pub fn adts_header(sfi: u8, channels: u8, frame_len: usize) -> [u8; 7] {
    [
        0xFF,
        0xF1,
        (1 << 6) | (sfi << 2) | (channels >> 2),
        ((channels & 3) << 6) | ((frame_len >> 11) & 0x03) as u8,
        (frame_len >> 3) as u8,
        (((frame_len & 7) as u8) << 5) | 0x1F,
        0xFC,
    ]
}

/// Options for [`adts_bytes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdtsSpec {
    /// Sampling-frequency index.
    pub sfi: u8,
    /// Channel configuration.
    pub channels: u8,
    /// Frames to write.
    pub frames: u32,
    /// Total length of each frame including the header.
    pub frame_len: usize,
    /// Prepend an ID3v2 tag with this many body bytes.
    pub id3_body: Option<usize>,
}

impl Default for AdtsSpec {
    fn default() -> Self {
        Self {
            sfi: SFI_44100,
            channels: 2,
            frames: 100,
            frame_len: 371,
            id3_body: None,
        }
    }
}

/// A complete ADTS stream; each payload starts with its frame index.
pub fn adts_bytes(spec: &AdtsSpec) -> Vec<u8> {
    let mut out = spec.id3_body.map(crate::id3v2).unwrap_or_default();
    for i in 0..spec.frames {
        let start = out.len();
        out.extend_from_slice(&adts_header(spec.sfi, spec.channels, spec.frame_len));
        out.extend_from_slice(&i.to_be_bytes());
        out.resize(start + spec.frame_len, 0);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use decoder::engine::adts::AdtsHeader;
    use decoder::engine::mp3::{parse_header, parse_xing};

    #[test]
    fn mp3_frame_header_matches_length() {
        let h = parse_header(&mp3_frame(0)).unwrap();
        assert_eq!(h.frame_len, MP3_FRAME_LEN);
        assert_eq!(h.samples_per_frame, MP3_SAMPLES_PER_FRAME);
    }

    #[test]
    fn info_frame_is_readable() {
        let f = info_frame(10, Gapless { delay: 576, padding: 1000 });
        let h = parse_header(&f).unwrap();
        let x = parse_xing(&f, &h).unwrap();
        assert_eq!(x.frames, Some(10));
        assert_eq!(x.delay, 576);
        assert_eq!(x.padding, 1000);
    }

    #[test]
    fn adts_header_round_trips_length() {
        let h = AdtsHeader::parse(&adts_header(SFI_44100, 2, 371)).unwrap();
        assert_eq!(h.frame_len, 371);
        assert_eq!(h.sample_rate, 44_100);
    }
}
