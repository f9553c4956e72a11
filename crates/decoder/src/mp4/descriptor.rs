//! MPEG-4 elementary stream descriptors inside `esds`.
//!
//! Only the path to the AudioSpecificConfig is followed:
//! `ES_Descriptor (0x03) -> DecoderConfigDescriptor (0x04) ->
//! DecoderSpecificInfo (0x05)`.

use crate::config::CODEC_CONFIG_MAX;

const ES_DESCRIPTOR: u8 = 0x03;
const DECODER_CONFIG: u8 = 0x04;
const DECODER_SPECIFIC_INFO: u8 = 0x05;

/// Fixed part of DecoderConfigDescriptor: object type, stream type,
/// buffer size (24 bit), max and average bitrate.
const DECODER_CONFIG_FIXED: usize = 13;

/// Codec configuration blob with fixed capacity.
pub type ConfigBlob = heapless::Vec<u8, CODEC_CONFIG_MAX>;

/// Reader over a descriptor byte slice. Every accessor is bounds-checked.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn u8(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos = self.pos.checked_add(1)?;
        Some(b)
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        let next = self.pos.checked_add(n)?;
        if next > self.data.len() {
            return None;
        }
        self.pos = next;
        Some(())
    }

    /// Expandable (BER-style) length: up to four 7-bit groups.
    #[allow(clippy::arithmetic_side_effects)] // Safety: four 7-bit groups fit in 28 bits
    fn length(&mut self) -> Option<usize> {
        let mut len = 0usize;
        for _ in 0..4 {
            let b = self.u8()?;
            len = (len << 7) | usize::from(b & 0x7F);
            if b & 0x80 == 0 {
                return Some(len);
            }
        }
        Some(len)
    }

    /// Read a descriptor header; returns `(tag, body)` and moves past it.
    fn descriptor(&mut self) -> Option<(u8, &'a [u8])> {
        let tag = self.u8()?;
        let len = self.length()?;
        let end = self.pos.checked_add(len)?.min(self.data.len());
        let body = self.data.get(self.pos..end)?;
        self.pos = end;
        Some((tag, body))
    }

    fn rest(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or(&[])
    }
}

/// Find the descriptor with `tag` among the siblings in `data`.
fn find(data: &[u8], tag: u8) -> Option<&[u8]> {
    let mut c = Cursor::new(data);
    while let Some((t, body)) = c.descriptor() {
        if t == tag {
            return Some(body);
        }
    }
    None
}

/// Extract the AudioSpecificConfig from an `esds` payload (after the FullBox
/// version/flags word).
///
/// Returns `None` if any descriptor on the path is missing or truncated, or
/// if the config exceeds [`CODEC_CONFIG_MAX`] bytes.
pub fn audio_specific_config(esds: &[u8]) -> Option<ConfigBlob> {
    let es = find(esds, ES_DESCRIPTOR)?;
    let mut c = Cursor::new(es);
    c.skip(2)?; // ES_ID
    let flags = c.u8()?;
    if flags & 0x80 != 0 {
        c.skip(2)?; // dependsOn_ES_ID
    }
    if flags & 0x40 != 0 {
        let url_len = c.u8()?;
        c.skip(usize::from(url_len))?;
    }
    if flags & 0x20 != 0 {
        c.skip(2)?; // OCR_ES_Id
    }

    let dcd = find(c.rest(), DECODER_CONFIG)?;
    let after_fixed = dcd.get(DECODER_CONFIG_FIXED..)?;
    let dsi = find(after_fixed, DECODER_SPECIFIC_INFO)?;
    if dsi.is_empty() {
        return None;
    }
    heapless::Vec::from_slice(dsi).ok()
}

/// AAC parameters carried by an AudioSpecificConfig.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AacConfig {
    /// Audio object type (2 = AAC-LC).
    pub object_type: u8,
    /// Sampling rate in Hz.
    pub sample_rate: u32,
    /// Channel configuration (1 = mono, 2 = stereo).
    pub channels: u8,
}

/// Standard MPEG-4 sampling-frequency table, indexed by the 4-bit index.
pub const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Look up a sampling-frequency index.
pub fn sample_rate_for_index(index: u8) -> Option<u32> {
    SAMPLE_RATES.get(usize::from(index)).copied()
}

/// Parse the leading fields of an AudioSpecificConfig.
///
/// Handles the escaped object type (31) and the explicit 24-bit sampling
/// frequency (index 15).
pub fn parse_audio_specific_config(asc: &[u8]) -> Option<AacConfig> {
    let mut bits = BitReader::new(asc);
    let mut object_type = bits.read(5)?;
    if object_type == 31 {
        object_type = 32u32.checked_add(bits.read(6)?)?;
    }
    let sfi = bits.read(4)?;
    let sample_rate = if sfi == 15 {
        bits.read(24)?
    } else {
        sample_rate_for_index(u8::try_from(sfi).ok()?)?
    };
    let channels = bits.read(4)?;
    Some(AacConfig {
        object_type: u8::try_from(object_type).ok()?,
        sample_rate,
        channels: u8::try_from(channels).ok()?,
    })
}

/// Build a two-byte AudioSpecificConfig from ADTS header fields.
#[allow(clippy::arithmetic_side_effects)] // Safety: every field is masked before it is shifted
pub fn synthesize_asc(object_type: u8, sfi: u8, channels: u8) -> [u8; 2] {
    [
        ((object_type & 0x1F) << 3) | ((sfi >> 1) & 0x07),
        ((sfi & 0x01) << 7) | ((channels & 0x0F) << 3),
    ]
}

/// MSB-first bit reader.
struct BitReader<'a> {
    data: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit: 0 }
    }

    #[allow(clippy::arithmetic_side_effects)] // Safety: bit % 8 <= 7; callers read at most 24 bits
    fn read(&mut self, n: u32) -> Option<u32> {
        let mut v = 0u32;
        for _ in 0..n {
            let byte = *self.data.get(self.bit / 8)?;
            let shift = 7 - (self.bit % 8);
            v = (v << 1) | u32::from((byte >> shift) & 1);
            self.bit = self.bit.checked_add(1)?;
        }
        Some(v)
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
    use proptest::prelude::*;

    fn esds_payload(flags: u8, asc: &[u8]) -> Vec<u8> {
        let mut dsi = vec![DECODER_SPECIFIC_INFO, asc.len() as u8];
        dsi.extend_from_slice(asc);

        let mut dcd = vec![DECODER_CONFIG, (DECODER_CONFIG_FIXED + dsi.len()) as u8];
        dcd.extend_from_slice(&[0x40, 0x15, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        dcd.extend(dsi);

        let mut es_body = vec![0x00, 0x01, flags];
        if flags & 0x80 != 0 {
            es_body.extend_from_slice(&[0, 0]);
        }
        if flags & 0x40 != 0 {
            es_body.extend_from_slice(&[3, b'a', b'b', b'c']);
        }
        if flags & 0x20 != 0 {
            es_body.extend_from_slice(&[0, 0]);
        }
        es_body.extend(dcd);

        // Four-byte expandable length, as many muxers write it.
        let len = es_body.len();
        let mut es = vec![ES_DESCRIPTOR, 0x80, 0x80, 0x80, len as u8];
        es.extend(es_body);
        es
    }

    #[test]
    fn test_extracts_asc() {
        let esds = esds_payload(0, &[0x12, 0x10]);
        assert_eq!(audio_specific_config(&esds).unwrap().as_slice(), &[0x12, 0x10]);
    }

    #[test]
    fn test_honours_es_flags() {
        let esds = esds_payload(0x80 | 0x40 | 0x20, &[0x11, 0x90]);
        assert_eq!(audio_specific_config(&esds).unwrap().as_slice(), &[0x11, 0x90]);
    }

    #[test]
    fn test_missing_dsi_is_none() {
        let mut esds = esds_payload(0, &[0x12, 0x10]);
        esds.truncate(esds.len() - 3);
        assert!(audio_specific_config(&esds).is_none());
    }

    #[test]
    fn test_parse_lc_stereo_44k() {
        let cfg = parse_audio_specific_config(&[0x12, 0x10]).unwrap();
        assert_eq!(cfg.object_type, 2);
        assert_eq!(cfg.sample_rate, 44_100);
        assert_eq!(cfg.channels, 2);
    }

    #[test]
    fn test_parse_explicit_frequency() {
        // AOT 2, sfi 15, rate 0x00AC44 (44100), channels 1
        // 00010 1111 000000001010110001000100 0001
        let asc = [0x17, 0x80, 0x56, 0x22, 0x08];
        let cfg = parse_audio_specific_config(&asc).unwrap();
        assert_eq!(cfg.sample_rate, 44_100);
        assert_eq!(cfg.channels, 1);
    }

    #[test]
    fn test_synthesized_asc_round_trips_fields() {
        let asc = synthesize_asc(2, 3, 2);
        let cfg = parse_audio_specific_config(&asc).unwrap();
        assert_eq!((cfg.object_type, cfg.sample_rate, cfg.channels), (2, 48_000, 2));
    }

    proptest! {
        #[test]
        fn prop_arbitrary_esds_never_panics(data in proptest::collection::vec(any::<u8>(), 0..128)) {
            let _ = audio_specific_config(&data);
            let _ = parse_audio_specific_config(&data);
        }
    }
}
