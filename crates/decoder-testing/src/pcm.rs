//! WAV and AIFF fixtures.

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};

/// Shape of a synthesized PCM file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSpec {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// 1 or 2.
    pub channels: u16,
    /// 8, 16, 24 or 32.
    pub bits: u16,
}

impl PcmSpec {
    /// 44.1 kHz, stereo, 16 bit.
    pub const fn cd() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            bits: 16,
        }
    }

    /// Same layout with one channel.
    pub const fn mono(mut self) -> Self {
        self.channels = 1;
        self
    }

    /// Same layout at `bits`.
    pub const fn with_bits(mut self, bits: u16) -> Self {
        self.bits = bits;
        self
    }

    /// Same layout at `rate`.
    pub const fn with_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    fn width(&self) -> usize {
        usize::from(self.bits.div_ceil(8))
    }

    fn block_align(&self) -> usize {
        self.width() * usize::from(self.channels)
    }
}

/// `frames` frames of a deterministic signal, as right-justified integers
/// within the bit depth of `spec`, interleaved.
///
/// Sample `i` of channel `c` is a sawtooth offset per channel, so adjacent
/// frames and channels always differ.
pub fn ramp(spec: &PcmSpec, frames: usize) -> Vec<i32> {
    let bits = u32::from(spec.bits.clamp(8, 32));
    let span = 1i64 << (bits - 1);
    (0..frames)
        .flat_map(|i| {
            (0..spec.channels).map(move |c| {
                let v = (i as i64 * 97 + i64::from(c) * 1_000) % span;
                (v - span / 2) as i32
            })
        })
        .collect()
}

fn push_sample(out: &mut Vec<u8>, width: usize, sample: i32, big_endian: bool) {
    match (width, big_endian) {
        (1, _) => out.push((sample + 128) as u8),
        (2, false) => out.extend_from_slice(&(sample as i16).to_le_bytes()),
        (2, true) => out.extend_from_slice(&(sample as i16).to_be_bytes()),
        (3, false) => out.extend_from_slice(&sample.to_le_bytes()[..3]),
        (3, true) => out.extend_from_slice(&sample.to_be_bytes()[1..]),
        (_, false) => out.extend_from_slice(&sample.to_le_bytes()),
        (_, true) => out.extend_from_slice(&sample.to_be_bytes()),
    }
}

/// RIFF/WAVE file holding `samples` (interleaved, right-justified).
pub fn wav_bytes(spec: &PcmSpec, samples: &[i32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * spec.width());
    for &s in samples {
        push_sample(&mut data, spec.width(), s, false);
    }
    let mut out = Vec::with_capacity(data.len() + 44);
    out.extend_from_slice(b"RIFF");
    out.write_u32::<LittleEndian>((36 + data.len()) as u32).ok();
    out.extend_from_slice(b"WAVEfmt ");
    out.write_u32::<LittleEndian>(16).ok();
    out.write_u16::<LittleEndian>(1).ok();
    out.write_u16::<LittleEndian>(spec.channels).ok();
    out.write_u32::<LittleEndian>(spec.sample_rate).ok();
    out.write_u32::<LittleEndian>(spec.sample_rate * spec.block_align() as u32)
        .ok();
    out.write_u16::<LittleEndian>(spec.block_align() as u16).ok();
    out.write_u16::<LittleEndian>(spec.bits).ok();
    out.extend_from_slice(b"data");
    out.write_u32::<LittleEndian>(data.len() as u32).ok();
    out.extend_from_slice(&data);
    if data.len() % 2 == 1 {
        out.push(0);
    }
    out
}

/// 80-bit extended float encoding of an integer sample rate.
pub fn extended_rate(rate: u32) -> [u8; 10] {
    let mut raw = [0u8; 10];
    if rate == 0 {
        return raw;
    }
    let log2 = 31 - rate.leading_zeros();
    BigEndian::write_u16(&mut raw[..2], 16_383 + log2 as u16);
    BigEndian::write_u64(&mut raw[2..], u64::from(rate) << (63 - log2));
    raw
}

/// FORM/AIFF file holding `samples` (interleaved, right-justified, big-endian).
pub fn aiff_bytes(spec: &PcmSpec, samples: &[i32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * spec.width());
    for &s in samples {
        push_sample(&mut data, spec.width(), s, true);
    }
    let frames = samples.len() / usize::from(spec.channels.max(1));
    let ssnd_len = 8 + data.len();
    let mut out = Vec::with_capacity(ssnd_len + 54);
    out.extend_from_slice(b"FORM");
    out.write_u32::<BigEndian>((4 + 26 + 8 + ssnd_len) as u32).ok();
    out.extend_from_slice(b"AIFFCOMM");
    out.write_u32::<BigEndian>(18).ok();
    out.write_u16::<BigEndian>(spec.channels).ok();
    out.write_u32::<BigEndian>(frames as u32).ok();
    out.write_u16::<BigEndian>(spec.bits).ok();
    out.extend_from_slice(&extended_rate(spec.sample_rate));
    out.extend_from_slice(b"SSND");
    out.write_u32::<BigEndian>(ssnd_len as u32).ok();
    out.write_u32::<BigEndian>(0).ok();
    out.write_u32::<BigEndian>(0).ok();
    out.extend_from_slice(&data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_rate_known_encodings() {
        assert_eq!(extended_rate(44_100), [0x40, 0x0E, 0xAC, 0x44, 0, 0, 0, 0, 0, 0]);
        assert_eq!(extended_rate(48_000), [0x40, 0x0E, 0xBB, 0x80, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn wav_header_is_44_bytes() {
        let spec = PcmSpec::cd();
        let bytes = wav_bytes(&spec, &ramp(&spec, 10));
        assert_eq!(bytes.len(), 44 + 40);
    }
}
