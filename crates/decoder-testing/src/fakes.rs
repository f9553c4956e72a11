//! Scripted entropy decoders.
//!
//! They understand only the tagged payloads written by this crate's fixture
//! builders and emit [`pattern_sample`] values, so a test can check which
//! compressed frame every output sample came from.

use decoder::codec::{BoxedDecoder, BoxedPackedDecoder};
use decoder::engine::mp3::parse_header;
use decoder::frame::{CodecSetup, FrameDecoder, PackedFrameDecoder, PcmFrame};
use decoder::FrameError;

/// First payload byte that makes [`PatternDecoder`] report a corrupt frame.
pub const CORRUPT_MARKER: u8 = 0xEE;

/// Sample `k` of the frame tagged `tag`: the tag in the upper half, the
/// in-frame index in the lower half.
pub fn pattern_sample(tag: u32, k: usize) -> i32 {
    (((tag & 0x7FFF) << 16) | (k as u32 & 0xFFFF)) as i32
}

/// Tag of a payload: its first four bytes, big-endian.
fn payload_tag(input: &[u8]) -> Option<u32> {
    let b = input.get(..4)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn fill_pattern(output: &mut PcmFrame, tag: u32, frames: usize, channels: u8, rate: u32) {
    output.samples.clear();
    for k in 0..frames {
        for _ in 0..channels {
            output.samples.push(pattern_sample(tag, k));
        }
    }
    output.len = frames;
    output.channels = channels;
    output.sample_rate = rate;
}

/// Emits a fixed number of frames per packet, tagged by the packet's first
/// four bytes. Consumes the whole input.
#[derive(Debug, Clone)]
pub struct PatternDecoder {
    frames_per_packet: usize,
    channels: u8,
    sample_rate: u32,
}

impl PatternDecoder {
    /// Decoder producing `frames_per_packet` frames per call.
    pub fn new(frames_per_packet: usize, channels: u8, sample_rate: u32) -> Self {
        Self {
            frames_per_packet,
            channels,
            sample_rate,
        }
    }

    /// Factory in the shape engines accept; channels and rate come from the setup.
    pub fn factory(
        frames_per_packet: usize,
    ) -> impl FnOnce(&CodecSetup<'_>) -> Result<BoxedDecoder, FrameError> {
        move |setup| {
            Ok(Box::new(Self::new(frames_per_packet, setup.channels, setup.sample_rate)) as BoxedDecoder)
        }
    }
}

impl FrameDecoder for PatternDecoder {
    fn decode_frame(&mut self, input: &[u8], output: &mut PcmFrame) -> Result<usize, FrameError> {
        if input.first() == Some(&CORRUPT_MARKER) {
            return Err(FrameError::InvalidData);
        }
        let tag = payload_tag(input).ok_or(FrameError::InvalidData)?;
        fill_pattern(output, tag, self.frames_per_packet, self.channels, self.sample_rate);
        Ok(input.len())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u8 {
        self.channels
    }
}

/// Walks MPEG audio frames in a byte window the way a real MP3 decoder does:
/// skips junk to the next header, reports `EndOfStream` on a short frame,
/// and emits one tagged frame per header. The tag is read from bytes 4..8.
#[derive(Debug, Default, Clone)]
pub struct FakeMp3Decoder {
    sample_rate: u32,
    channels: u8,
}

impl FakeMp3Decoder {
    /// Factory in the shape engines accept.
    pub fn factory(setup: &CodecSetup<'_>) -> Result<BoxedDecoder, FrameError> {
        let _ = setup;
        Ok(Box::new(Self::default()))
    }
}

impl FrameDecoder for FakeMp3Decoder {
    fn decode_frame(&mut self, input: &[u8], output: &mut PcmFrame) -> Result<usize, FrameError> {
        output.clear();
        let Some(header) = parse_header(input) else {
            // Junk: consume up to the next header without output.
            let next = (1..input.len().saturating_sub(3)).find(|&i| parse_header(&input[i..]).is_some());
            return next.ok_or(FrameError::EndOfStream);
        };
        if input.len() < header.frame_len {
            return Err(FrameError::EndOfStream);
        }
        let tag = payload_tag(&input[4..]).unwrap_or(0);
        self.sample_rate = header.sample_rate;
        self.channels = header.channels;
        fill_pattern(
            output,
            tag,
            header.samples_per_frame as usize,
            header.channels,
            header.sample_rate,
        );
        Ok(header.frame_len)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u8 {
        self.channels
    }
}

/// Packet layout understood by [`FakeAlacDecoder`]: tag, then frame count.
pub fn alac_packet(tag: u32, frames: u32) -> Vec<u8> {
    let mut p = tag.to_be_bytes().to_vec();
    p.extend_from_slice(&frames.to_be_bytes());
    p
}

/// 16-bit value of sample `k` in the ALAC packet tagged `tag`.
pub fn alac_sample(tag: u32, k: usize) -> i16 {
    (((tag & 0x7F) << 8) | (k as u32 & 0xFF)) as i16
}

/// Packed 16-bit little-endian output, one [`alac_sample`] per frame per channel.
#[derive(Debug, Clone)]
pub struct FakeAlacDecoder {
    channels: u8,
}

impl FakeAlacDecoder {
    /// Factory in the shape the ALAC engine accepts.
    pub fn factory(setup: &CodecSetup<'_>) -> Result<BoxedPackedDecoder, FrameError> {
        Ok(Box::new(Self {
            channels: setup.channels,
        }))
    }
}

impl PackedFrameDecoder for FakeAlacDecoder {
    fn decode_packed(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<usize, FrameError> {
        let tag = payload_tag(input).ok_or(FrameError::InvalidData)?;
        let frames = payload_tag(input.get(4..).unwrap_or(&[])).ok_or(FrameError::InvalidData)? as usize;
        output.clear();
        for k in 0..frames {
            for _ in 0..self.channels {
                output.extend_from_slice(&alac_sample(tag, k).to_le_bytes());
            }
        }
        Ok(frames)
    }

    fn bit_depth(&self) -> u8 {
        16
    }

    fn channels(&self) -> u8 {
        self.channels
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mpeg::{mp3_frame, MP3_FRAME_LEN};

    #[test]
    fn pattern_sample_layout() {
        assert_eq!(pattern_sample(3, 5), 0x0003_0005);
        assert_eq!(pattern_sample(0, 0), 0);
    }

    #[test]
    fn pattern_decoder_rejects_marker() {
        let mut d = PatternDecoder::new(4, 2, 44_100);
        let mut out = PcmFrame::default();
        assert_eq!(d.decode_frame(&[CORRUPT_MARKER, 0, 0, 0], &mut out), Err(FrameError::InvalidData));
        assert_eq!(d.decode_frame(&[0, 0, 0, 7], &mut out), Ok(4));
        assert_eq!(out.len, 4);
        assert_eq!(out.interleaved()[2], pattern_sample(7, 1));
    }

    #[test]
    fn fake_mp3_skips_junk_then_decodes() {
        let mut input = vec![0u8; 10];
        input.extend_from_slice(&mp3_frame(9));
        let mut d = FakeMp3Decoder::default();
        let mut out = PcmFrame::default();
        assert_eq!(d.decode_frame(&input, &mut out), Ok(10));
        assert_eq!(out.len, 0);
        assert_eq!(d.decode_frame(&input[10..], &mut out), Ok(MP3_FRAME_LEN));
        assert_eq!(out.len, 1152);
        assert_eq!(out.interleaved()[0], pattern_sample(9, 0));
        assert_eq!(d.decode_frame(&input[10..100], &mut out), Err(FrameError::EndOfStream));
    }
}
