//! FLAC engine: metadata pre-scan for track gain, then symphonia's FLAC
//! reader and decoder.

use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::default::formats::FlacReader;

use super::DecoderEngine;
use crate::config::DecoderConfig;
use crate::error::{DecodeError, InitError, OpenError, SeekError};
use crate::format::FormatTag;
use crate::info::StreamInfo;
use crate::ring_buffer::PcmRing;
use crate::stream::{skip_id3v2, ByteStream, MediaSourceAdapter};

const BLOCK_VORBIS_COMMENT: u8 = 4;
const GAIN_KEY: &str = "REPLAYGAIN_TRACK_GAIN";

/// Largest FLAC block size.
const MAX_BLOCK_FRAMES: usize = 65_535;

/// Parse a ReplayGain value such as `-3.50 dB`, `+1.2 dB` or `-3.5`.
pub fn parse_gain(value: &str) -> Option<f32> {
    let v = value.trim();
    let end = v
        .char_indices()
        .find(|&(_, c)| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .map_or(v.len(), |(i, _)| i);
    v.get(..end)?.parse::<f32>().ok()
}

/// Find `REPLAYGAIN_TRACK_GAIN` in a VORBIS_COMMENT block body.
pub fn gain_from_vorbis_comment(block: &[u8]) -> Option<f32> {
    let mut r = io::Cursor::new(block);
    let vendor_len = u64::from(r.read_u32::<LittleEndian>().ok()?);
    r.seek(SeekFrom::Current(i64::try_from(vendor_len).ok()?)).ok()?;
    let count = r.read_u32::<LittleEndian>().ok()?;
    for _ in 0..count {
        let len = usize::try_from(r.read_u32::<LittleEndian>().ok()?).ok()?;
        let start = usize::try_from(r.position()).ok()?;
        let entry = block.get(start..start.checked_add(len)?)?;
        r.set_position(u64::try_from(start.checked_add(len)?).ok()?);
        let Ok(text) = std::str::from_utf8(entry) else {
            continue;
        };
        if let Some((key, value)) = text.split_once('=') {
            if key.eq_ignore_ascii_case(GAIN_KEY) {
                return parse_gain(value);
            }
        }
    }
    None
}

/// Walk the metadata blocks after `fLaC` looking for track gain.
///
/// Observational only: the caller rewinds before the real decoder starts.
/// A comment block longer than the rest of the file is rejected before
/// anything is allocated for it.
pub fn prescan_gain<S: ByteStream + ?Sized>(s: &mut S) -> Result<f32, OpenError> {
    let file_len = s.byte_len()?;
    s.seek(SeekFrom::Start(0))?;
    skip_id3v2(s)?;
    let mut magic = [0u8; 4];
    s.read_exact(&mut magic)?;
    if &magic != b"fLaC" {
        return Err(InitError::InvalidHeader("missing fLaC marker").into());
    }
    loop {
        let b0 = s.read_u8()?;
        let len = s.read_u24::<BigEndian>()?;
        let last = b0 & 0x80 != 0;
        if b0 & 0x7F == BLOCK_VORBIS_COMMENT {
            let remaining = file_len.saturating_sub(s.stream_position()?);
            if u64::from(len) > remaining {
                return Err(InitError::InvalidHeader("flac: metadata block past end of file").into());
            }
            let len = usize::try_from(len).map_err(|_| InitError::InvalidHeader("flac: metadata block size"))?;
            let mut block = Vec::new();
            block.try_reserve_exact(len)?;
            block.resize(len, 0);
            s.read_exact(&mut block)?;
            if let Some(gain) = gain_from_vorbis_comment(&block) {
                return Ok(gain);
            }
        } else {
            s.seek(SeekFrom::Current(i64::from(len)))?;
        }
        if last {
            return Ok(0.0);
        }
    }
}

/// FLAC decoding state.
pub struct FlacEngine {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_buf: Option<SampleBuffer<i32>>,
    ring: PcmRing,
    total_frames: u64,
    position: u64,
    discard: u64,
    at_end: bool,
}

impl FlacEngine {
    /// Pre-scan for gain, then hand the stream to the container reader.
    pub fn open(
        mut stream: Box<dyn ByteStream>,
        config: &DecoderConfig,
    ) -> Result<(Self, StreamInfo), OpenError> {
        let gain_db = prescan_gain(&mut stream)?;
        stream.seek(SeekFrom::Start(0))?;

        let mss = MediaSourceStream::new(Box::new(MediaSourceAdapter::new(stream)), Default::default());
        let reader: Box<dyn FormatReader> = Box::new(
            FlacReader::try_new(mss, &FormatOptions::default()).map_err(|e| InitError::Codec(e.to_string()))?,
        );

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(InitError::InvalidHeader("flac: no audio track"))?;
        let params = track.codec_params.clone();
        let track_id = track.id;

        let channels = params.channels.map_or(0, |c| c.count());
        let source_channels = match channels {
            1 | 2 => channels as u8,
            _ => return Err(InitError::Unsupported("flac: more than two channels").into()),
        };
        let sample_rate = params.sample_rate.ok_or(InitError::InvalidHeader("flac: no sample rate"))?;
        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| InitError::Codec(e.to_string()))?;

        let block = params
            .max_frames_per_packet
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(MAX_BLOCK_FRAMES)
            .max(config.scratch_frames);
        let ring = PcmRing::with_capacity(block)?;

        let mut info = StreamInfo::new(FormatTag::Flac);
        info.sample_rate = sample_rate;
        info.bits_per_sample = params.bits_per_sample.and_then(|b| u8::try_from(b).ok()).unwrap_or(16);
        info.source_channels = source_channels;
        info.total_frames = params.n_frames.unwrap_or(0);
        info.gain_db = gain_db;

        tracing::debug!(
            rate = sample_rate,
            bits = info.bits_per_sample,
            channels = source_channels,
            total_frames = info.total_frames,
            gain_db,
            "flac: opened"
        );
        Ok((
            Self {
                reader,
                decoder,
                track_id,
                sample_buf: None,
                ring,
                total_frames: info.total_frames,
                position: 0,
                discard: 0,
                at_end: false,
            },
            info,
        ))
    }

    /// Decode the next packet of our track into the ring. `Ok(false)` at end.
    fn refill(&mut self) -> Result<bool, DecodeError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(false)
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(SymphoniaError::IoError(e)) => return Err(DecodeError::Io(e)),
                Err(e) => {
                    tracing::warn!(error = %e, "flac: container error");
                    return Err(DecodeError::LostSync);
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(msg)) => {
                    tracing::warn!(msg, "flac: frame dropped");
                    return Err(DecodeError::FrameDropped);
                }
                Err(SymphoniaError::IoError(e)) => return Err(DecodeError::Io(e)),
                Err(e) => return Err(DecodeError::Codec(crate::error::FrameError::Backend(e.to_string()))),
            };
            let spec = *decoded.spec();
            let frames = decoded.frames();
            let needed = frames.saturating_mul(spec.channels.count());
            if self.sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                self.sample_buf = Some(SampleBuffer::new(frames as u64, spec));
            }
            let Some(buf) = self.sample_buf.as_mut() else {
                return Ok(false);
            };
            buf.copy_interleaved_ref(decoded);
            #[allow(clippy::cast_possible_truncation)] // checked at open: 1 or 2
            let ch = spec.channels.count() as u8;
            self.ring.push_interleaved(buf.samples(), ch)?;
            if self.discard > 0 {
                let dropped = self.ring.discard(usize::try_from(self.discard).unwrap_or(usize::MAX));
                self.discard = self.discard.saturating_sub(dropped as u64);
            }
            if !self.ring.is_empty() {
                return Ok(true);
            }
        }
    }
}

impl DecoderEngine for FlacEngine {
    fn decode(&mut self, out: &mut [i32], max_frames: usize) -> Result<usize, DecodeError> {
        if self.at_end {
            return Ok(0);
        }
        if self.ring.is_empty() && !self.refill()? {
            self.at_end = true;
            return Ok(0);
        }
        let n = self.ring.pop_frames(out, max_frames);
        self.position = self.position.saturating_add(n as u64);
        Ok(n)
    }

    fn seek(&mut self, frame: u64) -> Result<(), SeekError> {
        if self.total_frames > 0 && frame > self.total_frames {
            return Err(SeekError::OutOfRange {
                frame,
                total: self.total_frames,
            });
        }
        self.ring.clear();
        self.discard = 0;
        if self.total_frames > 0 && frame == self.total_frames {
            self.at_end = true;
            self.position = frame;
            return Ok(());
        }
        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| SeekError::Codec(e.to_string()))?;
        self.decoder.reset();
        self.discard = seeked.required_ts.saturating_sub(seeked.actual_ts);
        self.position = frame;
        self.at_end = false;
        tracing::debug!(frame, actual = seeked.actual_ts, "flac: seek");
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

    fn vorbis_block(entries: &[&str]) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&4u32.to_le_bytes());
        b.extend_from_slice(b"test");
        b.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for e in entries {
            b.extend_from_slice(&(e.len() as u32).to_le_bytes());
            b.extend_from_slice(e.as_bytes());
        }
        b
    }

    #[test]
    fn test_gain_value_forms() {
        assert_eq!(parse_gain("-3.50 dB"), Some(-3.5));
        assert_eq!(parse_gain("+1.2 dB"), Some(1.2));
        assert_eq!(parse_gain("-3.5"), Some(-3.5));
        assert_eq!(parse_gain(" 0.00dB"), Some(0.0));
        assert_eq!(parse_gain("loud"), None);
    }

    #[test]
    fn test_gain_key_is_case_insensitive() {
        let block = vorbis_block(&["TITLE=x", "replaygain_track_gain=-6.02 dB"]);
        assert_eq!(gain_from_vorbis_comment(&block), Some(-6.02));
        let none = vorbis_block(&["REPLAYGAIN_ALBUM_GAIN=-1.0 dB"]);
        assert_eq!(gain_from_vorbis_comment(&none), None);
    }

    #[test]
    fn test_truncated_comment_is_none() {
        let mut block = vorbis_block(&["REPLAYGAIN_TRACK_GAIN=-1.0 dB"]);
        block.truncate(block.len() - 5);
        assert_eq!(gain_from_vorbis_comment(&block), None);
    }

    #[test]
    fn test_prescan_reads_gain_after_streaminfo() {
        let mut file = b"fLaC".to_vec();
        file.push(0x00); // STREAMINFO, not last
        file.extend_from_slice(&[0, 0, 34]);
        file.extend_from_slice(&[0; 34]);
        let block = vorbis_block(&["REPLAYGAIN_TRACK_GAIN=-3.50 dB"]);
        file.push(0x80 | BLOCK_VORBIS_COMMENT);
        file.extend_from_slice(&(block.len() as u32).to_be_bytes()[1..]);
        file.extend(block);
        let mut c = io::Cursor::new(file);
        assert_eq!(prescan_gain(&mut c).unwrap(), -3.5);
    }

    #[test]
    fn test_prescan_without_comment_is_zero() {
        let mut file = b"fLaC".to_vec();
        file.push(0x80);
        file.extend_from_slice(&[0, 0, 34]);
        file.extend_from_slice(&[0; 34]);
        let mut c = io::Cursor::new(file);
        assert_eq!(prescan_gain(&mut c).unwrap(), 0.0);
    }

    #[test]
    fn test_prescan_rejects_non_flac() {
        let mut c = io::Cursor::new(b"OggS\0\0\0\0".to_vec());
        assert!(matches!(
            prescan_gain(&mut c),
            Err(OpenError::DecoderInitFailed(InitError::InvalidHeader(_)))
        ));
    }

    #[test]
    fn test_prescan_rejects_comment_block_past_end() {
        let mut file = b"fLaC".to_vec();
        file.push(0x80 | BLOCK_VORBIS_COMMENT);
        file.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
        file.extend(vorbis_block(&["REPLAYGAIN_TRACK_GAIN=-1.0 dB"]));
        let mut c = io::Cursor::new(file);
        assert!(matches!(
            prescan_gain(&mut c),
            Err(OpenError::DecoderInitFailed(InitError::InvalidHeader(_)))
        ));
    }
}
