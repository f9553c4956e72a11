//! Test fixtures for the decoder crate.
//!
//! Synthesizes small, structurally valid files for every container the
//! decoder reads, and provides scripted [`decoder::frame::FrameDecoder`]s
//! that stand in for the real entropy decoders.
//!
//! # Quick start
//!
//! ```no_run
//! use decoder::{open_stream, DecoderConfig, FormatTag};
//! use decoder_testing::pcm::{wav_bytes, PcmSpec};
//!
//! let spec = PcmSpec::cd().mono();
//! let bytes = wav_bytes(&spec, &decoder_testing::pcm::ramp(&spec, 441));
//! let session = open_stream(
//!     Box::new(std::io::Cursor::new(bytes)),
//!     FormatTag::Wav,
//!     &DecoderConfig::default(),
//! )
//! .unwrap();
//! assert_eq!(session.info().total_frames, 441);
//! ```
//!
//! # Tagged payloads
//!
//! Compressed fixtures carry a frame index in their payload. The fakes in
//! [`fakes`] decode that index into every sample they emit (see
//! [`fakes::pattern_sample`]), so a test can tell exactly which compressed
//! frame a decoded sample came from.
// Fixture builders work on small, test-controlled sizes.
#![allow(
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

pub mod dsd;
pub mod fakes;
pub mod flac;
pub mod mp4;
pub mod mpeg;
pub mod ogg;
pub mod pcm;

use std::io::Cursor;

use decoder::ByteStream;

/// Wrap fixture bytes as a boxed stream for `open_stream` or an engine's `open`.
pub fn stream(bytes: Vec<u8>) -> Box<dyn ByteStream> {
    Box::new(Cursor::new(bytes))
}

/// An ID3v2.4 tag of `body_len` zero bytes (plus its 10-byte header).
pub fn id3v2(body_len: usize) -> Vec<u8> {
    let mut tag = b"ID3\x04\x00\x00".to_vec();
    let n = body_len as u32;
    tag.extend_from_slice(&[
        ((n >> 21) & 0x7F) as u8,
        ((n >> 14) & 0x7F) as u8,
        ((n >> 7) & 0x7F) as u8,
        (n & 0x7F) as u8,
    ]);
    tag.resize(10 + body_len, 0);
    tag
}

/// `bytes` with an ID3v2 tag of `body_len` bytes in front.
pub fn with_id3v2(body_len: usize, bytes: &[u8]) -> Vec<u8> {
    let mut out = id3v2(body_len);
    out.extend_from_slice(bytes);
    out
}

/// Decode everything from `session` in blocks of `block` frames.
///
/// Transient errors are skipped, up to 64 in a row; any other error ends
/// the read.
pub fn drain(session: &mut decoder::Session, block: usize) -> Vec<i32> {
    let mut out = Vec::new();
    let mut buf = vec![0i32; block * 2];
    let mut errors = 0;
    loop {
        match session.decode(&mut buf, block) {
            Ok(0) => return out,
            Ok(n) => {
                errors = 0;
                out.extend_from_slice(&buf[..n * 2]);
            }
            Err(e) if e.is_transient() && errors < 64 => errors += 1,
            Err(_) => return out,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn id3_size_is_syncsafe() {
        let tag = id3v2(300);
        assert_eq!(tag.len(), 310);
        assert_eq!(&tag[6..10], &[0, 0, 2, 44]);
    }
}
