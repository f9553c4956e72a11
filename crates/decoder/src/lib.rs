//! Audio decode core: container parsing, seek arithmetic and DoP repacking
//! for WAV/AIFF, FLAC, MP3, AAC (ADTS and M4A), ALAC, DSD and Opus.
//!
//! Every engine emits interleaved stereo frames of left-justified `i32`;
//! mono sources are duplicated into both slots. The entropy decoders behind
//! the engines are third-party crates reached through [`frame::FrameDecoder`].
#![deny(clippy::unwrap_used)]

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod frame;
pub mod info;
pub mod mp4;
pub mod ogg;
pub mod ring_buffer;
pub mod session;
pub mod stream;

pub use config::DecoderConfig;
pub use error::{DecodeError, FrameError, InitError, OpenError, SeekError};
pub use format::{detect_format, FormatTag};
pub use info::StreamInfo;
pub use session::{open, open_stream, open_with_config, read_info, Session};
pub use stream::ByteStream;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_suffix_fails_before_io() {
        let err = open("/nonexistent/dir/track.xyz").err().unwrap();
        assert!(matches!(err, OpenError::UnsupportedFormat));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = open("/nonexistent/dir/track.wav").err().unwrap();
        assert!(matches!(err, OpenError::NotFound(_)));
    }

    #[test]
    fn test_garbage_stream_fails_init() {
        let stream = Box::new(std::io::Cursor::new(vec![0u8; 256]));
        let err = open_stream(stream, FormatTag::Dsd, &DecoderConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, OpenError::DecoderInitFailed(_)));
    }
}
