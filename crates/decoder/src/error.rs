//! Error taxonomy for opening, decoding and seeking.
//!
//! Open-time failures are terminal: no [`Session`](crate::Session) exists to
//! retry against. Per-call decode and seek failures are local to the call;
//! [`DecodeError::is_transient`] tells the caller whether calling `decode`
//! again can make progress.

use std::collections::TryReserveError;
use std::io;

use thiserror::Error;

/// Failure to open a session. No partial session is ever returned.
#[derive(Debug, Error)]
pub enum OpenError {
    /// File-name suffix maps to no engine. Raised before any I/O.
    #[error("unsupported format")]
    UnsupportedFormat,
    /// The byte stream could not be opened.
    #[error("cannot open stream: {0}")]
    NotFound(#[source] io::Error),
    /// The engine rejected the container or the codec configuration.
    #[error("decoder init failed: {0}")]
    DecoderInitFailed(#[from] InitError),
    /// A table or scratch allocation sized from file content failed.
    #[error("out of memory")]
    OutOfMemory,
}

/// Detail carried by [`OpenError::DecoderInitFailed`].
#[derive(Debug, Error)]
pub enum InitError {
    /// Reading the header failed or hit end of stream.
    #[error("i/o error while reading header: {0}")]
    Io(#[from] io::Error),
    /// The container header is structurally invalid.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),
    /// Valid container, but parameters this core does not handle.
    #[error("unsupported stream: {0}")]
    Unsupported(&'static str),
    /// The entropy decoder refused its configuration.
    #[error("codec rejected configuration: {0}")]
    Codec(String),
}

impl From<io::Error> for OpenError {
    fn from(err: io::Error) -> Self {
        Self::DecoderInitFailed(InitError::Io(err))
    }
}

impl From<TryReserveError> for OpenError {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

impl From<FrameError> for OpenError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::UnsupportedFormat => {
                Self::DecoderInitFailed(InitError::Unsupported("codec not available"))
            }
            other => Self::DecoderInitFailed(InitError::Codec(other.to_string())),
        }
    }
}

/// Errors reported by a black-box [`FrameDecoder`](crate::frame::FrameDecoder).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The input bitstream contains invalid or corrupt data.
    #[error("invalid or corrupt frame data")]
    InvalidData,
    /// The input buffer is exhausted; no more frames can be decoded.
    #[error("end of stream")]
    EndOfStream,
    /// The codec does not support this stream's parameters.
    #[error("unsupported codec parameters")]
    UnsupportedFormat,
    /// The provided output buffer is too small for one decoded frame.
    #[error("output buffer too small")]
    BufferTooSmall,
    /// Error text passed through from the wrapped library.
    #[error("{0}")]
    Backend(String),
}

/// Per-call decode failure (the "negative return" of the engine contract).
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The byte stream failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// A single compressed frame was rejected and skipped.
    #[error("frame dropped")]
    FrameDropped,
    /// No sync word found within the bounded resynchronisation window.
    #[error("lost frame sync")]
    LostSync,
    /// The entropy decoder failed in a way the engine cannot skip past.
    #[error("codec error: {0}")]
    Codec(#[from] FrameError),
}

impl DecodeError {
    /// `true` when calling `decode` again can make progress.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::FrameDropped | Self::LostSync => true,
            Self::Codec(e) => *e == FrameError::InvalidData,
            Self::Io(_) => false,
        }
    }
}

/// Seek failure. The session position is undefined afterwards; only another
/// `seek` or `close` is meaningful.
#[derive(Debug, Error)]
pub enum SeekError {
    /// The engine has no way to reposition this stream.
    #[error("seek unsupported")]
    Unsupported,
    /// Target lies beyond the end of the stream.
    #[error("seek target {frame} beyond end ({total} frames)")]
    OutOfRange {
        /// Requested output frame.
        frame: u64,
        /// Total frames in the stream.
        total: u64,
    },
    /// The byte stream failed while repositioning.
    #[error("i/o error during seek: {0}")]
    Io(#[from] io::Error),
    /// The wrapped container reader refused the seek.
    #[error("codec refused seek: {0}")]
    Codec(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_during_open_is_init_failure() {
        let e: OpenError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(e, OpenError::DecoderInitFailed(InitError::Io(_))));
    }

    #[test]
    fn dropped_frame_is_transient_io_is_not() {
        assert!(DecodeError::FrameDropped.is_transient());
        assert!(DecodeError::LostSync.is_transient());
        assert!(!DecodeError::Io(io::Error::from(io::ErrorKind::Other)).is_transient());
    }

    #[test]
    fn reserve_failure_maps_to_out_of_memory() {
        let mut v: Vec<u8> = Vec::new();
        let err = v.try_reserve_exact(usize::MAX).expect_err("cannot reserve usize::MAX");
        assert!(matches!(OpenError::from(err), OpenError::OutOfMemory));
    }

    #[test]
    fn seek_error_display_names_the_target() {
        let e = SeekError::OutOfRange { frame: 10, total: 5 };
        assert_eq!(e.to_string(), "seek target 10 beyond end (5 frames)");
    }
}
