//! Adapters binding third-party entropy decoders to the [`crate::frame`] traits.
//!
//! Each adapter is gated behind its Cargo feature. With a feature off the
//! matching factory reports `UnsupportedFormat` and the engine's open fails
//! cleanly; the container logic is still compiled and testable.

use crate::error::FrameError;
use crate::frame::{CodecSetup, FrameDecoder, PackedFrameDecoder};

#[cfg(feature = "aac")]
pub mod aac;
#[cfg(feature = "alac")]
pub mod alac;
#[cfg(feature = "mp3")]
pub mod mp3;
#[cfg(feature = "opus")]
pub mod opus;

/// Boxed frame decoder as stored by the engines.
pub type BoxedDecoder = Box<dyn FrameDecoder>;

/// Boxed packed-output decoder as stored by the ALAC engine.
pub type BoxedPackedDecoder = Box<dyn PackedFrameDecoder>;

/// MP3 decoder. The bitstream is self-describing, so `setup` is unused.
pub fn mp3_decoder(setup: &CodecSetup<'_>) -> Result<BoxedDecoder, FrameError> {
    let _ = setup;
    #[cfg(feature = "mp3")]
    {
        Ok(Box::new(mp3::Mp3FrameDecoder::new()))
    }
    #[cfg(not(feature = "mp3"))]
    {
        Err(FrameError::UnsupportedFormat)
    }
}

/// AAC decoder configured from an AudioSpecificConfig in `setup.config`.
pub fn aac_decoder(setup: &CodecSetup<'_>) -> Result<BoxedDecoder, FrameError> {
    #[cfg(feature = "aac")]
    {
        Ok(Box::new(aac::SymphoniaAacDecoder::new(setup)?))
    }
    #[cfg(not(feature = "aac"))]
    {
        let _ = setup;
        Err(FrameError::UnsupportedFormat)
    }
}

/// ALAC decoder configured from the magic cookie in `setup.config`.
pub fn alac_decoder(setup: &CodecSetup<'_>) -> Result<BoxedPackedDecoder, FrameError> {
    #[cfg(feature = "alac")]
    {
        Ok(Box::new(alac::SymphoniaAlacDecoder::new(setup)?))
    }
    #[cfg(not(feature = "alac"))]
    {
        let _ = setup;
        Err(FrameError::UnsupportedFormat)
    }
}

/// Opus decoder at 48 kHz with `setup.channels` output channels.
pub fn opus_decoder(setup: &CodecSetup<'_>) -> Result<BoxedDecoder, FrameError> {
    #[cfg(feature = "opus")]
    {
        Ok(Box::new(opus::LibOpusDecoder::new(setup)?))
    }
    #[cfg(not(feature = "opus"))]
    {
        let _ = setup;
        Err(FrameError::UnsupportedFormat)
    }
}

#[cfg(any(feature = "aac", feature = "alac"))]
pub(crate) fn symphonia_channels(channels: u8) -> symphonia::core::audio::Channels {
    use symphonia::core::audio::Channels;
    if channels == 1 {
        Channels::FRONT_CENTRE
    } else {
        Channels::FRONT_LEFT | Channels::FRONT_RIGHT
    }
}

#[cfg(any(feature = "aac", feature = "alac"))]
pub(crate) fn backend_error(err: symphonia::core::errors::Error) -> FrameError {
    use symphonia::core::errors::Error;
    match err {
        Error::DecodeError(_) => FrameError::InvalidData,
        Error::Unsupported(_) => FrameError::UnsupportedFormat,
        other => FrameError::Backend(other.to_string()),
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

    fn setup() -> CodecSetup<'static> {
        CodecSetup {
            config: &[],
            sample_rate: 44_100,
            channels: 2,
            bits_per_sample: 16,
        }
    }

    #[test]
    fn test_mp3_factory_matches_feature() {
        let result = mp3_decoder(&setup());
        #[cfg(feature = "mp3")]
        assert!(result.is_ok());
        #[cfg(not(feature = "mp3"))]
        assert_eq!(result.err(), Some(FrameError::UnsupportedFormat));
    }

    #[cfg(not(feature = "opus"))]
    #[test]
    fn test_opus_factory_without_feature_is_unsupported() {
        assert_eq!(opus_decoder(&setup()).err(), Some(FrameError::UnsupportedFormat));
    }
}
