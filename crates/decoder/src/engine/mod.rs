//! Per-format decoding state machines.
//!
//! Every engine owns its byte stream and implements [`DecoderEngine`]. The
//! [`Engine`] enum holds exactly one of them; a session dispatches through it
//! by `match`, so one format's decode can never run against another's state.

pub mod adts;
pub mod alac;
pub mod dsd;
#[cfg(feature = "flac")]
pub mod flac;
pub mod m4a;
pub mod mp3;
pub mod opus;
pub mod wav;

use crate::error::{DecodeError, SeekError};

/// The three-operation contract shared by all engines.
pub trait DecoderEngine {
    /// Write up to `max_frames` stereo frames into `out` as interleaved
    /// left-justified `i32`. Returns frames written; `Ok(0)` is end of stream.
    ///
    /// `out` holds at least `max_frames * 2` samples.
    ///
    /// # Errors
    ///
    /// Returns `Err` when this call produced nothing usable.
    /// [`DecodeError::is_transient`] says whether to call again.
    fn decode(&mut self, out: &mut [i32], max_frames: usize) -> Result<usize, DecodeError>;

    /// Reposition to absolute output frame `frame`.
    ///
    /// # Errors
    ///
    /// On failure the position is undefined; only another `seek` or dropping
    /// the engine is meaningful.
    fn seek(&mut self, frame: u64) -> Result<(), SeekError>;

    /// Output frames delivered since open or the last seek target.
    fn position(&self) -> u64;
}

/// One active engine.
pub enum Engine {
    /// WAV or AIFF.
    Wav(wav::WavEngine),
    /// FLAC.
    #[cfg(feature = "flac")]
    Flac(flac::FlacEngine),
    /// MPEG audio.
    Mp3(mp3::Mp3Engine),
    /// AAC in ADTS framing.
    AdtsAac(adts::AdtsEngine),
    /// AAC in an ISO-BMFF container.
    M4aAac(m4a::M4aAacEngine),
    /// ALAC in an ISO-BMFF container.
    Alac(alac::AlacEngine),
    /// DSF or DFF as DoP.
    Dsd(dsd::DsdEngine),
    /// Opus in Ogg.
    Opus(opus::OpusEngine),
}

macro_rules! dispatch {
    ($engine:expr, $e:ident => $body:expr) => {
        match $engine {
            Engine::Wav($e) => $body,
            #[cfg(feature = "flac")]
            Engine::Flac($e) => $body,
            Engine::Mp3($e) => $body,
            Engine::AdtsAac($e) => $body,
            Engine::M4aAac($e) => $body,
            Engine::Alac($e) => $body,
            Engine::Dsd($e) => $body,
            Engine::Opus($e) => $body,
        }
    };
}

impl Engine {
    /// Short name of the active variant, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Wav(_) => "wav",
            #[cfg(feature = "flac")]
            Self::Flac(_) => "flac",
            Self::Mp3(_) => "mp3",
            Self::AdtsAac(_) => "adts-aac",
            Self::M4aAac(_) => "m4a-aac",
            Self::Alac(_) => "alac",
            Self::Dsd(_) => "dsd",
            Self::Opus(_) => "opus",
        }
    }
}

impl DecoderEngine for Engine {
    fn decode(&mut self, out: &mut [i32], max_frames: usize) -> Result<usize, DecodeError> {
        dispatch!(self, e => e.decode(out, max_frames))
    }

    fn seek(&mut self, frame: u64) -> Result<(), SeekError> {
        dispatch!(self, e => e.seek(frame))
    }

    fn position(&self) -> u64 {
        dispatch!(self, e => e.position())
    }
}
