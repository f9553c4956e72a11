//! Format dispatcher and the session handle.
//!
//! `open` picks an engine from the file-name suffix, opens the stream behind a
//! read-ahead buffer and lets the engine parse its header. Nothing partial
//! escapes: if the engine fails, the stream is dropped with it.

use std::path::Path;

use crate::codec;
use crate::config::DecoderConfig;
use crate::engine::adts::AdtsEngine;
use crate::engine::alac::AlacEngine;
use crate::engine::dsd::DsdEngine;
use crate::engine::m4a::M4aAacEngine;
use crate::engine::mp3::Mp3Engine;
use crate::engine::opus::OpusEngine;
use crate::engine::wav::WavEngine;
use crate::engine::{DecoderEngine, Engine};
use crate::error::{DecodeError, OpenError, SeekError};
use crate::format::{detect_format, FormatTag};
use crate::info::StreamInfo;
use crate::mp4::{self, Mp4Codec};
use crate::stream::{open_file, ByteStream};

/// An open decoding session.
///
/// Owns the byte stream and the engine state. Not shareable: drive it from
/// one thread at a time. Dropping it (or [`close`](Session::close)) releases
/// everything.
pub struct Session {
    info: StreamInfo,
    engine: Engine,
}

/// Open `path` with the default configuration.
pub fn open(path: impl AsRef<Path>) -> Result<Session, OpenError> {
    open_with_config(path, &DecoderConfig::default())
}

/// Open `path`.
///
/// # Errors
///
/// `UnsupportedFormat` for an unknown suffix (before any I/O), `NotFound`
/// when the file cannot be opened, `DecoderInitFailed` or `OutOfMemory` when
/// the engine cannot open the stream.
pub fn open_with_config(path: impl AsRef<Path>, config: &DecoderConfig) -> Result<Session, OpenError> {
    let path = path.as_ref();
    let tag = detect_format(path).ok_or(OpenError::UnsupportedFormat)?;
    let stream = open_file(path, config.read_ahead()).map_err(OpenError::NotFound)?;
    open_stream(stream, tag, config).map_err(|e| {
        tracing::debug!(path = %path.display(), error = %e, "open failed");
        e
    })
}

/// Open an already acquired byte stream as `tag`.
pub fn open_stream(
    stream: Box<dyn ByteStream>,
    tag: FormatTag,
    config: &DecoderConfig,
) -> Result<Session, OpenError> {
    let (engine, mut info) = match tag {
        FormatTag::Wav | FormatTag::Aiff => {
            WavEngine::open(stream, config).map(|(e, i)| (Engine::Wav(e), i))?
        }
        FormatTag::Flac => open_flac(stream, config)?,
        FormatTag::Mp3 => Mp3Engine::open(stream, codec::mp3_decoder).map(|(e, i)| (Engine::Mp3(e), i))?,
        FormatTag::Aac => {
            AdtsEngine::open(stream, codec::aac_decoder).map(|(e, i)| (Engine::AdtsAac(e), i))?
        }
        FormatTag::M4a | FormatTag::Alac => open_mp4(stream)?,
        FormatTag::Dsd => DsdEngine::open(stream, config).map(|(e, i)| (Engine::Dsd(e), i))?,
        FormatTag::Opus => {
            OpusEngine::open(stream, codec::opus_decoder).map(|(e, i)| (Engine::Opus(e), i))?
        }
    };
    info.duration_ms = info.compute_duration_ms();
    tracing::debug!(
        engine = engine.name(),
        format = info.format.as_str(),
        rate = info.sample_rate,
        duration_ms = info.duration_ms,
        "session opened"
    );
    Ok(Session { info, engine })
}

/// Open, snapshot the descriptor and close.
pub fn read_info(path: impl AsRef<Path>) -> Result<StreamInfo, OpenError> {
    open(path).map(|s| s.info())
}

#[cfg(feature = "flac")]
fn open_flac(stream: Box<dyn ByteStream>, config: &DecoderConfig) -> Result<(Engine, StreamInfo), OpenError> {
    crate::engine::flac::FlacEngine::open(stream, config).map(|(e, i)| (Engine::Flac(e), i))
}

#[cfg(not(feature = "flac"))]
fn open_flac(stream: Box<dyn ByteStream>, config: &DecoderConfig) -> Result<(Engine, StreamInfo), OpenError> {
    let _ = (stream, config);
    Err(crate::error::InitError::Unsupported("codec not available").into())
}

/// Demux, then hand the track to the AAC or ALAC engine.
fn open_mp4(mut stream: Box<dyn ByteStream>) -> Result<(Engine, StreamInfo), OpenError> {
    let track = mp4::demux(&mut stream)?;
    match track.codec {
        Mp4Codec::Aac { .. } => {
            M4aAacEngine::open(stream, track, codec::aac_decoder).map(|(e, i)| (Engine::M4aAac(e), i))
        }
        Mp4Codec::Alac { .. } => {
            AlacEngine::open(stream, track, codec::alac_decoder).map(|(e, i)| (Engine::Alac(e), i))
        }
    }
}

impl Session {
    /// Wrap an engine opened directly (custom decoder factories).
    pub fn from_parts(engine: Engine, mut info: StreamInfo) -> Self {
        info.duration_ms = info.compute_duration_ms();
        Self { info, engine }
    }

    /// Decode up to `max_frames` stereo frames into `buf`.
    ///
    /// `max_frames` is clamped to `buf.len() / 2`. `Ok(0)` is end of stream.
    pub fn decode(&mut self, buf: &mut [i32], max_frames: usize) -> Result<usize, DecodeError> {
        let max_frames = max_frames.min(buf.len() / 2);
        if max_frames == 0 {
            return Ok(0);
        }
        self.engine.decode(buf, max_frames)
    }

    /// Reposition to output frame `frame`.
    pub fn seek(&mut self, frame: u64) -> Result<(), SeekError> {
        self.engine.seek(frame).map_err(|e| {
            tracing::debug!(frame, error = %e, "seek failed");
            e
        })
    }

    /// Copy of the stream descriptor.
    pub fn info(&self) -> StreamInfo {
        self.info
    }

    /// Resolved format (AAC or ALAC for an M4A container).
    pub fn format(&self) -> FormatTag {
        self.info.format
    }

    /// Current output frame.
    pub fn position(&self) -> u64 {
        self.engine.position()
    }

    /// Release the stream and all engine state.
    pub fn close(self) {
        tracing::trace!(engine = self.engine.name(), "session closed");
    }
}
