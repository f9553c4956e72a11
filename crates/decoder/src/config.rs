//! Decode-core configuration and real-time bounds.
//!
//! The scan caps below bound how long a single `decode`/`seek` call can spend
//! hunting for a sync point. They are a real-time requirement for the I²S
//! feed, so they are constants rather than knobs.

/// Default read-ahead buffer for file-backed streams.
pub const READ_AHEAD_BYTES: usize = 64 * 1024;

/// Smallest read-ahead accepted by [`DecoderConfig`]; removable media pays
/// per-request latency that small reads cannot amortise.
pub const MIN_READ_AHEAD_BYTES: usize = 32 * 1024;

/// Stereo frames converted per refill by the PCM-class engines (WAV, DFF).
pub const DEFAULT_SCRATCH_FRAMES: usize = 4096;

/// MP3 input window handed to the decoder per call.
pub const MP3_INPUT_BUFFER_BYTES: usize = 16 * 1024;

/// Frames decoded and discarded ahead of an MP3 seek target to refill the
/// bit reservoir.
pub const MP3_SEEK_PREROLL_FRAMES: usize = 2;

/// Bytes scanned for a valid MP3 frame header after the ID3v2 tag, and
/// around an estimated seek target.
pub const MP3_SYNC_SCAN_BYTES: usize = 64 * 1024;

/// Frames the MP3 seek index walks before falling back to an estimate
/// (about 3.5 minutes of 44.1 kHz Layer III).
pub const MP3_SEEK_INDEX_MAX_FRAMES: usize = 8_192;

/// Bytes scanned at open for the first ADTS sync word.
pub const ADTS_SYNC_SCAN_BYTES: usize = 64 * 1024;

/// Frames sampled from the sync point to estimate the average frame size.
pub const ADTS_AVG_SAMPLE_FRAMES: usize = 50;

/// Byte-by-byte resynchronisation attempts per decode call.
pub const ADTS_RESYNC_ATTEMPTS: usize = 4096;

/// Forward window searched for a sync word after an estimated seek.
pub const ADTS_SEEK_SCAN_BYTES: usize = 512;

/// PCM frames per AAC bitstream frame (LC and the HE-AAC core).
pub const AAC_FRAME_SAMPLES: u64 = 1024;

/// Largest compressed AAC frame the entropy decoder accepts.
pub const AAC_INPUT_BUFFER_BYTES: usize = 3072;

/// Maximum ISO-BMFF box nesting walked by the demuxer.
pub const MP4_MAX_DEPTH: usize = 8;

/// Capacity of the codec configuration blob (AudioSpecificConfig / ALAC cookie).
pub const CODEC_CONFIG_MAX: usize = 64;

/// Tail window scanned for the last Ogg granule position.
pub const OGG_TAIL_SCAN_BYTES: u64 = 64 * 1024;

/// Bytes scanned for an `OggS` capture pattern before giving up.
pub const OGG_RESYNC_BYTES: usize = 64 * 1024;

/// Consecutive undecodable Opus packets tolerated within one decode call.
pub const OPUS_MAX_FAILED_PACKETS: usize = 32;

/// DSD idle pattern used to pad short final blocks.
pub const DSD_SILENCE: u8 = 0x69;

/// Tunables for opening a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Read-ahead buffer for file-backed streams, in bytes.
    pub read_ahead_bytes: usize,
    /// Stereo frames converted per refill by the PCM-class engines.
    pub scratch_frames: usize,
}

impl DecoderConfig {
    /// Default configuration.
    pub const fn new() -> Self {
        Self {
            read_ahead_bytes: READ_AHEAD_BYTES,
            scratch_frames: DEFAULT_SCRATCH_FRAMES,
        }
    }

    /// Set the read-ahead size; values below [`MIN_READ_AHEAD_BYTES`] are raised to it.
    #[must_use]
    pub fn with_read_ahead(mut self, bytes: usize) -> Self {
        self.read_ahead_bytes = bytes.max(MIN_READ_AHEAD_BYTES);
        self
    }

    /// Set the scratch size in frames (at least one).
    #[must_use]
    pub fn with_scratch_frames(mut self, frames: usize) -> Self {
        self.scratch_frames = frames.max(1);
        self
    }

    /// Effective read-ahead, never below the minimum.
    pub fn read_ahead(&self) -> usize {
        self.read_ahead_bytes.max(MIN_READ_AHEAD_BYTES)
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_ahead_never_below_minimum() {
        let cfg = DecoderConfig::new().with_read_ahead(512);
        assert_eq!(cfg.read_ahead(), MIN_READ_AHEAD_BYTES);

        let raw = DecoderConfig { read_ahead_bytes: 1, ..DecoderConfig::default() };
        assert_eq!(raw.read_ahead(), MIN_READ_AHEAD_BYTES);
    }

    #[test]
    fn scratch_frames_at_least_one() {
        assert_eq!(DecoderConfig::new().with_scratch_frames(0).scratch_frames, 1);
    }
}
