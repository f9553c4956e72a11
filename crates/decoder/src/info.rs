//! Stream descriptor handed to the playback layer.

use crate::format::FormatTag;

/// Description of an opened stream. Populated once at open.
///
/// `channels` is the output channel count and is always 2: every engine
/// expands mono to stereo. `source_channels` keeps the container's count.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamInfo {
    /// Output sample rate in Hz (DoP carrier rate for DSD).
    pub sample_rate: u32,
    /// Source bit depth; informational for PCM-class formats, 32 for DoP.
    pub bits_per_sample: u8,
    /// Output channels (always 2).
    pub channels: u8,
    /// Channels in the container before expansion (1 or 2).
    pub source_channels: u8,
    /// Total output frames, 0 when unknown at open.
    pub total_frames: u64,
    /// `total_frames * 1000 / sample_rate`, 0 when either is 0.
    pub duration_ms: u64,
    /// Resolved format.
    pub format: FormatTag,
    /// Payload is DSD-over-PCM; linear DSP must be bypassed.
    pub is_dsd: bool,
    /// Track gain in dB from embedded tags (0.0 = none).
    pub gain_db: f32,
}

impl StreamInfo {
    /// Descriptor with the given format and everything else zeroed.
    pub const fn new(format: FormatTag) -> Self {
        Self {
            sample_rate: 0,
            bits_per_sample: 0,
            channels: 2,
            source_channels: 2,
            total_frames: 0,
            duration_ms: 0,
            format,
            is_dsd: false,
            gain_db: 0.0,
        }
    }

    /// Duration derived from `total_frames` and `sample_rate`.
    pub fn compute_duration_ms(&self) -> u64 {
        if self.total_frames == 0 || self.sample_rate == 0 {
            return 0;
        }
        let ms = (u128::from(self.total_frames) * 1000)
            .checked_div(u128::from(self.sample_rate))
            .unwrap_or(0);
        u64::try_from(ms).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_is_zero_when_unknown() {
        let mut info = StreamInfo::new(FormatTag::Mp3);
        assert_eq!(info.compute_duration_ms(), 0);
        info.total_frames = 44_100;
        assert_eq!(info.compute_duration_ms(), 0);
    }

    #[test]
    fn duration_from_frames() {
        let mut info = StreamInfo::new(FormatTag::Wav);
        info.sample_rate = 44_100;
        info.total_frames = 88_200;
        assert_eq!(info.compute_duration_ms(), 2000);
    }

    #[test]
    fn output_is_always_stereo() {
        assert_eq!(StreamInfo::new(FormatTag::Flac).channels, 2);
    }
}
