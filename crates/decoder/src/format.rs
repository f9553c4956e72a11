//! Container detection from the file-name suffix.

use std::path::Path;

/// Audio container / codec tag.
///
/// `M4a` is only ever returned by [`detect_format`]; an opened session always
/// reports the resolved codec (`Aac` or `Alac`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FormatTag {
    /// RIFF WAVE
    Wav,
    /// AIFF / AIFF-C
    Aiff,
    /// Free Lossless Audio Codec
    Flac,
    /// MPEG-1/2/2.5 Layer III
    Mp3,
    /// AAC, either raw ADTS or resolved from an MP4 container
    Aac,
    /// MP4/M4A container, codec not yet resolved
    M4a,
    /// Apple Lossless, from an MP4 container
    Alac,
    /// DSF or DSDIFF, repacked as DoP
    Dsd,
    /// Opus in Ogg
    Opus,
}

impl FormatTag {
    /// Map a file extension (without the dot) to a format tag.
    ///
    /// The comparison is ASCII case-insensitive.
    pub fn from_extension(ext: &str) -> Option<Self> {
        const TABLE: &[(&str, FormatTag)] = &[
            ("wav", FormatTag::Wav),
            ("aif", FormatTag::Aiff),
            ("aiff", FormatTag::Aiff),
            ("flac", FormatTag::Flac),
            ("mp3", FormatTag::Mp3),
            ("aac", FormatTag::Aac),
            ("opus", FormatTag::Opus),
            ("m4a", FormatTag::M4a),
            ("m4b", FormatTag::M4a),
            ("mp4", FormatTag::M4a),
            ("dsf", FormatTag::Dsd),
            ("dff", FormatTag::Dsd),
        ];
        TABLE
            .iter()
            .find(|(e, _)| e.eq_ignore_ascii_case(ext))
            .map(|&(_, tag)| tag)
    }

    /// Short display name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wav => "WAV",
            Self::Aiff => "AIFF",
            Self::Flac => "FLAC",
            Self::Mp3 => "MP3",
            Self::Aac => "AAC",
            Self::M4a => "M4A",
            Self::Alac => "ALAC",
            Self::Dsd => "DSD",
            Self::Opus => "OPUS",
        }
    }
}

impl core::fmt::Display for FormatTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect the container from the path's file-name suffix only. No I/O.
pub fn detect_format(path: &Path) -> Option<FormatTag> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(FormatTag::from_extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_format_detection_flac() {
        assert_eq!(FormatTag::from_extension("flac"), Some(FormatTag::Flac));
    }

    #[test]
    fn test_audio_format_detection_mp3() {
        assert_eq!(FormatTag::from_extension("mp3"), Some(FormatTag::Mp3));
    }

    #[test]
    fn test_audio_format_detection_wav_and_aiff() {
        assert_eq!(FormatTag::from_extension("wav"), Some(FormatTag::Wav));
        assert_eq!(FormatTag::from_extension("aif"), Some(FormatTag::Aiff));
        assert_eq!(FormatTag::from_extension("aiff"), Some(FormatTag::Aiff));
    }

    #[test]
    fn test_mp4_family_is_unresolved_m4a() {
        for ext in ["m4a", "m4b", "mp4"] {
            assert_eq!(FormatTag::from_extension(ext), Some(FormatTag::M4a));
        }
    }

    #[test]
    fn test_dsd_suffixes() {
        assert_eq!(FormatTag::from_extension("dsf"), Some(FormatTag::Dsd));
        assert_eq!(FormatTag::from_extension("dff"), Some(FormatTag::Dsd));
    }

    #[test]
    fn test_audio_format_unknown_returns_none() {
        assert_eq!(FormatTag::from_extension("txt"), None);
        assert_eq!(FormatTag::from_extension(""), None);
    }

    #[test]
    fn test_detect_is_case_insensitive() {
        assert_eq!(detect_format(Path::new("/music/A.FLAC")), Some(FormatTag::Flac));
        assert_eq!(detect_format(Path::new("track.Opus")), Some(FormatTag::Opus));
        assert_eq!(detect_format(Path::new("no_suffix")), None);
        assert_eq!(detect_format(Path::new("archive.flac.txt")), None);
    }
}
