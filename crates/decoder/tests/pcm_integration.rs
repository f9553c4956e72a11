//! WAV and AIFF through the public session API, plus the dispatcher's
//! path handling.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    missing_docs
)]

use std::io::Write;

use decoder::{open, open_stream, read_info, DecoderConfig, FormatTag, OpenError};
use decoder_testing::pcm::{aiff_bytes, ramp, wav_bytes, PcmSpec};
use decoder_testing::{drain, stream};

fn write_temp(suffix: &str, bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut f = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    f.write_all(bytes).unwrap();
    f.flush().unwrap();
    f
}

#[test]
fn test_mono_wav_reports_stereo_and_duplicates() {
    let spec = PcmSpec::cd().mono();
    let samples = ramp(&spec, 88_200);
    let file = write_temp(".wav", &wav_bytes(&spec, &samples));

    let mut session = open(file.path()).unwrap();
    let info = session.info();
    assert_eq!(info.format, FormatTag::Wav);
    assert_eq!(info.channels, 2);
    assert_eq!(info.source_channels, 1);
    assert_eq!(info.sample_rate, 44_100);
    assert_eq!(info.total_frames, 88_200);
    assert_eq!(info.duration_ms, 2_000);
    assert!(!info.is_dsd);

    let pcm = drain(&mut session, 1000);
    assert_eq!(pcm.len(), 88_200 * 2);
    for (i, pair) in pcm.chunks_exact(2).enumerate() {
        assert_eq!(pair[0], pair[1]);
        assert_eq!(pair[0], samples[i] << 16);
    }
    assert_eq!(session.position(), 88_200);
}

#[test]
fn test_wav_24_bit_left_justified() {
    let spec = PcmSpec::cd().with_bits(24).with_rate(96_000);
    let samples = ramp(&spec, 500);
    let mut session = open_stream(
        stream(wav_bytes(&spec, &samples)),
        FormatTag::Wav,
        &DecoderConfig::default(),
    )
    .unwrap();
    assert_eq!(session.info().bits_per_sample, 24);
    let pcm = drain(&mut session, 128);
    assert_eq!(pcm.len(), samples.len());
    for (got, want) in pcm.iter().zip(&samples) {
        assert_eq!(*got, want << 8);
    }
}

#[test]
fn test_aiff_big_endian_matches_wav() {
    let spec = PcmSpec::cd();
    let samples = ramp(&spec, 2_000);
    let cfg = DecoderConfig::default();
    let mut wav = open_stream(stream(wav_bytes(&spec, &samples)), FormatTag::Wav, &cfg).unwrap();
    let mut aiff = open_stream(stream(aiff_bytes(&spec, &samples)), FormatTag::Aiff, &cfg).unwrap();
    assert_eq!(aiff.info().format, FormatTag::Aiff);
    assert_eq!(aiff.info().sample_rate, 44_100);
    assert_eq!(aiff.info().total_frames, 2_000);
    assert_eq!(drain(&mut wav, 333), drain(&mut aiff, 333));
}

#[test]
fn test_seek_is_idempotent_and_exact() {
    let spec = PcmSpec::cd();
    let samples = ramp(&spec, 10_000);
    let mut session =
        open_stream(stream(wav_bytes(&spec, &samples)), FormatTag::Wav, &DecoderConfig::default()).unwrap();

    let mut a = vec![0i32; 200];
    let mut b = vec![0i32; 200];
    session.seek(4_321).unwrap();
    session.seek(4_321).unwrap();
    assert_eq!(session.position(), 4_321);
    assert_eq!(session.decode(&mut a, 100).unwrap(), 100);
    session.seek(4_321).unwrap();
    assert_eq!(session.decode(&mut b, 100).unwrap(), 100);
    assert_eq!(a, b);
    assert_eq!(a[0], samples[4_321 * 2] << 16);
    assert_eq!(a[1], samples[4_321 * 2 + 1] << 16);
}

#[test]
fn test_decode_at_end_returns_zero() {
    let spec = PcmSpec::cd();
    let mut session = open_stream(
        stream(wav_bytes(&spec, &ramp(&spec, 100))),
        FormatTag::Wav,
        &DecoderConfig::default(),
    )
    .unwrap();
    session.seek(100).unwrap();
    let mut buf = vec![0i32; 64];
    assert_eq!(session.decode(&mut buf, 32).unwrap(), 0);
    assert_eq!(session.decode(&mut buf, 32).unwrap(), 0);
}

#[test]
fn test_max_frames_clamped_to_buffer() {
    let spec = PcmSpec::cd();
    let mut session = open_stream(
        stream(wav_bytes(&spec, &ramp(&spec, 1_000))),
        FormatTag::Wav,
        &DecoderConfig::default(),
    )
    .unwrap();
    let mut buf = vec![0i32; 20];
    assert_eq!(session.decode(&mut buf, 500).unwrap(), 10);
    assert_eq!(session.decode(&mut buf, 0).unwrap(), 0);
}

#[test]
fn test_small_scratch_still_fills_requests_over_calls() {
    let spec = PcmSpec::cd();
    let samples = ramp(&spec, 1_000);
    let cfg = DecoderConfig::default().with_scratch_frames(64);
    let mut session = open_stream(stream(wav_bytes(&spec, &samples)), FormatTag::Wav, &cfg).unwrap();
    let pcm = drain(&mut session, 1_000);
    assert_eq!(pcm.len(), samples.len());
}

#[test]
fn test_read_info_and_suffix_case() {
    let spec = PcmSpec::cd();
    let file = write_temp(".WAV", &wav_bytes(&spec, &ramp(&spec, 44_100)));
    let info = read_info(file.path()).unwrap();
    assert_eq!(info.total_frames, 44_100);
    assert_eq!(info.duration_ms, 1_000);
}

#[test]
fn test_wrong_content_for_suffix_fails_init() {
    let file = write_temp(".wav", b"this is not a riff file at all, just text");
    assert!(matches!(open(file.path()), Err(OpenError::DecoderInitFailed(_))));
}

#[test]
fn test_unknown_suffix_is_unsupported() {
    let spec = PcmSpec::cd();
    let file = write_temp(".ogg", &wav_bytes(&spec, &ramp(&spec, 10)));
    assert!(matches!(open(file.path()), Err(OpenError::UnsupportedFormat)));
}
