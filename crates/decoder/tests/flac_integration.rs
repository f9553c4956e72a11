//! FLAC through symphonia's reader, on synthesized VERBATIM streams.

#![cfg(feature = "flac")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    missing_docs
)]

use decoder::{open_stream, DecoderConfig, FormatTag, Session};
use decoder_testing::flac::{counting_signal, flac_bytes, FlacSpec};
use decoder_testing::{drain, stream};

fn open_flac(bytes: Vec<u8>) -> Session {
    open_stream(stream(bytes), FormatTag::Flac, &DecoderConfig::default()).unwrap()
}

#[test]
fn test_replaygain_track_gain_reported() {
    let spec = FlacSpec {
        comments: vec!["ARTIST=someone".into(), "REPLAYGAIN_TRACK_GAIN=-3.50 dB".into()],
        ..FlacSpec::default()
    };
    let session = open_flac(flac_bytes(&spec, &counting_signal(4_000, 2)));
    let info = session.info();
    assert!((info.gain_db - -3.5).abs() < 1e-6);
    assert_eq!(info.format, FormatTag::Flac);
    assert_eq!(info.total_frames, 4_000);
    assert_eq!(info.bits_per_sample, 16);
}

#[test]
fn test_no_gain_tag_is_zero() {
    let session = open_flac(flac_bytes(&FlacSpec::default(), &counting_signal(1_152, 2)));
    assert_eq!(session.info().gain_db, 0.0);
}

#[test]
fn test_decodes_every_frame_in_order() {
    let signal = counting_signal(5_000, 2);
    let mut session = open_flac(flac_bytes(&FlacSpec::default(), &signal));
    let pcm = drain(&mut session, 700);
    assert_eq!(pcm.len(), signal.len());
    // Monotonic signal in, monotonic signal out, whatever the justification.
    for w in pcm.chunks_exact(2).collect::<Vec<_>>().windows(2) {
        assert!(w[1][0] > w[0][0]);
        assert!(w[0][1] > w[0][0]);
    }
    assert_eq!(session.position(), 5_000);
}

#[test]
fn test_mono_is_duplicated() {
    let spec = FlacSpec {
        channels: 1,
        ..FlacSpec::default()
    };
    let mut session = open_flac(flac_bytes(&spec, &counting_signal(2_000, 1)));
    assert_eq!(session.info().source_channels, 1);
    assert_eq!(session.info().channels, 2);
    let pcm = drain(&mut session, 512);
    assert_eq!(pcm.len(), 4_000);
    assert!(pcm.chunks_exact(2).all(|p| p[0] == p[1]));
}

#[test]
fn test_seek_matches_linear_decode() {
    let signal = counting_signal(6_000, 2);
    let bytes = flac_bytes(&FlacSpec::default(), &signal);

    let mut linear = open_flac(bytes.clone());
    let all = drain(&mut linear, 1_000);

    let mut session = open_flac(bytes);
    session.seek(3_000).unwrap();
    assert_eq!(session.position(), 3_000);
    let mut buf = vec![0i32; 200];
    let n = session.decode(&mut buf, 100).unwrap();
    assert!(n > 0);
    assert_eq!(&buf[..n * 2], &all[3_000 * 2..(3_000 + n) * 2]);
}

#[test]
fn test_seek_past_end_is_out_of_range() {
    let mut session = open_flac(flac_bytes(&FlacSpec::default(), &counting_signal(1_000, 2)));
    assert!(matches!(
        session.seek(1_001),
        Err(decoder::SeekError::OutOfRange { total: 1_000, .. })
    ));
    session.seek(1_000).unwrap();
    let mut buf = vec![0i32; 8];
    assert_eq!(session.decode(&mut buf, 4).unwrap(), 0);
}
