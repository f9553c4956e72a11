//! DSF and DSDIFF repacked to DoP.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    missing_docs
)]

use decoder::engine::dsd::{dop_word, DopMarker};
use decoder::{open_stream, DecoderConfig, FormatTag, OpenError, Session};
use decoder_testing::dsd::{dff_bytes, dsd_byte, dsf_bytes, DsfSpec, DSD64};
use decoder_testing::{drain, stream};

fn open_dsd(bytes: Vec<u8>) -> Session {
    open_stream(stream(bytes), FormatTag::Dsd, &DecoderConfig::default()).unwrap()
}

fn marker(word: i32) -> u8 {
    (word >> 16) as u8
}

/// Expected DoP words of output frame `f` for the fixture payload.
fn expected(f: usize, m: u8) -> [i32; 2] {
    [
        dop_word(m, dsd_byte(0, 2 * f), dsd_byte(0, 2 * f + 1)),
        dop_word(m, dsd_byte(1, 2 * f), dsd_byte(1, 2 * f + 1)),
    ]
}

#[test]
fn test_dsf_dsd64_descriptor() {
    let session = open_dsd(dsf_bytes(&DsfSpec::default()));
    let info = session.info();
    assert_eq!(info.format, FormatTag::Dsd);
    assert_eq!(info.sample_rate, 176_400);
    assert_eq!(info.bits_per_sample, 32);
    assert!(info.is_dsd);
    assert_eq!(info.channels, 2);
    assert_eq!(info.total_frames, 4096 * 3 / 2);
}

#[test]
fn test_dsf_payload_and_marker_alternation() {
    let mut session = open_dsd(dsf_bytes(&DsfSpec::default()));
    // Odd block so runs straddle block-group boundaries.
    let pcm = drain(&mut session, 333);
    assert_eq!(pcm.len(), 6_144 * 2);
    for (f, pair) in pcm.chunks_exact(2).enumerate() {
        let m = if f % 2 == 0 { DopMarker::FIRST } else { DopMarker::SECOND };
        assert_eq!(pair, expected(f, m), "frame {f}");
    }
}

#[test]
fn test_dsf_lsb_first_is_bit_reversed() {
    let spec = DsfSpec {
        bits_per_sample: 1,
        ..DsfSpec::default()
    };
    let mut session = open_dsd(dsf_bytes(&spec));
    let mut buf = vec![0i32; 8];
    assert_eq!(session.decode(&mut buf, 4).unwrap(), 4);
    assert_eq!(&buf[..2], &expected(0, DopMarker::FIRST));
    assert_eq!(&buf[6..8], &expected(3, DopMarker::SECOND));
}

#[test]
fn test_dsf_truncated_group_is_padded_with_silence() {
    let spec = DsfSpec {
        block_size: 64,
        bytes_per_channel: 64 * 3,
        ..DsfSpec::default()
    };
    let bytes = dsf_bytes(&spec);
    // Cut the last 20 bytes of the final right-channel block.
    let mut session = open_dsd(bytes[..bytes.len() - 20].to_vec());
    assert_eq!(session.info().total_frames, 96);
    let pcm = drain(&mut session, 1_000);
    assert_eq!(pcm.len(), 96 * 2);
    let last = &pcm[pcm.len() - 2..];
    assert_eq!(last[0], expected(95, DopMarker::SECOND)[0]);
    assert_eq!(last[1] & 0xFFFF, 0x6969);
    // Frame 21 of the last group still has real right-channel bytes.
    assert_eq!(pcm[(64 + 21) * 2 + 1], expected(64 + 21, DopMarker::SECOND)[1]);
}

#[test]
fn test_marker_resets_after_seek() {
    let mut session = open_dsd(dsf_bytes(&DsfSpec::default()));
    let mut buf = vec![0i32; 2];
    assert_eq!(session.decode(&mut buf, 1).unwrap(), 1);
    assert_eq!(marker(buf[0]), DopMarker::FIRST);
    // Next frame would carry 0xFA; a seek starts the phase over.
    session.seek(2_500).unwrap();
    assert_eq!(session.position(), 2_500);
    assert_eq!(session.decode(&mut buf, 1).unwrap(), 1);
    assert_eq!(buf, expected(2_500, DopMarker::FIRST));
    assert_eq!(session.decode(&mut buf, 1).unwrap(), 1);
    assert_eq!(marker(buf[0]), DopMarker::SECOND);
}

#[test]
fn test_seek_is_idempotent() {
    let mut session = open_dsd(dsf_bytes(&DsfSpec::default()));
    let mut a = vec![0i32; 64];
    let mut b = vec![0i32; 64];
    session.seek(4_000).unwrap();
    session.seek(4_000).unwrap();
    session.decode(&mut a, 32).unwrap();
    session.seek(4_000).unwrap();
    session.decode(&mut b, 32).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_seek_bounds() {
    let mut session = open_dsd(dsf_bytes(&DsfSpec::default()));
    let total = session.info().total_frames;
    assert!(session.seek(total + 1).is_err());
    session.seek(total).unwrap();
    let mut buf = vec![0i32; 4];
    assert_eq!(session.decode(&mut buf, 2).unwrap(), 0);
}

#[test]
fn test_dff_interleaved_payload() {
    let mut session = open_dsd(dff_bytes(DSD64 * 2, 1_000, b"DSD "));
    let info = session.info();
    assert_eq!(info.sample_rate, 352_800);
    assert_eq!(info.total_frames, 500);
    let pcm = drain(&mut session, 77);
    assert_eq!(pcm.len(), 1_000);
    for (f, pair) in pcm.chunks_exact(2).enumerate() {
        let m = if f % 2 == 0 { DopMarker::FIRST } else { DopMarker::SECOND };
        assert_eq!(pair, expected(f, m));
    }
    session.seek(100).unwrap();
    let mut buf = vec![0i32; 2];
    session.decode(&mut buf, 1).unwrap();
    assert_eq!(buf, expected(100, DopMarker::FIRST));
}

#[test]
fn test_dff_compressed_rejected() {
    let err = open_stream(stream(dff_bytes(DSD64, 100, b"DST ")), FormatTag::Dsd, &DecoderConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, OpenError::DecoderInitFailed(_)));
}

#[test]
fn test_unsupported_rate_rejected() {
    let spec = DsfSpec {
        rate: 44_100,
        ..DsfSpec::default()
    };
    assert!(open_stream(stream(dsf_bytes(&spec)), FormatTag::Dsd, &DecoderConfig::default()).is_err());
}

fn open_err(bytes: Vec<u8>) -> OpenError {
    open_stream(stream(bytes), FormatTag::Dsd, &DecoderConfig::default())
        .err()
        .unwrap()
}

#[test]
fn test_dsf_oversized_fmt_chunk_is_rejected() {
    let mut bytes = dsf_bytes(&DsfSpec::default());
    // fmt chunk size field, right after "fmt " at offset 28
    bytes[32..40].copy_from_slice(&u64::MAX.to_le_bytes());
    assert!(matches!(open_err(bytes), OpenError::DecoderInitFailed(_)));
}

#[test]
fn test_dff_oversized_form_size_is_rejected() {
    let mut bytes = dff_bytes(DSD64, 100, b"DSD ");
    bytes[4..12].copy_from_slice(&u64::MAX.to_be_bytes());
    assert!(matches!(open_err(bytes), OpenError::DecoderInitFailed(_)));

    let mut bare = b"FRM8".to_vec();
    bare.extend_from_slice(&u64::MAX.to_be_bytes());
    bare.extend_from_slice(b"DSD ");
    bare.extend_from_slice(&[0u8; 32]);
    assert!(matches!(open_err(bare), OpenError::DecoderInitFailed(_)));
}

#[test]
fn test_dff_oversized_prop_chunk_is_rejected() {
    let mut bytes = dff_bytes(DSD64, 100, b"DSD ");
    // FRM8 header (16) + FVER chunk (16) puts the PROP size at 36
    assert_eq!(&bytes[32..36], b"PROP");
    bytes[36..44].copy_from_slice(&u64::MAX.to_be_bytes());
    assert!(matches!(open_err(bytes), OpenError::DecoderInitFailed(_)));
}
