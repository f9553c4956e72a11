//! Compressed-format engines driven by scripted decoders, so every output
//! sample can be traced back to the compressed frame it came from.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    missing_docs
)]

use decoder::engine::adts::AdtsEngine;
use decoder::engine::alac::AlacEngine;
use decoder::engine::m4a::M4aAacEngine;
use decoder::engine::mp3::Mp3Engine;
use decoder::engine::opus::OpusEngine;
use decoder::config::MP3_SEEK_INDEX_MAX_FRAMES;
use decoder::engine::Engine;
use decoder::{FormatTag, SeekError, Session};
use decoder_testing::fakes::{
    alac_packet, alac_sample, pattern_sample, FakeAlacDecoder, FakeMp3Decoder, PatternDecoder, CORRUPT_MARKER,
};
use decoder_testing::mp4::{m4a_bytes, tagged_packets, M4aSpec};
use decoder_testing::mpeg::{adts_bytes, mp3_bytes, mp3_frame, AdtsSpec, Gapless, Mp3Spec};
use decoder_testing::ogg::{opus_bytes, OpusSpec};
use decoder_testing::{drain, id3v2, stream};

fn mp3_session(bytes: Vec<u8>) -> Session {
    let (engine, info) = Mp3Engine::open(stream(bytes), FakeMp3Decoder::factory).unwrap();
    Session::from_parts(Engine::Mp3(engine), info)
}

fn adts_session(bytes: Vec<u8>) -> Session {
    let (engine, info) = AdtsEngine::open(stream(bytes), PatternDecoder::factory(1024)).unwrap();
    Session::from_parts(Engine::AdtsAac(engine), info)
}

fn m4a_session(bytes: Vec<u8>) -> Session {
    let mut s = stream(bytes);
    let track = decoder::mp4::demux(&mut s).unwrap();
    let (engine, info) = M4aAacEngine::open(s, track, PatternDecoder::factory(1024)).unwrap();
    Session::from_parts(Engine::M4aAac(engine), info)
}

fn alac_session(bytes: Vec<u8>) -> Session {
    let mut s = stream(bytes);
    let track = decoder::mp4::demux(&mut s).unwrap();
    let (engine, info) = AlacEngine::open(s, track, FakeAlacDecoder::factory).unwrap();
    Session::from_parts(Engine::Alac(engine), info)
}

fn opus_session(spec: &OpusSpec) -> Session {
    let (engine, info) = OpusEngine::open(stream(opus_bytes(spec)), PatternDecoder::factory(960)).unwrap();
    Session::from_parts(Engine::Opus(engine), info)
}

/// Output frame `f` of a stream whose compressed frames hold `per_frame`
/// samples each, after `skip` leading samples were dropped.
fn traced(f: u64, per_frame: u64, skip: u64) -> i32 {
    let s = f + skip;
    pattern_sample((s / per_frame) as u32, (s % per_frame) as usize)
}

fn gapless_mp3() -> Vec<u8> {
    mp3_bytes(&Mp3Spec {
        frames: 20,
        gapless: Some(Gapless {
            delay: 576,
            padding: 1000,
        }),
        ..Mp3Spec::default()
    })
}

// MP3

#[test]
fn test_mp3_gapless_trims_delay_and_padding() {
    let mut session = mp3_session(gapless_mp3());
    let info = session.info();
    assert_eq!(info.format, FormatTag::Mp3);
    assert_eq!(info.sample_rate, 44_100);
    assert_eq!(info.total_frames, 20 * 1152 - 576 - 1000);

    let pcm = drain(&mut session, 500);
    assert_eq!(pcm.len(), 21_464 * 2);
    assert_eq!(pcm[0], pattern_sample(0, 576));
    let last = pcm.len() / 2 - 1;
    assert_eq!(pcm[last * 2], traced(last as u64, 1152, 576));
    assert_eq!(session.position(), 21_464);
}

#[test]
fn test_mp3_seek_matches_linear_decode() {
    let all = drain(&mut mp3_session(gapless_mp3()), 1152);

    let mut session = mp3_session(gapless_mp3());
    session.seek(5_000).unwrap();
    assert_eq!(session.position(), 5_000);
    let mut buf = vec![0i32; 400];
    let n = session.decode(&mut buf, 200).unwrap();
    assert!(n > 0);
    assert_eq!(buf[0], pattern_sample(4, 968));
    assert_eq!(&buf[..n * 2], &all[5_000 * 2..(5_000 + n) * 2]);
}

#[test]
fn test_mp3_seek_bounds_with_exact_total() {
    let mut session = mp3_session(gapless_mp3());
    let total = session.info().total_frames;
    assert!(matches!(session.seek(total + 1), Err(SeekError::OutOfRange { .. })));
    session.seek(total).unwrap();
    let mut buf = vec![0i32; 16];
    assert_eq!(session.decode(&mut buf, 8).unwrap(), 0);
    session.seek(0).unwrap();
    assert_eq!(session.decode(&mut buf, 1).unwrap(), 1);
    assert_eq!(buf[0], pattern_sample(0, 576));
}

#[test]
fn test_mp3_without_info_frame_estimates_from_bitrate() {
    let mut session = mp3_session(mp3_bytes(&Mp3Spec {
        frames: 20,
        ..Mp3Spec::default()
    }));
    let total = session.info().total_frames;
    // 20 frames of 417 bytes at 128 kbit/s.
    assert_eq!(total, 22_986);
    assert!(total.abs_diff(23_040) * 100 < 23_040);
    let pcm = drain(&mut session, 1000);
    assert_eq!(pcm.len(), 23_040 * 2);
    assert_eq!(pcm[0], pattern_sample(0, 0));
}

#[test]
fn test_mp3_seek_without_info_frame_is_exact() {
    let plain = || {
        mp3_bytes(&Mp3Spec {
            frames: 20,
            ..Mp3Spec::default()
        })
    };
    let all = drain(&mut mp3_session(plain()), 1152);

    let mut session = mp3_session(plain());
    let target = 5 * 1152 + 100;
    session.seek(target).unwrap();
    assert_eq!(session.position(), target);
    let mut buf = vec![0i32; 600];
    let n = session.decode(&mut buf, 300).unwrap();
    assert!(n > 0);
    assert_eq!(buf[0], pattern_sample(5, 100));
    let at = target as usize * 2;
    assert_eq!(&buf[..n * 2], &all[at..at + n * 2]);

    // The index now covers the whole file.
    assert!(matches!(
        session.seek(25 * 1152),
        Err(SeekError::OutOfRange { total, .. }) if total == 20 * 1152
    ));
}

#[test]
fn test_mp3_seek_past_index_cap_is_estimated() {
    let cap = MP3_SEEK_INDEX_MAX_FRAMES as u32;
    let mut session = mp3_session(mp3_bytes(&Mp3Spec {
        frames: cap + 1_000,
        ..Mp3Spec::default()
    }));

    // Inside the cap: exact.
    session.seek(100 * 1152 + 3).unwrap();
    let mut buf = vec![0i32; 4];
    session.decode(&mut buf, 2).unwrap();
    assert_eq!(buf[0], pattern_sample(100, 3));

    // Beyond it: lands on the start of the containing frame.
    let fi = cap + 500;
    session.seek(u64::from(fi) * 1152 + 7).unwrap();
    assert_eq!(session.position(), u64::from(fi) * 1152);
    session.decode(&mut buf, 2).unwrap();
    assert_eq!(buf[0], pattern_sample(fi, 0));

    assert!(matches!(
        session.seek(u64::from(cap + 2_000) * 1152),
        Err(SeekError::OutOfRange { .. })
    ));
}

#[test]
fn test_mp3_tags_are_skipped() {
    let mut session = mp3_session(mp3_bytes(&Mp3Spec {
        frames: 8,
        id3_body: Some(3_000),
        id3v1: true,
        ..Mp3Spec::default()
    }));
    let pcm = drain(&mut session, 1000);
    assert_eq!(pcm.len(), 8 * 1152 * 2);
    assert_eq!(pcm[0], pattern_sample(0, 0));
    assert_eq!(pcm[pcm.len() - 1], pattern_sample(7, 1151));
}

#[test]
fn test_mp3_junk_between_frames_is_skipped() {
    let mut bytes = Vec::new();
    for i in 0..6 {
        bytes.extend_from_slice(&mp3_frame(i));
        if i == 2 {
            bytes.extend_from_slice(&[0u8; 300]);
        }
    }
    let mut session = mp3_session(bytes);
    let pcm = drain(&mut session, 1000);
    assert_eq!(pcm.len(), 6 * 1152 * 2);
    let tags: Vec<i32> = pcm.chunks_exact(1152 * 2).map(|f| f[0] >> 16).collect();
    assert_eq!(tags, vec![0, 1, 2, 3, 4, 5]);
}

// ADTS

fn tagged_adts() -> AdtsSpec {
    AdtsSpec {
        id3_body: Some(1_000),
        ..AdtsSpec::default()
    }
}

#[test]
fn test_adts_descriptor_behind_id3() {
    let mut session = adts_session(adts_bytes(&tagged_adts()));
    let info = session.info();
    assert_eq!(info.format, FormatTag::Aac);
    assert_eq!(info.sample_rate, 44_100);
    assert_eq!(info.total_frames, 100 * 1024);
    let pcm = drain(&mut session, 777);
    assert_eq!(pcm.len(), 100 * 1024 * 2);
    assert_eq!(pcm[0], pattern_sample(0, 0));
}

#[test]
fn test_adts_seek_lands_on_frame_boundary() {
    let mut session = adts_session(adts_bytes(&tagged_adts()));
    session.seek(50 * 1024 + 10).unwrap();
    assert_eq!(session.position(), 50 * 1024);
    let mut buf = vec![0i32; 8];
    assert_eq!(session.decode(&mut buf, 4).unwrap(), 4);
    assert_eq!(buf[0], pattern_sample(50, 0));

    session.seek(0).unwrap();
    session.decode(&mut buf, 1).unwrap();
    assert_eq!(buf[0], pattern_sample(0, 0));
}

#[test]
fn test_adts_seek_far_past_end_is_out_of_range() {
    let mut session = adts_session(adts_bytes(&tagged_adts()));
    for target in [u64::MAX, u64::MAX / 2, 1 << 60] {
        assert!(matches!(
            session.seek(target),
            Err(SeekError::OutOfRange { frame, total }) if frame == target && total == 100 * 1024
        ));
    }
    // Still usable afterwards.
    session.seek(0).unwrap();
    let mut buf = vec![0i32; 2];
    assert_eq!(session.decode(&mut buf, 1).unwrap(), 1);
    assert_eq!(buf[0], pattern_sample(0, 0));
}

#[test]
fn test_adts_corrupt_frame_is_dropped() {
    let spec = tagged_adts();
    let mut bytes = adts_bytes(&spec);
    let tag_len = id3v2(1_000).len();
    bytes[tag_len + 3 * spec.frame_len + 7] = CORRUPT_MARKER;
    let mut session = adts_session(bytes);
    let pcm = drain(&mut session, 1024);
    assert_eq!(pcm.len(), 99 * 1024 * 2);
    assert_eq!(pcm[3 * 1024 * 2], pattern_sample(4, 0));
}

// M4A-AAC

#[test]
fn test_m4a_moov_at_end() {
    let spec = M4aSpec {
        moov_at_end: true,
        ..M4aSpec::aac()
    };
    let mut session = m4a_session(m4a_bytes(&spec, &tagged_packets(40, 200)));
    let info = session.info();
    assert_eq!(info.format, FormatTag::Aac);
    assert_eq!(info.total_frames, 40_960);
    let pcm = drain(&mut session, 600);
    assert_eq!(pcm.len(), 40_960 * 2);
    for f in [0u64, 1023, 1024, 20_000, 40_959] {
        assert_eq!(pcm[f as usize * 2], traced(f, 1024, 0), "frame {f}");
    }
}

#[test]
fn test_m4a_seek_is_sample_accurate() {
    let bytes = m4a_bytes(&M4aSpec::aac(), &tagged_packets(40, 200));
    let mut session = m4a_session(bytes);
    session.seek(10 * 1024 + 5).unwrap();
    let mut buf = vec![0i32; 64];
    assert_eq!(session.decode(&mut buf, 32).unwrap(), 32);
    assert_eq!(buf[0], pattern_sample(10, 5));
    assert_eq!(session.position(), 10 * 1024 + 5 + 32);

    session.seek(0).unwrap();
    session.decode(&mut buf, 1).unwrap();
    assert_eq!(buf[0], pattern_sample(0, 0));
    assert!(matches!(session.seek(40_961), Err(SeekError::OutOfRange { .. })));
}

#[test]
fn test_m4a_video_track_and_co64() {
    let spec = M4aSpec {
        video_track: true,
        co64: true,
        samples_per_chunk: 3,
        ..M4aSpec::aac()
    };
    let mut session = m4a_session(m4a_bytes(&spec, &tagged_packets(10, 150)));
    assert_eq!(session.info().total_frames, 10_240);
    let pcm = drain(&mut session, 1024);
    let tags: Vec<i32> = pcm.chunks_exact(1024 * 2).map(|f| f[0] >> 16).collect();
    assert_eq!(tags, (0..10).collect::<Vec<_>>());
}

#[test]
fn test_m4a_corrupt_access_unit_is_dropped() {
    let mut packets = tagged_packets(12, 100);
    packets[5][0] = CORRUPT_MARKER;
    let mut session = m4a_session(m4a_bytes(&M4aSpec::aac(), &packets));
    let pcm = drain(&mut session, 1024);
    assert_eq!(pcm.len(), 11 * 1024 * 2);
}

// ALAC

fn alac_file(packets: u32, last_frames: u32) -> Vec<u8> {
    let data: Vec<Vec<u8>> = (0..packets)
        .map(|i| alac_packet(i, if i + 1 == packets { last_frames } else { 4096 }))
        .collect();
    let spec = M4aSpec {
        duration: Some(u64::from(packets - 1) * 4096 + u64::from(last_frames)),
        ..M4aSpec::alac()
    };
    m4a_bytes(&spec, &data)
}

#[test]
fn test_first_audio_track_wins() {
    let data: Vec<Vec<u8>> = (0..4).map(|i| alac_packet(i, 4096)).collect();
    let spec = M4aSpec {
        second_audio_rate: Some(48_000),
        ..M4aSpec::alac()
    };
    let bytes = m4a_bytes(&spec, &data);
    let track = decoder::mp4::demux(&mut stream(bytes.clone())).unwrap();
    assert_eq!(track.sample_rate, 44_100);

    let session = alac_session(bytes);
    assert_eq!(session.info().sample_rate, 44_100);
    assert_eq!(session.info().total_frames, 4 * 4096);
}

#[test]
fn test_alac_short_last_frame_trimmed_by_duration() {
    let mut session = alac_session(alac_file(10, 1_000));
    let info = session.info();
    assert_eq!(info.format, FormatTag::Alac);
    assert_eq!(info.bits_per_sample, 16);
    assert_eq!(info.total_frames, 9 * 4096 + 1_000);
    let pcm = drain(&mut session, 1500);
    assert_eq!(pcm.len(), (9 * 4096 + 1_000) * 2);
    assert_eq!(pcm[0], i32::from(alac_sample(0, 0)) << 16);
    assert_eq!(pcm[pcm.len() - 1], i32::from(alac_sample(9, 999)) << 16);
}

#[test]
fn test_alac_seek_matches_linear_decode() {
    let bytes = alac_file(12, 4096);
    let all = drain(&mut alac_session(bytes.clone()), 4096);
    assert_eq!(all.len(), 12 * 4096 * 2);

    let mut session = alac_session(bytes);
    let target = 4096 * 10 + 7;
    session.seek(target).unwrap();
    let mut buf = vec![0i32; 200];
    assert_eq!(session.decode(&mut buf, 100).unwrap(), 100);
    let at = target as usize * 2;
    assert_eq!(&buf[..], &all[at..at + 200]);
    assert_eq!(buf[0], i32::from(alac_sample(10, 7)) << 16);
}

#[test]
fn test_alac_seek_bounds() {
    let mut session = alac_session(alac_file(4, 2_000));
    let total = session.info().total_frames;
    assert!(matches!(
        session.seek(total + 1),
        Err(SeekError::OutOfRange { .. })
    ));
    session.seek(total).unwrap();
    let mut buf = vec![0i32; 4];
    assert_eq!(session.decode(&mut buf, 2).unwrap(), 0);
}

// Opus

#[test]
fn test_opus_pre_skip_and_total() {
    let mut session = opus_session(&OpusSpec::default());
    let info = session.info();
    assert_eq!(info.format, FormatTag::Opus);
    assert_eq!(info.sample_rate, 48_000);
    assert_eq!(info.total_frames, 100 * 960 - 312);

    let pcm = drain(&mut session, 700);
    assert_eq!(pcm.len(), (100 * 960 - 312) * 2);
    assert_eq!(pcm[0], pattern_sample(0, 312));
    assert_eq!(pcm[pcm.len() - 1], pattern_sample(99, 959));
}

#[test]
fn test_opus_gain_combines_head_and_r128() {
    let spec = OpusSpec {
        output_gain: 256,
        comments: vec!["TITLE=x".into(), "R128_TRACK_GAIN=-512".into()],
        ..OpusSpec::default()
    };
    let session = opus_session(&spec);
    assert!((session.info().gain_db - -1.0).abs() < 1e-6);
}

#[test]
fn test_opus_seek() {
    let mut session = opus_session(&OpusSpec::default());
    let mut buf = vec![0i32; 20];

    session.seek(48_000).unwrap();
    assert_eq!(session.position(), 48_000);
    assert!(session.decode(&mut buf, 10).unwrap() > 0);

    session.seek(0).unwrap();
    assert_eq!(session.decode(&mut buf, 10).unwrap(), 10);
    assert_eq!(buf[0], pattern_sample(0, 312));

    let total = session.info().total_frames;
    assert!(matches!(session.seek(total + 1), Err(SeekError::OutOfRange { .. })));
}

#[test]
fn test_opus_mono_duplicated() {
    let mut session = opus_session(&OpusSpec {
        channels: 1,
        packets: 5,
        ..OpusSpec::default()
    });
    assert_eq!(session.info().source_channels, 1);
    let pcm = drain(&mut session, 500);
    assert_eq!(pcm.len(), (5 * 960 - 312) * 2);
    assert!(pcm.chunks_exact(2).all(|p| p[0] == p[1]));
}

#[test]
fn test_opus_pre_skip_beyond_length_is_not_seekable() {
    let mut session = opus_session(&OpusSpec {
        packets: 1,
        final_granule: Some(100),
        ..OpusSpec::default()
    });
    assert_eq!(session.info().total_frames, 0);
    assert!(matches!(session.seek(10), Err(SeekError::Unsupported)));
    session.seek(0).unwrap();
}
