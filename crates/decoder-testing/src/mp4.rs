//! ISO-BMFF (M4A) fixtures for AAC and ALAC tracks.

use byteorder::{BigEndian, WriteBytesExt};

/// Sample description of the audio track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackCodec {
    /// `mp4a` entry with an `esds` carrying this AudioSpecificConfig.
    Aac {
        /// AudioSpecificConfig bytes.
        asc: Vec<u8>,
    },
    /// `alac` entry with a 28-byte cookie.
    Alac {
        /// PCM frames per compressed frame.
        frame_length: u32,
        /// Bit depth declared by the cookie.
        bit_depth: u8,
    },
}

/// Options for [`m4a_bytes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct M4aSpec {
    /// Audio codec.
    pub codec: TrackCodec,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u8,
    /// `mdhd` duration in sample-rate units; `None` writes `samples * frames_per_sample`.
    pub duration: Option<u64>,
    /// Samples (compressed frames) per chunk.
    pub samples_per_chunk: u32,
    /// Write `moov` after `mdat`.
    pub moov_at_end: bool,
    /// Add a video `trak` after the audio one.
    pub video_track: bool,
    /// Add a second audio `trak` at this sample rate after the first.
    pub second_audio_rate: Option<u32>,
    /// Use 64-bit chunk offsets (`co64`).
    pub co64: bool,
}

impl M4aSpec {
    /// AAC-LC, 44.1 kHz stereo.
    pub fn aac() -> Self {
        Self {
            codec: TrackCodec::Aac {
                asc: asc(2, 4, 2).to_vec(),
            },
            sample_rate: 44_100,
            channels: 2,
            duration: None,
            samples_per_chunk: 4,
            moov_at_end: false,
            video_track: false,
            second_audio_rate: None,
            co64: false,
        }
    }

    /// 16-bit ALAC, 44.1 kHz stereo, 4096 frames per packet.
    pub fn alac() -> Self {
        Self {
            codec: TrackCodec::Alac {
                frame_length: 4096,
                bit_depth: 16,
            },
            ..Self::aac()
        }
    }

    fn frames_per_sample(&self) -> u64 {
        match self.codec {
            TrackCodec::Aac { .. } => 1024,
            TrackCodec::Alac { frame_length, .. } => u64::from(frame_length),
        }
    }
}

/// Two-byte AudioSpecificConfig.
pub fn asc(object_type: u8, sfi: u8, channels: u8) -> [u8; 2] {
    [
        (object_type << 3) | (sfi >> 1),
        ((sfi & 1) << 7) | (channels << 3),
    ]
}

fn mp4_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut b = Vec::with_capacity(body.len() + 8);
    b.write_u32::<BigEndian>((body.len() + 8) as u32).ok();
    b.extend_from_slice(kind);
    b.extend_from_slice(body);
    b
}

fn full_box(kind: &[u8; 4], version: u8, body: &[u8]) -> Vec<u8> {
    let mut v = vec![version, 0, 0, 0];
    v.extend_from_slice(body);
    mp4_box(kind, &v)
}

fn concat(parts: &[Vec<u8>]) -> Vec<u8> {
    parts.concat()
}

fn descriptor(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut d = vec![tag, body.len() as u8];
    d.extend_from_slice(body);
    d
}

fn esds(asc: &[u8]) -> Vec<u8> {
    let dsi = descriptor(0x05, asc);
    let mut dcd = vec![0x40, 0x15, 0, 0x18, 0];
    dcd.extend_from_slice(&128_000u32.to_be_bytes());
    dcd.extend_from_slice(&128_000u32.to_be_bytes());
    dcd.extend_from_slice(&dsi);
    let dcd = descriptor(0x04, &dcd);
    let mut es = vec![0, 1, 0];
    es.extend_from_slice(&dcd);
    es.extend_from_slice(&descriptor(0x06, &[0x02]));
    full_box(b"esds", 0, &descriptor(0x03, &es))
}

/// The `alac` child box: version/flags plus ALACSpecificConfig.
pub fn alac_cookie_box(frame_length: u32, bit_depth: u8, channels: u8, sample_rate: u32) -> Vec<u8> {
    let mut c = Vec::with_capacity(24);
    c.write_u32::<BigEndian>(frame_length).ok();
    c.push(0); // compatible version
    c.push(bit_depth);
    c.extend_from_slice(&[40, 10, 14]); // pb, mb, kb
    c.push(channels);
    c.write_u16::<BigEndian>(255).ok(); // max run
    c.write_u32::<BigEndian>(0).ok(); // max frame bytes
    c.write_u32::<BigEndian>(0).ok(); // avg bit rate
    c.write_u32::<BigEndian>(sample_rate).ok();
    full_box(b"alac", 0, &c)
}

fn sound_entry(spec: &M4aSpec) -> Vec<u8> {
    let (kind, bits, child) = match &spec.codec {
        TrackCodec::Aac { asc } => (b"mp4a", 16u16, esds(asc)),
        TrackCodec::Alac {
            frame_length,
            bit_depth,
        } => (
            b"alac",
            u16::from(*bit_depth),
            alac_cookie_box(*frame_length, *bit_depth, spec.channels, spec.sample_rate),
        ),
    };
    let mut e = vec![0u8; 6];
    e.write_u16::<BigEndian>(1).ok(); // data reference index
    e.write_u16::<BigEndian>(0).ok(); // version
    e.extend_from_slice(&[0u8; 6]); // revision + vendor
    e.write_u16::<BigEndian>(u16::from(spec.channels)).ok();
    e.write_u16::<BigEndian>(bits).ok();
    e.extend_from_slice(&[0u8; 4]); // compression id + packet size
    e.write_u32::<BigEndian>(spec.sample_rate << 16).ok();
    e.extend_from_slice(&child);
    mp4_box(kind, &e)
}

fn stbl(spec: &M4aSpec, sizes: &[u32], chunk_offsets: &[u64], entry: Vec<u8>) -> Vec<u8> {
    let mut stsd = Vec::new();
    stsd.write_u32::<BigEndian>(1).ok();
    stsd.extend_from_slice(&entry);

    let mut stts = Vec::new();
    stts.write_u32::<BigEndian>(1).ok();
    stts.write_u32::<BigEndian>(sizes.len() as u32).ok();
    stts.write_u32::<BigEndian>(spec.frames_per_sample() as u32).ok();

    let mut stsc = Vec::new();
    stsc.write_u32::<BigEndian>(1).ok();
    stsc.write_u32::<BigEndian>(1).ok();
    stsc.write_u32::<BigEndian>(spec.samples_per_chunk).ok();
    stsc.write_u32::<BigEndian>(1).ok();

    let mut stsz = Vec::new();
    stsz.write_u32::<BigEndian>(0).ok();
    stsz.write_u32::<BigEndian>(sizes.len() as u32).ok();
    for &s in sizes {
        stsz.write_u32::<BigEndian>(s).ok();
    }

    let mut co = Vec::new();
    co.write_u32::<BigEndian>(chunk_offsets.len() as u32).ok();
    for &o in chunk_offsets {
        if spec.co64 {
            co.write_u64::<BigEndian>(o).ok();
        } else {
            co.write_u32::<BigEndian>(o as u32).ok();
        }
    }
    let co_kind = if spec.co64 { b"co64" } else { b"stco" };

    mp4_box(
        b"stbl",
        &concat(&[
            full_box(b"stsd", 0, &stsd),
            full_box(b"stts", 0, &stts),
            full_box(b"stsc", 0, &stsc),
            full_box(b"stsz", 0, &stsz),
            full_box(co_kind, 0, &co),
        ]),
    )
}

fn trak(handler: &[u8; 4], timescale: u32, duration: u32, stbl: Vec<u8>) -> Vec<u8> {
    let mut mdhd = vec![0u8; 8]; // creation + modification
    mdhd.write_u32::<BigEndian>(timescale).ok();
    mdhd.write_u32::<BigEndian>(duration).ok();
    mdhd.extend_from_slice(&[0x55, 0xC4, 0, 0]); // language + quality

    let mut hdlr = vec![0u8; 4]; // pre-defined
    hdlr.extend_from_slice(handler);
    hdlr.extend_from_slice(&[0u8; 12]);
    hdlr.push(0); // empty name

    let minf = mp4_box(b"minf", &stbl);
    let mdia = mp4_box(
        b"mdia",
        &concat(&[full_box(b"mdhd", 0, &mdhd), full_box(b"hdlr", 0, &hdlr), minf]),
    );
    mp4_box(b"trak", &concat(&[full_box(b"tkhd", 0, &[0u8; 80]), mdia]))
}

/// A complete M4A file holding `packets` as the audio samples.
pub fn m4a_bytes(spec: &M4aSpec, packets: &[Vec<u8>]) -> Vec<u8> {
    let sizes: Vec<u32> = packets.iter().map(|p| p.len() as u32).collect();
    let ftyp = mp4_box(b"ftyp", b"M4A \x00\x00\x02\x00isomiso2");
    let payload = packets.concat();
    let mdat = mp4_box(b"mdat", &payload);

    let duration = spec
        .duration
        .unwrap_or(packets.len() as u64 * spec.frames_per_sample());
    let build_moov = |mdat_body: u64| -> Vec<u8> {
        let per_chunk = spec.samples_per_chunk.max(1) as usize;
        let mut offsets = Vec::new();
        let mut at = mdat_body;
        for chunk in sizes.chunks(per_chunk) {
            offsets.push(at);
            at += chunk.iter().map(|&s| u64::from(s)).sum::<u64>();
        }
        let mut mvhd = vec![0u8; 8];
        mvhd.write_u32::<BigEndian>(spec.sample_rate).ok();
        mvhd.write_u32::<BigEndian>(duration as u32).ok();
        mvhd.extend_from_slice(&[0u8; 80]);

        let audio = trak(
            b"soun",
            spec.sample_rate,
            duration as u32,
            stbl(spec, &sizes, &offsets, sound_entry(spec)),
        );
        let mut parts = vec![full_box(b"mvhd", 0, &mvhd), audio];
        if let Some(rate) = spec.second_audio_rate {
            let other = M4aSpec {
                sample_rate: rate,
                ..spec.clone()
            };
            parts.push(trak(
                b"soun",
                rate,
                duration as u32,
                stbl(&other, &sizes, &offsets, sound_entry(&other)),
            ));
        }
        if spec.video_track {
            let avc1 = mp4_box(b"avc1", &[0u8; 78]);
            let video_spec = M4aSpec {
                co64: false,
                ..spec.clone()
            };
            parts.push(trak(
                b"vide",
                90_000,
                1000,
                stbl(&video_spec, &[16], &[0], avc1),
            ));
        }
        mp4_box(b"moov", &concat(&parts))
    };

    if spec.moov_at_end {
        let mdat_body = (ftyp.len() + 8) as u64;
        concat(&[ftyp, mdat, build_moov(mdat_body)])
    } else {
        // moov size does not depend on the offsets' values.
        let sizing = build_moov(0);
        let mdat_body = (ftyp.len() + sizing.len() + 8) as u64;
        concat(&[ftyp, build_moov(mdat_body), mdat])
    }
}

/// `count` AAC access units tagged with their index.
pub fn tagged_packets(count: u32, size: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let mut p = i.to_be_bytes().to_vec();
            p.resize(size.max(4), 0);
            p
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use decoder::mp4::{demux, Mp4Codec};
    use std::io::Cursor;

    #[test]
    fn aac_track_demuxes() {
        let bytes = m4a_bytes(&M4aSpec::aac(), &tagged_packets(10, 20));
        let track = demux(&mut Cursor::new(bytes)).unwrap();
        assert!(matches!(track.codec, Mp4Codec::Aac { .. }));
        assert_eq!(track.table.len(), 10);
        assert_eq!(track.sample_rate, 44_100);
    }

    #[test]
    fn asc_lc_44k_stereo() {
        assert_eq!(asc(2, 4, 2), [0x12, 0x10]);
    }
}
