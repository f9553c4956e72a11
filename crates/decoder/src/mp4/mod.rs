//! ISO-BMFF (M4A/MP4) demuxer.
//!
//! Walks the box tree to the audio track's sample description and sample
//! tables and returns them as an owned [`Mp4Track`]. `moov` is searched at the
//! top level, so files with the index after `mdat` work.
//!
//! Every `trak` is parsed into fresh scratch state. The first one whose
//! handler is `soun` and whose codec resolved becomes the chosen track; later
//! `trak` boxes are skipped, so neither a second audio track nor a video or
//! chapter track can clobber its metadata.

pub mod atom;
pub mod descriptor;
pub mod sample_table;

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};

use self::atom::{read_version_flags, BoxHeader, Children};
use self::descriptor::{audio_specific_config, parse_audio_specific_config, ConfigBlob};
use self::sample_table::{ChunkRun, SampleSizes, SampleTable};
use crate::config::MP4_MAX_DEPTH;
use crate::error::{InitError, OpenError};
use crate::stream::ByteStream;

/// Length of the `alac` FullBox payload: version/flags plus ALACSpecificConfig.
pub const ALAC_COOKIE_LEN: usize = 28;

/// Audio sample entry fields preceding the child boxes (SoundDescription v0).
const SOUND_ENTRY_LEN: u64 = 28;

/// Cap on the bytes read from an `esds` box.
const ESDS_MAX: u64 = 1024;

/// Codec resolved from the sample description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mp4Codec {
    /// AAC with its AudioSpecificConfig.
    Aac {
        /// AudioSpecificConfig from `esds`.
        asc: ConfigBlob,
    },
    /// Apple Lossless with its magic cookie.
    Alac {
        /// `alac` FullBox payload: version/flags then the 24-byte config.
        cookie: ConfigBlob,
        /// PCM frames per compressed frame.
        frame_length: u32,
    },
}

/// Everything an engine needs from the container. Owned; the demuxer keeps
/// no reference to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4Track {
    /// Resolved codec and its configuration blob.
    pub codec: Mp4Codec,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count from the sample description.
    pub channels: u8,
    /// Bits per sample (ALAC: from the cookie; AAC: informational 16).
    pub bits_per_sample: u8,
    /// `mdhd` timescale.
    pub timescale: u32,
    /// `mdhd` duration in timescale units.
    pub duration: u64,
    /// Sample locations.
    pub table: SampleTable,
}

/// Per-`trak` scratch state.
#[derive(Debug, Default)]
struct TrackScratch {
    handler: [u8; 4],
    timescale: u32,
    duration: u64,
    codec: Option<Mp4Codec>,
    sample_rate: u32,
    channels: u8,
    bits_per_sample: u8,
    sizes: SampleSizes,
    runs: Vec<ChunkRun>,
    chunk_offsets: Vec<u64>,
}

/// Parse the container and return the audio track.
///
/// # Errors
///
/// `DecoderInitFailed` when there is no `moov`, no sound track with a
/// supported codec, or an empty sample table; `OutOfMemory` when a table
/// cannot be allocated.
pub fn demux<S: ByteStream + ?Sized>(stream: &mut S) -> Result<Mp4Track, OpenError> {
    let file_len = stream.byte_len()?;
    let mut top = Children::range(0, file_len);
    let moov = loop {
        match top.next(stream)? {
            Some(h) if &h.kind == b"moov" => break h,
            Some(h) => tracing::trace!(kind = h.kind_str(), size = h.size, "mp4: skip top-level box"),
            None => return Err(InitError::InvalidHeader("mp4: no moov box").into()),
        }
    };

    let mut walker = Walker::default();
    walker.walk(stream, &moov, 1)?;
    let chosen = walker
        .chosen
        .ok_or(InitError::Unsupported("mp4: no audio track with AAC or ALAC"))?;

    let table = SampleTable::build(&chosen.sizes, &chosen.runs, &chosen.chunk_offsets)?;
    if table.truncated() {
        tracing::warn!(
            located = table.len(),
            declared = table.declared(),
            "mp4: sample table malformed, truncating to located samples"
        );
    }
    if table.is_empty() {
        return Err(InitError::InvalidHeader("mp4: empty sample table").into());
    }
    let codec = chosen
        .codec
        .ok_or(InitError::Unsupported("mp4: no supported sample entry"))?;

    tracing::debug!(
        samples = table.len(),
        rate = chosen.sample_rate,
        channels = chosen.channels,
        "mp4: audio track demuxed"
    );
    Ok(Mp4Track {
        codec,
        sample_rate: chosen.sample_rate,
        channels: chosen.channels,
        bits_per_sample: chosen.bits_per_sample,
        timescale: chosen.timescale,
        duration: chosen.duration,
        table,
    })
}

#[derive(Default)]
struct Walker {
    current: TrackScratch,
    chosen: Option<TrackScratch>,
}

impl Walker {
    fn walk<S: ByteStream + ?Sized>(
        &mut self,
        s: &mut S,
        parent: &BoxHeader,
        depth: usize,
    ) -> Result<(), OpenError> {
        if depth > MP4_MAX_DEPTH {
            tracing::warn!(kind = parent.kind_str(), "mp4: nesting too deep, skipping");
            return Ok(());
        }
        let mut children = Children::of(parent, 0);
        while let Some(h) = children.next(s)? {
            tracing::trace!(kind = h.kind_str(), size = h.size, depth, "mp4: box");
            match &h.kind {
                b"trak" if self.chosen.is_some() => {
                    tracing::debug!("mp4: audio track already chosen, skipping trak");
                }
                b"trak" => {
                    self.current = TrackScratch::default();
                    self.walk(s, &h, depth.saturating_add(1))?;
                    let track = std::mem::take(&mut self.current);
                    if &track.handler == b"soun" && track.codec.is_some() {
                        self.chosen = Some(track);
                    } else {
                        tracing::debug!(
                            handler = std::str::from_utf8(&track.handler).unwrap_or("????"),
                            "mp4: ignoring non-audio track"
                        );
                    }
                }
                b"mdia" | b"minf" | b"stbl" => self.walk(s, &h, depth.saturating_add(1))?,
                b"mdhd" => self.mdhd(s, &h)?,
                b"hdlr" => self.hdlr(s, &h)?,
                b"stsd" => self.stsd(s, &h)?,
                b"stsz" => self.stsz(s, &h)?,
                b"stsc" => self.stsc(s, &h)?,
                b"stco" => self.chunk_offsets(s, &h, false)?,
                b"co64" => self.chunk_offsets(s, &h, true)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn mdhd<S: ByteStream + ?Sized>(&mut self, s: &mut S, h: &BoxHeader) -> Result<(), OpenError> {
        s.seek(SeekFrom::Start(h.body_start()))?;
        let (version, _) = read_version_flags(s)?;
        if version == 1 {
            s.seek(SeekFrom::Current(16))?;
            self.current.timescale = s.read_u32::<BigEndian>()?;
            self.current.duration = s.read_u64::<BigEndian>()?;
        } else {
            s.seek(SeekFrom::Current(8))?;
            self.current.timescale = s.read_u32::<BigEndian>()?;
            self.current.duration = u64::from(s.read_u32::<BigEndian>()?);
        }
        Ok(())
    }

    fn hdlr<S: ByteStream + ?Sized>(&mut self, s: &mut S, h: &BoxHeader) -> Result<(), OpenError> {
        s.seek(SeekFrom::Start(h.body_start().saturating_add(8)))?;
        s.read_exact(&mut self.current.handler)?;
        Ok(())
    }

    fn stsd<S: ByteStream + ?Sized>(&mut self, s: &mut S, h: &BoxHeader) -> Result<(), OpenError> {
        // version/flags + entry_count
        let mut entries = Children::of(h, 8);
        while let Some(entry) = entries.next(s)? {
            match &entry.kind {
                b"mp4a" | b"alac" => {
                    self.sound_entry(s, &entry)?;
                    if self.current.codec.is_some() {
                        return Ok(());
                    }
                }
                _ => tracing::debug!(kind = entry.kind_str(), "mp4: unsupported sample entry"),
            }
        }
        Ok(())
    }

    /// Audio sample entry: SampleEntry header, SoundDescription, child boxes.
    fn sound_entry<S: ByteStream + ?Sized>(
        &mut self,
        s: &mut S,
        entry: &BoxHeader,
    ) -> Result<(), OpenError> {
        // reserved(6) + data_reference_index(2)
        s.seek(SeekFrom::Start(entry.body_start().saturating_add(8)))?;
        let version = s.read_u16::<BigEndian>()?;
        s.seek(SeekFrom::Current(6))?; // revision + vendor
        let channels = s.read_u16::<BigEndian>()?;
        let sample_size = s.read_u16::<BigEndian>()?;
        s.seek(SeekFrom::Current(4))?; // compression id + packet size
        let rate_fixed = s.read_u32::<BigEndian>()?;

        let mut sample_rate = rate_fixed.checked_shr(16).unwrap_or(0);
        let mut channels = u8::try_from(channels).unwrap_or(u8::MAX);
        let extra = match version {
            1 => 16,
            2 => {
                // sizeOfStructOnly, audioSampleRate (f64), numAudioChannels
                s.seek(SeekFrom::Current(4))?;
                let rate = f64::from_bits(s.read_u64::<BigEndian>()?);
                if rate.is_finite() && rate > 0.0 && rate < f64::from(u32::MAX) {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // range-checked
                    {
                        sample_rate = rate as u32;
                    }
                }
                channels = u8::try_from(s.read_u32::<BigEndian>()?).unwrap_or(u8::MAX);
                36
            }
            _ => 0,
        };
        let children_start = SOUND_ENTRY_LEN.saturating_add(extra);

        self.current.sample_rate = sample_rate;
        self.current.channels = channels;
        self.current.bits_per_sample = u8::try_from(sample_size).unwrap_or(16);

        let mut kids = Children::of(entry, children_start);
        while let Some(child) = kids.next(s)? {
            match (&entry.kind, &child.kind) {
                (b"mp4a", b"esds") => self.esds(s, &child)?,
                (b"mp4a", b"wave") => {
                    let mut inner = Children::of(&child, 0);
                    while let Some(w) = inner.next(s)? {
                        if &w.kind == b"esds" {
                            self.esds(s, &w)?;
                        }
                    }
                }
                (b"alac", b"alac") => self.alac_cookie(s, &child)?,
                _ => {}
            }
            if self.current.codec.is_some() {
                break;
            }
        }
        Ok(())
    }

    fn esds<S: ByteStream + ?Sized>(&mut self, s: &mut S, h: &BoxHeader) -> Result<(), OpenError> {
        let len = h.body_len().min(ESDS_MAX);
        if len < 4 {
            return Ok(());
        }
        s.seek(SeekFrom::Start(h.body_start().saturating_add(4)))?;
        let mut body = vec![0u8; usize::try_from(len.saturating_sub(4)).unwrap_or(0)];
        s.read_exact(&mut body)?;
        let Some(asc) = audio_specific_config(&body) else {
            tracing::warn!("mp4: esds without a usable AudioSpecificConfig");
            return Ok(());
        };
        if let Some(cfg) = parse_audio_specific_config(&asc) {
            if cfg.sample_rate > 0 {
                self.current.sample_rate = cfg.sample_rate;
            }
            if cfg.channels > 0 {
                self.current.channels = cfg.channels;
            }
        }
        self.current.bits_per_sample = 16;
        self.current.codec = Some(Mp4Codec::Aac { asc });
        Ok(())
    }

    fn alac_cookie<S: ByteStream + ?Sized>(&mut self, s: &mut S, h: &BoxHeader) -> Result<(), OpenError> {
        if h.body_len() < ALAC_COOKIE_LEN as u64 {
            return Err(InitError::InvalidHeader("mp4: alac cookie too short").into());
        }
        s.seek(SeekFrom::Start(h.body_start()))?;
        let mut raw = [0u8; ALAC_COOKIE_LEN];
        s.read_exact(&mut raw)?;
        let cookie = AlacCookie::parse(&raw)
            .ok_or(InitError::InvalidHeader("mp4: alac cookie malformed"))?;
        self.current.sample_rate = cookie.sample_rate;
        self.current.channels = cookie.channels;
        self.current.bits_per_sample = cookie.bit_depth;
        let blob = heapless::Vec::from_slice(&raw)
            .map_err(|_| InitError::InvalidHeader("mp4: alac cookie too long"))?;
        self.current.codec = Some(Mp4Codec::Alac {
            cookie: blob,
            frame_length: cookie.frame_length,
        });
        Ok(())
    }

    fn stsz<S: ByteStream + ?Sized>(&mut self, s: &mut S, h: &BoxHeader) -> Result<(), OpenError> {
        s.seek(SeekFrom::Start(h.body_start().saturating_add(4)))?;
        let size = s.read_u32::<BigEndian>()?;
        let count = s.read_u32::<BigEndian>()?;
        if size != 0 {
            self.current.sizes = SampleSizes::Constant { size, count };
            return Ok(());
        }
        let n = fit_entries(h, 12, 4, count);
        let mut table = Vec::new();
        table.try_reserve_exact(n)?;
        for _ in 0..n {
            table.push(s.read_u32::<BigEndian>()?);
        }
        self.current.sizes = SampleSizes::Table(table);
        Ok(())
    }

    fn stsc<S: ByteStream + ?Sized>(&mut self, s: &mut S, h: &BoxHeader) -> Result<(), OpenError> {
        s.seek(SeekFrom::Start(h.body_start().saturating_add(4)))?;
        let count = s.read_u32::<BigEndian>()?;
        let n = fit_entries(h, 8, 12, count);
        let mut runs = Vec::new();
        runs.try_reserve_exact(n)?;
        for _ in 0..n {
            let first_chunk = s.read_u32::<BigEndian>()?;
            let samples_per_chunk = s.read_u32::<BigEndian>()?;
            let _description = s.read_u32::<BigEndian>()?;
            runs.push(ChunkRun {
                first_chunk,
                samples_per_chunk,
            });
        }
        self.current.runs = runs;
        Ok(())
    }

    fn chunk_offsets<S: ByteStream + ?Sized>(
        &mut self,
        s: &mut S,
        h: &BoxHeader,
        wide: bool,
    ) -> Result<(), OpenError> {
        s.seek(SeekFrom::Start(h.body_start().saturating_add(4)))?;
        let count = s.read_u32::<BigEndian>()?;
        let n = fit_entries(h, 8, if wide { 8 } else { 4 }, count);
        let mut offsets = Vec::new();
        offsets.try_reserve_exact(n)?;
        for _ in 0..n {
            let off = if wide {
                s.read_u64::<BigEndian>()?
            } else {
                u64::from(s.read_u32::<BigEndian>()?)
            };
            offsets.push(off);
        }
        self.current.chunk_offsets = offsets;
        Ok(())
    }
}

/// Clamp a declared entry count to what the box can physically hold.
fn fit_entries(h: &BoxHeader, fixed: u64, entry: u64, declared: u32) -> usize {
    let room = h.body_len().saturating_sub(fixed).checked_div(entry).unwrap_or(0);
    let n = u64::from(declared).min(room);
    if n < u64::from(declared) {
        tracing::warn!(
            kind = h.kind_str(),
            declared,
            fits = n,
            "mp4: table count exceeds box size"
        );
    }
    usize::try_from(n).unwrap_or(0)
}

/// Fields decoded from the `alac` FullBox payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlacCookie {
    /// PCM frames per compressed frame.
    pub frame_length: u32,
    /// Sample bit depth (16, 20, 24 or 32).
    pub bit_depth: u8,
    /// Channel count.
    pub channels: u8,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AlacCookie {
    /// Decode the fixed field layout of a 28-byte cookie.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let cfg = raw.get(4..ALAC_COOKIE_LEN)?;
        let be32 = |at: usize| -> Option<u32> {
            let b = cfg.get(at..at.checked_add(4)?)?;
            Some(u32::from_be_bytes([*b.first()?, *b.get(1)?, *b.get(2)?, *b.get(3)?]))
        };
        let frame_length = be32(0)?;
        let bit_depth = *cfg.get(5)?;
        let channels = *cfg.get(9)?;
        let sample_rate = be32(20)?;
        if frame_length == 0 || bit_depth == 0 || bit_depth > 32 || channels == 0 {
            return None;
        }
        Some(Self {
            frame_length,
            bit_depth,
            channels,
            sample_rate,
        })
    }
}

/// Read a whole sample (compressed frame) at `(offset, size)` into `buf`.
pub(crate) fn read_sample<R: Read + Seek + ?Sized>(
    r: &mut R,
    offset: u64,
    size: u32,
    buf: &mut Vec<u8>,
) -> std::io::Result<()> {
    let len = size as usize;
    buf.clear();
    buf.try_reserve(len)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;
    buf.resize(len, 0);
    r.seek(SeekFrom::Start(offset))?;
    r.read_exact(buf)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_layout() {
        let mut raw = [0u8; ALAC_COOKIE_LEN];
        raw[4..8].copy_from_slice(&4096u32.to_be_bytes());
        raw[9] = 24;
        raw[13] = 2;
        raw[24..28].copy_from_slice(&96_000u32.to_be_bytes());
        let c = AlacCookie::parse(&raw).unwrap();
        assert_eq!(c.frame_length, 4096);
        assert_eq!(c.bit_depth, 24);
        assert_eq!(c.channels, 2);
        assert_eq!(c.sample_rate, 96_000);
    }

    #[test]
    fn test_cookie_rejects_zero_frame_length() {
        let raw = [0u8; ALAC_COOKIE_LEN];
        assert!(AlacCookie::parse(&raw).is_none());
        assert!(AlacCookie::parse(&raw[..20]).is_none());
    }
}
