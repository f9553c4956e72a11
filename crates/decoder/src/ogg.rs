//! Minimal Ogg page reader for single-stream Opus files.
//!
//! Reads pages, reassembles packets across lacing values (255 = the packet
//! continues) and follows one logical stream: the first serial number seen
//! wins and pages of other serials are skipped. Page CRCs are not verified;
//! a corrupt packet surfaces as a codec error instead.

use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{ByteOrder, LittleEndian};

use crate::config::{OGG_RESYNC_BYTES, OGG_TAIL_SCAN_BYTES};
use crate::stream::{read_full, ByteStream};

/// Capture pattern opening every page.
pub const CAPTURE: &[u8; 4] = b"OggS";

/// Fixed page header length, before the segment table.
pub const PAGE_HEADER_LEN: usize = 27;

/// Header-type flag: first packet on this page continues from the previous page.
pub const FLAG_CONTINUED: u8 = 0x01;

/// Parsed fixed page header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// Header-type flags.
    pub header_type: u8,
    /// Granule position; -1 when no packet ends on this page.
    pub granule: i64,
    /// Logical stream serial number.
    pub serial: u32,
    /// Page sequence number.
    pub sequence: u32,
    /// Number of lacing values that follow.
    pub segments: u8,
}

impl PageHeader {
    /// Parse the 27 fixed header bytes. `None` unless they start with `OggS`
    /// and version 0.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let raw = raw.get(..PAGE_HEADER_LEN)?;
        if raw.get(..4)? != CAPTURE || *raw.get(4)? != 0 {
            return None;
        }
        Some(Self {
            header_type: *raw.get(5)?,
            granule: LittleEndian::read_i64(raw.get(6..14)?),
            serial: LittleEndian::read_u32(raw.get(14..18)?),
            sequence: LittleEndian::read_u32(raw.get(18..22)?),
            segments: *raw.get(26)?,
        })
    }

    /// `true` when the first packet continues one from the previous page.
    pub fn is_continued(&self) -> bool {
        self.header_type & FLAG_CONTINUED != 0
    }
}

/// Packet reassembler over one logical stream.
#[derive(Debug, Default)]
pub struct OggReader {
    serial: Option<u32>,
    lacing: Vec<u8>,
    body: Vec<u8>,
    seg: usize,
    body_pos: usize,
    partial: Vec<u8>,
    page_granule: i64,
    resyncs: u32,
}

impl OggReader {
    /// Reader that adopts the first serial it sees.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serial number being followed, once known.
    pub fn serial(&self) -> Option<u32> {
        self.serial
    }

    /// Granule of the most recently loaded page.
    pub fn page_granule(&self) -> i64 {
        self.page_granule
    }

    /// `true` when every segment of the loaded page has been consumed.
    pub fn page_exhausted(&self) -> bool {
        self.seg >= self.lacing.len()
    }

    /// Number of capture-pattern resyncs performed so far.
    pub fn resyncs(&self) -> u32 {
        self.resyncs
    }

    /// Forget the loaded page and any partial packet (after a seek).
    pub fn reset(&mut self) {
        self.lacing.clear();
        self.body.clear();
        self.seg = 0;
        self.body_pos = 0;
        self.partial.clear();
    }

    /// Next complete packet of the followed stream into `out`.
    ///
    /// Returns `Ok(false)` at end of stream. A packet continued from a page
    /// that was never read (first page after a seek) is dropped.
    pub fn next_packet<S: ByteStream + ?Sized>(
        &mut self,
        s: &mut S,
        out: &mut Vec<u8>,
    ) -> io::Result<bool> {
        loop {
            while let Some(&lace) = self.lacing.get(self.seg) {
                let len = usize::from(lace);
                let end = self.body_pos.saturating_add(len).min(self.body.len());
                let piece = self.body.get(self.body_pos..end).unwrap_or(&[]);
                self.partial.extend_from_slice(piece);
                self.body_pos = end;
                self.seg = self.seg.saturating_add(1);
                if lace < 255 {
                    out.clear();
                    std::mem::swap(out, &mut self.partial);
                    return Ok(true);
                }
            }
            if !self.load_page(s)? {
                return Ok(false);
            }
        }
    }

    /// Load the next page of the followed stream. `Ok(false)` at end of stream.
    fn load_page<S: ByteStream + ?Sized>(&mut self, s: &mut S) -> io::Result<bool> {
        loop {
            let mut raw = [0u8; PAGE_HEADER_LEN];
            let n = read_full(s, &mut raw)?;
            if n < PAGE_HEADER_LEN {
                return Ok(false);
            }
            let header = match PageHeader::parse(&raw) {
                Some(h) => h,
                None => {
                    let here = s.stream_position()?.saturating_sub(PAGE_HEADER_LEN as u64);
                    tracing::warn!(offset = here, "ogg: lost page sync, scanning");
                    self.resyncs = self.resyncs.saturating_add(1);
                    match resync(s, here.saturating_add(1))? {
                        Some(_) => continue,
                        None => return Ok(false),
                    }
                }
            };

            let mut lacing = vec![0u8; usize::from(header.segments)];
            if read_full(s, &mut lacing)? < lacing.len() {
                return Ok(false);
            }
            let body_len: usize = lacing.iter().map(|&l| usize::from(l)).sum();

            let serial = *self.serial.get_or_insert(header.serial);
            if header.serial != serial {
                s.seek(SeekFrom::Current(i64::try_from(body_len).unwrap_or(i64::MAX)))?;
                continue;
            }

            self.body.resize(body_len, 0);
            if read_full(s, &mut self.body)? < body_len {
                return Ok(false);
            }
            self.lacing = lacing;
            self.seg = 0;
            self.body_pos = 0;
            self.page_granule = header.granule;

            if header.is_continued() {
                if self.partial.is_empty() {
                    self.skip_continuation();
                }
            } else if !self.partial.is_empty() {
                tracing::warn!("ogg: unterminated packet dropped");
                self.partial.clear();
            }
            return Ok(true);
        }
    }

    /// Drop the leading segments that finish a packet we never saw begin.
    fn skip_continuation(&mut self) {
        while let Some(&lace) = self.lacing.get(self.seg) {
            self.body_pos = self.body_pos.saturating_add(usize::from(lace));
            self.seg = self.seg.saturating_add(1);
            if lace < 255 {
                break;
            }
        }
    }
}

/// Scan forward from `from` for a capture pattern, at most
/// [`OGG_RESYNC_BYTES`]. Leaves the stream at the page start when found.
pub fn resync<S: ByteStream + ?Sized>(s: &mut S, from: u64) -> io::Result<Option<u64>> {
    s.seek(SeekFrom::Start(from))?;
    let mut window = vec![0u8; OGG_RESYNC_BYTES.saturating_add(CAPTURE.len())];
    let n = read_full(s, &mut window)?;
    let window = window.get(..n).unwrap_or(&[]);
    match find_capture(window, 0) {
        Some(i) => {
            let at = from.saturating_add(i as u64);
            s.seek(SeekFrom::Start(at))?;
            Ok(Some(at))
        }
        None => Ok(None),
    }
}

fn find_capture(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(CAPTURE.len())
        .position(|w| w == CAPTURE)
        .map(|p| p.saturating_add(from))
}

/// Highest granule position of stream `serial` within the last
/// [`OGG_TAIL_SCAN_BYTES`] of the stream. Restores the stream position.
pub fn last_granule<S: ByteStream + ?Sized>(s: &mut S, serial: u32) -> io::Result<Option<i64>> {
    let pos = s.stream_position()?;
    let len = s.byte_len()?;
    let start = len.saturating_sub(OGG_TAIL_SCAN_BYTES);
    s.seek(SeekFrom::Start(start))?;
    let mut tail = vec![0u8; usize::try_from(len.saturating_sub(start)).unwrap_or(0)];
    let n = read_full(s, &mut tail)?;
    s.seek(SeekFrom::Start(pos))?;

    let tail = tail.get(..n).unwrap_or(&[]);
    let mut best: Option<i64> = None;
    let mut at = 0;
    while let Some(i) = find_capture(tail, at) {
        if let Some(h) = tail.get(i..).and_then(PageHeader::parse) {
            if h.serial == serial && h.granule >= 0 {
                best = Some(best.map_or(h.granule, |b| b.max(h.granule)));
            }
        }
        at = i.saturating_add(1);
    }
    Ok(best)
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
    use std::io::Cursor;

    fn page(serial: u32, seq: u32, flags: u8, granule: i64, lacing: &[u8], body: &[u8]) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(CAPTURE);
        p.push(0);
        p.push(flags);
        p.extend_from_slice(&granule.to_le_bytes());
        p.extend_from_slice(&serial.to_le_bytes());
        p.extend_from_slice(&seq.to_le_bytes());
        p.extend_from_slice(&[0; 4]);
        p.push(lacing.len() as u8);
        p.extend_from_slice(lacing);
        p.extend_from_slice(body);
        p
    }

    #[test]
    fn test_packets_span_pages() {
        let big = vec![7u8; 300];
        let mut data = page(1, 0, 0, -1, &[255], &big[..255]);
        data.extend(page(1, 1, FLAG_CONTINUED, 960, &[45, 3], &[&big[255..], &[1, 2, 3][..]].concat()));
        let mut c = Cursor::new(data);
        let mut r = OggReader::new();
        let mut pkt = Vec::new();
        assert!(r.next_packet(&mut c, &mut pkt).unwrap());
        assert_eq!(pkt.len(), 300);
        assert!(r.next_packet(&mut c, &mut pkt).unwrap());
        assert_eq!(pkt, vec![1, 2, 3]);
        assert_eq!(r.page_granule(), 960);
        assert!(!r.next_packet(&mut c, &mut pkt).unwrap());
    }

    #[test]
    fn test_other_serials_are_skipped() {
        let mut data = page(5, 0, 0, 0, &[2], &[0xA, 0xB]);
        data.extend(page(9, 0, 0, 0, &[1], &[0xFF]));
        data.extend(page(5, 1, 0, 0, &[1], &[0xC]));
        let mut c = Cursor::new(data);
        let mut r = OggReader::new();
        let mut pkt = Vec::new();
        r.next_packet(&mut c, &mut pkt).unwrap();
        assert_eq!(r.serial(), Some(5));
        r.next_packet(&mut c, &mut pkt).unwrap();
        assert_eq!(pkt, vec![0xC]);
    }

    #[test]
    fn test_continued_fragment_dropped_after_reset() {
        let data = page(1, 3, FLAG_CONTINUED, 100, &[4, 2], &[9, 9, 9, 9, 5, 6]);
        let mut c = Cursor::new(data);
        let mut r = OggReader::new();
        let mut pkt = Vec::new();
        assert!(r.next_packet(&mut c, &mut pkt).unwrap());
        assert_eq!(pkt, vec![5, 6]);
    }

    #[test]
    fn test_garbage_before_page_is_resynced() {
        let mut data = vec![0x55u8; 40];
        data.extend(page(2, 0, 0, 0, &[1], &[0x42]));
        let mut c = Cursor::new(data);
        let mut r = OggReader::new();
        let mut pkt = Vec::new();
        assert!(r.next_packet(&mut c, &mut pkt).unwrap());
        assert_eq!(pkt, vec![0x42]);
        assert_eq!(r.resyncs(), 1);
    }

    #[test]
    fn test_last_granule_picks_max_of_serial() {
        let mut data = page(1, 0, 0, 480, &[1], &[0]);
        data.extend(page(1, 1, 0, 9600, &[1], &[0]));
        data.extend(page(2, 0, 0, 99_999, &[1], &[0]));
        data.extend(page(1, 2, 0, -1, &[255], &[0; 255]));
        let mut c = Cursor::new(data);
        c.seek(SeekFrom::Start(3)).unwrap();
        assert_eq!(last_granule(&mut c, 1).unwrap(), Some(9600));
        assert_eq!(c.stream_position().unwrap(), 3);
        assert_eq!(last_granule(&mut c, 7).unwrap(), None);
    }
}
