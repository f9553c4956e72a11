//! ISO-BMFF box headers.

use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};

/// Four-character box type.
pub type FourCc = [u8; 4];

/// A box header located in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    /// Box type.
    pub kind: FourCc,
    /// Absolute offset of the first header byte.
    pub start: u64,
    /// Header length: 8, or 16 with a 64-bit `largesize`.
    pub header_len: u64,
    /// Total box length including the header.
    pub size: u64,
}

impl BoxHeader {
    /// Absolute offset of the first payload byte.
    pub fn body_start(&self) -> u64 {
        self.start.saturating_add(self.header_len)
    }

    /// Absolute offset one past the last payload byte.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }

    /// Payload length.
    pub fn body_len(&self) -> u64 {
        self.size.saturating_sub(self.header_len)
    }

    /// Human-readable type for logs.
    pub fn kind_str(&self) -> &str {
        std::str::from_utf8(&self.kind).unwrap_or("????")
    }
}

/// Read the box header at `pos`, bounded by the parent's `end`.
///
/// Size 1 selects the 64-bit `largesize`; size 0 extends the box to `end`.
/// Returns `None` when fewer than 8 bytes remain or the declared size is
/// impossible (smaller than its header, or past `end`), which ends the
/// enclosing walk.
pub fn read_box_header<R: Read + Seek + ?Sized>(
    r: &mut R,
    pos: u64,
    end: u64,
) -> io::Result<Option<BoxHeader>> {
    if end.saturating_sub(pos) < 8 {
        return Ok(None);
    }
    r.seek(SeekFrom::Start(pos))?;
    let size32 = r.read_u32::<BigEndian>()?;
    let mut kind = [0u8; 4];
    r.read_exact(&mut kind)?;

    let (size, header_len) = match size32 {
        0 => (end.saturating_sub(pos), 8),
        1 => {
            if end.saturating_sub(pos) < 16 {
                return Ok(None);
            }
            (r.read_u64::<BigEndian>()?, 16)
        }
        n => (u64::from(n), 8),
    };
    if size < header_len || size > end.saturating_sub(pos) {
        return Ok(None);
    }
    Ok(Some(BoxHeader {
        kind,
        start: pos,
        header_len,
        size,
    }))
}

/// Iterate the direct children of the byte range `[start, end)`.
pub struct Children {
    pos: u64,
    end: u64,
}

impl Children {
    /// Children of `parent`'s payload, starting `skip` bytes into it.
    pub fn of(parent: &BoxHeader, skip: u64) -> Self {
        Self::range(parent.body_start().saturating_add(skip), parent.end())
    }

    /// Children of an explicit range.
    pub fn range(start: u64, end: u64) -> Self {
        Self { pos: start, end }
    }

    /// Next child header, or `None` at the end of the range.
    pub fn next<R: Read + Seek + ?Sized>(&mut self, r: &mut R) -> io::Result<Option<BoxHeader>> {
        let hdr = read_box_header(r, self.pos, self.end)?;
        if let Some(h) = &hdr {
            self.pos = h.end();
        }
        Ok(hdr)
    }
}

/// Read a FullBox version/flags word at the current position.
pub fn read_version_flags<R: Read + ?Sized>(r: &mut R) -> io::Result<(u8, u32)> {
    let word = r.read_u32::<BigEndian>()?;
    let [version, ..] = word.to_be_bytes();
    Ok((version, word & 0x00FF_FFFF))
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

    fn boxed(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut v = ((body.len() + 8) as u32).to_be_bytes().to_vec();
        v.extend_from_slice(kind);
        v.extend_from_slice(body);
        v
    }

    #[test]
    fn test_compact_header() {
        let data = boxed(b"free", &[0; 4]);
        let mut c = Cursor::new(data);
        let h = read_box_header(&mut c, 0, 12).unwrap().unwrap();
        assert_eq!(&h.kind, b"free");
        assert_eq!(h.size, 12);
        assert_eq!(h.body_start(), 8);
        assert_eq!(h.body_len(), 4);
    }

    #[test]
    fn test_largesize_header() {
        let mut data = 1u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&20u64.to_be_bytes());
        data.extend_from_slice(&[0; 4]);
        let mut c = Cursor::new(data);
        let h = read_box_header(&mut c, 0, 20).unwrap().unwrap();
        assert_eq!(h.header_len, 16);
        assert_eq!(h.size, 20);
        assert_eq!(h.body_len(), 4);
    }

    #[test]
    fn test_size_zero_runs_to_end() {
        let mut data = 0u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[0; 32]);
        let mut c = Cursor::new(data);
        let h = read_box_header(&mut c, 0, 40).unwrap().unwrap();
        assert_eq!(h.size, 40);
    }

    #[test]
    fn test_impossible_sizes_end_walk() {
        let mut c = Cursor::new(boxed(b"free", &[0; 4]));
        // Declared 12 bytes but parent ends at 10.
        assert!(read_box_header(&mut c, 0, 10).unwrap().is_none());
        let mut tiny = 4u32.to_be_bytes().to_vec();
        tiny.extend_from_slice(b"free");
        let mut c = Cursor::new(tiny);
        assert!(read_box_header(&mut c, 0, 8).unwrap().is_none());
    }

    #[test]
    fn test_children_iterates_siblings() {
        let mut data = boxed(b"aaaa", &[1, 2]);
        data.extend(boxed(b"bbbb", &[]));
        let end = data.len() as u64;
        let mut c = Cursor::new(data);
        let mut kids = Children::range(0, end);
        assert_eq!(&kids.next(&mut c).unwrap().unwrap().kind, b"aaaa");
        assert_eq!(&kids.next(&mut c).unwrap().unwrap().kind, b"bbbb");
        assert!(kids.next(&mut c).unwrap().is_none());
    }
}
