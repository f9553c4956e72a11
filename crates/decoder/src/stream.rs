//! Byte-stream abstraction consumed by the engines.
//!
//! Any `Read + Seek` source qualifies. File-backed streams are wrapped in a
//! large read-ahead buffer so that the small header reads the engines issue do
//! not each turn into a card transaction.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Byte stream owned by a session.
///
/// Engines need forward reads plus absolute seek; `stream_position` doubles
/// as `tell`.
pub trait ByteStream: Read + Seek + Send + Sync {
    /// Total length in bytes. Leaves the position unchanged.
    fn byte_len(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        if pos != end {
            self.seek(SeekFrom::Start(pos))?;
        }
        Ok(end)
    }
}

impl<T: Read + Seek + Send + Sync> ByteStream for T {}

/// Open `path` read-only behind a `read_ahead`-byte buffer.
pub fn open_file(path: &Path, read_ahead: usize) -> io::Result<Box<dyn ByteStream>> {
    let file = File::open(path)?;
    Ok(Box::new(BufReader::with_capacity(read_ahead, file)))
}

/// Read until `buf` is full or the stream ends. Returns bytes read.
pub(crate) fn read_full<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0usize;
    while let Some(rest) = buf.get_mut(filled..).filter(|rest| !rest.is_empty()) {
        match r.read(rest) {
            Ok(0) => break,
            Ok(n) => filled = filled.saturating_add(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Size of an ID3v2 tag (header, body and optional footer) starting at `header`.
///
/// Returns `None` when `header` does not start an ID3v2 tag.
#[allow(clippy::indexing_slicing)] // Safety: h is exactly 10 bytes
#[allow(clippy::arithmetic_side_effects)] // Safety: four 7-bit digits keep size below 2^28
pub(crate) fn id3v2_len(header: &[u8]) -> Option<u64> {
    let h = header.get(..10)?;
    if &h[..3] != b"ID3" || h[3] == 0xFF || h[4] == 0xFF {
        return None;
    }
    let mut size: u64 = 0;
    for &b in &h[6..10] {
        if b & 0x80 != 0 {
            return None;
        }
        size = (size << 7) | u64::from(b);
    }
    let footer = if h[5] & 0x10 != 0 { 10 } else { 0 };
    Some(10 + size + footer)
}

/// Skip any run of ID3v2 tags at the current position.
///
/// Returns the absolute offset of the first byte after the tags, with the
/// stream positioned there.
pub(crate) fn skip_id3v2<S: ByteStream + ?Sized>(stream: &mut S) -> io::Result<u64> {
    let mut pos = stream.stream_position()?;
    loop {
        let mut header = [0u8; 10];
        let n = read_full(stream, &mut header)?;
        match id3v2_len(header.get(..n).unwrap_or_default()) {
            Some(len) => pos = pos.saturating_add(len),
            None => break,
        }
        stream.seek(SeekFrom::Start(pos))?;
    }
    stream.seek(SeekFrom::Start(pos))?;
    Ok(pos)
}

/// Adapter handing a session's stream to a symphonia container reader.
#[cfg(feature = "flac")]
pub(crate) struct MediaSourceAdapter {
    inner: Box<dyn ByteStream>,
    len: Option<u64>,
}

#[cfg(feature = "flac")]
impl MediaSourceAdapter {
    pub(crate) fn new(mut inner: Box<dyn ByteStream>) -> Self {
        let len = inner.byte_len().ok();
        Self { inner, len }
    }
}

#[cfg(feature = "flac")]
impl Read for MediaSourceAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(feature = "flac")]
impl Seek for MediaSourceAdapter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

#[cfg(feature = "flac")]
impl symphonia::core::io::MediaSource for MediaSourceAdapter {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        self.len
    }
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

    #[test]
    fn byte_len_keeps_position() {
        let mut c = Cursor::new(vec![0u8; 100]);
        c.seek(SeekFrom::Start(40)).unwrap();
        assert_eq!(c.byte_len().unwrap(), 100);
        assert_eq!(c.stream_position().unwrap(), 40);
    }

    #[test]
    fn read_full_stops_at_eof() {
        let mut c = Cursor::new(vec![1u8, 2, 3]);
        let mut buf = [0u8; 8];
        assert_eq!(read_full(&mut c, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[test]
    fn id3v2_len_decodes_syncsafe_size() {
        // size 0x0201 syncsafe = 2*128 + 1 = 257
        let hdr = [b'I', b'D', b'3', 4, 0, 0, 0, 0, 2, 1];
        assert_eq!(id3v2_len(&hdr), Some(10 + 257));
        let with_footer = [b'I', b'D', b'3', 4, 0, 0x10, 0, 0, 0, 5];
        assert_eq!(id3v2_len(&with_footer), Some(10 + 5 + 10));
    }

    #[test]
    fn id3v2_len_rejects_non_tags() {
        assert_eq!(id3v2_len(b"fLaC\0\0\0\0\0\0"), None);
        assert_eq!(id3v2_len(&[b'I', b'D', b'3', 4, 0, 0, 0x80, 0, 0, 0]), None);
        assert_eq!(id3v2_len(b"ID3"), None);
    }

    #[test]
    fn skip_id3v2_positions_after_tag() {
        let mut data = vec![b'I', b'D', b'3', 3, 0, 0, 0, 0, 0, 4];
        data.extend_from_slice(&[0xAA; 4]);
        data.extend_from_slice(b"fLaC");
        let mut c = Cursor::new(data);
        assert_eq!(skip_id3v2(&mut c).unwrap(), 14);
        let mut magic = [0u8; 4];
        c.read_exact(&mut magic).unwrap();
        assert_eq!(&magic, b"fLaC");
    }

    #[test]
    fn skip_id3v2_without_tag_is_noop() {
        let mut c = Cursor::new(b"RIFF....WAVE".to_vec());
        assert_eq!(skip_id3v2(&mut c).unwrap(), 0);
        assert_eq!(c.stream_position().unwrap(), 0);
    }
}
