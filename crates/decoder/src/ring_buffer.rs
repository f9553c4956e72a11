//! Ring buffer of decoded stereo frames awaiting delivery.
//!
//! Codecs produce whole compressed frames (1152, 1024, 4096 ... PCM frames)
//! while callers ask for arbitrary `max_frames`. Engines push each decoded
//! frame here, expanded to stereo, and drain it into the caller's buffer.
//!
//! Storage is heap-allocated once at open and only regrown while empty, so a
//! steady-state decode never allocates.

use std::collections::TryReserveError;

use crate::error::FrameError;

/// A ring of interleaved stereo `i32` frames.
#[derive(Debug, Default)]
pub struct PcmRing {
    buf: Vec<i32>,
    /// Index of the next sample to read.
    read: usize,
    /// Index of the next sample to write.
    write: usize,
    /// Number of valid samples currently held (always even).
    count: usize,
}

impl PcmRing {
    /// Create an empty ring holding up to `frames` stereo frames.
    ///
    /// # Errors
    ///
    /// Fails when the backing store cannot be allocated.
    pub fn with_capacity(frames: usize) -> Result<Self, TryReserveError> {
        let mut ring = Self::default();
        ring.grow(frames)?;
        Ok(ring)
    }

    fn grow(&mut self, frames: usize) -> Result<(), TryReserveError> {
        let samples = frames.saturating_mul(2);
        if samples > self.buf.len() {
            self.buf.try_reserve_exact(samples.saturating_sub(self.buf.len()))?;
            self.buf.resize(samples, 0);
        }
        Ok(())
    }

    /// Push `src` (interleaved, `channels` per frame) as stereo frames.
    ///
    /// Mono is expanded by duplicating each sample into both slots. The push
    /// is all-or-nothing. An empty ring grows to fit an oversized frame.
    ///
    /// # Errors
    ///
    /// `UnsupportedFormat` for channel counts other than 1 or 2,
    /// `BufferTooSmall` when the frames do not fit.
    #[allow(clippy::indexing_slicing)] // write < buf.len() invariant; room checked above
    #[allow(clippy::arithmetic_side_effects)] // wrap via % len; count += pushed <= len
    pub fn push_interleaved(&mut self, src: &[i32], channels: u8) -> Result<usize, FrameError> {
        let ch = match channels {
            1 | 2 => usize::from(channels),
            _ => return Err(FrameError::UnsupportedFormat),
        };
        let frames = src.len() / ch;
        if frames == 0 {
            return Ok(0);
        }
        if self.count == 0 {
            self.read = 0;
            self.write = 0;
            self.grow(frames).map_err(|_| FrameError::BufferTooSmall)?;
        }
        let len = self.buf.len();
        if frames * 2 > len - self.count {
            return Err(FrameError::BufferTooSmall);
        }
        for frame in src.chunks_exact(ch) {
            let (l, r) = match frame {
                [m] => (*m, *m),
                [l, r] => (*l, *r),
                _ => continue,
            };
            self.buf[self.write] = l;
            self.buf[(self.write + 1) % len] = r;
            self.write = (self.write + 2) % len;
        }
        self.count += frames * 2;
        Ok(frames)
    }

    /// Move up to `max_frames` frames into `out` (interleaved stereo).
    ///
    /// Returns the number of frames written; never more than `out.len() / 2`.
    #[allow(clippy::indexing_slicing)] // read < buf.len() invariant; only reads count samples
    #[allow(clippy::arithmetic_side_effects)] // wrap via % len; count -= n where n <= count
    pub fn pop_frames(&mut self, out: &mut [i32], max_frames: usize) -> usize {
        let n = max_frames.min(out.len() / 2).min(self.count / 2);
        let len = self.buf.len();
        for slot in out.iter_mut().take(n * 2) {
            *slot = self.buf[self.read];
            self.read = (self.read + 1) % len;
        }
        self.count -= n * 2;
        n
    }

    /// Drop up to `frames` frames from the read side. Returns frames dropped.
    #[allow(clippy::arithmetic_side_effects)] // n <= count / 2; wrap via % len
    pub fn discard(&mut self, frames: usize) -> usize {
        let n = frames.min(self.count / 2);
        if n > 0 {
            self.read = (self.read + n * 2) % self.buf.len();
            self.count -= n * 2;
        }
        n
    }

    /// Drop everything buffered (after a seek).
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
        self.count = 0;
    }

    /// Frames currently available to read.
    pub fn available(&self) -> usize {
        self.count / 2
    }

    /// Maximum frames the ring holds without regrowing.
    pub fn capacity(&self) -> usize {
        self.buf.len() / 2
    }

    /// `true` when no frames are buffered.
    pub fn is_empty(&self) -> bool {
        self.count == 0
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

    #[test]
    fn test_ring_write_then_read() {
        let mut rb = PcmRing::with_capacity(32).unwrap();
        let data: Vec<i32> = (0..16).collect();
        assert_eq!(rb.push_interleaved(&data, 2).unwrap(), 8);
        let mut out = [0i32; 16];
        assert_eq!(rb.pop_frames(&mut out, 8), 8);
        assert_eq!(out.to_vec(), data);
        assert!(rb.is_empty());
    }

    #[test]
    fn test_mono_is_duplicated() {
        let mut rb = PcmRing::with_capacity(4).unwrap();
        rb.push_interleaved(&[7, -3], 1).unwrap();
        let mut out = [0i32; 4];
        assert_eq!(rb.pop_frames(&mut out, 4), 2);
        assert_eq!(out, [7, 7, -3, -3]);
    }

    #[test]
    fn test_full_ring_rejects_push() {
        let mut rb = PcmRing::with_capacity(4).unwrap();
        rb.push_interleaved(&[0; 8], 2).unwrap();
        assert_eq!(rb.push_interleaved(&[1, 2], 2), Err(FrameError::BufferTooSmall));
        assert_eq!(rb.available(), 4);
    }

    #[test]
    fn test_empty_ring_grows_for_oversized_frame() {
        let mut rb = PcmRing::with_capacity(2).unwrap();
        assert_eq!(rb.push_interleaved(&[5; 10], 1).unwrap(), 10);
        assert!(rb.capacity() >= 10);
        assert_eq!(rb.available(), 10);
    }

    #[test]
    fn test_ring_wraps_around() {
        let mut rb = PcmRing::with_capacity(4).unwrap();
        rb.push_interleaved(&[1; 8], 2).unwrap();
        let mut half = [0i32; 4];
        assert_eq!(rb.pop_frames(&mut half, 2), 2);
        rb.push_interleaved(&[2; 4], 2).unwrap();
        let mut rest = [0i32; 8];
        assert_eq!(rb.pop_frames(&mut rest, 4), 4);
        assert_eq!(&rest[..4], &[1; 4]);
        assert_eq!(&rest[4..], &[2; 4]);
    }

    #[test]
    fn test_pop_respects_out_len_and_max() {
        let mut rb = PcmRing::with_capacity(8).unwrap();
        rb.push_interleaved(&[9; 16], 2).unwrap();
        let mut out = [0i32; 5];
        assert_eq!(rb.pop_frames(&mut out, 100), 2);
        assert_eq!(out[4], 0);
        let mut big = [0i32; 16];
        assert_eq!(rb.pop_frames(&mut big, 3), 3);
        assert_eq!(rb.available(), 1);
    }

    #[test]
    fn test_discard_and_clear() {
        let mut rb = PcmRing::with_capacity(8).unwrap();
        rb.push_interleaved(&[1, 2, 3, 4, 5, 6], 1).unwrap();
        assert_eq!(rb.discard(4), 4);
        let mut out = [0i32; 4];
        assert_eq!(rb.pop_frames(&mut out, 2), 2);
        assert_eq!(out, [5, 5, 6, 6]);
        rb.push_interleaved(&[1, 1], 2).unwrap();
        rb.clear();
        assert!(rb.is_empty());
        assert_eq!(rb.discard(3), 0);
    }

    #[test]
    fn test_rejects_multichannel() {
        let mut rb = PcmRing::with_capacity(8).unwrap();
        assert_eq!(rb.push_interleaved(&[0; 6], 3), Err(FrameError::UnsupportedFormat));
    }

    proptest::proptest! {
        #[test]
        fn prop_mono_round_trips_as_pairs(src in proptest::collection::vec(proptest::num::i32::ANY, 0..512)) {
            let mut rb = PcmRing::with_capacity(16).unwrap();
            rb.push_interleaved(&src, 1).unwrap();
            let mut out = vec![0i32; src.len() * 2];
            proptest::prop_assert_eq!(rb.pop_frames(&mut out, src.len()), src.len());
            for (pair, s) in out.chunks_exact(2).zip(&src) {
                proptest::prop_assert_eq!(pair, &[*s, *s][..]);
            }
        }
    }
}
