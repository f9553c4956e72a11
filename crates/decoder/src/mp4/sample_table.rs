//! Flat per-sample `(offset, size)` table rebuilt from `stsz`/`stsc`/`stco`.

use std::collections::TryReserveError;

/// One `stsc` run: from `first_chunk` (1-based) on, each chunk holds
/// `samples_per_chunk` samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRun {
    /// First chunk (1-based) this run applies to.
    pub first_chunk: u32,
    /// Samples in every chunk of the run.
    pub samples_per_chunk: u32,
}

/// Per-sample sizes as declared by `stsz`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSizes {
    /// Every sample has the same size.
    Constant {
        /// Size of each sample in bytes.
        size: u32,
        /// Declared sample count.
        count: u32,
    },
    /// Explicit size per sample.
    Table(Vec<u32>),
}

impl SampleSizes {
    /// Declared sample count.
    pub fn count(&self) -> u32 {
        match self {
            Self::Constant { count, .. } => *count,
            Self::Table(t) => u32::try_from(t.len()).unwrap_or(u32::MAX),
        }
    }

    fn get(&self, index: usize) -> Option<u32> {
        match self {
            Self::Constant { size, count } => (index < *count as usize).then_some(*size),
            Self::Table(t) => t.get(index).copied(),
        }
    }
}

impl Default for SampleSizes {
    fn default() -> Self {
        Self::Table(Vec::new())
    }
}

/// Location of every compressed frame of the chosen track.
///
/// Offsets are non-decreasing; within a chunk each sample starts where the
/// previous one ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleTable {
    offsets: Vec<u64>,
    sizes: Vec<u32>,
    declared: u32,
}

impl SampleTable {
    /// Walk the chunk offsets against the `stsc` runs and the sample sizes.
    ///
    /// Stops early (and marks the table truncated) when the runs or the size
    /// table cannot locate every declared sample.
    ///
    /// # Errors
    ///
    /// Fails only when the output vectors cannot be allocated.
    pub fn build(
        sizes: &SampleSizes,
        runs: &[ChunkRun],
        chunk_offsets: &[u64],
    ) -> Result<Self, TryReserveError> {
        let declared = sizes.count();
        let want = declared as usize;
        let mut offsets = Vec::new();
        offsets.try_reserve_exact(want)?;
        let mut out_sizes = Vec::new();
        out_sizes.try_reserve_exact(want)?;

        let mut run_idx = 0usize;
        'chunks: for (chunk_idx, &chunk_offset) in chunk_offsets.iter().enumerate() {
            let chunk_no = u32::try_from(chunk_idx).unwrap_or(u32::MAX).saturating_add(1);
            while let Some(next) = runs.get(run_idx.saturating_add(1)) {
                if chunk_no >= next.first_chunk {
                    run_idx = run_idx.saturating_add(1);
                } else {
                    break;
                }
            }
            let Some(run) = runs.get(run_idx) else {
                break;
            };
            if chunk_no < run.first_chunk {
                continue;
            }
            let mut pos = chunk_offset;
            for _ in 0..run.samples_per_chunk {
                if offsets.len() >= want {
                    break 'chunks;
                }
                let Some(size) = sizes.get(offsets.len()) else {
                    break 'chunks;
                };
                offsets.push(pos);
                out_sizes.push(size);
                pos = pos.saturating_add(u64::from(size));
            }
        }

        Ok(Self {
            offsets,
            sizes: out_sizes,
            declared,
        })
    }

    /// Number of located samples. Authoritative even when truncated.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// `true` when no sample could be located.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Sample count the container declared.
    pub fn declared(&self) -> u32 {
        self.declared
    }

    /// `true` when fewer samples were located than declared.
    pub fn truncated(&self) -> bool {
        self.offsets.len() < self.declared as usize
    }

    /// `(offset, size)` of sample `index`.
    pub fn get(&self, index: usize) -> Option<(u64, u32)> {
        Some((*self.offsets.get(index)?, *self.sizes.get(index)?))
    }

    /// Byte offsets, one per sample.
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// Byte sizes, one per sample.
    pub fn sizes(&self) -> &[u32] {
        &self.sizes
    }

    /// Largest sample, for sizing the read buffer.
    pub fn max_size(&self) -> u32 {
        self.sizes.iter().copied().max().unwrap_or(0)
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
    use proptest::prelude::*;

    fn run(first_chunk: u32, samples_per_chunk: u32) -> ChunkRun {
        ChunkRun {
            first_chunk,
            samples_per_chunk,
        }
    }

    #[test]
    fn test_runs_and_chunks() {
        // Chunks 1-2 hold 2 samples, chunk 3 on holds 1.
        let sizes = SampleSizes::Table(vec![10, 20, 30, 40, 50]);
        let runs = [run(1, 2), run(3, 1)];
        let chunks = [1000, 2000, 3000];
        let t = SampleTable::build(&sizes, &runs, &chunks).unwrap();
        assert_eq!(t.offsets(), &[1000, 1010, 2000, 2030, 3000]);
        assert_eq!(t.sizes(), &[10, 20, 30, 40, 50]);
        assert!(!t.truncated());
        assert_eq!(t.max_size(), 50);
    }

    #[test]
    fn test_constant_size() {
        let sizes = SampleSizes::Constant { size: 4, count: 4 };
        let t = SampleTable::build(&sizes, &[run(1, 4)], &[64]).unwrap();
        assert_eq!(t.offsets(), &[64, 68, 72, 76]);
    }

    #[test]
    fn test_short_chunk_table_truncates() {
        let sizes = SampleSizes::Table(vec![1; 10]);
        let t = SampleTable::build(&sizes, &[run(1, 3)], &[0, 100]).unwrap();
        assert_eq!(t.len(), 6);
        assert_eq!(t.declared(), 10);
        assert!(t.truncated());
    }

    #[test]
    fn test_extra_chunk_capacity_stops_at_declared() {
        let sizes = SampleSizes::Table(vec![5; 3]);
        let t = SampleTable::build(&sizes, &[run(1, 2)], &[0, 100, 200]).unwrap();
        assert_eq!(t.offsets(), &[0, 5, 100]);
        assert!(!t.truncated());
    }

    #[test]
    fn test_empty_stsc_locates_nothing() {
        let sizes = SampleSizes::Table(vec![5; 3]);
        let t = SampleTable::build(&sizes, &[], &[0]).unwrap();
        assert!(t.is_empty());
        assert!(t.truncated());
        assert_eq!(t.get(0), None);
    }

    proptest! {
        #[test]
        fn prop_offsets_monotonic_and_partitioned(
            sizes in proptest::collection::vec(1u32..4096, 1..200),
            per_chunk in proptest::collection::vec(1u32..16, 1..8),
            gap in 0u64..1024,
        ) {
            let runs: Vec<ChunkRun> = per_chunk
                .iter()
                .enumerate()
                .map(|(i, &n)| run(i as u32 * 2 + 1, n))
                .collect();
            // Lay chunks out back to back with a gap, like an interleaved mdat.
            let mut chunks = Vec::new();
            let mut pos = 4096u64;
            let mut sample = 0usize;
            let mut chunk_no = 1u32;
            let mut ri = 0usize;
            while sample < sizes.len() {
                if ri + 1 < runs.len() && chunk_no >= runs[ri + 1].first_chunk {
                    ri += 1;
                }
                chunks.push(pos);
                for _ in 0..runs[ri].samples_per_chunk {
                    if sample < sizes.len() {
                        pos += u64::from(sizes[sample]);
                        sample += 1;
                    }
                }
                pos += gap;
                chunk_no += 1;
            }

            let t = SampleTable::build(&SampleSizes::Table(sizes.clone()), &runs, &chunks).unwrap();
            prop_assert_eq!(t.len(), sizes.len());
            for i in 1..t.len() {
                prop_assert!(t.offsets()[i - 1] + u64::from(t.sizes()[i - 1]) <= t.offsets()[i]);
            }
        }
    }
}
