//! Aligned byte-range partitioning of a single file across N shards.
//!
//! A shard's boundaries are computed so that every boundary (except the very
//! last byte of the file) falls on a multiple of `granule`. This keeps each
//! mover process reading/writing whole blocks instead of split ones, which
//! matters for O_DIRECT I/O. When the requested number of shards would leave
//! partitions smaller than a single granule, the shard count is reduced to
//! `size / granule` instead of failing outright.

/// An aligned partitioning of a `size`-byte file into shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignedPartition {
    size: u64,
    granule: u64,
    parts: u64,
}

impl AlignedPartition {
    /// Build a partitioning for `size` bytes, requesting `requested_parts`
    /// shards aligned to `granule` bytes.
    ///
    /// If `requested_parts * granule > size`, the number of parts is reduced
    /// to `size / granule` (integer division) so that no partition is smaller
    /// than one granule. If `granule` is larger than `size`, or `size` is
    /// zero, the effective part count collapses to a single whole-file
    /// partition (handled as the `parts == 0` case below, matching the
    /// behavior of the original `AlignedPartitionStrategy`).
    pub fn new(requested_parts: u64, granule: u64, size: u64) -> Self {
        let granule = granule.max(1);
        let parts = if requested_parts.saturating_mul(granule) > size {
            size / granule
        } else {
            requested_parts
        };
        Self {
            size,
            granule,
            parts,
        }
    }

    /// Effective number of partitions after alignment adjustment. May be
    /// smaller than what was requested, and may be `0` for very small files
    /// (in which case the whole file is treated as a single partition by
    /// [`Self::part_begin`]/[`Self::part_end`]).
    pub fn parts(&self) -> u64 {
        self.parts
    }

    /// Starting byte offset (inclusive) of `part`.
    pub fn part_begin(&self, part: u64) -> u64 {
        if self.parts == 0 || part >= self.parts {
            return 0;
        }
        (part * (self.size / self.granule) / self.parts) * self.granule
    }

    /// Ending byte offset (inclusive) of `part`, or `size - 1` for the last
    /// partition so that any rounding slack is absorbed by the tail shard.
    pub fn part_end(&self, part: u64) -> u64 {
        if self.parts == 0 {
            // effectiveShards collapsed to zero (granule > size): shard 0
            // alone carries the whole file so sub-granule files still get
            // transferred; every other requested shard is the empty (0,0)
            // partition per spec.md's "i >= effectiveShards -> (0,0)" rule.
            return if part == 0 { self.size.saturating_sub(1) } else { 0 };
        }
        if part + 1 >= self.parts {
            return self.size.saturating_sub(1);
        }
        self.part_begin(part + 1).saturating_sub(1)
    }

    /// Size in bytes of `part`, i.e. `part_end(part) - part_begin(part) + 1`.
    pub fn part_size(&self, part: u64) -> u64 {
        if self.parts == 0 {
            return if part == 0 { self.size } else { 0 };
        }
        self.part_end(part) + 1 - self.part_begin(part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_partition_covers_whole_file() {
        let p = AlignedPartition::new(1, 4096, 10_000);
        assert_eq!(p.parts(), 1);
        assert_eq!(p.part_begin(0), 0);
        assert_eq!(p.part_end(0), 9_999);
        assert_eq!(p.part_size(0), 10_000);
    }

    #[test]
    fn even_split_aligned_to_granule() {
        let p = AlignedPartition::new(4, 512, 2048);
        assert_eq!(p.parts(), 4);
        for part in 0..4 {
            assert_eq!(p.part_begin(part) % 512, 0, "part {part} misaligned");
        }
        assert_eq!(p.part_begin(0), 0);
        assert_eq!(p.part_end(3), 2047);
        let total: u64 = (0..4).map(|i| p.part_size(i)).sum();
        assert_eq!(total, 2048);
    }

    #[test]
    fn requested_parts_too_fine_for_granule_shrinks() {
        // 10 requested parts of granule 4096 over a 10000-byte file would
        // need 40960 bytes; shrink to size/granule == 2 parts instead.
        let p = AlignedPartition::new(10, 4096, 10_000);
        assert_eq!(p.parts(), 2);
    }

    #[test]
    fn granule_larger_than_file_collapses_to_zero_parts() {
        let p = AlignedPartition::new(4, 1 << 20, 100);
        assert_eq!(p.parts(), 0);
        assert_eq!(p.part_begin(0), 0);
        assert_eq!(p.part_end(0), 99);
        assert_eq!(p.part_size(0), 100);
        // every other requested shard is the empty (0,0) partition
        for part in 1..4 {
            assert_eq!(p.part_size(part), 0, "part {part} should be empty");
        }
    }

    #[test]
    fn zero_size_file() {
        let p = AlignedPartition::new(4, 4096, 0);
        assert_eq!(p.part_size(0), 0);
    }

    #[test]
    fn partitions_are_contiguous_and_non_overlapping() {
        let p = AlignedPartition::new(7, 1024, 123_456);
        let mut prev_end: Option<u64> = None;
        for part in 0..p.parts() {
            let begin = p.part_begin(part);
            let end = p.part_end(part);
            assert!(begin <= end);
            if let Some(prev) = prev_end {
                assert_eq!(begin, prev + 1, "gap/overlap before part {part}");
            }
            prev_end = Some(end);
        }
        assert_eq!(prev_end, Some(123_455));
    }
}
