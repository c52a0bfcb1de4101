//! Read-only statistics snapshot (§6.3). No allocation, no interior
//! mutability — a plain `Copy` value taken from the arena's own running
//! counters.

#[cfg(feature = "counters")]
use crate::bins::{NBINS, NFASTBINS};

/// A point-in-time snapshot of an [`Arena`](crate::arena::Arena)'s
/// resource usage and current tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub bytes_via_heap_extend: usize,
    pub bytes_via_mapping: usize,
    pub heap_extend_high_water: usize,
    pub mapping_high_water: usize,
    pub live_mmap_count: usize,
    pub max_mmap_count: usize,

    pub max_fast: usize,
    pub trim_threshold: usize,
    pub top_pad: usize,
    pub mmap_threshold: usize,
    pub mmap_max: usize,

    /// Free-chunk count per bin index, keyed the same way
    /// [`crate::bins::bin_index`] buckets a request size. A chunk counts
    /// here as soon as it becomes free, whether or not it has actually
    /// been drained out of the unsorted bin into its permanent bin yet.
    #[cfg(feature = "counters")]
    pub bin_histogram: [usize; NBINS],
    /// Parked chunk count per fast-bin index.
    #[cfg(feature = "counters")]
    pub fastbin_histogram: [usize; NFASTBINS],
}
