//! The arena: top chunk, bin arrays, bookkeeping counters, and the
//! runtime-tunable thresholds (§3.3). The allocation algorithms living on
//! `Arena` are in `engine.rs`; this module only owns the state and the
//! plumbing around it (construction, tuning, statistics).

use core::fmt::Debug;
use core::ptr;

use crate::bins::{BinMap, BinSentinel, NBINS, NFASTBINS};
use crate::page_source::PageSource;
use crate::stats::Stats;

/// Default threshold below which a freed chunk is parked in a fast bin
/// instead of being coalesced immediately.
pub const DEFAULT_MAX_FAST: usize = 64;
/// Default slack kept past the last in-use chunk when the heap is
/// extended.
pub const DEFAULT_TOP_PAD: usize = 0;
/// Default amount the top chunk must exceed its minimum reserve by
/// before `free` triggers a trim.
pub const DEFAULT_TRIM_THRESHOLD: usize = 128 * 1024;
/// Default request size at or above which allocation goes straight to
/// `map_pages` instead of the heap.
pub const DEFAULT_MMAP_THRESHOLD: usize = 128 * 1024;
/// Default ceiling on the number of live mmap'd chunks.
pub const DEFAULT_MMAP_MAX: usize = 65536;

/// Largest `MAX_FAST` value `tune` will accept (§6.1).
pub const MAX_FAST_CEILING: usize = 80;

/// A tunable parameter accepted by [`Arena::tune`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneParam {
    MaxFast,
    TrimThreshold,
    TopPad,
    MmapThreshold,
    MmapMax,
}

/// The allocation arena: everything needed to serve, free, and reclaim
/// memory out of one flat address range plus any number of standalone
/// mappings.
pub struct Arena<PS: PageSource> {
    pub(crate) page_source: PS,

    /// Base of the contiguous heap segment, or null if none has been
    /// established yet.
    pub(crate) heap_base: *mut u8,
    /// Address just past the current end of the contiguous heap segment.
    /// Tracked independently of `top` because `top` goes null once fully
    /// consumed while the segment itself still ends there.
    pub(crate) heap_end: *mut u8,
    /// Current top chunk (always at the high end of the heap segment).
    /// Null until the first successful heap extension.
    pub(crate) top: *mut u8,
    pub(crate) top_size: usize,

    pub(crate) fastbins: [*mut u8; NFASTBINS],
    pub(crate) bins: [BinSentinel; NBINS],
    pub(crate) bin_map: BinMap,

    pub(crate) max_fast: usize,
    pub(crate) trim_threshold: usize,
    pub(crate) top_pad: usize,
    pub(crate) mmap_threshold: usize,
    pub(crate) mmap_max: usize,

    pub(crate) bytes_via_heap_extend: usize,
    pub(crate) bytes_via_mapping: usize,
    pub(crate) heap_extend_high_water: usize,
    pub(crate) mapping_high_water: usize,
    pub(crate) n_mmaps: usize,
    pub(crate) n_mmaps_max: usize,

    /// If set, a detected corruption (§7) aborts the process with a
    /// diagnostic instead of turning the offending call into a no-op.
    pub(crate) abort_on_corruption: bool,

    /// The `AllocError` behind the most recent no-op/abort decision, if
    /// any. Not part of the public `Option`/`bool` surface (§6) — this is
    /// a diagnostic hook for tests and fuzzing to tell "nothing happened
    /// because corruption was detected" apart from an ordinary failed
    /// allocation.
    pub(crate) last_error: Option<crate::error::AllocError>,

    /// Per-bin count of free chunks logically accounted for under that
    /// bin's index, whether or not they've actually been drained out of
    /// the unsorted bin yet. Only maintained under `counters`.
    #[cfg(feature = "counters")]
    pub(crate) bin_counts: [usize; NBINS],
    /// Per-fastbin count of parked free chunks. Only maintained under
    /// `counters`.
    #[cfg(feature = "counters")]
    pub(crate) fastbin_counts: [usize; NFASTBINS],
}

// SAFETY: `Arena` owns all of its state outright (no shared aliasing);
// sending it to another thread is sound as long as the new thread then
// has exclusive access, same as any other `&mut`-only data structure.
unsafe impl<PS: PageSource + Send> Send for Arena<PS> {}

impl<PS: PageSource> Debug for Arena<PS> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Arena")
            .field("page_source", &self.page_source)
            .field("heap_base", &self.heap_base)
            .field("heap_end", &self.heap_end)
            .field("top", &self.top)
            .field("top_size", &self.top_size)
            .field("max_fast", &self.max_fast)
            .field("trim_threshold", &self.trim_threshold)
            .field("mmap_threshold", &self.mmap_threshold)
            .finish()
    }
}

impl<PS: PageSource> Arena<PS> {
    pub fn new(page_source: PS) -> Self {
        const SENTINEL: BinSentinel = BinSentinel::EMPTY;
        let mut bins = [SENTINEL; NBINS];
        for bin in bins.iter_mut() {
            bin.init();
        }

        Arena {
            page_source,
            heap_base: ptr::null_mut(),
            heap_end: ptr::null_mut(),
            top: ptr::null_mut(),
            top_size: 0,
            fastbins: [ptr::null_mut(); NFASTBINS],
            bins,
            bin_map: BinMap::EMPTY,
            max_fast: DEFAULT_MAX_FAST,
            trim_threshold: DEFAULT_TRIM_THRESHOLD,
            top_pad: DEFAULT_TOP_PAD,
            mmap_threshold: DEFAULT_MMAP_THRESHOLD,
            mmap_max: DEFAULT_MMAP_MAX,
            bytes_via_heap_extend: 0,
            bytes_via_mapping: 0,
            heap_extend_high_water: 0,
            mapping_high_water: 0,
            n_mmaps: 0,
            n_mmaps_max: 0,
            abort_on_corruption: false,
            last_error: None,
            #[cfg(feature = "counters")]
            bin_counts: [0; NBINS],
            #[cfg(feature = "counters")]
            fastbin_counts: [0; NFASTBINS],
        }
    }

    #[cfg(feature = "counters")]
    #[inline]
    pub(crate) fn bin_count_inc(&mut self, idx: usize) {
        self.bin_counts[idx] += 1;
    }
    #[cfg(not(feature = "counters"))]
    #[inline]
    pub(crate) fn bin_count_inc(&mut self, _idx: usize) {}

    #[cfg(feature = "counters")]
    #[inline]
    pub(crate) fn bin_count_dec(&mut self, idx: usize) {
        self.bin_counts[idx] -= 1;
    }
    #[cfg(not(feature = "counters"))]
    #[inline]
    pub(crate) fn bin_count_dec(&mut self, _idx: usize) {}

    #[cfg(feature = "counters")]
    #[inline]
    pub(crate) fn fastbin_count_inc(&mut self, idx: usize) {
        self.fastbin_counts[idx] += 1;
    }
    #[cfg(not(feature = "counters"))]
    #[inline]
    pub(crate) fn fastbin_count_inc(&mut self, _idx: usize) {}

    #[cfg(feature = "counters")]
    #[inline]
    pub(crate) fn fastbin_count_dec(&mut self, idx: usize) {
        self.fastbin_counts[idx] -= 1;
    }
    #[cfg(not(feature = "counters"))]
    #[inline]
    pub(crate) fn fastbin_count_dec(&mut self, _idx: usize) {}

    #[cfg(feature = "counters")]
    #[inline]
    pub(crate) fn fastbin_count_reset(&mut self, idx: usize) {
        self.fastbin_counts[idx] = 0;
    }
    #[cfg(not(feature = "counters"))]
    #[inline]
    pub(crate) fn fastbin_count_reset(&mut self, _idx: usize) {}

    /// The `AllocError` recorded by the most recent operation that had to
    /// report a failure mode richer than `None`/`false`, e.g. a detected
    /// corruption. Cleared by nothing — it's a sticky "last seen" marker
    /// for diagnostics, not a per-call result.
    pub fn last_error(&self) -> Option<crate::error::AllocError> {
        self.last_error
    }

    /// Enable process-abort-on-corruption (§7). Off by default: a
    /// detected corruption instead makes the offending call a silent
    /// no-op.
    pub fn set_abort_on_corruption(&mut self, abort: bool) {
        self.abort_on_corruption = abort;
    }

    pub fn page_source(&self) -> &PS {
        &self.page_source
    }

    pub fn page_source_mut(&mut self) -> &mut PS {
        &mut self.page_source
    }

    /// Accept or reject a tuning change (§6.1). Returns `true` on accept.
    pub fn tune(&mut self, param: TuneParam, value: usize) -> bool {
        match param {
            TuneParam::MaxFast => {
                if value > MAX_FAST_CEILING {
                    return false;
                }
                self.max_fast = value;
            }
            TuneParam::TrimThreshold => self.trim_threshold = value,
            TuneParam::TopPad => self.top_pad = value,
            TuneParam::MmapThreshold => self.mmap_threshold = value,
            TuneParam::MmapMax => self.mmap_max = value,
        }
        true
    }

    pub fn stats(&self) -> Stats {
        Stats {
            bytes_via_heap_extend: self.bytes_via_heap_extend,
            bytes_via_mapping: self.bytes_via_mapping,
            heap_extend_high_water: self.heap_extend_high_water,
            mapping_high_water: self.mapping_high_water,
            live_mmap_count: self.n_mmaps,
            max_mmap_count: self.n_mmaps_max,
            max_fast: self.max_fast,
            trim_threshold: self.trim_threshold,
            top_pad: self.top_pad,
            mmap_threshold: self.mmap_threshold,
            mmap_max: self.mmap_max,
            #[cfg(feature = "counters")]
            bin_histogram: self.bin_counts,
            #[cfg(feature = "counters")]
            fastbin_histogram: self.fastbin_counts,
        }
    }
}
