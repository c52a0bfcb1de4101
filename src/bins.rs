//! Free-list index: fast bins, small bins, large bins, and the unsorted
//! bin, plus the bitmap that lets the engine find the next non-empty bin
//! in O(1).
//!
//! Doubly linked bins are sentinel-headed circular lists (ported from the
//! teacher's `llist.rs`: intrusive, circular, a homogeneous sentinel that
//! is never itself iterated). The sentinel occupies the header-and-link
//! words of a would-be chunk at a fixed slot in [`crate::arena::Arena`],
//! so unlinking never needs a null check. `fd`/`bk` (and, for large bins,
//! `fd_nextsize`/`bk_nextsize`) are read and written as raw pointer-sized
//! words living at a fixed offset past a chunk's header — a lookup
//! shortcut, never an owning reference.

use crate::chunk::{Chunk, WORD};

/// Number of fast bins. Index `i` holds chunks of exactly
/// `MIN_CHUNK_SIZE + i * ALIGN` bytes... in practice only even indices are
/// ever populated, because chunk sizes are always `ALIGN`-aligned while
/// the index formula (per spec) steps by `WORD`. This mirrors a
/// well-known quirk of the real glibc allocator this lineage descends
/// from; it is not a bug.
pub const NFASTBINS: usize = 10;

/// Total addressable bin index space: 0 is unused, 1 is the unsorted bin,
/// 2..64 are small bins, 64..127 are large bins.
pub const NBINS: usize = 128;
pub const UNSORTED_BIN: usize = 1;
pub const SMALLBIN_BASE: usize = 2;
pub const SMALLBIN_LIMIT: usize = 512;
pub const LARGEBIN_BASE: usize = 64;
pub const LARGEBIN_LAST: usize = 126;

/// Six words: two unused (mimicking a chunk's `prev_size`/`size` header so
/// the same offset arithmetic as a real chunk applies), then `fd`, `bk`,
/// `fd_nextsize`, `bk_nextsize`. Small bins and the unsorted bin only ever
/// touch the first four.
#[repr(C)]
#[derive(Debug)]
pub struct BinSentinel {
    _prev_size: usize,
    _size: usize,
    fd: *mut u8,
    bk: *mut u8,
    fd_nextsize: *mut u8,
    bk_nextsize: *mut u8,
}

impl BinSentinel {
    pub const EMPTY: BinSentinel = BinSentinel {
        _prev_size: 0,
        _size: 0,
        fd: core::ptr::null_mut(),
        bk: core::ptr::null_mut(),
        fd_nextsize: core::ptr::null_mut(),
        bk_nextsize: core::ptr::null_mut(),
    };

    #[inline]
    fn as_chunk_ptr(&mut self) -> *mut u8 {
        (self as *mut BinSentinel).cast()
    }

    #[inline]
    pub fn init(&mut self) {
        let p = self.as_chunk_ptr();
        self.fd = p;
        self.bk = p;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        let self_ptr: *const u8 = (self as *const BinSentinel).cast();
        self.fd.is_null() || core::ptr::eq(self.fd as *const u8, self_ptr)
    }
}

#[inline]
unsafe fn fd_slot(chunk: *mut u8) -> *mut *mut u8 {
    Chunk::from_raw(chunk).to_mem().cast()
}

#[inline]
unsafe fn bk_slot(chunk: *mut u8) -> *mut *mut u8 {
    Chunk::from_raw(chunk).to_mem().add(WORD).cast()
}

#[inline]
unsafe fn fd_nextsize_slot(chunk: *mut u8) -> *mut *mut u8 {
    Chunk::from_raw(chunk).to_mem().add(2 * WORD).cast()
}

#[inline]
unsafe fn bk_nextsize_slot(chunk: *mut u8) -> *mut *mut u8 {
    Chunk::from_raw(chunk).to_mem().add(3 * WORD).cast()
}

#[inline]
pub unsafe fn fd(chunk: *mut u8) -> *mut u8 {
    *fd_slot(chunk)
}
#[inline]
pub unsafe fn set_fd(chunk: *mut u8, v: *mut u8) {
    *fd_slot(chunk) = v;
}
#[inline]
pub unsafe fn bk(chunk: *mut u8) -> *mut u8 {
    *bk_slot(chunk)
}
#[inline]
pub unsafe fn set_bk(chunk: *mut u8, v: *mut u8) {
    *bk_slot(chunk) = v;
}
#[inline]
pub unsafe fn fd_nextsize(chunk: *mut u8) -> *mut u8 {
    *fd_nextsize_slot(chunk)
}
#[inline]
pub unsafe fn set_fd_nextsize(chunk: *mut u8, v: *mut u8) {
    *fd_nextsize_slot(chunk) = v;
}
#[inline]
pub unsafe fn bk_nextsize(chunk: *mut u8) -> *mut u8 {
    *bk_nextsize_slot(chunk)
}
#[inline]
pub unsafe fn set_bk_nextsize(chunk: *mut u8, v: *mut u8) {
    *bk_nextsize_slot(chunk) = v;
}

/// Insert `node` as the new head (most-recently-freed end) of the
/// `fd`/`bk` cycle rooted at `head`.
pub unsafe fn dll_push_front(head: *mut u8, node: *mut u8) {
    let old_first = fd(head);
    set_fd(head, node);
    set_bk(node, head);
    set_fd(node, old_first);
    set_bk(old_first, node);
}

/// Unlink `node` from whatever `fd`/`bk` cycle it is currently a member
/// of. `node` itself is left with dangling links; the caller must not
/// read them afterwards.
pub unsafe fn dll_unlink(node: *mut u8) {
    let f = fd(node);
    let b = bk(node);
    set_bk(f, b);
    set_fd(b, f);
}

/// Like [`dll_unlink`] but for the secondary `fd_nextsize`/`bk_nextsize`
/// chain used by large bins to skip between distinct sizes.
pub unsafe fn dll_nextsize_unlink(node: *mut u8) {
    let f = fd_nextsize(node);
    let b = bk_nextsize(node);
    if !f.is_null() {
        set_bk_nextsize(f, b);
    }
    if !b.is_null() {
        set_fd_nextsize(b, f);
    }
}

/// Fast-bin index for a normalized size, valid only when `nb <=
/// max_fast`. Per spec: `(nb >> 3) - 2`.
#[inline]
pub fn fastbin_index(nb: usize) -> usize {
    (nb >> 3) - 2
}

/// Small-bin index for a normalized size, valid only when `nb < 512`.
/// Per spec: `nb >> 3`.
#[inline]
pub fn smallbin_index(nb: usize) -> usize {
    nb >> 3
}

/// Piecewise-logarithmic large-bin index for `nb >= 512`. Six ranges of
/// decreasing resolution, documented in SPEC_FULL.md §3.1; the mapping is
/// total (covers up to `usize::MAX`), monotone, and saturates at
/// [`LARGEBIN_LAST`] for very large requests.
pub fn largebin_index(nb: usize) -> usize {
    debug_assert!(nb >= SMALLBIN_LIMIT);

    if (nb >> 6) <= 39 {
        64 + ((nb >> 6) - 8)
    } else if (nb >> 9) <= 20 {
        96 + ((nb >> 9) - 5)
    } else if (nb >> 12) <= 9 {
        112 + ((nb >> 12) - 2)
    } else if (nb >> 15) <= 4 {
        120 + ((nb >> 15) - 1)
    } else if (nb >> 18) <= 1 {
        124 + (nb >> 18)
    } else {
        126
    }
}

/// Bin index a normalized size belongs in, whatever kind of bin it is
/// (never the unsorted bin, which chunks only visit transiently).
#[inline]
pub fn bin_index(nb: usize) -> usize {
    if nb < SMALLBIN_LIMIT {
        smallbin_index(nb)
    } else {
        largebin_index(nb)
    }
}

#[inline]
pub fn is_small_bin(index: usize) -> bool {
    index < LARGEBIN_BASE
}

#[inline]
pub fn is_large_bin(index: usize) -> bool {
    index >= LARGEBIN_BASE
}

/// Bitmap of which of the [`NBINS`] bins (excluding fast bins, which have
/// no bitmap of their own) currently hold at least one chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinMap(u128);

impl BinMap {
    pub const EMPTY: BinMap = BinMap(0);

    #[inline]
    pub fn set(&mut self, index: usize) {
        self.0 |= 1u128 << index;
    }

    #[inline]
    pub fn clear(&mut self, index: usize) {
        self.0 &= !(1u128 << index);
    }

    #[inline]
    pub fn get(&self, index: usize) -> bool {
        self.0 & (1u128 << index) != 0
    }

    /// Lowest set bit at index `from` or greater, or [`NBINS`] if none.
    #[inline]
    pub fn scan_from(&self, from: usize) -> usize {
        if from >= 128 {
            return NBINS;
        }
        let shifted = (self.0 >> from) << from;
        if shifted == 0 {
            NBINS
        } else {
            shifted.trailing_zeros() as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fastbin_index_matches_spec() {
        assert_eq!(fastbin_index(16), 0);
        assert_eq!(fastbin_index(24), 1);
        assert_eq!(fastbin_index(80), 8);
    }

    #[test]
    fn smallbin_index_matches_spec() {
        assert_eq!(smallbin_index(16), 2);
        assert_eq!(smallbin_index(32), 4);
        assert!(smallbin_index(504) < 64);
    }

    #[test]
    fn largebin_index_is_monotone_and_in_range() {
        let mut prev = largebin_index(SMALLBIN_LIMIT);
        assert!(prev >= LARGEBIN_BASE);
        let mut nb = SMALLBIN_LIMIT + 8;
        while nb < 1 << 30 {
            let idx = largebin_index(nb);
            assert!(idx >= prev);
            assert!(idx <= LARGEBIN_LAST);
            prev = idx;
            nb += nb / 7 + 8;
        }
        assert_eq!(largebin_index(usize::MAX / 2), LARGEBIN_LAST);
    }

    #[test]
    fn bin_map_scan() {
        let mut map = BinMap::EMPTY;
        assert_eq!(map.scan_from(0), NBINS);
        map.set(5);
        map.set(70);
        assert_eq!(map.scan_from(0), 5);
        assert_eq!(map.scan_from(6), 70);
        assert_eq!(map.scan_from(71), NBINS);
        map.clear(5);
        assert_eq!(map.scan_from(0), 70);
    }

    #[test]
    fn doubly_linked_push_and_unlink() {
        let mut sentinel = BinSentinel::EMPTY;
        sentinel.init();
        let head = sentinel.as_chunk_ptr();

        let mut buf = [0u8; 64];
        let chunk = buf.as_mut_ptr();
        unsafe {
            dll_push_front(head, chunk);
            assert_eq!(fd(head), chunk);
            assert_eq!(bk(head), chunk);
            assert_eq!(fd(chunk), head);
            assert_eq!(bk(chunk), head);

            dll_unlink(chunk);
            assert_eq!(fd(head), head);
            assert_eq!(bk(head), head);
        }
    }
}
