//! Abstract access to the OS (§4.1): the only way the allocation engine
//! touches the outside world. Grounded on the teacher's `Source`/
//! `ReserveCommitDecommitRelease` traits (`talc/src/src/mod.rs`,
//! `talc/src/oom/os_backed.rs`) — same shape, narrowed to exactly the
//! four primitives §4.1 names.

use core::fmt::Debug;
use core::ptr::NonNull;

/// Implemented by a type that can grow the process's contiguous data
/// segment and hand out anonymous page mappings.
///
/// # Safety
/// Implementors must uphold the contracts in each method's documentation;
/// a violation (e.g. a non-contiguous `extend_heap` claimed as
/// contiguous) is undefined behavior from the engine's perspective, since
/// the engine relies on it to maintain the chunk invariants.
pub unsafe trait PageSource: Debug {
    /// Grow (or, if `delta` is negative, shrink) the process data segment
    /// by `delta` bytes, returning the *old* break. The first successful
    /// call establishes the segment origin; later calls must return
    /// addresses contiguous with the break left by the previous call, or
    /// report failure so the caller can fall back to mapping.
    fn extend_heap(&mut self, delta: isize) -> Option<NonNull<u8>>;

    /// Return a fresh, page-aligned, anonymous read/write mapping of
    /// exactly `len` bytes (already rounded up to a page multiple by the
    /// caller). Distinct calls need not be contiguous with one another or
    /// with the heap segment.
    fn map_pages(&mut self, len: usize) -> Option<NonNull<u8>>;

    /// Release a mapping previously returned by `map_pages` with the same
    /// `base` and `len`. Must not fail for such a region.
    ///
    /// # Safety
    /// `base`/`len` must describe a live mapping returned by this same
    /// `PageSource` instance's `map_pages`.
    unsafe fn unmap_pages(&mut self, base: NonNull<u8>, len: usize);

    /// The process page size. Constant for the lifetime of the process.
    fn page_size(&self) -> usize;
}
