//! Self-describing boundary-tag chunk layout.
//!
//! A chunk's header is two machine words at its low address: `prev_size`
//! and `size` (flags packed into the low 3 bits of `size`). This is the
//! classic dlmalloc `malloc_chunk` layout. Everything here hides that
//! packed representation behind accessor functions per the design note
//! that the size-and-flags word is a layout decision, not a language
//! feature — nothing outside this module masks or shifts the raw word
//! directly.
//!
//! Free-chunk link words (`fd`/`bk`, and for large chunks `fd_nextsize`/
//! `bk_nextsize`) overlap the user payload, exactly where [`bins`](crate::bins)
//! expects to find them. Nothing here owns that memory in the Rust sense;
//! these are raw offsets into a chunk the arena already owns, per the
//! "back-pointers are a relationship, not shared ownership" design note.

use core::mem::size_of;
use core::ptr::NonNull;

/// Machine word size in bytes.
pub const WORD: usize = size_of::<usize>();
/// Malloc alignment: `2 * word_size`, at least 8.
pub const ALIGN: usize = 2 * WORD;
/// Size of the in-band header (`prev_size` + `size`).
pub const HEADER_SIZE: usize = 2 * WORD;
/// Smallest chunk that can ever exist: header plus room for `fd`/`bk`.
pub const MIN_CHUNK_SIZE: usize = 4 * WORD;

/// The preceding chunk (in address order) is in use.
pub const PREV_INUSE: usize = 0b001;
/// This chunk is a standalone anonymous mapping, never binned or coalesced.
pub const IS_MMAPPED: usize = 0b010;
/// Reserved for multi-arena builds; always zero here.
pub const NON_MAIN_ARENA: usize = 0b100;

const SIZE_FLAG_BITS: usize = PREV_INUSE | IS_MMAPPED | NON_MAIN_ARENA;

#[inline]
pub const fn align_up(v: usize, a: usize) -> usize {
    (v + (a - 1)) & !(a - 1)
}

#[inline]
pub const fn align_down(v: usize, a: usize) -> usize {
    v & !(a - 1)
}

#[inline]
pub const fn is_aligned(v: usize, a: usize) -> bool {
    v & (a - 1) == 0
}

/// A raw, non-owning handle to a chunk's header. `ptr` points at the
/// `prev_size` word (the very base of the chunk, in-use or free).
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Chunk(pub NonNull<u8>);

impl core::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Chunk")
            .field("base", &self.0.as_ptr())
            .field("size", &unsafe { self.size() })
            .field("prev_inuse", &unsafe { self.prev_inuse() })
            .field("is_mmapped", &unsafe { self.is_mmapped() })
            .finish()
    }
}

impl Chunk {
    #[inline]
    pub unsafe fn from_raw(ptr: *mut u8) -> Self {
        debug_assert!(!ptr.is_null());
        Chunk(NonNull::new_unchecked(ptr))
    }

    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    #[inline]
    unsafe fn size_word_ptr(self) -> *mut usize {
        self.0.as_ptr().add(WORD).cast()
    }

    #[inline]
    unsafe fn prev_size_word_ptr(self) -> *mut usize {
        self.0.as_ptr().cast()
    }

    /// Masked chunk size, excluding the flag bits.
    #[inline]
    pub unsafe fn size(self) -> usize {
        *self.size_word_ptr() & !SIZE_FLAG_BITS
    }

    #[inline]
    pub unsafe fn flags(self) -> usize {
        *self.size_word_ptr() & SIZE_FLAG_BITS
    }

    /// Overwrite size and flags together; `size` must already be masked.
    #[inline]
    pub unsafe fn set_size_and_flags(self, size: usize, flags: usize) {
        debug_assert!(size & SIZE_FLAG_BITS == 0);
        *self.size_word_ptr() = size | flags;
    }

    #[inline]
    pub unsafe fn set_size_keep_flags(self, size: usize) {
        let flags = self.flags();
        self.set_size_and_flags(size, flags);
    }

    #[inline]
    pub unsafe fn prev_inuse(self) -> bool {
        self.flags() & PREV_INUSE != 0
    }

    #[inline]
    pub unsafe fn is_mmapped(self) -> bool {
        self.flags() & IS_MMAPPED != 0
    }

    #[inline]
    pub unsafe fn set_prev_inuse(self) {
        *self.size_word_ptr() |= PREV_INUSE;
    }

    #[inline]
    pub unsafe fn clear_prev_inuse(self) {
        *self.size_word_ptr() &= !PREV_INUSE;
    }

    #[inline]
    pub unsafe fn set_is_mmapped(self) {
        *self.size_word_ptr() |= IS_MMAPPED;
    }

    /// Only meaningful when the predecessor in address order is free: the
    /// predecessor's size, letting the coalescer locate its header by
    /// subtraction. When the predecessor is in-use, this word belongs to
    /// it (the overlap optimization) and must never be written here.
    #[inline]
    pub unsafe fn prev_size(self) -> usize {
        *self.prev_size_word_ptr()
    }

    #[inline]
    pub unsafe fn set_prev_size(self, size: usize) {
        *self.prev_size_word_ptr() = size;
    }

    /// User pointer for an in-use chunk of this header.
    #[inline]
    pub unsafe fn to_mem(self) -> *mut u8 {
        self.0.as_ptr().add(HEADER_SIZE)
    }

    /// Recover the chunk header from a user pointer.
    #[inline]
    pub unsafe fn from_mem(mem: *mut u8) -> Self {
        Chunk::from_raw(mem.sub(HEADER_SIZE))
    }

    /// The chunk immediately following this one in address order, given
    /// this chunk's total size.
    #[inline]
    pub unsafe fn next(self, size: usize) -> Chunk {
        Chunk::from_raw(self.0.as_ptr().add(size))
    }

    /// The chunk immediately preceding this one, valid only when
    /// `!self.prev_inuse()`.
    #[inline]
    pub unsafe fn prev(self) -> Chunk {
        debug_assert!(!self.prev_inuse());
        Chunk::from_raw(self.0.as_ptr().sub(self.prev_size()))
    }

    /// Write the trailing boundary-tag footer for a free chunk of `size`:
    /// physically the `prev_size` word of the following chunk.
    #[inline]
    pub unsafe fn write_footer(self, size: usize) {
        self.next(size).set_prev_size(size);
    }

    /// Usable byte count for an in-use chunk of this header (its size
    /// minus the header).
    #[inline]
    pub unsafe fn usable_size(self) -> usize {
        self.size() - WORD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let mut buf = [0u8; 256];
        let base = buf.as_mut_ptr();
        unsafe {
            let c = Chunk::from_raw(base);
            c.set_size_and_flags(64, PREV_INUSE);
            assert_eq!(c.size(), 64);
            assert!(c.prev_inuse());
            assert!(!c.is_mmapped());

            c.set_is_mmapped();
            assert!(c.is_mmapped());
            assert_eq!(c.size(), 64);

            c.clear_prev_inuse();
            assert!(!c.prev_inuse());
            assert_eq!(c.size(), 64);
        }
    }

    #[test]
    fn mem_roundtrip() {
        let mut buf = [0u8; 256];
        let base = buf.as_mut_ptr();
        unsafe {
            let c = Chunk::from_raw(base);
            let mem = c.to_mem();
            assert_eq!(mem, base.add(HEADER_SIZE));
            assert_eq!(Chunk::from_mem(mem), c);
        }
    }

    #[test]
    fn neighbor_navigation() {
        let mut buf = [0u8; 256];
        let base = buf.as_mut_ptr();
        unsafe {
            let c = Chunk::from_raw(base);
            c.set_size_and_flags(48, PREV_INUSE);
            let n = c.next(48);
            assert_eq!(n.as_ptr(), base.add(48));

            c.write_footer(48);
            assert_eq!(n.prev_size(), 48);

            n.clear_prev_inuse();
            assert_eq!(n.prev().as_ptr(), base);
        }
    }
}
