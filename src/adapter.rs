//! `GlobalAlloc` and (behind `allocator`) `allocator_api2::alloc::Allocator`
//! impls for [`FlatmallocLock`]. Grounded on the teacher's `Talck` impls in
//! `src/talck.rs`: same `Ordering`-based `realloc` dispatch, same
//! release-the-lock-during-a-big-memcpy optimization, same in-place-growth-
//! before-reallocate ordering for `grow`/`shrink`.

use core::alloc::{GlobalAlloc, Layout};
use core::cmp::Ordering;
use core::ptr::{self, NonNull};

#[cfg(feature = "allocator")]
use allocator_api2::alloc::{AllocError, Allocator};

use lock_api::RawMutex;

use crate::lock::FlatmallocLock;
use crate::page_source::PageSource;

/// Above this many bytes, a grow/shrink that must move the allocation
/// drops the arena lock across the `memcpy` and reacquires it after, so a
/// large copy doesn't hold up every other thread's allocations.
const RELEASE_LOCK_ON_REALLOC_LIMIT: usize = 0x10000;

#[inline]
fn is_aligned_to(ptr: *mut u8, align: usize) -> bool {
    (ptr as usize).trailing_zeros() >= align.trailing_zeros()
}

#[inline]
unsafe fn nn_slice(ptr: NonNull<u8>, len: usize) -> NonNull<[u8]> {
    NonNull::new_unchecked(ptr::slice_from_raw_parts_mut(ptr.as_ptr(), len))
}

unsafe impl<R: RawMutex, PS: PageSource> GlobalAlloc for FlatmallocLock<R, PS> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut arena = self.lock();
        let result = if layout.align() <= crate::chunk::ALIGN {
            arena.allocate(layout.size())
        } else {
            arena.allocate_aligned(layout.align(), layout.size())
        };
        result.map_or(ptr::null_mut(), |nn| nn.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.lock().free(Some(NonNull::new_unchecked(ptr)));
    }

    unsafe fn realloc(&self, ptr: *mut u8, old_layout: Layout, new_size: usize) -> *mut u8 {
        let nn_ptr = NonNull::new_unchecked(ptr);

        if old_layout.align() > crate::chunk::ALIGN {
            // Over-aligned allocations never grow or shrink in place: the
            // relocation path is the only one that can re-establish the
            // alignment guarantee.
            return self.realloc_relocate(nn_ptr, old_layout, new_size, old_layout.align());
        }

        match new_size.cmp(&old_layout.size()) {
            Ordering::Equal => ptr,
            _ => {
                let mut lock = self.lock();
                match lock.reallocate(Some(nn_ptr), new_size) {
                    Some(nn) => nn.as_ptr(),
                    None => ptr::null_mut(),
                }
            }
        }
    }
}

impl<R: RawMutex, PS: PageSource> FlatmallocLock<R, PS> {
    /// Manually allocate-copy-free a relocated block, used whenever the
    /// arena's own `reallocate` can't be trusted to preserve alignment
    /// (i.e. the original request was over-aligned).
    unsafe fn realloc_relocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
        align: usize,
    ) -> *mut u8 {
        let mut lock = self.lock();
        let Some(new_ptr) = (if align <= crate::chunk::ALIGN {
            lock.allocate(new_size)
        } else {
            lock.allocate_aligned(align, new_size)
        }) else {
            return ptr::null_mut();
        };

        let copy_len = core::cmp::min(old_layout.size(), new_size);
        if old_layout.size() > RELEASE_LOCK_ON_REALLOC_LIMIT {
            drop(lock);
            new_ptr.as_ptr().copy_from_nonoverlapping(ptr.as_ptr(), copy_len);
            lock = self.lock();
        } else {
            new_ptr.as_ptr().copy_from_nonoverlapping(ptr.as_ptr(), copy_len);
        }
        lock.free(Some(ptr));
        new_ptr.as_ptr()
    }
}

#[cfg(feature = "allocator")]
unsafe impl<R: RawMutex, PS: PageSource> Allocator for FlatmallocLock<R, PS> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            return Ok(unsafe { nn_slice(NonNull::dangling(), 0) });
        }

        let mut arena = self.lock();
        let result = if layout.align() <= crate::chunk::ALIGN {
            arena.allocate(layout.size())
        } else {
            arena.allocate_aligned(layout.align(), layout.size())
        };
        result
            .map(|nn| unsafe { nn_slice(nn, layout.size()) })
            .ok_or(AllocError)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            self.lock().free(Some(ptr));
        }
    }

    unsafe fn grow(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        debug_assert!(new_layout.size() >= old_layout.size());

        if old_layout.size() == 0 {
            return self.allocate(new_layout);
        }

        if new_layout.align() <= crate::chunk::ALIGN && is_aligned_to(ptr.as_ptr(), new_layout.align())
        {
            // Any fallback inside `reallocate` that has to move the block
            // still only promises default alignment, which is all that's
            // asked for here, so trusting it is safe.
            let mut lock = self.lock();
            if let Some(nn) = lock.reallocate(Some(ptr), new_layout.size()) {
                return Ok(unsafe { nn_slice(nn, new_layout.size()) });
            }
        }

        let relocated = self.realloc_relocate(ptr, old_layout, new_layout.size(), new_layout.align());
        NonNull::new(relocated)
            .map(|nn| unsafe { nn_slice(nn, new_layout.size()) })
            .ok_or(AllocError)
    }

    unsafe fn grow_zeroed(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        let grown = self.grow(ptr, old_layout, new_layout)?;
        grown
            .cast::<u8>()
            .as_ptr()
            .add(old_layout.size())
            .write_bytes(0, new_layout.size() - old_layout.size());
        Ok(grown)
    }

    unsafe fn shrink(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        debug_assert!(new_layout.size() <= old_layout.size());

        if new_layout.size() == 0 {
            if old_layout.size() > 0 {
                self.lock().free(Some(ptr));
            }
            return Ok(unsafe { nn_slice(NonNull::dangling(), 0) });
        }

        if new_layout.align() <= crate::chunk::ALIGN && is_aligned_to(ptr.as_ptr(), new_layout.align())
        {
            let mut lock = self.lock();
            if let Some(nn) = lock.reallocate(Some(ptr), new_layout.size()) {
                return Ok(unsafe { nn_slice(nn, new_layout.size()) });
            }
        }

        let relocated = self.realloc_relocate(ptr, old_layout, new_layout.size(), new_layout.align());
        NonNull::new(relocated)
            .map(|nn| unsafe { nn_slice(nn, new_layout.size()) })
            .ok_or(AllocError)
    }
}
