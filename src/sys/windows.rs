//! Windows [`PageSource`]. There is no `sbrk` equivalent on Windows, so
//! heap extension is emulated: a large address-space reservation is made
//! once (`MEM_RESERVE`) and `extend_heap` grows/shrinks how much of it is
//! committed (`MEM_COMMIT`/`MEM_DECOMMIT`), which is contiguous by
//! construction — satisfying the same contract `sbrk` would. Anonymous
//! mappings for large allocations are independent reserve+commit regions.
//! Grounded on the teacher's `talc/src/oom/os_backed/win.rs`, which drives
//! the same `VirtualAlloc`/`VirtualFree` pair for an analogous purpose.

use core::ptr::NonNull;

use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};

use crate::page_source::PageSource;

/// Heap segment reservation size: large enough that real-world workloads
/// never exhaust it, small enough to not alarm the OS's address-space
/// accounting.
const HEAP_RESERVATION: usize = 1 << 34; // 16 GiB of reserved (not committed) address space.

/// The Windows page size is always 4KiB in practice (8KiB on Itanium,
/// which this crate doesn't target), so it's hardcoded rather than
/// queried, the same way the `dwAllocationGranularity`/page-size split
/// is hardcoded on this platform elsewhere in the lineage this crate
/// follows.
const PAGE_SIZE: usize = 4 << 10;

#[derive(Debug)]
pub struct SystemPageSource {
    page_size: usize,
    heap_base: *mut u8,
    heap_committed: usize,
}

unsafe impl Send for SystemPageSource {}

impl Default for SystemPageSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemPageSource {
    pub fn new() -> Self {
        Self {
            page_size: PAGE_SIZE,
            heap_base: core::ptr::null_mut(),
            heap_committed: 0,
        }
    }
}

unsafe impl PageSource for SystemPageSource {
    fn extend_heap(&mut self, delta: isize) -> Option<NonNull<u8>> {
        if self.heap_base.is_null() {
            if delta <= 0 {
                return None;
            }
            let base = unsafe {
                VirtualAlloc(core::ptr::null(), HEAP_RESERVATION, MEM_RESERVE, PAGE_READWRITE)
            };
            if base.is_null() {
                return None;
            }
            self.heap_base = base.cast();
        }

        let old_committed = self.heap_committed;
        let old_break = unsafe { self.heap_base.add(old_committed) };

        if delta == 0 {
            return NonNull::new(old_break);
        }

        if delta > 0 {
            let grow = delta as usize;
            if old_committed + grow > HEAP_RESERVATION {
                return None;
            }
            let result = unsafe {
                VirtualAlloc(
                    self.heap_base.add(old_committed).cast(),
                    grow,
                    MEM_COMMIT,
                    PAGE_READWRITE,
                )
            };
            if result.is_null() {
                return None;
            }
            self.heap_committed += grow;
        } else {
            let shrink = (-delta) as usize;
            if shrink > old_committed {
                return None;
            }
            let new_committed = old_committed - shrink;
            let result = unsafe {
                VirtualFree(
                    self.heap_base.add(new_committed).cast(),
                    shrink,
                    MEM_DECOMMIT,
                )
            };
            if result == 0 {
                return None;
            }
            self.heap_committed = new_committed;
        }

        NonNull::new(old_break)
    }

    fn map_pages(&mut self, len: usize) -> Option<NonNull<u8>> {
        let ptr =
            unsafe { VirtualAlloc(core::ptr::null(), len, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE) };
        NonNull::new(ptr.cast())
    }

    unsafe fn unmap_pages(&mut self, base: NonNull<u8>, _len: usize) {
        let result = VirtualFree(base.as_ptr().cast(), 0, MEM_RELEASE);
        debug_assert_ne!(result, 0, "VirtualFree of a region we obtained from VirtualAlloc should not fail");
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}
