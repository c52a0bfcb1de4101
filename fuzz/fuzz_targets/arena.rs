#![no_main]

use flatmalloc::sys::SystemPageSource;
use flatmalloc::Arena;

use libfuzzer_sys::arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Action {
    /// Allocate with the given size and align of `1 << (align_bit % 12)`.
    Alloc { size: u16, align_bit: u8 },
    /// Free the ith live allocation.
    Free { index: u8 },
    /// Realloc the ith live allocation to a new size.
    Realloc { index: u8, new_size: u16 },
}
use Action::*;

fuzz_target!(|actions: Vec<Action>| {
    let mut arena = Arena::new(SystemPageSource::new());
    let mut live: Vec<(*mut u8, usize, usize)> = Vec::new();

    for action in actions {
        match action {
            Alloc { size, align_bit } => {
                if size == 0 {
                    continue;
                }
                let align = 1usize << (align_bit % 12);
                let size = size as usize;

                let ptr = if align <= 16 {
                    arena.allocate(size)
                } else {
                    arena.allocate_aligned(align, size)
                };

                if let Some(ptr) = ptr {
                    assert_eq!(ptr.as_ptr() as usize % align, 0);
                    let usable = unsafe { arena.usable_size(Some(ptr)) };
                    assert!(usable >= size);
                    unsafe { ptr.as_ptr().write_bytes(0xab, size) };
                    live.push((ptr.as_ptr(), size, align));
                }
            }
            Free { index } => {
                let index = index as usize;
                if index >= live.len() {
                    continue;
                }
                let (ptr, ..) = live.swap_remove(index);
                unsafe { arena.free(core::ptr::NonNull::new(ptr)) };
                assert_eq!(arena.last_error(), None, "corruption reported on a legitimate free");
            }
            Realloc { index, new_size } => {
                let index = index as usize;
                if index >= live.len() || new_size == 0 {
                    continue;
                }
                let (ptr, old_size, align) = live[index];
                let new_size = new_size as usize;
                let nn = core::ptr::NonNull::new(ptr);

                if let Some(new_ptr) = unsafe { arena.reallocate(nn, new_size) } {
                    if align <= 16 {
                        let copied = old_size.min(new_size);
                        for i in 0..copied {
                            assert_eq!(unsafe { *new_ptr.as_ptr().add(i) }, 0xab);
                        }
                    }
                    unsafe { new_ptr.as_ptr().write_bytes(0xab, new_size) };
                    live[index] = (new_ptr.as_ptr(), new_size, align);
                    assert_eq!(arena.last_error(), None, "corruption reported on a legitimate realloc");
                } else {
                    live.swap_remove(index);
                }
            }
        }
    }

    for (ptr, ..) in live {
        unsafe { arena.free(core::ptr::NonNull::new(ptr)) };
    }
});
