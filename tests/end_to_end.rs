//! End-to-end scenarios and the quantified invariants they're meant to
//! exercise (I1 alignment, I2 usable-size, I6 realloc preservation, I7
//! zeroing, I8 overflow, I9 coalescing).

use flatmalloc::sys::SystemPageSource;
use flatmalloc::Arena;

fn arena() -> Arena<SystemPageSource> {
    Arena::new(SystemPageSource::new())
}

#[test]
fn scenario_1_zero_size_and_null_free() {
    let mut a = arena();
    assert!(a.allocate(0).is_none());
    unsafe { a.free(None) };
    assert_eq!(unsafe { a.usable_size(None) }, 0);
}

#[test]
fn scenario_2_repeated_alloc_free_does_not_leak() {
    let mut a = arena();
    for _ in 0..100_000 {
        let p = a.allocate(100).expect("allocate");
        assert!(unsafe { a.usable_size(Some(p)) } >= 100);
        unsafe { a.free(Some(p)) };
    }
    let stats = a.stats();
    assert!(stats.bytes_via_heap_extend < 16 * 1024 * 1024);
}

#[test]
fn scenario_3_zeroed_allocation() {
    let mut a = arena();
    let p = a.allocate_zeroed(256, 4).expect("allocate_zeroed");
    for i in 0..1024 {
        assert_eq!(unsafe { *p.as_ptr().add(i) }, 0);
    }
    unsafe { a.free(Some(p)) };
}

#[test]
fn scenario_4_reallocate_preserves_prefix_and_suffix() {
    let mut a = arena();
    let p = a.allocate(50).expect("allocate");
    unsafe {
        *p.as_ptr() = 0xAA;
        *p.as_ptr().add(49) = 0xBB;
    }
    let q = unsafe { a.reallocate(Some(p), 100).expect("reallocate") };
    unsafe {
        assert_eq!(*q.as_ptr(), 0xAA);
        assert_eq!(*q.as_ptr().add(49), 0xBB);
        a.free(Some(q));
    }
}

#[test]
fn scenario_5_aligned_allocation() {
    let mut a = arena();
    let p = a.allocate_aligned(64, 1000).expect("allocate_aligned");
    assert_eq!(p.as_ptr() as usize % 64, 0);
    unsafe { a.free(Some(p)) };
}

#[test]
fn scenario_6_random_sizes_shuffled_free() {
    let mut a = arena();
    let mut ptrs: Vec<(core::ptr::NonNull<u8>, usize)> = Vec::with_capacity(1000);

    let mut total_requested = 0usize;
    for _ in 0..1000 {
        let size = fastrand::usize(1..=4096);
        let p = a.allocate(size).expect("allocate");
        assert_eq!(p.as_ptr() as usize % 16, 0);
        assert!(unsafe { a.usable_size(Some(p)) } >= size);
        total_requested += size;
        ptrs.push((p, size));
    }

    fastrand::shuffle(&mut ptrs);

    for (p, _) in ptrs {
        unsafe { a.free(Some(p)) };
    }

    let stats = a.stats();
    let peak = stats.heap_extend_high_water + stats.mapping_high_water;
    assert!(peak <= 2 * total_requested + 1024 * 1024);
}

#[test]
fn calloc_overflow_returns_null() {
    let mut a = arena();
    assert!(a.allocate_zeroed(usize::MAX, 2).is_none());
}

#[test]
fn coalescing_merges_adjacent_free_chunks() {
    let mut a = arena();
    let p1 = a.allocate(64).expect("allocate");
    let p2 = a.allocate(64).expect("allocate");
    let p3 = a.allocate(64).expect("allocate");

    // Keep p3 live so the run doesn't merge into the top chunk; free p1 and
    // p2 (in reverse-address order) so their coalescing is exercised
    // directly rather than via the top.
    unsafe {
        a.free(Some(p2));
        a.free(Some(p1));
    }

    let q = a.allocate(100).expect("allocate after coalesce");
    unsafe {
        a.free(Some(q));
        a.free(Some(p3));
    }
}
