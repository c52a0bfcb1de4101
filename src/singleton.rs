//! The process-wide arena `facade.rs` dispatches to: a lazily initialized,
//! one-shot-guarded [`FlatmallocLock`]. The lock-wraps-state shape mirrors
//! `lock.rs`/the teacher's `Talck`; the lazy bootstrap has no teacher
//! analogue (the teacher is always handed an already-built `Talc` by its
//! caller) since [`SystemPageSource::new`](crate::sys::SystemPageSource::new)
//! queries the page size at runtime and so can't be a `const` initializer.

use core::cell::UnsafeCell;
use core::hint;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use lock_api::{GuardSend, RawMutex};

use crate::arena::Arena;
use crate::lock::FlatmallocLock;
use crate::sys::SystemPageSource;

/// A trivial spinning `lock_api::RawMutex`. Exists so the facade's one
/// global arena doesn't need an external lock crate dependency.
pub struct Spinlock(AtomicBool);

unsafe impl RawMutex for Spinlock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Spinlock = Spinlock(AtomicBool::new(false));

    type GuardMarker = GuardSend;

    fn lock(&self) {
        while self
            .0
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.0.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.0.store(false, Ordering::Release);
    }
}

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

struct GlobalArena {
    state: AtomicU8,
    slot: UnsafeCell<MaybeUninit<FlatmallocLock<Spinlock, SystemPageSource>>>,
}

// SAFETY: access to `slot` is gated by `state`, which is only driven
// UNINIT -> INITIALIZING -> READY by a single winning thread; every other
// thread spins until it observes READY before reading the slot.
unsafe impl Sync for GlobalArena {}

static GLOBAL: GlobalArena = GlobalArena {
    state: AtomicU8::new(UNINIT),
    slot: UnsafeCell::new(MaybeUninit::uninit()),
};

/// The process-wide arena, initialized on first call.
pub fn global() -> &'static FlatmallocLock<Spinlock, SystemPageSource> {
    loop {
        match GLOBAL.state.compare_exchange(
            UNINIT,
            INITIALIZING,
            Ordering::Acquire,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                let arena = Arena::new(SystemPageSource::new());
                unsafe {
                    (*GLOBAL.slot.get()).write(FlatmallocLock::new(arena));
                }
                GLOBAL.state.store(READY, Ordering::Release);
                break;
            }
            Err(READY) => break,
            Err(_) => hint::spin_loop(),
        }
    }

    unsafe { (*GLOBAL.slot.get()).assume_init_ref() }
}
