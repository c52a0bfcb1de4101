//! [`FlatmallocLock`], a mutex-guarded [`Arena`] suitable for use as a
//! `#[global_allocator]` or any other shared, process-wide allocator.
//! Grounded on the teacher's `Talck` (`src/talck.rs`): same
//! `lock_api::Mutex`-wrapped-state shape, same `lock`/`try_lock` pair.

use lock_api::{Mutex, MutexGuard, RawMutex};

use crate::arena::Arena;
use crate::page_source::PageSource;

/// A [`Arena`] behind a `lock_api` mutex. Pick `R` to match your
/// concurrency needs — `spin::Mutex`'s raw type for `no_std` targets
/// without a real OS mutex, or `std::sync::Mutex`'s (via `lock_api`'s
/// std adapter) otherwise.
#[derive(Debug)]
pub struct FlatmallocLock<R: RawMutex, PS: PageSource> {
    mutex: Mutex<R, Arena<PS>>,
}

impl<R: RawMutex, PS: PageSource> FlatmallocLock<R, PS> {
    pub const fn new(arena: Arena<PS>) -> Self {
        Self { mutex: Mutex::new(arena) }
    }

    pub fn lock(&self) -> MutexGuard<'_, R, Arena<PS>> {
        self.mutex.lock()
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, R, Arena<PS>>> {
        self.mutex.try_lock()
    }

    pub fn into_inner(self) -> Arena<PS> {
        self.mutex.into_inner()
    }
}

/// A dummy `RawMutex` that skips synchronization entirely, for embedders
/// who know only one thread will ever touch the arena (e.g. a `wasm32`
/// target without threads).
///
/// # Safety
/// Using this with more than one thread is immediate undefined behavior,
/// even through otherwise-safe APIs.
pub struct AssumeUnlockable;

unsafe impl RawMutex for AssumeUnlockable {
    const INIT: AssumeUnlockable = AssumeUnlockable;
    type GuardMarker = lock_api::GuardSend;

    fn lock(&self) {}

    fn try_lock(&self) -> bool {
        true
    }

    unsafe fn unlock(&self) {}
}
