//! A minimal C-ABI surface over the process-wide singleton arena
//! (`singleton.rs`): `malloc`, `free`, `calloc`, `realloc`, `memalign`,
//! `valloc`, `pvalloc`. Every entry point is a thin argument-translation
//! wrapper — normalize, lock, call the core op, translate the result back
//! to the null-pointer-on-failure C convention. No allocation policy lives
//! here; it all lives in `engine.rs`.

use core::ffi::c_void;
use core::ptr::NonNull;

use crate::page_source::PageSource;
use crate::singleton::global;

/// Allocate `size` bytes with default alignment. Null on failure or when
/// `size` is `0`, matching glibc's permitted (if not mandated) behavior.
///
/// # Safety
/// Standard `malloc` contract: the returned pointer, if non-null, must be
/// freed with [`free`] (or passed to [`realloc`]) exactly once.
#[no_mangle]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    global()
        .lock()
        .allocate(size)
        .map_or(core::ptr::null_mut(), |nn| nn.as_ptr().cast())
}

/// Free a pointer previously returned by [`malloc`], [`calloc`],
/// [`realloc`], [`memalign`], [`valloc`], or [`pvalloc`]. A null pointer is
/// a no-op.
///
/// # Safety
/// `ptr` must be such a pointer, or null, and must not be freed twice.
#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    global().lock().free(NonNull::new(ptr.cast()));
}

/// Allocate `count * size` bytes, zeroed. Null (without allocating) on
/// overflow of `count * size`.
///
/// # Safety
/// See [`malloc`].
#[no_mangle]
pub unsafe extern "C" fn calloc(count: usize, size: usize) -> *mut c_void {
    global()
        .lock()
        .allocate_zeroed(count, size)
        .map_or(core::ptr::null_mut(), |nn| nn.as_ptr().cast())
}

/// Resize the allocation at `ptr` to `new_size` bytes, preserving the
/// shared prefix. `ptr == null` behaves like `malloc`; `new_size == 0`
/// behaves like `free` and returns null.
///
/// # Safety
/// `ptr` must be null or a pointer previously returned by one of this
/// module's allocation functions and not yet freed.
#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, new_size: usize) -> *mut c_void {
    global()
        .lock()
        .reallocate(NonNull::new(ptr.cast()), new_size)
        .map_or(core::ptr::null_mut(), |nn| nn.as_ptr().cast())
}

/// Allocate `size` bytes aligned to `align`, which must be a power of two.
/// Null on failure or if `align` isn't a power of two.
///
/// # Safety
/// See [`malloc`].
#[no_mangle]
pub unsafe extern "C" fn memalign(align: usize, size: usize) -> *mut c_void {
    global()
        .lock()
        .allocate_aligned(align, size)
        .map_or(core::ptr::null_mut(), |nn| nn.as_ptr().cast())
}

/// Allocate `size` bytes aligned to the page size.
///
/// # Safety
/// See [`malloc`].
#[no_mangle]
pub unsafe extern "C" fn valloc(size: usize) -> *mut c_void {
    global()
        .lock()
        .allocate_page_aligned(size)
        .map_or(core::ptr::null_mut(), |nn| nn.as_ptr().cast())
}

/// Allocate, page-aligned, at least enough bytes to cover `size` rounded
/// up to a whole number of pages.
///
/// # Safety
/// See [`malloc`].
#[no_mangle]
pub unsafe extern "C" fn pvalloc(size: usize) -> *mut c_void {
    let mut arena = global().lock();
    let page = arena.page_source().page_size();
    let rounded = size.checked_add(page - 1).map(|v| v & !(page - 1));
    match rounded {
        Some(rounded) => arena
            .allocate_page_aligned(rounded)
            .map_or(core::ptr::null_mut(), |nn| nn.as_ptr().cast()),
        None => core::ptr::null_mut(),
    }
}
