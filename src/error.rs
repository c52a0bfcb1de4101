//! Error kinds surfaced by the allocation engine.
//!
//! The public operations in [`crate::arena::Arena`] return `Option`/`bool`
//! per the external interface (a null pointer or a rejected tune is all a
//! caller ever needs). Internally, `Arena::last_error` records which
//! `AllocError` drove the most recent no-op/abort decision — today that's
//! exclusively `Corruption`, set by `engine.rs::handle_corruption` so a
//! double free or a broken free-list invariant can be told apart from an
//! ordinary out-of-memory null return in tests and fuzzing. The other
//! variants are carried for `Display`/`Error` completeness and as a home
//! for that distinction should a caller ever need to make it (e.g. an
//! embedder wanting to log why a tuning call or aligned request was
//! rejected) without engine.rs constructing them itself yet. This mirrors
//! the teacher's `NotEnoughMemory` marker type, just with the extra
//! variants this allocator's richer failure surface (§7) needs.

/// Why an allocation-engine operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Both heap extension and anonymous mapping were refused by the page
    /// source, or the request size would overflow the address space.
    OutOfMemory,
    /// A zero size, a non-power-of-two alignment, or an out-of-range tuning
    /// value.
    InvalidArgument,
    /// A boundary-tag or free-list invariant was violated at free/realloc
    /// time (double free, corrupted size field, broken bin cycle, ...).
    Corruption,
    /// The page source reported a fatal condition (e.g. a non-contiguous
    /// heap extension after contiguity was assumed).
    HostFailure,
}

impl core::fmt::Display for AllocError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            AllocError::OutOfMemory => "out of memory",
            AllocError::InvalidArgument => "invalid argument",
            AllocError::Corruption => "heap corruption detected",
            AllocError::HostFailure => "page source failure",
        };
        f.write_str(msg)
    }
}

#[cfg(test)]
impl std::error::Error for AllocError {}
