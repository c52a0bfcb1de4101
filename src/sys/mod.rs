//! Per-platform [`PageSource`](crate::page_source::PageSource)
//! implementations, gated behind the `system-backed` feature. Only the
//! abstract contract in `page_source.rs` is part of the core spec; these
//! shims are the (out-of-core) concrete plumbing behind it.

#[cfg(all(feature = "system-backed", unix))]
pub mod unix;
#[cfg(all(feature = "system-backed", unix))]
pub use unix::SystemPageSource;

#[cfg(all(feature = "system-backed", windows))]
pub mod windows;
#[cfg(all(feature = "system-backed", windows))]
pub use windows::SystemPageSource;
