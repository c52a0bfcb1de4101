//! The allocation engine (§4.2): `allocate`, `free`, `reallocate`, and the
//! aligned variants, plus every internal step the priority chain in §4.2.1
//! walks through. Lives as a second `impl<PS: PageSource> Arena<PS>` block
//! alongside `arena.rs`, same split the teacher uses between a bin/tag data
//! module and the allocator logic that drives it.

use core::ptr;
use core::ptr::NonNull;

use crate::arena::Arena;
use crate::bins::{
    bin_index, bk, bk_nextsize, dll_nextsize_unlink, dll_push_front, dll_unlink, fastbin_index,
    fd, fd_nextsize, is_large_bin, is_small_bin, set_bk_nextsize, set_fd_nextsize, smallbin_index,
    NFASTBINS, SMALLBIN_LIMIT, UNSORTED_BIN,
};
use crate::chunk::{align_down, align_up, Chunk, HEADER_SIZE, MIN_CHUNK_SIZE, PREV_INUSE, WORD};
use crate::page_source::PageSource;

/// Bound on how many unsorted-bin chunks a single allocation will drain
/// before giving up on finding an exact match there (§4.2.2 step 3).
const UNSORTED_DRAIN_LIMIT: usize = 10_000;

/// Smallest chunk size for which the `fd_nextsize`/`bk_nextsize` slots are
/// guaranteed to lie inside the chunk rather than spilling into whatever
/// follows it.
const LINK_WORDS_SAFE_SIZE: usize = HEADER_SIZE + 4 * WORD;

/// Outcome of coalescing a chunk with its free neighbors.
enum Coalesced {
    /// The chunk (and whatever it absorbed) merged directly into the top
    /// chunk; there is nothing left to insert anywhere.
    MergedIntoTop,
    /// The merged result, still free, ready for the unsorted bin.
    Free(*mut u8, usize),
}

/// Given a chunk that just transitioned from free to in-use without being
/// resized, flip its successor's `PREV_INUSE` bit to match.
#[inline]
unsafe fn mark_in_use(chunk: Chunk, size: usize) {
    chunk.next(size).set_prev_inuse();
}

impl<PS: PageSource> Arena<PS> {
    /// `req2size`: add one word of header overhead (the other header word
    /// is reclaimed from the successor's `prev_size` slot while this chunk
    /// is in use), round up to `ALIGN`, and clamp to `MIN_CHUNK_SIZE`.
    /// `None` on overflow.
    fn normalize_request(requested: usize) -> Option<usize> {
        let with_header = requested.checked_add(WORD)?;
        let padded = with_header.checked_add(crate::chunk::ALIGN - 1)?;
        let aligned = padded & !(crate::chunk::ALIGN - 1);
        Some(aligned.max(MIN_CHUNK_SIZE))
    }

    fn bin_head(&mut self, idx: usize) -> *mut u8 {
        (&mut self.bins[idx] as *mut crate::bins::BinSentinel).cast()
    }

    // ---- allocate -------------------------------------------------------

    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let nb = Self::normalize_request(size)?;
        let chunk = self.serve(nb)?;
        Some(unsafe { NonNull::new_unchecked(Chunk::from_raw(chunk).to_mem()) })
    }

    pub fn allocate_zeroed(&mut self, count: usize, elem_size: usize) -> Option<NonNull<u8>> {
        let total = count.checked_mul(elem_size)?;
        let ptr = self.allocate(total)?;
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, total) };
        Some(ptr)
    }

    /// The priority chain in §4.2.1-4.2.2, run to completion once with a
    /// single consolidate-and-retry per the spec's step 6.
    fn serve(&mut self, nb: usize) -> Option<*mut u8> {
        if let Some(c) = self.fastbin_try(nb) {
            return Some(c);
        }
        if let Some(c) = self.smallbin_try(nb) {
            return Some(c);
        }
        if let Some(c) = self.unsorted_and_large_try(nb) {
            return Some(c);
        }
        if let Some(c) = self.top_try(nb) {
            return Some(c);
        }

        self.consolidate_fastbins();

        if let Some(c) = self.unsorted_and_large_try(nb) {
            return Some(c);
        }
        if let Some(c) = self.top_try(nb) {
            return Some(c);
        }

        if nb >= self.mmap_threshold && self.n_mmaps < self.mmap_max {
            if let Some(c) = self.mmap_alloc(nb) {
                return Some(c);
            }
        }

        if self.grow_heap_for(nb) {
            if let Some(c) = self.top_try(nb) {
                return Some(c);
            }
        }

        self.mmap_alloc(nb)
    }

    fn fastbin_try(&mut self, nb: usize) -> Option<*mut u8> {
        if nb > self.max_fast {
            return None;
        }
        let idx = fastbin_index(nb);
        if idx >= NFASTBINS {
            return None;
        }
        let head = self.fastbins[idx];
        if head.is_null() {
            return None;
        }
        unsafe { self.fastbins[idx] = fd(head) };
        self.fastbin_count_dec(idx);
        Some(head)
    }

    fn smallbin_try(&mut self, nb: usize) -> Option<*mut u8> {
        if nb >= SMALLBIN_LIMIT {
            return None;
        }
        let idx = smallbin_index(nb);
        if self.bins[idx].is_empty() {
            return None;
        }
        unsafe {
            let head = self.bin_head(idx);
            let victim = bk(head);
            dll_unlink(victim);
            if self.bins[idx].is_empty() {
                self.bin_map.clear(idx);
            }
            mark_in_use(Chunk::from_raw(victim), nb);
            Some(victim)
        }
    }

    fn unsorted_and_large_try(&mut self, nb: usize) -> Option<*mut u8> {
        if let Some(c) = self.drain_unsorted(nb) {
            return Some(c);
        }
        self.large_bin_search(nb)
    }

    /// Drain the unsorted bin (bounded), binning every chunk that isn't an
    /// exact match for `nb` into its permanent small/large bin.
    fn drain_unsorted(&mut self, nb: usize) -> Option<*mut u8> {
        unsafe {
            let head = self.bin_head(UNSORTED_BIN);
            for _ in 0..UNSORTED_DRAIN_LIMIT {
                if self.bins[UNSORTED_BIN].is_empty() {
                    break;
                }
                let victim = bk(head);
                dll_unlink(victim);
                let size = Chunk::from_raw(victim).size();
                if size == nb {
                    self.bin_count_dec(bin_index(size));
                    mark_in_use(Chunk::from_raw(victim), nb);
                    return Some(victim);
                }
                self.bin_insert(victim, size);
            }
            None
        }
    }

    fn bin_insert(&mut self, chunk: *mut u8, size: usize) {
        let idx = bin_index(size);
        if is_small_bin(idx) {
            unsafe {
                let head = self.bin_head(idx);
                dll_push_front(head, chunk);
            }
            self.bin_map.set(idx);
        } else {
            self.large_bin_insert(chunk, size, idx);
        }
    }

    /// Insert `chunk` into large bin `idx`, maintaining the `fd_nextsize`/
    /// `bk_nextsize` ring of distinct-size anchors alongside the regular,
    /// descending-by-size `fd`/`bk` chain.
    fn large_bin_insert(&mut self, chunk: *mut u8, size: usize, idx: usize) {
        unsafe {
            let head = self.bin_head(idx);

            if self.bins[idx].is_empty() {
                dll_push_front(head, chunk);
                set_fd_nextsize(chunk, chunk);
                set_bk_nextsize(chunk, chunk);
                self.bin_map.set(idx);
                return;
            }

            // Find the first existing entry, scanning from the largest end,
            // whose size is <= ours.
            let mut at = fd(head);
            while at != head && Chunk::from_raw(at).size() > size {
                at = fd(at);
            }

            if at != head && Chunk::from_raw(at).size() == size {
                // Join an existing same-size run right after its anchor;
                // not itself a nextsize member.
                link_after(at, chunk);
                set_fd_nextsize(chunk, ptr::null_mut());
                set_bk_nextsize(chunk, ptr::null_mut());
                return;
            }

            // `chunk` becomes a new distinct-size anchor, inserted in the
            // regular chain right before `at`.
            let before = bk(at);
            link_between(before, chunk, at);

            let mut bigger_anchor = before;
            while bigger_anchor != head && fd_nextsize(bigger_anchor).is_null() {
                bigger_anchor = bk(bigger_anchor);
            }
            let mut smaller_anchor = at;
            while smaller_anchor != head && fd_nextsize(smaller_anchor).is_null() {
                smaller_anchor = fd(smaller_anchor);
            }

            match (bigger_anchor != head, smaller_anchor != head) {
                (true, true) => {
                    set_bk_nextsize(chunk, bigger_anchor);
                    set_fd_nextsize(chunk, smaller_anchor);
                    set_fd_nextsize(bigger_anchor, chunk);
                    set_bk_nextsize(smaller_anchor, chunk);
                }
                (true, false) => {
                    let s = fd_nextsize(bigger_anchor);
                    set_fd_nextsize(chunk, s);
                    set_bk_nextsize(s, chunk);
                    set_fd_nextsize(bigger_anchor, chunk);
                    set_bk_nextsize(chunk, bigger_anchor);
                }
                (false, true) => {
                    let b = bk_nextsize(smaller_anchor);
                    set_bk_nextsize(chunk, b);
                    set_fd_nextsize(b, chunk);
                    set_bk_nextsize(smaller_anchor, chunk);
                    set_fd_nextsize(chunk, smaller_anchor);
                }
                (false, false) => {
                    set_fd_nextsize(chunk, chunk);
                    set_bk_nextsize(chunk, chunk);
                }
            }
        }
    }

    /// Remove `chunk` from large bin `idx`, promoting a same-size
    /// successor to take over as the nextsize anchor if one exists.
    fn large_bin_remove(&mut self, chunk: *mut u8, idx: usize) {
        unsafe {
            if !fd_nextsize(chunk).is_null() {
                self.large_bin_fix_nextsize_on_remove(chunk);
            }
            dll_unlink(chunk);
        }
        if self.bins[idx].is_empty() {
            self.bin_map.clear(idx);
        }
        self.bin_count_dec(idx);
    }

    unsafe fn large_bin_fix_nextsize_on_remove(&mut self, chunk: *mut u8) {
        let succ = fd(chunk);
        let size = Chunk::from_raw(chunk).size();
        let promote =
            succ != chunk && Chunk::from_raw(succ).size() == size && fd_nextsize(succ).is_null();
        if promote {
            let f = fd_nextsize(chunk);
            let b = bk_nextsize(chunk);
            set_fd_nextsize(succ, f);
            set_bk_nextsize(succ, b);
            set_bk_nextsize(f, succ);
            set_fd_nextsize(b, succ);
        } else {
            dll_nextsize_unlink(chunk);
        }
    }

    /// §4.2.2 step 4: locate the smallest bin at or past `nb`'s own index
    /// that actually holds a usable chunk, defensively clearing stale
    /// bitmap bits left behind by neighbor-coalescing unlinks.
    fn large_bin_search(&mut self, nb: usize) -> Option<*mut u8> {
        let mut start_idx = if nb < SMALLBIN_LIMIT {
            smallbin_index(nb) + 1
        } else {
            bin_index(nb)
        };

        loop {
            let idx = self.bin_map.scan_from(start_idx);
            if idx >= crate::bins::NBINS {
                return None;
            }
            if self.bins[idx].is_empty() {
                // Stale bit left by a coalescing unlink; clear and move on.
                self.bin_map.clear(idx);
                start_idx = idx + 1;
                continue;
            }

            if is_small_bin(idx) {
                let victim = unsafe {
                    let head = self.bin_head(idx);
                    let victim = bk(head);
                    dll_unlink(victim);
                    victim
                };
                if self.bins[idx].is_empty() {
                    self.bin_map.clear(idx);
                }
                self.bin_count_dec(idx);
                return Some(self.split_or_serve(victim, nb));
            }

            let found = unsafe {
                let head = self.bin_head(idx);
                let start = fd(head);
                let mut anchor = start;
                let mut best: Option<*mut u8> = None;
                loop {
                    let size = Chunk::from_raw(anchor).size();
                    if size >= nb {
                        best = Some(anchor);
                    } else {
                        break;
                    }
                    let next = fd_nextsize(anchor);
                    if next == start {
                        break;
                    }
                    anchor = next;
                }
                best
            };

            if let Some(anchor) = found {
                // Among several chunks of the anchor's exact size, prefer
                // the second from the head of the run over the anchor
                // itself: it's a plain `fd`/`bk` sibling with no
                // `fd_nextsize` bookkeeping to fix up, so removing it is
                // the cheap case.
                let victim = unsafe {
                    let head = self.bin_head(idx);
                    let sibling = fd(anchor);
                    if sibling != head && Chunk::from_raw(sibling).size() == Chunk::from_raw(anchor).size()
                    {
                        sibling
                    } else {
                        anchor
                    }
                };
                self.large_bin_remove(victim, idx);
                return Some(self.split_or_serve(victim, nb));
            }

            start_idx = idx + 1;
        }
    }

    /// Split `victim` into a leading `nb`-byte served chunk and, if room
    /// remains, a trailing remainder pushed to the unsorted bin.
    fn split_or_serve(&mut self, victim: *mut u8, nb: usize) -> *mut u8 {
        unsafe {
            let victim_c = Chunk::from_raw(victim);
            let victim_size = victim_c.size();
            let remainder_size = victim_size - nb;

            if remainder_size >= MIN_CHUNK_SIZE {
                victim_c.set_size_keep_flags(nb);
                let remainder = victim_c.next(nb);
                remainder.set_size_and_flags(remainder_size, PREV_INUSE);
                let succ = remainder.next(remainder_size);
                succ.clear_prev_inuse();
                remainder.write_footer(remainder_size);
                self.unsorted_push(remainder.as_ptr(), remainder_size);
            } else {
                mark_in_use(victim_c, victim_size);
            }

            victim
        }
    }

    fn unsorted_push(&mut self, chunk: *mut u8, size: usize) {
        unsafe {
            if size >= LINK_WORDS_SAFE_SIZE {
                set_fd_nextsize(chunk, ptr::null_mut());
                set_bk_nextsize(chunk, ptr::null_mut());
            }
            let head = self.bin_head(UNSORTED_BIN);
            dll_push_front(head, chunk);
        }
        // Counted under its eventual permanent bin right away, not a
        // separate unsorted-bin slot: a chunk parked here is logically
        // already that bin's occupant, just not physically relocated yet.
        self.bin_count_inc(bin_index(size));
    }

    fn top_try(&mut self, nb: usize) -> Option<*mut u8> {
        if self.top.is_null() {
            return None;
        }
        let served = self.top;
        unsafe {
            if self.top_size >= nb + MIN_CHUNK_SIZE {
                let top_c = Chunk::from_raw(served);
                top_c.set_size_and_flags(nb, PREV_INUSE);
                let new_top = top_c.next(nb);
                let new_size = self.top_size - nb;
                new_top.set_size_and_flags(new_size, PREV_INUSE);
                self.top = new_top.as_ptr();
                self.top_size = new_size;
                Some(served)
            } else if self.top_size >= nb {
                self.top = ptr::null_mut();
                self.top_size = 0;
                Some(served)
            } else {
                None
            }
        }
    }

    /// §4.2.2 step 6: move every fast-bin chunk into the coalesced,
    /// unsorted pool.
    fn consolidate_fastbins(&mut self) {
        for idx in 0..NFASTBINS {
            let mut cur = core::mem::replace(&mut self.fastbins[idx], ptr::null_mut());
            self.fastbin_count_reset(idx);
            while !cur.is_null() {
                let next = unsafe { fd(cur) };
                match self.coalesce_chunk(cur) {
                    Coalesced::Free(p, s) => self.unsorted_push(p, s),
                    Coalesced::MergedIntoTop => {}
                }
                cur = next;
            }
        }
    }

    /// Unconditionally unlink `ptr` (size `size`) from whichever doubly
    /// linked cycle it currently sits in — unsorted, small, or large — as
    /// discovered purely by following its own `fd`/`bk`. The bitmap is left
    /// untouched here (matching the teacher's tolerance for a stale "non-
    /// empty" bit, reconciled defensively wherever the bitmap is read).
    fn unlink_from_bin(&mut self, ptr: *mut u8, size: usize) {
        let idx = bin_index(size);
        unsafe {
            if is_large_bin(idx) && !fd_nextsize(ptr).is_null() {
                self.large_bin_fix_nextsize_on_remove(ptr);
            }
            dll_unlink(ptr);
        }
        self.bin_count_dec(idx);
    }

    /// §4.2.3 steps 2-4: merge `chunk_ptr` with any free neighbor in
    /// address order, preferring a direct merge into the top chunk.
    fn coalesce_chunk(&mut self, chunk_ptr: *mut u8) -> Coalesced {
        unsafe {
            let mut c = Chunk::from_raw(chunk_ptr);
            let mut size = c.size();

            if !c.prev_inuse() {
                let prev = c.prev();
                let prev_size = prev.size();
                self.unlink_from_bin(prev.as_ptr(), prev_size);
                c = prev;
                size += prev_size;
            }

            let succ = c.next(size);
            if succ.as_ptr() == self.top {
                self.top = c.as_ptr();
                self.top_size = size + self.top_size;
                Chunk::from_raw(self.top).set_size_keep_flags(self.top_size);
                return Coalesced::MergedIntoTop;
            }

            let succ_size = succ.size();
            let succ_succ = succ.next(succ_size);
            if !succ_succ.prev_inuse() {
                self.unlink_from_bin(succ.as_ptr(), succ_size);
                size += succ_size;
            }

            c.set_size_and_flags(size, PREV_INUSE);
            let new_succ = c.next(size);
            new_succ.clear_prev_inuse();
            c.write_footer(size);

            Coalesced::Free(c.as_ptr(), size)
        }
    }

    // ---- free -------------------------------------------------------

    /// # Safety
    /// `ptr` must be `None` or a pointer previously returned by one of this
    /// arena's allocate variants, not yet freed, and not concurrently
    /// accessed.
    pub unsafe fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else { return };
        unsafe {
            let chunk = Chunk::from_mem(ptr.as_ptr());

            if chunk.is_mmapped() {
                self.free_mmapped(chunk);
                return;
            }

            let size = chunk.size();
            if size <= self.max_fast {
                let idx = fastbin_index(size);
                if idx < NFASTBINS {
                    if self.fastbins[idx] == chunk.as_ptr() {
                        // Immediate double free of the same pointer.
                        self.handle_corruption();
                        return;
                    }
                    crate::bins::set_fd(chunk.as_ptr(), self.fastbins[idx]);
                    self.fastbins[idx] = chunk.as_ptr();
                    self.fastbin_count_inc(idx);
                    return;
                }
            }

            if !self.validate_for_free(chunk) {
                self.handle_corruption();
                return;
            }

            match self.coalesce_chunk(chunk.as_ptr()) {
                Coalesced::Free(p, s) => self.unsorted_push(p, s),
                Coalesced::MergedIntoTop => {}
            }

            self.maybe_trim();
        }
    }

    unsafe fn validate_for_free(&self, chunk: Chunk) -> bool {
        if chunk.as_ptr() == self.top {
            return false;
        }
        let size = chunk.size();
        if size < MIN_CHUNK_SIZE || !crate::chunk::is_aligned(size, crate::chunk::ALIGN) {
            return false;
        }
        let succ = chunk.next(size);
        if succ.as_ptr() == self.top {
            return true;
        }
        succ.prev_inuse()
    }

    fn handle_corruption(&mut self) {
        self.last_error = Some(crate::error::AllocError::Corruption);
        if self.abort_on_corruption {
            panic!("flatmalloc: heap corruption detected");
        }
    }

    unsafe fn free_mmapped(&mut self, chunk: Chunk) {
        let size = chunk.size();
        self.page_source.unmap_pages(chunk.0, size);
        self.n_mmaps -= 1;
        self.bytes_via_mapping -= size;
    }

    fn maybe_trim(&mut self) {
        if self.top.is_null() || self.top_size <= self.trim_threshold {
            return;
        }
        let page = self.page_source.page_size();
        let keep = align_up(self.top_pad.max(MIN_CHUNK_SIZE), page);
        if self.top_size <= keep {
            return;
        }
        let shrink = align_down(self.top_size - keep, page);
        if shrink == 0 {
            return;
        }
        if self.page_source.extend_heap(-(shrink as isize)).is_some() {
            self.top_size -= shrink;
            self.heap_end = unsafe { self.heap_end.sub(shrink) };
            self.bytes_via_heap_extend = self.bytes_via_heap_extend.saturating_sub(shrink);
        }
    }

    // ---- reallocate -------------------------------------------------

    /// # Safety
    /// `ptr` must be `None` or a pointer previously returned by one of this
    /// arena's allocate variants, not yet freed, and not concurrently
    /// accessed.
    pub unsafe fn reallocate(&mut self, ptr: Option<NonNull<u8>>, new_size: usize) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else { return self.allocate(new_size) };

        if new_size == 0 {
            self.free(Some(ptr));
            return None;
        }

        unsafe {
            let chunk = Chunk::from_mem(ptr.as_ptr());

            if chunk.is_mmapped() {
                return self.realloc_mmapped(chunk, new_size);
            }

            let nb = Self::normalize_request(new_size)?;
            let old_size = chunk.size();

            if nb <= old_size {
                if old_size - nb >= MIN_CHUNK_SIZE {
                    self.split_tail_and_free(chunk, nb, old_size);
                }
                return Some(ptr);
            }

            if self.try_grow_in_place(chunk, old_size, nb) {
                return Some(ptr);
            }

            let new_ptr = self.allocate(new_size)?;
            let copy_len = core::cmp::min(old_size - WORD, new_size);
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), copy_len);
            self.free(Some(ptr));
            Some(new_ptr)
        }
    }

    unsafe fn split_tail_and_free(&mut self, chunk: Chunk, nb: usize, old_size: usize) {
        chunk.set_size_keep_flags(nb);
        let remainder_size = old_size - nb;
        let remainder = chunk.next(nb);
        remainder.set_size_and_flags(remainder_size, PREV_INUSE);

        if !self.validate_for_free(remainder) {
            self.handle_corruption();
            return;
        }

        match self.coalesce_chunk(remainder.as_ptr()) {
            Coalesced::Free(p, s) => self.unsorted_push(p, s),
            Coalesced::MergedIntoTop => {}
        }
        self.maybe_trim();
    }

    unsafe fn try_grow_in_place(&mut self, chunk: Chunk, old_size: usize, nb: usize) -> bool {
        let succ = chunk.next(old_size);

        if succ.as_ptr() == self.top {
            let available = old_size + self.top_size;
            if available < nb {
                return false;
            }
            let remainder = available - nb;
            if remainder >= MIN_CHUNK_SIZE {
                chunk.set_size_keep_flags(nb);
                let new_top = chunk.next(nb);
                new_top.set_size_and_flags(remainder, PREV_INUSE);
                self.top = new_top.as_ptr();
                self.top_size = remainder;
            } else {
                chunk.set_size_keep_flags(available);
                self.top = ptr::null_mut();
                self.top_size = 0;
            }
            return true;
        }

        let succ_size = succ.size();
        let succ_succ = succ.next(succ_size);
        if succ_succ.prev_inuse() {
            return false; // successor is in use; nothing to absorb.
        }

        let available = old_size + succ_size;
        if available < nb {
            return false;
        }

        self.unlink_from_bin(succ.as_ptr(), succ_size);

        let remainder = available - nb;
        if remainder >= MIN_CHUNK_SIZE {
            chunk.set_size_keep_flags(nb);
            let new_succ = chunk.next(nb);
            new_succ.set_size_and_flags(remainder, PREV_INUSE);
            let after = new_succ.next(remainder);
            after.clear_prev_inuse();
            new_succ.write_footer(remainder);
            self.unsorted_push(new_succ.as_ptr(), remainder);
        } else {
            chunk.set_size_keep_flags(available);
            succ_succ.set_prev_inuse();
        }
        true
    }

    unsafe fn realloc_mmapped(&mut self, chunk: Chunk, new_size: usize) -> Option<NonNull<u8>> {
        let old_total = chunk.size();
        let new_ptr = self.allocate(new_size)?;
        let old_usable = old_total - HEADER_SIZE;
        let copy_len = core::cmp::min(old_usable, new_size);
        ptr::copy_nonoverlapping(chunk.to_mem(), new_ptr.as_ptr(), copy_len);
        self.free_mmapped(chunk);
        Some(new_ptr)
    }

    // ---- aligned allocation -------------------------------------------

    pub fn allocate_aligned(&mut self, align: usize, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || !align.is_power_of_two() {
            return None;
        }
        if align <= crate::chunk::ALIGN {
            return self.allocate(size);
        }

        let extra = align - 1;
        let padded_request = size.checked_add(extra)?.checked_add(MIN_CHUNK_SIZE)?;
        let mem = self.allocate(padded_request)?;

        unsafe {
            let chunk = Chunk::from_mem(mem.as_ptr());
            let chunk_size = chunk.size();
            let aligned_mem = align_up(mem.as_ptr() as usize, align) as *mut u8;

            if aligned_mem == mem.as_ptr() {
                return Some(mem);
            }

            let aligned_chunk_ptr = aligned_mem.sub(HEADER_SIZE);
            let pad_size = aligned_chunk_ptr as usize - chunk.as_ptr() as usize;
            debug_assert!(pad_size >= MIN_CHUNK_SIZE);

            let pad = chunk;
            let new_size = chunk_size - pad_size;
            let pad_flags = pad.flags();
            pad.set_size_and_flags(pad_size, pad_flags);

            let new_chunk = Chunk::from_raw(aligned_chunk_ptr);
            new_chunk.set_size_and_flags(new_size, PREV_INUSE);

            match self.coalesce_chunk(pad.as_ptr()) {
                Coalesced::Free(p, s) => self.unsorted_push(p, s),
                Coalesced::MergedIntoTop => {}
            }
            self.maybe_trim();

            Some(NonNull::new_unchecked(new_chunk.to_mem()))
        }
    }

    pub fn allocate_page_aligned(&mut self, size: usize) -> Option<NonNull<u8>> {
        let page = self.page_source.page_size();
        self.allocate_aligned(page, size)
    }

    pub unsafe fn usable_size(&self, ptr: Option<NonNull<u8>>) -> usize {
        let Some(ptr) = ptr else { return 0 };
        let chunk = Chunk::from_mem(ptr.as_ptr());
        let size = chunk.size();
        if chunk.is_mmapped() {
            size - HEADER_SIZE
        } else {
            size - WORD
        }
    }

    // ---- heap growth ----------------------------------------------------

    fn mmap_alloc(&mut self, nb: usize) -> Option<*mut u8> {
        let page = self.page_source.page_size();
        let total = align_up(nb, page);
        let base = self.page_source.map_pages(total)?;
        unsafe {
            let chunk = Chunk::from_raw(base.as_ptr());
            chunk.set_size_and_flags(total, PREV_INUSE | crate::chunk::IS_MMAPPED);
        }
        self.n_mmaps += 1;
        self.n_mmaps_max = self.n_mmaps_max.max(self.n_mmaps);
        self.bytes_via_mapping += total;
        self.mapping_high_water = self.mapping_high_water.max(self.bytes_via_mapping);
        Some(base.as_ptr())
    }

    /// §4.2.2 step 8: grow (or start) the contiguous heap segment by at
    /// least `nb + top_pad` bytes, rounded up to a page.
    fn grow_heap_for(&mut self, nb: usize) -> bool {
        let page = self.page_source.page_size();
        let want = nb.saturating_add(self.top_pad);
        let want = align_up(want.max(page), page);

        let Some(old_break) = self.page_source.extend_heap(want as isize) else {
            return false;
        };

        unsafe {
            if self.heap_base.is_null() {
                self.heap_base = old_break.as_ptr();
                let chunk = Chunk::from_raw(old_break.as_ptr());
                chunk.set_size_and_flags(want, PREV_INUSE);
                self.top = chunk.as_ptr();
                self.top_size = want;
            } else if old_break.as_ptr() == self.heap_end {
                self.top_size += want;
                if !self.top.is_null() {
                    Chunk::from_raw(self.top).set_size_keep_flags(self.top_size);
                } else {
                    // Top had been fully consumed; the new memory starts a
                    // fresh top chunk right where the heap left off.
                    let chunk = Chunk::from_raw(old_break.as_ptr());
                    chunk.set_size_and_flags(want, PREV_INUSE);
                    self.top = chunk.as_ptr();
                    self.top_size = want;
                }
            } else {
                // Discontinuous with the previous segment end: whatever sat
                // there (if anything) is permanently stranded in-use, never
                // coalesced or freed again. Start a fresh top here.
                let chunk = Chunk::from_raw(old_break.as_ptr());
                chunk.set_size_and_flags(want, PREV_INUSE);
                self.top = chunk.as_ptr();
                self.top_size = want;
            }
            self.heap_end = old_break.as_ptr().add(want);
        }

        self.bytes_via_heap_extend += want;
        self.heap_extend_high_water = self.heap_extend_high_water.max(self.bytes_via_heap_extend);
        true
    }
}

/// Splice `node` into the regular `fd`/`bk` chain immediately after `at`.
unsafe fn link_after(at: *mut u8, node: *mut u8) {
    let after = fd(at);
    crate::bins::set_fd(at, node);
    crate::bins::set_bk(node, at);
    crate::bins::set_fd(node, after);
    crate::bins::set_bk(after, node);
}

/// Splice `node` into the regular `fd`/`bk` chain strictly between `before`
/// and `after` (which must already be adjacent).
unsafe fn link_between(before: *mut u8, node: *mut u8, after: *mut u8) {
    crate::bins::set_fd(before, node);
    crate::bins::set_bk(node, before);
    crate::bins::set_fd(node, after);
    crate::bins::set_bk(after, node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::SystemPageSource;

    fn arena() -> Arena<SystemPageSource> {
        Arena::new(SystemPageSource::new())
    }

    #[test]
    fn allocate_and_free_roundtrip() {
        let mut a = arena();
        let p = a.allocate(64).expect("allocate");
        unsafe {
            core::ptr::write_bytes(p.as_ptr(), 0xAB, 64);
            a.free(Some(p));
        }
    }

    #[test]
    fn zero_size_returns_null() {
        let mut a = arena();
        assert!(a.allocate(0).is_none());
    }

    #[test]
    fn reused_after_free_fits_smaller_request() {
        let mut a = arena();
        let p = a.allocate(256).expect("allocate");
        unsafe { a.free(Some(p)) };
        let q = a.allocate(64).expect("allocate");
        unsafe { a.free(Some(q)) };
    }

    #[test]
    fn realloc_grow_preserves_contents() {
        let mut a = arena();
        let p = a.allocate(32).expect("allocate");
        unsafe {
            core::ptr::write_bytes(p.as_ptr(), 0x5A, 32);
        }
        let q = unsafe { a.reallocate(Some(p), 256).expect("reallocate") };
        unsafe {
            for i in 0..32 {
                assert_eq!(*q.as_ptr().add(i), 0x5A);
            }
            a.free(Some(q));
        }
    }

    #[test]
    fn realloc_shrink_in_place() {
        let mut a = arena();
        let p = a.allocate(512).expect("allocate");
        let q = unsafe { a.reallocate(Some(p), 32).expect("reallocate") };
        assert_eq!(p, q);
        unsafe { a.free(Some(q)) };
    }

    #[test]
    fn aligned_allocation_honors_alignment() {
        let mut a = arena();
        let p = a.allocate_aligned(4096, 128).expect("allocate_aligned");
        assert_eq!(p.as_ptr() as usize % 4096, 0);
        unsafe { a.free(Some(p)) };
    }

    #[test]
    fn zeroed_allocation_is_all_zero() {
        let mut a = arena();
        let p = a.allocate_zeroed(16, 8).expect("allocate_zeroed");
        unsafe {
            for i in 0..128 {
                assert_eq!(*p.as_ptr().add(i), 0);
            }
            a.free(Some(p));
        }
    }

    #[test]
    fn large_bin_split_and_search() {
        let mut a = arena();
        let mut ptrs = Vec::new();
        for _ in 0..8 {
            ptrs.push(a.allocate(4096).expect("allocate"));
        }
        for p in ptrs {
            unsafe { a.free(Some(p)) };
        }
        let p = a.allocate(2048).expect("allocate after large coalesce");
        unsafe { a.free(Some(p)) };
    }

    #[test]
    fn usable_size_is_at_least_requested() {
        let mut a = arena();
        let p = a.allocate(100).expect("allocate");
        let usable = unsafe { a.usable_size(Some(p)) };
        assert!(usable >= 100);
        unsafe { a.free(Some(p)) };
    }

    #[test]
    fn immediate_double_free_is_reported_as_corruption() {
        let mut a = arena();
        let p = a.allocate(32).expect("allocate");
        assert_eq!(a.last_error(), None);
        unsafe {
            a.free(Some(p));
            // Same pointer, still at the head of its fastbin: a no-op,
            // not a second push onto the same bin.
            a.free(Some(p));
        }
        assert_eq!(a.last_error(), Some(crate::error::AllocError::Corruption));
    }

    #[test]
    #[cfg(feature = "counters")]
    fn fastbin_histogram_tracks_parked_chunks() {
        let mut a = arena();
        let p = a.allocate(16).expect("allocate");
        let idx = fastbin_index(Arena::<SystemPageSource>::normalize_request(16).unwrap());
        assert_eq!(a.stats().fastbin_histogram[idx], 0);
        unsafe { a.free(Some(p)) };
        assert_eq!(a.stats().fastbin_histogram[idx], 1);
        a.allocate(16).expect("allocate");
        assert_eq!(a.stats().fastbin_histogram[idx], 0);
    }

    #[test]
    #[cfg(feature = "counters")]
    fn bin_histogram_counts_a_large_freed_chunk() {
        let mut a = arena();
        // Keep a second chunk allocated after it so freeing the first
        // doesn't merge straight into the top chunk, which would bypass
        // the bin histogram entirely.
        let p = a.allocate(4096).expect("allocate");
        let _guard = a.allocate(16).expect("allocate");
        let idx = bin_index(Arena::<SystemPageSource>::normalize_request(4096).unwrap());
        assert_eq!(a.stats().bin_histogram[idx], 0);
        unsafe { a.free(Some(p)) };
        assert_eq!(a.stats().bin_histogram[idx], 1);
    }
}
