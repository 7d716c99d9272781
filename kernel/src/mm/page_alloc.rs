//! Post-boot page-frame allocator: a simple O(1) freelist of already
//! kernel-mapped pages.
//!
//! Grounded in the allocator-as-a-pool shape of the teacher's
//! `mm/frame_allocator.rs` (a `Mutex`-guarded global, `const fn new()`,
//! `NonNull`-based bookkeeping) but deliberately without its NUMA/buddy/
//! bitmap machinery: spec §4.2 calls for a plain freelist, O(1) alloc, NULL
//! (here `None`) on exhaustion.

use core::ptr::NonNull;

use spin::Mutex;

use crate::mm::PAGE_SIZE;
use crate::slab::PageSource;

/// Intrusive link written into the first word of a free page. Valid only
/// while the page is on the freelist; an allocated page's contents are
/// entirely the caller's.
struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

struct PageAllocState {
    free_list: Option<NonNull<FreeNode>>,
    free_count: usize,
}

// SAFETY: all access to `free_list` goes through `PAGE_ALLOC`'s `Mutex`.
unsafe impl Send for PageAllocState {}

impl PageAllocState {
    const fn new() -> Self {
        PageAllocState {
            free_list: None,
            free_count: 0,
        }
    }

    fn pop(&mut self) -> Option<NonNull<u8>> {
        let node = self.free_list?;
        // SAFETY: every node on the list was pushed by `push` below, which
        // requires `page` to point at a valid, exclusively-owned page.
        self.free_list = unsafe { node.as_ref().next };
        self.free_count -= 1;
        Some(node.cast())
    }

    /// # Safety
    /// `page` must point at a `PAGE_SIZE`-aligned, kernel-mapped page not
    /// currently referenced by anything else.
    unsafe fn push(&mut self, page: NonNull<u8>) {
        let mut node = page.cast::<FreeNode>();
        unsafe {
            node.as_mut().next = self.free_list;
        }
        self.free_list = Some(node);
        self.free_count += 1;
    }
}

lazy_static::lazy_static! {
    static ref PAGE_ALLOC: Mutex<PageAllocState> = Mutex::new(PageAllocState::new());
}

/// Hand a range of `count` contiguous, already kernel-mapped, `PAGE_SIZE`
/// pages starting at `base` to the allocator's pool. Called once, from the
/// boot sequence, after `BootAlloc` and `PageTables` have finished carving
/// out the kernel image, boot heap, and fast-path kernel tables.
///
/// # Safety
/// `[base, base + count * PAGE_SIZE)` must be kernel-mapped, page-aligned,
/// and not otherwise owned.
pub unsafe fn seed(base: usize, count: usize) {
    let mut state = PAGE_ALLOC.lock();
    for i in 0..count {
        let addr = base + i * PAGE_SIZE;
        let page = NonNull::new(addr as *mut u8).unwrap_or_else(|| crate::error::fatal("page_alloc: seed with null base"));
        unsafe { state.push(page) };
    }
}

/// Number of pages currently free. Exposed for diagnostics and tests only.
pub fn free_count() -> usize {
    PAGE_ALLOC.lock().free_count
}

/// Kernel-mapped pool allocator implementing [`PageSource`], so
/// [`crate::slab::SlabCache`] draws its pages from the same pool as every
/// other post-boot consumer (page tables, address spaces).
pub struct PageAlloc;

impl PageSource for PageAlloc {
    fn alloc_page() -> Option<NonNull<u8>> {
        PAGE_ALLOC.lock().pop()
    }

    unsafe fn free_page(page: NonNull<u8>) {
        unsafe { PAGE_ALLOC.lock().push(page) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{alloc_zeroed, dealloc, Layout};

    fn layout_for(count: usize) -> Layout {
        Layout::from_size_align(count * PAGE_SIZE, PAGE_SIZE).unwrap()
    }

    #[test]
    fn alloc_is_lifo_and_exhausts_to_none() {
        let layout = layout_for(4);
        let base = unsafe { alloc_zeroed(layout) };
        assert!(!base.is_null());

        unsafe { seed(base as usize, 4) };
        assert_eq!(free_count(), 4);

        let mut pages = std::vec::Vec::new();
        for _ in 0..4 {
            pages.push(PageAlloc::alloc_page().expect("pool should not be exhausted yet"));
        }
        assert!(PageAlloc::alloc_page().is_none());
        assert_eq!(free_count(), 0);

        for page in pages {
            unsafe { PageAlloc::free_page(page) };
        }
        assert_eq!(free_count(), 4);

        unsafe { dealloc(base, layout) };
    }
}
