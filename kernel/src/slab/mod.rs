//! Kernel object allocator (slab allocator).
//!
//! Ported from the Bonwick-style cache in
//! `original_source/kernel/domain/alloc/slab.c` — the newer of the two slab
//! implementations in the original source and the one spec §9 calls
//! authoritative. A slab is one [`SLAB_SIZE`]-byte region; its metadata
//! trailer sits at the high end (see [`SlabMeta`]), buffers are laid out
//! low-to-high starting at a per-slab color offset, and the free-list link
//! (bufctl) is placed according to [`layout::Layout`], computed once per
//! cache rather than branched on every allocation.

mod layout;

use core::mem::size_of;
use core::ptr::NonNull;

use layout::Layout;
use spin::Mutex;

/// Size of one slab; one page on this kernel.
pub const SLAB_SIZE: usize = 4096;

/// Default number of empty slabs a cache retains across a reap.
pub const SLAB_DEFAULT_WORKING_SET: usize = 1;

const POISON_DEAD: u32 = 0xdead_c0de;
const POISON_ALIVE: u32 = 0xa11a_11ed;
const RED_ZONE_VALUE: u32 = 0xfeed_face;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlabFlags: u32 {
        /// Align objects on at least the CPU data-cache line size.
        const HWCACHE_ALIGN = 1 << 0;
        /// The bufctl may safely live inside the object without clobbering
        /// constructed state.
        const COMPACT       = 1 << 1;
        /// Append a guard word and check it on free to catch writes past
        /// the end of an object.
        const RED_ZONE       = 1 << 2;
        /// Fill free/uninitialized objects with a recognizable pattern to
        /// catch uninitialized reads and writes-after-free.
        const POISON         = 1 << 3;
    }
}

/// Source of page-sized, page-aligned memory for slabs.
///
/// Implemented by the kernel's [`crate::mm::page_alloc`] in production and
/// by a heap-backed stand-in in tests, so the cache logic itself never
/// touches `PageAlloc` directly.
pub trait PageSource {
    fn alloc_page() -> Option<NonNull<u8>>;
    /// # Safety
    /// `page` must have been returned by `alloc_page` on this same source
    /// and not already freed.
    unsafe fn free_page(page: NonNull<u8>);
}

#[repr(C)]
struct Bufctl {
    next: Option<NonNull<Bufctl>>,
}

#[repr(C)]
struct SlabMeta {
    /// Back-pointer to the owning cache, used by `free` to find the cache
    /// (and to fatally detect a free to the wrong cache) from the buffer
    /// address alone.
    cache: *const (),
    next: Option<NonNull<SlabMeta>>,
    prev: Option<NonNull<SlabMeta>>,
    free_list: Option<NonNull<Bufctl>>,
    obj_count: u32,
    colour: u32,
}

/// Intrusive doubly-linked list of slabs with an explicit (`None`) empty
/// sentinel, replacing the source's convention of a garbage head `prev`
/// pointer (spec §9).
#[derive(Default)]
struct SlabList {
    head: Option<NonNull<SlabMeta>>,
}

impl SlabList {
    const fn new() -> Self {
        SlabList { head: None }
    }

    fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// # Safety
    /// `slab` must not already be linked into any list.
    unsafe fn push_front(&mut self, slab: NonNull<SlabMeta>) {
        unsafe {
            (*slab.as_ptr()).prev = None;
            (*slab.as_ptr()).next = self.head;
            if let Some(head) = self.head {
                (*head.as_ptr()).prev = Some(slab);
            }
        }
        self.head = Some(slab);
    }

    /// # Safety
    /// `slab` must currently be linked into this exact list.
    unsafe fn remove(&mut self, slab: NonNull<SlabMeta>) {
        unsafe {
            let prev = (*slab.as_ptr()).prev;
            let next = (*slab.as_ptr()).next;

            match prev {
                Some(p) => (*p.as_ptr()).next = next,
                None => self.head = next,
            }

            if let Some(n) = next {
                (*n.as_ptr()).prev = prev;
            }

            (*slab.as_ptr()).next = None;
            (*slab.as_ptr()).prev = None;
        }
    }

    fn pop_front(&mut self) -> Option<NonNull<SlabMeta>> {
        let head = self.head?;
        unsafe { self.remove(head) };
        Some(head)
    }
}

struct CacheState {
    empty: SlabList,
    partial: SlabList,
    full: SlabList,
    empty_count: usize,
    working_set: usize,
    next_colour: usize,
}

/// A typed, same-size object cache over pages.
pub struct SlabCache<P: PageSource> {
    name: &'static str,
    ctor: Option<fn(*mut u8, usize)>,
    dtor: Option<fn(*mut u8, usize)>,
    flags: SlabFlags,
    layout: Layout,
    state: Mutex<CacheState>,
    _source: core::marker::PhantomData<P>,
}

// SAFETY: a `SlabCache` is only ever touched from the single kernel thread
// permitted to execute at a time (spec §5); `Sync` lets it live in a
// `'static`.
unsafe impl<P: PageSource> Sync for SlabCache<P> {}

impl<P: PageSource> SlabCache<P> {
    /// Initialize a cache descriptor. Does not allocate any slabs; the first
    /// slab is created lazily on the first `alloc()`, which also covers the
    /// bootstrap case the source handles by eagerly allocating one via the
    /// boot-time allocator.
    pub fn new(
        name: &'static str,
        obj_size: usize,
        alignment: usize,
        ctor: Option<fn(*mut u8, usize)>,
        dtor: Option<fn(*mut u8, usize)>,
        flags: SlabFlags,
        dcache_alignment: usize,
    ) -> Self {
        let layout = Layout::new(obj_size, alignment, ctor.is_some(), flags, dcache_alignment);

        SlabCache {
            name,
            ctor,
            dtor,
            flags,
            layout,
            state: Mutex::new(CacheState {
                empty: SlabList::new(),
                partial: SlabList::new(),
                full: SlabList::new(),
                empty_count: 0,
                working_set: SLAB_DEFAULT_WORKING_SET,
                next_colour: 0,
            }),
            _source: core::marker::PhantomData,
        }
    }

    pub fn set_working_set(&self, n: usize) {
        self.state.lock().working_set = n;
    }

    fn slab_region(slab: NonNull<SlabMeta>) -> *mut u8 {
        (slab.as_ptr() as usize - (SLAB_SIZE - layout::TRAILER_SIZE)) as *mut u8
    }

    fn buffer_ptr(region: *mut u8, colour: usize, alloc_size: usize, index: usize) -> *mut u8 {
        unsafe { region.add(colour + index * alloc_size) }
    }

    fn bufctl_of(&self, buffer: *mut u8) -> NonNull<Bufctl> {
        unsafe { NonNull::new_unchecked(buffer.add(self.layout.bufctl_offset) as *mut Bufctl) }
    }

    /// Carve a freshly-allocated page into a new empty slab, thread every
    /// buffer onto its free list, and return it linked nowhere yet.
    fn init_slab(&self, page: NonNull<u8>, colour: usize) -> NonNull<SlabMeta> {
        let region = page.as_ptr();
        let meta_ptr = unsafe { region.add(SLAB_SIZE - layout::TRAILER_SIZE) } as *mut SlabMeta;

        unsafe {
            meta_ptr.write(SlabMeta {
                cache: self as *const Self as *const (),
                next: None,
                prev: None,
                free_list: None,
                obj_count: 0,
                colour: colour as u32,
            });
        }

        let mut head: Option<NonNull<Bufctl>> = None;

        for i in (0..self.layout.buffers_per_slab).rev() {
            let buffer = Self::buffer_ptr(region, colour, self.layout.alloc_size, i);

            if self.flags.contains(SlabFlags::POISON) {
                self.fill_u32(buffer, self.layout.obj_size, POISON_DEAD);

                if self.flags.contains(SlabFlags::RED_ZONE) {
                    self.write_guard_word(buffer, RED_ZONE_VALUE);
                }
            } else if let Some(ctor) = self.ctor {
                ctor(buffer, self.layout.obj_size);
            }

            let bufctl = self.bufctl_of(buffer);
            unsafe { bufctl.as_ptr().write(Bufctl { next: head }) };
            head = Some(bufctl);
        }

        unsafe { (*meta_ptr).free_list = head };

        NonNull::new(meta_ptr).unwrap()
    }

    fn fill_u32(&self, buffer: *mut u8, len: usize, value: u32) {
        let words = len / size_of::<u32>();
        let ptr = buffer as *mut u32;
        for i in 0..words {
            unsafe { ptr.add(i).write(value) };
        }
    }

    fn write_guard_word(&self, buffer: *mut u8, value: u32) {
        let ptr = (buffer as *mut u32).wrapping_add(self.layout.obj_size / size_of::<u32>());
        unsafe { ptr.write(value) };
    }

    fn read_guard_word(&self, buffer: *mut u8) -> u32 {
        let ptr = (buffer as *mut u32).wrapping_add(self.layout.obj_size / size_of::<u32>());
        unsafe { ptr.read() }
    }

    /// Allocate one object. Returns `NULL` (as a `None`) on page shortage,
    /// never on internal inconsistency — those are fatal.
    pub fn alloc(&self) -> Option<*mut u8> {
        let mut state = self.state.lock();

        let slab = if let Some(slab) = state.partial.head {
            slab
        } else if let Some(slab) = state.empty.pop_front() {
            state.empty_count -= 1;
            unsafe { state.partial.push_front(slab) };
            slab
        } else {
            let page = P::alloc_page()?;
            let colour = state.next_colour;

            state.next_colour = if state.next_colour < self.layout.max_colour {
                state.next_colour + self.layout.alignment
            } else {
                0
            };

            let slab = self.init_slab(page, colour);
            unsafe { state.partial.push_front(slab) };
            slab
        };

        let bufctl = unsafe { (*slab.as_ptr()).free_list }.expect("partial/empty slab with no free buffers");
        let next = unsafe { (*bufctl.as_ptr()).next };

        unsafe {
            (*slab.as_ptr()).free_list = next;
            (*slab.as_ptr()).obj_count += 1;
        }

        if next.is_none() {
            // Last buffer taken: move slab from partial to full.
            unsafe {
                state.partial.remove(slab);
                state.full.push_front(slab);
            }
        }

        let buffer = unsafe { (bufctl.as_ptr() as *mut u8).sub(self.layout.bufctl_offset) };

        drop(state);
        self.on_alloc(buffer);

        Some(buffer)
    }

    fn on_alloc(&self, buffer: *mut u8) {
        if self.flags.contains(SlabFlags::POISON) {
            let mut dump_lines = 0u32;
            let words = self.layout.obj_size / size_of::<u32>();
            let ptr = buffer as *mut u32;

            for idx in 0..words {
                let value = unsafe { ptr.add(idx).read() };

                if value != POISON_DEAD {
                    if dump_lines == 0 {
                        log::warn!("{}: write to freed object detected, buffer {:p}", self.name, buffer);
                    }
                    if dump_lines < 4 {
                        log::warn!("  value {:#x} at byte offset {}", value, idx * size_of::<u32>());
                    }
                    dump_lines += 1;
                }

                unsafe { ptr.add(idx).write(POISON_ALIVE) };
            }

            if self.flags.contains(SlabFlags::RED_ZONE) {
                let value = self.read_guard_word(buffer);
                if value != RED_ZONE_VALUE {
                    log::warn!(
                        "{}: write past end of freed object, buffer {:p} value {:#x}",
                        self.name,
                        buffer,
                        value
                    );
                }
                self.write_guard_word(buffer, RED_ZONE_VALUE);
            }

            if let Some(ctor) = self.ctor {
                ctor(buffer, self.layout.obj_size);
            }
        } else if self.flags.contains(SlabFlags::RED_ZONE) {
            self.write_guard_word(buffer, RED_ZONE_VALUE);
        }
    }

    /// Return `buffer` to its slab.
    ///
    /// # Safety
    /// `buffer` must have been returned by `alloc()` on this exact cache and
    /// not already freed.
    pub unsafe fn free(&self, buffer: *mut u8) {
        let region = ((buffer as usize) & !(SLAB_SIZE - 1)) as *mut u8;
        let meta_ptr = unsafe { region.add(SLAB_SIZE - layout::TRAILER_SIZE) } as *mut SlabMeta;
        let slab = unsafe { NonNull::new_unchecked(meta_ptr) };

        if unsafe { (*meta_ptr).cache } != self as *const Self as *const () {
            crate::error::fatal("slab free to wrong cache");
        }

        if self.flags.contains(SlabFlags::RED_ZONE) {
            let value = self.read_guard_word(buffer);
            if value != RED_ZONE_VALUE {
                log::warn!(
                    "{}: detected write past the end of object, buffer {:p} value {:#x}",
                    self.name,
                    buffer,
                    value
                );
            }
            self.write_guard_word(buffer, RED_ZONE_VALUE);
        }

        if self.flags.contains(SlabFlags::POISON) {
            if let Some(dtor) = self.dtor {
                dtor(buffer, self.layout.obj_size);
            }
            self.fill_u32(buffer, self.layout.obj_size, POISON_DEAD);
        }

        let mut state = self.state.lock();
        let was_full = unsafe { (*meta_ptr).free_list }.is_none();

        if was_full {
            unsafe {
                state.full.remove(slab);
                state.partial.push_front(slab);
            }
        }

        let bufctl = self.bufctl_of(buffer);
        unsafe {
            (*bufctl.as_ptr()).next = (*meta_ptr).free_list;
            (*meta_ptr).free_list = Some(bufctl);
            (*meta_ptr).obj_count -= 1;
        }

        if unsafe { (*meta_ptr).obj_count } == 0 {
            unsafe {
                state.partial.remove(slab);
                state.empty.push_front(slab);
            }
            state.empty_count += 1;
        }
    }

    /// Return slabs in excess of the working set to the page allocator.
    pub fn reap(&self) {
        loop {
            let slab = {
                let mut state = self.state.lock();
                if state.empty_count <= state.working_set {
                    break;
                }
                let slab = state.empty.pop_front().expect("empty_count inconsistent with list");
                state.empty_count -= 1;
                slab
            };

            self.destroy_slab(slab);
        }
    }

    fn destroy_slab(&self, slab: NonNull<SlabMeta>) {
        debug_assert_eq!(unsafe { (*slab.as_ptr()).obj_count }, 0);

        let region = Self::slab_region(slab);
        let colour = unsafe { (*slab.as_ptr()).colour } as usize;

        if let Some(dtor) = self.dtor {
            if !self.flags.contains(SlabFlags::POISON) {
                for i in 0..self.layout.buffers_per_slab {
                    let buffer = Self::buffer_ptr(region, colour, self.layout.alloc_size, i);
                    dtor(buffer, self.layout.obj_size);
                }
            }
        }

        unsafe { P::free_page(NonNull::new_unchecked(region)) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{alloc_zeroed, dealloc, Layout as AllocLayout};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct HeapPages;

    static LIVE_PAGES: AtomicUsize = AtomicUsize::new(0);

    fn page_layout() -> AllocLayout {
        AllocLayout::from_size_align(SLAB_SIZE, SLAB_SIZE).unwrap()
    }

    impl PageSource for HeapPages {
        fn alloc_page() -> Option<NonNull<u8>> {
            let ptr = unsafe { alloc_zeroed(page_layout()) };
            LIVE_PAGES.fetch_add(1, Ordering::SeqCst);
            NonNull::new(ptr)
        }

        unsafe fn free_page(page: NonNull<u8>) {
            LIVE_PAGES.fetch_sub(1, Ordering::SeqCst);
            unsafe { dealloc(page.as_ptr(), page_layout()) };
        }
    }

    #[test]
    fn alloc_free_symmetry_no_debug_flags() {
        let cache: SlabCache<HeapPages> =
            SlabCache::new("test48", 48, 16, None, None, SlabFlags::empty(), 16);
        cache.set_working_set(1);

        let mut bufs = Vec::new();
        for i in 0..1000 {
            let p = cache.alloc().expect("alloc should not fail for a heap-backed source");
            unsafe { *p = (i % 256) as u8 };
            bufs.push(p);
        }

        for p in bufs.into_iter().rev() {
            unsafe { cache.free(p) };
        }

        cache.reap();
        assert!(LIVE_PAGES.load(Ordering::SeqCst) <= 1);
    }

    #[test]
    fn red_zone_detects_overwrite_and_free_still_succeeds() {
        let cache: SlabCache<HeapPages> =
            SlabCache::new("rz16", 16, 4, None, None, SlabFlags::RED_ZONE, 16);

        let p = cache.alloc().unwrap();
        unsafe {
            // obj_size rounds 16 up to a multiple of 4 already; write one
            // byte into the guard word to trip detection on free.
            let guard = (p as *mut u8).add(16);
            *guard = 0xaa;
            cache.free(p);
        }
        // No panic: the corruption is logged, not fatal (spec §7).
    }

    #[test]
    fn poison_detects_use_after_free() {
        let cache: SlabCache<HeapPages> =
            SlabCache::new("poison16", 16, 4, None, None, SlabFlags::POISON, 16);

        let p = cache.alloc().unwrap();
        unsafe {
            cache.free(p);
            // Corrupt the freed (poisoned) object.
            *(p as *mut u8) = 0x42;
        }
        // Re-allocating the same buffer should detect and log the mismatch,
        // not panic.
        let _ = cache.alloc();
    }

    proptest::proptest! {
        /// Slab refcount invariant (spec §8): outstanding allocations from a
        /// cache always equals allocs minus frees, for any interleaving of
        /// alloc/free the script below drives.
        #[test]
        fn refcount_matches_alloc_minus_free(ops in proptest::collection::vec(proptest::bool::ANY, 1..500)) {
            let cache: SlabCache<HeapPages> =
                SlabCache::new("proptest32", 32, 8, None, None, SlabFlags::empty(), 8);

            let mut outstanding: Vec<*mut u8> = Vec::new();
            for alloc_op in ops {
                if alloc_op || outstanding.is_empty() {
                    let p = cache.alloc().expect("heap-backed source never exhausts");
                    outstanding.push(p);
                } else {
                    let p = outstanding.pop().unwrap();
                    unsafe { cache.free(p) };
                }
            }

            for p in outstanding.drain(..) {
                unsafe { cache.free(p) };
            }
            cache.reap();
            proptest::prop_assert!(LIVE_PAGES.load(Ordering::SeqCst) <= 1);
        }
    }
}
