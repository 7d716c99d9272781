//! Format-agnostic page table primitives, dispatched once at boot to one of
//! two concrete formats.
//!
//! Grounded in `original_source/kernel/hal/vm.c` (classical) and
//! `original_source/kernel/hal/vm_pae.c` (extended); the dispatch-by-trait-
//! object shape follows the teacher's `mm/page_table.rs` split between a
//! thin architecture-neutral surface and per-format internals.

pub mod classical;
pub mod extended;

extern crate alloc;

use spin::Once;

use crate::error::{Errno, KResult};

bitflags::bitflags! {
    /// User-facing protection requested for a mapping (spec §4.3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProtFlags: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Architecture-neutral semantics a [`PagingFormat`] encodes into its
    /// native entry representation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PtFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
        const GLOBAL   = 1 << 3;
        /// Not executable. Only the extended format can encode this; the
        /// classical format silently drops it (every classical mapping is
        /// executable, per spec §4.3).
        const NX       = 1 << 4;
    }
}

/// Reject `PROT_WRITE | PROT_EXEC` up front (W^X policy, spec §4.3). Mapping
/// of the individual bits into [`PtFlags`] is otherwise delegated to the
/// active [`PagingFormat`] via [`resolve_prot`], since only the extended
/// format can express "not executable".
pub fn check_prot(prot: ProtFlags) -> KResult<()> {
    if prot.contains(ProtFlags::WRITE | ProtFlags::EXEC) {
        return Err(Errno::Enotsup);
    }
    Ok(())
}

/// Translate a validated [`ProtFlags`] (already passed through
/// [`check_prot`]) plus a user/kernel classification into the [`PtFlags`]
/// the active format should encode. No access bits at all maps to an
/// unmapped ("present=0") entry, per spec §4.3.
pub fn resolve_prot(prot: ProtFlags, user: bool, format: &dyn PagingFormat) -> PtFlags {
    if prot.is_empty() {
        return PtFlags::empty();
    }

    let mut flags = PtFlags::PRESENT;
    if prot.contains(ProtFlags::WRITE) {
        flags |= PtFlags::WRITABLE;
    }
    if !prot.contains(ProtFlags::EXEC) && format.supports_nx() {
        flags |= PtFlags::NX;
    }
    if user {
        flags |= PtFlags::USER;
    } else {
        flags |= PtFlags::GLOBAL;
    }
    flags
}

/// Whether a root-level (top-of-hierarchy) entry was altered by a batch of
/// page table edits. When set, the active address space's CR3-equivalent
/// must be reloaded in full rather than invalidated page by page (spec
/// §4.3's `reload_cr3` flag).
#[derive(Debug, Default, Clone, Copy)]
pub struct InvalidationBatch {
    pub reload_root: bool,
    pub pages_touched: u8,
}

impl InvalidationBatch {
    pub const fn new() -> Self {
        InvalidationBatch {
            reload_root: false,
            pages_touched: 0,
        }
    }

    pub fn note_leaf(&mut self) {
        self.pages_touched = self.pages_touched.saturating_add(1);
    }

    pub fn note_root(&mut self) {
        self.reload_root = true;
    }
}

/// A format-agnostic view of one level of a page table hierarchy: a
/// `PAGE_SIZE` page of fixed-width entries, addressed by its kernel virtual
/// address (pages handed out by [`crate::mm::page_alloc::PageAlloc`] are
/// already kernel-mapped, so the page's own address doubles as the pointer
/// used to read and write its entries).
///
/// # Safety
/// Implementors operate on raw memory; callers must ensure `table` points
/// at a page-sized, appropriately-aligned region actually holding entries
/// of this format and that `index` is in bounds (`< entries_per_table`).
pub unsafe trait PagingFormat: Send + Sync {
    fn entry_size(&self) -> usize;
    fn entries_per_table(&self) -> usize {
        crate::mm::PAGE_SIZE / self.entry_size()
    }

    /// Number of entries in the top-of-hierarchy table (1024 for a
    /// classical page directory, 4 for an extended PDPT).
    fn top_level_entries(&self) -> usize;

    /// Number of levels below the top (1 for classical: PD -> PT; 2 for
    /// extended: PDPT -> PD -> PT).
    fn levels_below_top(&self) -> usize;

    fn supports_nx(&self) -> bool;

    /// Index into the table at `level` (0 = top) that covers `vaddr`.
    /// `level` ranges `0..=levels_below_top`; the last value is the leaf
    /// (page-table) level.
    fn index_at_level(&self, vaddr: usize, level: usize) -> usize;

    /// Physical address an entry points at, or `None` if not present.
    unsafe fn get_pte_paddr(&self, table: usize, index: usize) -> Option<usize>;

    unsafe fn set_pte(&self, table: usize, index: usize, paddr: usize, flags: PtFlags);

    unsafe fn clear_pte(&self, table: usize, index: usize);

    unsafe fn set_pte_flags(&self, table: usize, index: usize, flags: PtFlags);

    /// Copy one entry verbatim between (possibly different) tables of the
    /// same format. Used when cloning the kernel slots of a fresh top-level
    /// table (spec §4.3's "cloned" address-space creation path).
    unsafe fn copy_pte(&self, dst_table: usize, dst_index: usize, src_table: usize, src_index: usize);
}

static FORMAT: Once<&'static dyn PagingFormat> = Once::new();

/// Selects the page table format once, based on detected CPU capability,
/// and makes it available via [`format`]. Called exactly once from the
/// boot sequence (`pmap_init`, spec §4.3); calling it twice is a kernel bug.
pub fn init(supports_extended: bool) {
    FORMAT.call_once(|| {
        if supports_extended {
            &extended::EXTENDED as &dyn PagingFormat
        } else {
            &classical::CLASSICAL as &dyn PagingFormat
        }
    });
}

/// The format selected by [`init`].
pub fn format() -> &'static dyn PagingFormat {
    *FORMAT.get().unwrap_or_else(|| crate::error::fatal("pagetable::format called before pmap_init"))
}

/// Kernel-mapping fast path: a single contiguous array of page table pages
/// pre-allocated to cover `[KLIMIT, 4GB)`. Since it is fully populated up
/// front, establishing a kernel mapping is pure index arithmetic into this
/// array — no walk, no allocation, no failure (spec §4.3).
pub struct KernelPageTables {
    /// Kernel virtual address of each leaf page table covering one
    /// `entries_per_table * PAGE_SIZE` chunk of `[KLIMIT, 4GB)`, in order.
    tables: alloc::vec::Vec<usize>,
}

impl KernelPageTables {
    /// Build the fast-path array from `count` already-allocated, zeroed
    /// page table pages, lowest address first.
    pub fn new(tables: alloc::vec::Vec<usize>) -> Self {
        KernelPageTables { tables }
    }

    /// Kernel virtual address of the leaf page table page and the index
    /// within it covering `vaddr`, which must be `>= KLIMIT`.
    pub fn locate(&self, vaddr: usize) -> (usize, usize) {
        let entries_per_table = format().entries_per_table();
        let offset_pages = (vaddr - crate::mm::KLIMIT) / crate::mm::PAGE_SIZE;
        let table_index = offset_pages / entries_per_table;
        let entry_index = offset_pages % entries_per_table;
        (self.tables[table_index], entry_index)
    }

    /// Establish a kernel mapping through the fast path: pure index
    /// arithmetic, no walk, cannot fail.
    pub fn map(&self, vaddr: usize, paddr: usize, flags: PtFlags) {
        let (table, index) = self.locate(vaddr);
        unsafe { format().set_pte(table, index, paddr, flags | PtFlags::GLOBAL) };
    }
}

static KERNEL_FAST_PATH: Once<KernelPageTables> = Once::new();

/// Install the kernel fast-path array. Called once from the boot sequence,
/// after [`init`] has selected a format.
pub fn init_kernel_fast_path(tables: KernelPageTables) {
    KERNEL_FAST_PATH.call_once(|| tables);
}

pub fn kernel_fast_path() -> &'static KernelPageTables {
    KERNEL_FAST_PATH
        .get()
        .unwrap_or_else(|| crate::error::fatal("pagetable::kernel_fast_path called before init_kernel_fast_path"))
}
