//! Per-process virtual address space: creation, destruction, and the
//! map/unmap/change-flags/lookup operations syscalls drive through.
//!
//! Grounded in `original_source/kernel/hal/vm.c`'s address-space lifecycle
//! and in the teacher's `mm/vas.rs` for the struct/lifecycle shape (a root
//! handle plus the invariant that destruction never touches kernel slots).

extern crate alloc;

use alloc::vec::Vec;
use core::ptr::NonNull;

use spin::Once;

use crate::error::{Errno, KResult};
use crate::mm::page_alloc::PageAlloc;
use crate::mm::pagetable::{self, PagingFormat, ProtFlags, PtFlags};
use crate::mm::{KLIMIT, PAGE_SIZE};
use crate::slab::PageSource;

/// Kernel virtual address of the template top-level table: kernel slots
/// filled in (pointing at the shared `kernel_page_tables` sub-hierarchy),
/// user slots empty. Populated once, at boot, before the first
/// [`AddressSpace::create`].
static KERNEL_TEMPLATE: Once<usize> = Once::new();

/// Record the template root. Called once from the boot sequence after the
/// kernel's own fast-path tables (`KernelPageTables`) are built.
pub fn set_kernel_template(root: usize) {
    KERNEL_TEMPLATE.call_once(|| root);
}

fn template() -> usize {
    *KERNEL_TEMPLATE
        .get()
        .unwrap_or_else(|| crate::error::fatal("addrspace: no kernel template installed"))
}

/// First top-level index that falls at or above `KLIMIT`.
fn klimit_top_index(format: &dyn PagingFormat) -> usize {
    format.index_at_level(KLIMIT, 0)
}

fn alloc_zeroed_page() -> KResult<usize> {
    let page = PageAlloc::alloc_page().ok_or(Errno::Eagain)?;
    unsafe { core::ptr::write_bytes(page.as_ptr(), 0, PAGE_SIZE) };
    Ok(page.as_ptr() as usize)
}

fn free_page(addr: usize) {
    let page = NonNull::new(addr as *mut u8).unwrap_or_else(|| crate::error::fatal("addrspace: freed a null page"));
    unsafe { PageAlloc::free_page(page) };
}

/// A user virtual address space: a private top-level table whose kernel
/// slots are copies of the template's (spec §4.3's "cloned" path — this
/// implementation always clones; see `DESIGN.md` for why the
/// boundary-aligned sharing optimization was not pursued).
pub struct AddressSpace {
    root: usize,
}

impl AddressSpace {
    /// Construct a fresh address space: allocate a root table, copy the
    /// template's kernel entries into it, leave user entries empty.
    /// Creation is atomic — if the root allocation fails, nothing is
    /// touched and `Err(Eagain)` is returned.
    pub fn create() -> KResult<Self> {
        let format = pagetable::format();
        let root = alloc_zeroed_page()?;

        let top_index = klimit_top_index(format);
        for index in top_index..format.top_level_entries() {
            unsafe { format.copy_pte(root, index, template(), index) };
        }

        Ok(AddressSpace { root })
    }

    /// Physical/kernel-usable root usable by the CPU (CR3-equivalent).
    pub fn root(&self) -> usize {
        self.root
    }

    /// Tear down every user mapping and the intermediate tables that held
    /// them, then free the root itself. Never touches kernel slots.
    ///
    /// # Safety
    /// The caller must ensure this address space is not the currently
    /// active one and is not the boot-time kernel template.
    pub unsafe fn destroy(self) {
        let format = pagetable::format();
        let top_index = klimit_top_index(format);

        for index in 0..top_index {
            if let Some(paddr) = unsafe { format.get_pte_paddr(self.root, index) } {
                unsafe { Self::free_subtree(format, paddr, format.levels_below_top()) };
            }
        }

        free_page(self.root);
    }

    unsafe fn free_subtree(format: &dyn PagingFormat, table: usize, levels_remaining: usize) {
        if levels_remaining > 0 {
            for index in 0..format.entries_per_table() {
                if let Some(child) = unsafe { format.get_pte_paddr(table, index) } {
                    unsafe { Self::free_subtree(format, child, levels_remaining - 1) };
                }
            }
        }
        free_page(table);
    }

    /// Walk from the root to the leaf page table covering `vaddr`,
    /// allocating intermediate tables lazily. On failure, any tables
    /// allocated during this call are freed before returning — no partial
    /// state leaks (spec §4.3).
    fn walk_or_create(&self, format: &dyn PagingFormat, vaddr: usize) -> KResult<(usize, usize)> {
        let mut allocated = Vec::new();
        let mut table = self.root;

        let levels = format.levels_below_top();
        for level in 0..levels {
            let index = format.index_at_level(vaddr, level);
            let next = match unsafe { format.get_pte_paddr(table, index) } {
                Some(paddr) => paddr,
                None => match alloc_zeroed_page() {
                    Ok(fresh) => {
                        let user = vaddr < KLIMIT;
                        unsafe { format.set_pte(table, index, fresh, PtFlags::PRESENT | PtFlags::WRITABLE | if user { PtFlags::USER } else { PtFlags::GLOBAL }) };
                        allocated.push(fresh);
                        fresh
                    }
                    Err(e) => {
                        for page in allocated {
                            free_page(page);
                        }
                        return Err(e);
                    }
                },
            };
            table = next;
        }

        let leaf_index = format.index_at_level(vaddr, levels);
        Ok((table, leaf_index))
    }

    /// Map `vaddr` to `paddr` with `prot`. `vaddr < KLIMIT` maps into this
    /// address space's user region; `vaddr >= KLIMIT` would instead go
    /// through the kernel fast path and is rejected here.
    pub fn map(&self, vaddr: usize, paddr: usize, prot: ProtFlags) -> KResult<()> {
        if vaddr >= KLIMIT {
            return Err(Errno::Einval);
        }
        pagetable::check_prot(prot)?;

        let format = pagetable::format();
        let flags = pagetable::resolve_prot(prot, true, format);
        let (table, index) = self.walk_or_create(format, vaddr)?;
        unsafe { format.set_pte(table, index, paddr, flags) };
        Ok(())
    }

    pub fn unmap(&self, vaddr: usize) -> KResult<()> {
        if vaddr >= KLIMIT {
            return Err(Errno::Einval);
        }
        let format = pagetable::format();
        let (table, index) = self.walk_existing(format, vaddr)?;
        unsafe { format.clear_pte(table, index) };
        Ok(())
    }

    pub fn change_flags(&self, vaddr: usize, prot: ProtFlags) -> KResult<()> {
        if vaddr >= KLIMIT {
            return Err(Errno::Einval);
        }
        pagetable::check_prot(prot)?;

        let format = pagetable::format();
        let flags = pagetable::resolve_prot(prot, true, format);
        let (table, index) = self.walk_existing(format, vaddr)?;
        unsafe { format.set_pte_flags(table, index, flags) };
        Ok(())
    }

    pub fn lookup(&self, vaddr: usize) -> Option<usize> {
        if vaddr >= KLIMIT {
            return None;
        }
        let format = pagetable::format();
        let (table, index) = self.walk_existing(format, vaddr).ok()?;
        unsafe { format.get_pte_paddr(table, index) }
    }

    /// Like `walk_or_create` but fails with `Einval` instead of allocating
    /// when an intermediate table is missing.
    fn walk_existing(&self, format: &dyn PagingFormat, vaddr: usize) -> KResult<(usize, usize)> {
        let mut table = self.root;
        let levels = format.levels_below_top();

        for level in 0..levels {
            let index = format.index_at_level(vaddr, level);
            table = unsafe { format.get_pte_paddr(table, index) }.ok_or(Errno::Einval)?;
        }

        Ok((table, format.index_at_level(vaddr, levels)))
    }
}
