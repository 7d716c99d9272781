//! Kernel library crate.
//!
//! `no_std` except when built for the host test target, where `std` stays
//! available so unit tests can use `Vec`/`String`/heap allocation directly
//! without a second parallel no_std test harness.

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

// Bare-metal target: a real heap carved out of boot-time memory by
// `bootalloc`/`mm::page_alloc` and handed to `linked_list_allocator`.
#[cfg(all(feature = "alloc", target_os = "none"))]
use linked_list_allocator::LockedHeap;

#[cfg(all(feature = "alloc", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Carve `[start, start + size)` out for the global allocator to draw from.
/// Called once from the boot sequence after the boot allocator has handed
/// off, before any other subsystem's first heap allocation.
///
/// # Safety
/// `[start, start + size)` must be kernel-mapped, exclusively owned, and not
/// otherwise in use.
#[cfg(all(feature = "alloc", target_os = "none"))]
pub unsafe fn init_heap(start: usize, size: usize) {
    unsafe { ALLOCATOR.lock().init(start as *mut u8, size) };
}

// Host target (unit tests, `cargo test`): delegate to the system allocator.
#[cfg(all(feature = "alloc", not(target_os = "none")))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

pub mod boot;
pub mod bootalloc;
pub mod cmdline;
pub mod config;
pub mod console;
pub mod elf;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod mm;
pub mod object;
pub mod process;
pub mod sched;
pub mod slab;
pub mod syscall;
pub mod thread;

#[cfg(all(not(test), target_os = "none"))]
mod panic;
