//! Kernel entry point.
//!
//! The loader protocol that gets us here — multiboot-style parsing, the
//! trap/interrupt entry stubs, and the console driver wiring below
//! `console::Serial16550` — are architecture-specific external collaborators
//! (see `SPEC_FULL.md` §1, "Out of scope"); this binary only assembles the
//! core subsystems in the dependency order `SPEC_FULL.md` §2 lays out, once
//! that boundary has handed control to Rust.
//!
//! The fine-grained `BootAlloc` bring-up (carving the fast-path kernel page
//! tables out of early memory, then switching to the post-boot `PageAlloc`
//! pool) needs boot-time-only physical/virtual layout values — the early
//! region's bounds, the post-switch frame pool's extent — that are
//! deliberately not part of [`BootInfo`] (spec §6 scopes that struct to the
//! address map *reported to user space*, not full boot arithmetic). That
//! sequencing is the architecture stub's job, the same boundary that builds
//! `BootInfo` itself; this entry point picks up once `boot::set` has run.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

extern crate ferrite_kernel;

use ferrite_kernel::boot::BootInfo;
use ferrite_kernel::config::PagingRequest;
use ferrite_kernel::{cmdline, config::Config, logging, mm, sched};

/// Entry point reached after the architecture-specific boot stub has set up
/// an initial stack and identity mapping, built and validated a
/// [`BootInfo`], and brought up the fast-path kernel page tables and
/// `PageAlloc` pool.
///
/// # Safety
/// Must be called exactly once, with a `boot_info` pointer to a valid,
/// fully-populated `BootInfo` built by that stub, after `PageAlloc` has
/// already been seeded.
#[no_mangle]
pub unsafe extern "C" fn kernel_main(boot_info: *const BootInfo) -> ! {
    let info = unsafe { core::ptr::read(boot_info) };
    info.validate();
    ferrite_kernel::boot::set(info);

    let mut config = Config::default();
    // The loader hands us a pointer into its own memory for the raw
    // command-line string; reading it out is the same architecture/loader
    // boundary concern as the rest of `BootInfo`'s construction.
    let cmdline_str: Option<&str> = None;
    let parse_errors = cmdline::parse_options(&mut config, cmdline_str);

    logging::init(config.log_level.to_level().unwrap_or(log::Level::Error));
    cmdline::report_errors(parse_errors);

    log::info!("ferrite kernel starting");

    // CPUID-based PAE detection belongs to the architecture layer; honor an
    // explicit command-line choice and otherwise fall back to the classical
    // format rather than guessing at capability probing here.
    let supports_extended = matches!(config.paging, PagingRequest::Extended);
    mm::pagetable::init(supports_extended);

    log::info!("{} pages free in the post-boot pool", mm::page_alloc::free_count());
    log::info!("scheduler ready, no threads to run yet");
    let _ = &sched::SCHEDULER;

    halt_forever();
}

fn halt_forever() -> ! {
    loop {
        #[cfg(target_arch = "x86")]
        unsafe {
            core::arch::asm!("hlt");
        }
        #[cfg(not(target_arch = "x86"))]
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    halt_forever()
}
