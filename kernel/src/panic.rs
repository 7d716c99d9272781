//! Panic handler: the kernel's last resort, reached only through
//! [`crate::error::fatal`] or an actual Rust panic (an index out of bounds,
//! an `unwrap` on a kernel-internal invariant, an arithmetic overflow check).
//!
//! Not reachable from user-triggerable conditions (those surface as an
//! [`crate::error::Errno`] instead) — see the error handling split in
//! [`crate::error`].

use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::console;

static PANICKING: AtomicBool = AtomicBool::new(false);

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    // A panic while already panicking (e.g. the logger itself faulting)
    // would recurse forever through the same console lock; fall back to a
    // bare write instead of retrying `log`.
    if PANICKING.swap(true, Ordering::SeqCst) {
        console::_print(format_args!("double panic: {info}\n"));
        halt();
    }

    log::error!("panic: {info}");
    halt();
}

fn halt() -> ! {
    loop {
        #[cfg(target_arch = "x86")]
        unsafe {
            core::arch::asm!("hlt");
        }
        #[cfg(not(target_arch = "x86"))]
        core::hint::spin_loop();
    }
}
