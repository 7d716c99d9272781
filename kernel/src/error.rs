//! User-surface error codes and fatal-panic helpers.
//!
//! Two axes, per the kernel's error handling design: recoverable user-surface
//! errors return a negated [`Errno`] from the syscall dispatcher; violated
//! kernel invariants panic directly and never return.

use core::fmt;

/// Negative-errno values returned to user space from a system call.
///
/// The numeric values are part of the syscall ABI and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    /// Argument validation failed: bad flag, bad alignment, bad buffer,
    /// message too large.
    Einval = 1,
    /// Descriptor out of range, type mismatch, or not valid.
    Ebadf = 2,
    /// Descriptor lacks the required permission, or is not an owner.
    Eperm = 3,
    /// Object referenced by a descriptor has been destroyed.
    Eio = 4,
    /// Reply without a prior unreplied receive.
    Enomsg = 5,
    /// Message exceeds the receiver's buffer.
    E2big = 6,
    /// No free descriptor slot.
    Eagain = 7,
    /// Unimplemented function code.
    Enosys = 8,
    /// Forbidden combination of flags (e.g. `PROT_WRITE | PROT_EXEC`).
    Enotsup = 9,
    /// Callee chose to fail the RPC with a user-defined error code.
    Eproto = 10,
}

impl Errno {
    /// Return the syscall return value for this error: `-errno`.
    pub const fn as_retval(self) -> isize {
        -(self as i32 as isize)
    }

    /// Map a raw positive code back to an [`Errno`]. Used to interpret a
    /// kernel-raised `Thread::reply_errno` (`EIO`, `E2BIG`, ...), which
    /// round-trips exactly. A callee's `reply_error` code is never passed
    /// through here: it always sets `reply_errno` to the fixed
    /// [`Errno::Eproto`] and carries its own code separately (spec §4.6),
    /// so two different callee codes can never be confused with each other
    /// or with a same-numbered kernel errno.
    pub fn from_raw(code: i32) -> Errno {
        match code {
            1 => Errno::Einval,
            2 => Errno::Ebadf,
            3 => Errno::Eperm,
            4 => Errno::Eio,
            5 => Errno::Enomsg,
            6 => Errno::E2big,
            7 => Errno::Eagain,
            8 => Errno::Enosys,
            9 => Errno::Enotsup,
            _ => Errno::Eproto,
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Errno::Einval => "invalid argument",
            Errno::Ebadf => "bad descriptor",
            Errno::Eperm => "operation not permitted",
            Errno::Eio => "object destroyed",
            Errno::Enomsg => "no message to reply to",
            Errno::E2big => "message too big",
            Errno::Eagain => "no descriptor slots available",
            Errno::Enosys => "function not implemented",
            Errno::Enotsup => "operation not supported",
            Errno::Eproto => "protocol error",
        };
        f.write_str(s)
    }
}

/// Convenience alias for fallible kernel operations that surface to user space.
pub type KResult<T> = Result<T, Errno>;

/// Abort the kernel because an internal invariant was violated.
///
/// This is never used for conditions a user process can trigger; those
/// surface as an [`Errno`] instead. Reserved for boot allocator misuse, page
/// table walk invariant violations, slab frees to the wrong cache, a
/// persistently invalid command line, or an insufficient physical memory map.
#[cold]
#[track_caller]
pub fn fatal(msg: &str) -> ! {
    log::error!("fatal: {msg}");
    panic!("fatal: {msg}");
}
