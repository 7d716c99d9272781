//! Buffer descriptors and the gather/scatter copies between a thread's
//! per-thread message buffer and user-space send/receive buffer arrays.
//!
//! Ported from `get_receive_buffers_size`/`gather_message`/`scatter_message`
//! in `original_source/kernel/domain/services/ipc.c`, including the
//! TOCTOU-conscious re-read of each buffer descriptor at the point of use
//! (the source's comment: "We are reading the buffer definition from user
//! space so let's make sure to copy the data before we check and use it").

use crate::error::{Errno, KResult};
use crate::thread::Thread;

/// Upper bound on a single message's total size.
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Upper bound on the number of buffers in one send/receive array.
pub const MAX_BUFFERS_IN_ARRAY: usize = 16;

/// Upper bound on the size of a single buffer within an array.
pub const MAX_BUFFER_SIZE: usize = MAX_MESSAGE_SIZE;

/// One `(addr, size)` pair describing a user-space buffer.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct BufferDesc {
    pub addr: usize,
    pub size: usize,
}

/// Access to the caller's address space: validating and copying
/// user-supplied buffers. The real kernel build checks `addr` against
/// `KLIMIT` and copies directly (there is no page-fault-recoverable
/// copy-in/copy-out in this design — see `SPEC_FULL.md` §4.8); a host test
/// build is given a stand-in that treats ordinary heap pointers as
/// "user" memory.
pub trait UserAccess {
    fn check_userspace_buffer(addr: usize, size: usize) -> bool;

    /// # Safety
    /// `addr` must have already passed `check_userspace_buffer` for `size`
    /// bytes and remain valid for the duration of the call.
    unsafe fn copy_from_user(dst: &mut [u8], addr: usize);

    /// # Safety
    /// `addr` must have already passed `check_userspace_buffer` for
    /// `src.len()` bytes and remain valid for the duration of the call.
    unsafe fn copy_to_user(addr: usize, src: &[u8]);
}

#[cfg(target_os = "none")]
pub struct KernelUserAccess;

#[cfg(target_os = "none")]
impl UserAccess for KernelUserAccess {
    fn check_userspace_buffer(addr: usize, size: usize) -> bool {
        let klimit = crate::mm::KLIMIT;
        match addr.checked_add(size) {
            Some(end) => end <= klimit,
            None => false,
        }
    }

    unsafe fn copy_from_user(dst: &mut [u8], addr: usize) {
        unsafe {
            core::ptr::copy_nonoverlapping(addr as *const u8, dst.as_mut_ptr(), dst.len());
        }
    }

    unsafe fn copy_to_user(addr: usize, src: &[u8]) {
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr(), addr as *mut u8, src.len());
        }
    }
}

#[cfg(not(target_os = "none"))]
pub struct KernelUserAccess;

#[cfg(not(target_os = "none"))]
impl UserAccess for KernelUserAccess {
    fn check_userspace_buffer(_addr: usize, _size: usize) -> bool {
        true
    }

    unsafe fn copy_from_user(dst: &mut [u8], addr: usize) {
        unsafe {
            core::ptr::copy_nonoverlapping(addr as *const u8, dst.as_mut_ptr(), dst.len());
        }
    }

    unsafe fn copy_to_user(addr: usize, src: &[u8]) {
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr(), addr as *mut u8, src.len());
        }
    }
}

/// Validate a receive-buffer array and sum its sizes, capped at
/// `MAX_MESSAGE_SIZE`. This is *not* the final check — `scatter_message`
/// re-checks each buffer at the point it actually writes to it — but
/// catching a bad array here avoids waking a receiver (or dequeuing a
/// sender) only to fail afterwards.
pub fn get_receive_buffers_size<U: UserAccess>(buffers: &[BufferDesc]) -> KResult<usize> {
    if buffers.len() > MAX_BUFFERS_IN_ARRAY {
        return Err(Errno::Einval);
    }

    let mut total: usize = 0;

    for buf in buffers {
        if buf.size > MAX_BUFFER_SIZE {
            return Err(Errno::Einval);
        }
        if !U::check_userspace_buffer(buf.addr, buf.size) {
            return Err(Errno::Einval);
        }

        total = (total + buf.size).min(MAX_MESSAGE_SIZE);
    }

    Ok(total)
}

/// Concatenate `buffers` into `thread`'s per-thread message buffer.
pub fn gather_message<U: UserAccess>(thread: &Thread, buffers: &[BufferDesc]) -> KResult<()> {
    let mut msg = thread.message.lock();
    msg.message_size = 0;

    if buffers.len() > MAX_BUFFERS_IN_ARRAY {
        return Err(Errno::Einval);
    }

    for buf in buffers {
        // Re-read addr/size at point of use: the array lives in user
        // memory and another thread in the same process could have
        // mutated it since validation.
        let (addr, size) = (buf.addr, buf.size);

        if !U::check_userspace_buffer(addr, size) {
            return Err(Errno::Einval);
        }

        let space_remaining = MAX_MESSAGE_SIZE - msg.message_size;
        if size > space_remaining {
            return Err(Errno::Einval);
        }

        let write_at = msg.message_size;
        unsafe { U::copy_from_user(&mut msg.buffer[write_at..write_at + size], addr) };
        msg.message_size += size;
    }

    Ok(())
}

/// Split `thread`'s per-thread message buffer across `buffers`.
pub fn scatter_message<U: UserAccess>(thread: &Thread, buffers: &[BufferDesc]) -> KResult<()> {
    let msg = thread.message.lock();
    let mut read_position = 0usize;

    for buf in buffers {
        let remaining = msg.message_size - read_position;
        if remaining == 0 {
            break;
        }

        let (addr, size) = (buf.addr, buf.size);

        if !U::check_userspace_buffer(addr, size) {
            return Err(Errno::Einval);
        }

        let write_size = size.min(remaining);
        unsafe { U::copy_to_user(addr, &msg.buffer[read_position..read_position + write_size]) };
        read_position += write_size;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    extern crate alloc;

    use super::*;
    use crate::thread::{Thread, ThreadId};

    proptest::proptest! {
        /// Gather/scatter identity (spec §8): splitting a payload across an
        /// arbitrary sequence of send buffers, then gathering and scattering
        /// it across an arbitrary sequence of receive buffers, reproduces
        /// the original bytes up to the receiver's total capacity.
        #[test]
        fn gather_scatter_identity(
            chunks in proptest::collection::vec(proptest::collection::vec(proptest::prelude::any::<u8>(), 0..64), 0..8),
            recv_chunk_sizes in proptest::collection::vec(1usize..64, 0..8),
        ) {
            let payload: alloc::vec::Vec<u8> = chunks.iter().flatten().copied().collect();

            let sender = Thread::new(ThreadId(1));
            let send_bufs: alloc::vec::Vec<BufferDesc> = chunks
                .iter()
                .map(|c| BufferDesc { addr: c.as_ptr() as usize, size: c.len() })
                .collect();
            gather_message::<KernelUserAccess>(&sender, &send_bufs).unwrap();
            proptest::prop_assert_eq!(sender.message.lock().message_size, payload.len().min(MAX_MESSAGE_SIZE));

            let mut recv_chunks: alloc::vec::Vec<alloc::vec::Vec<u8>> =
                recv_chunk_sizes.iter().map(|&n| alloc::vec![0u8; n]).collect();
            let recv_bufs: alloc::vec::Vec<BufferDesc> = recv_chunks
                .iter_mut()
                .map(|c| BufferDesc { addr: c.as_mut_ptr() as usize, size: c.len() })
                .collect();
            scatter_message::<KernelUserAccess>(&sender, &recv_bufs).unwrap();

            let received: alloc::vec::Vec<u8> = recv_chunks.into_iter().flatten().collect();
            let expect_len = payload.len().min(received.len());
            proptest::prop_assert_eq!(&received[..expect_len], &payload[..expect_len]);
        }
    }
}
