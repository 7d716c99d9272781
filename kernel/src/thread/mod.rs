//! Thread object: the unit of execution and the endpoint for IPC.
//!
//! Grounded in `thread_t` as referenced from
//! `original_source/kernel/domain/services/ipc.c` (the `sender`/message
//! fields accessed by `gather_message`/`scatter_message`/`send`/`receive`/
//! `reply`) and in the object/descriptor shape of
//! `examples/doublegate-VeridianOS/kernel/src/cap/object.rs`.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

use crate::ipc::message::MAX_MESSAGE_SIZE;
use crate::object::{KernelObject, ObjectHeader, ObjectType};

/// Monotonically-assigned thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// On the scheduler's ready queue.
    Ready,
    /// Currently executing.
    Running,
    /// Queued on an endpoint's `send_list`.
    BlockedSend,
    /// Queued on an endpoint's `recv_list`.
    BlockedReceive,
    /// Blocked but not linked into any queue (e.g. torn down by object
    /// destruction, about to be woken directly).
    BlockedNoQueue,
    Exited,
}

/// Per-thread message state, mutated only by the IPC engine while this
/// thread or its rendezvous partner is executing.
pub(crate) struct MessageState {
    pub buffer: Vec<u8>,
    pub message_size: usize,
    pub message_function: u32,
    pub message_cookie: u32,
    pub recv_buffer_size: usize,
    /// `0` means no error pending; otherwise the positive code `send`'s
    /// caller receives as its errno. A kernel-raised error (e.g. the
    /// receiver's buffer is too small) stores that error's own code here;
    /// `reply_error` always stores `Errno::Eproto` here instead, carrying
    /// the callee's chosen code separately in `reply_user_errcode`.
    pub reply_errno: i32,
    /// The callee's raw error code passed to `reply_error`, valid only when
    /// `reply_errno == Errno::Eproto as i32`.
    pub reply_user_errcode: i32,
}

impl MessageState {
    fn new() -> Self {
        MessageState {
            buffer: alloc::vec![0u8; MAX_MESSAGE_SIZE],
            message_size: 0,
            message_function: 0,
            message_cookie: 0,
            recv_buffer_size: 0,
            reply_errno: 0,
            reply_user_errcode: 0,
        }
    }
}

pub struct Thread {
    header: ObjectHeader,
    pub id: ThreadId,
    pub(crate) state: Mutex<ThreadState>,
    pub(crate) message: Mutex<MessageState>,
    /// The thread that woke this one via a rendezvous; valid only between
    /// `receive` returning and the matching `reply`/`reply_error`.
    pub(crate) sender: Mutex<Option<Arc<Thread>>>,
    /// Per-thread scratch word set by `SET_THREAD_LOCAL`, read back by
    /// user-space's TLS setup; the kernel never interprets it.
    tls: AtomicU32,
}

impl Thread {
    pub fn new(id: ThreadId) -> Arc<Self> {
        Arc::new(Thread {
            header: ObjectHeader::new(),
            id,
            state: Mutex::new(ThreadState::Ready),
            message: Mutex::new(MessageState::new()),
            sender: Mutex::new(None),
            tls: AtomicU32::new(0),
        })
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        *self.state.lock() = state;
    }

    pub fn set_thread_local(&self, value: u32) {
        self.tls.store(value, Ordering::Relaxed);
    }

    pub fn thread_local(&self) -> u32 {
        self.tls.load(Ordering::Relaxed)
    }
}

impl KernelObject for Thread {
    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Thread
    }

    fn finalize(&self) {
        // A destroyed thread with no remaining open descriptors has
        // already exited; nothing further to release here.
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}
