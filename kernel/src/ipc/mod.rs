//! Endpoint object and the synchronous rendezvous IPC engine.

pub mod engine;
pub mod message;

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use spin::Mutex;

use crate::object::{KernelObject, ObjectHeader, ObjectType};
use crate::thread::{Thread, ThreadState};

/// A rendezvous object: two FIFO queues of waiting threads. At any instant
/// at most one of the two is non-empty (spec §3) — a thread that would make
/// both non-empty is instead paired off immediately by the engine.
pub struct Endpoint {
    header: ObjectHeader,
    pub(crate) send_list: Mutex<VecDeque<Arc<Thread>>>,
    pub(crate) recv_list: Mutex<VecDeque<Arc<Thread>>>,
}

impl Endpoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Endpoint {
            header: ObjectHeader::new(),
            send_list: Mutex::new(VecDeque::new()),
            recv_list: Mutex::new(VecDeque::new()),
        })
    }
}

impl KernelObject for Endpoint {
    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Endpoint
    }

    /// Wake every thread still queued on a destroyed endpoint with `EIO`
    /// (spec §5: "if an endpoint is destroyed while threads are queued,
    /// queued threads are woken with EIO").
    fn finalize(&self) {
        use crate::error::Errno;

        let mut drained = alloc::vec::Vec::new();
        drained.extend(self.send_list.lock().drain(..));
        drained.extend(self.recv_list.lock().drain(..));

        for thread in drained {
            thread.message.lock().reply_errno = Errno::Eio as i32;
            thread.set_state(ThreadState::Ready);
            crate::sched::requeue_woken(thread);
        }
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}
