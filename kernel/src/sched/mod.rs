//! Cooperative round-robin scheduler.
//!
//! The kernel is single-threaded (spec §5: at most one thread executes
//! kernel code at a time); there is exactly one [`Scheduler`] instance and
//! its queue/state bookkeeping is the whole of what this module owns. The
//! actual transfer of the CPU — saving and restoring registers and stack
//! pointer — is an architecture boundary below this module, reached through
//! [`ArchSwitch`]; `switch_to` never returns until the scheduler has picked
//! this thread again.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use spin::Mutex;

use crate::thread::{Thread, ThreadState};

/// Architecture hook performing the actual register/stack-pointer swap.
/// Implemented per-target below this module; a host build used for testing
/// plugs in a no-op so scheduler bookkeeping can be exercised without real
/// multitasking.
pub trait ArchSwitch: Send + Sync {
    /// Save `from`'s context and restore `to`'s. Returns once `from` is
    /// resumed by a later switch back to it.
    fn switch(&self, from: &Thread, to: &Thread);
}

pub struct NoopArchSwitch;

impl ArchSwitch for NoopArchSwitch {
    fn switch(&self, _from: &Thread, _to: &Thread) {}
}

pub struct Scheduler {
    ready: Mutex<VecDeque<Arc<Thread>>>,
    current: Mutex<Option<Arc<Thread>>>,
    arch: &'static dyn ArchSwitch,
}

impl Scheduler {
    pub const fn new(arch: &'static dyn ArchSwitch) -> Self {
        Scheduler {
            ready: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
            arch,
        }
    }

    pub fn current(&self) -> Arc<Thread> {
        self.current.lock().clone().expect("scheduler has no current thread")
    }

    /// Add `thread` to the tail of the ready queue.
    pub fn enqueue_ready(&self, thread: Arc<Thread>) {
        thread.set_state(ThreadState::Ready);
        self.ready.lock().push_back(thread);
    }

    fn pick_next(&self) -> Arc<Thread> {
        self.ready
            .lock()
            .pop_front()
            .expect("ready queue empty: no thread left to schedule")
    }

    /// Remove the current thread from execution — it must already have been
    /// placed on some other queue (an endpoint's send/recv list) by the
    /// caller — and resume the next ready thread.
    pub fn block(&self) {
        let prev = self.current();
        let next = self.pick_next();

        next.set_state(ThreadState::Running);
        *self.current.lock() = Some(next.clone());

        self.arch.switch(&prev, &next);
    }

    /// Move the current thread to the tail of the ready queue and resume
    /// the head.
    pub fn yield_now(&self) {
        let prev = self.current();
        self.enqueue_ready(prev.clone());
        let next = self.pick_next();

        next.set_state(ThreadState::Running);
        *self.current.lock() = Some(next.clone());

        self.arch.switch(&prev, &next);
    }

    /// Transfer control directly to `target`, bypassing the ready queue.
    /// If `block_caller` is true the caller is left off every queue (the
    /// IPC engine has already queued it on an endpoint, or intends to
    /// leave it queueless); otherwise the caller is appended to the ready
    /// queue as `yield_now` would.
    pub fn switch_to(&self, target: Arc<Thread>, block_caller: bool) {
        let prev = self.current();

        if !block_caller {
            self.enqueue_ready(prev.clone());
        }

        target.set_state(ThreadState::Running);
        *self.current.lock() = Some(target.clone());

        self.arch.switch(&prev, &target);
    }
}

lazy_static::lazy_static! {
    /// The kernel's single scheduler instance (spec §5: one kernel thread
    /// executes at a time, so one scheduler suffices).
    pub static ref SCHEDULER: Scheduler = Scheduler::new(&NoopArchSwitch);
}

/// Place a thread woken outside of a direct handoff (e.g. by the endpoint
/// it was queued on being destroyed) back on the ready queue.
pub fn requeue_woken(thread: Arc<Thread>) {
    SCHEDULER.enqueue_ready(thread);
}
