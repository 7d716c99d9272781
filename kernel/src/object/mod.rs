//! Kernel object header and the generic open/close lifecycle.
//!
//! Every type that can be referenced from a descriptor table (endpoints,
//! threads, processes) embeds an [`ObjectHeader`] and implements
//! [`KernelObject`]. The header's refcount is independent of the object's
//! actual memory lifetime (handled by `Arc`): it counts *logical* open
//! references held by descriptors, and a transition to destroyed is
//! one-way, observed lazily by the next dereference.

pub mod descriptor;

use core::any::Any;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Discriminant used by [`descriptor::DescriptorTable::dereference`] to
/// reject a descriptor whose object is not of the expected kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Endpoint,
    Thread,
    Process,
}

/// Prefix embedded in every kernel object.
pub struct ObjectHeader {
    refcount: AtomicUsize,
    destroyed: AtomicBool,
}

impl ObjectHeader {
    pub const fn new() -> Self {
        ObjectHeader {
            refcount: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// One-way transition. Idempotent.
    pub fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    fn open(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns `true` if this call dropped the last open reference to an
    /// object already marked destroyed — the caller must run
    /// [`KernelObject::finalize`] exactly once when this happens.
    fn close(&self) -> bool {
        let prev = self.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "refcount underflow");
        prev == 1 && self.is_destroyed()
    }
}

impl Default for ObjectHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// A type referenceable from a [`descriptor::DescriptorTable`].
pub trait KernelObject: Any + Send + Sync {
    fn header(&self) -> &ObjectHeader;
    fn object_type(&self) -> ObjectType;

    /// Run once, when the last open reference to a destroyed object is
    /// closed. Releases resources the object owns beyond its own memory
    /// (e.g. waking threads still queued on a destroyed endpoint).
    fn finalize(&self);

    fn as_any(&self) -> &dyn Any;
}

/// Increment `obj`'s open-reference count. Called when a descriptor is
/// created pointing at `obj` (on `open`, `dup`, or `mint`).
pub fn open_object(obj: &dyn KernelObject) {
    obj.header().open();
}

/// Decrement `obj`'s open-reference count, running [`KernelObject::finalize`]
/// if this was the last reference to an already-destroyed object.
pub fn close_object(obj: &dyn KernelObject) {
    if obj.header().close() {
        obj.finalize();
    }
}

/// Downcast to a concrete object type after its tag has already been
/// checked (by `DescriptorTable::dereference`). A mismatch here means the
/// object's tag and its concrete type disagree, which is a kernel
/// programming error, not a condition user space can trigger.
pub fn downcast_or_fatal<'a, T: KernelObject + 'static>(obj: &'a dyn KernelObject, what: &'static str) -> &'a T {
    obj.as_any().downcast_ref::<T>().unwrap_or_else(|| crate::error::fatal(what))
}
