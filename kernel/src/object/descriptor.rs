//! Per-process descriptor table.
//!
//! Grounded in the capability space in
//! `examples/doublegate-VeridianOS/kernel/src/cap/types.rs`, reshaped from a
//! `BTreeMap` keyed by a growing id into the fixed-size array the spec calls
//! for, since descriptor numbers here are small dense integers chosen by the
//! caller (or the kernel, at create time) rather than an opaque handle.

extern crate alloc;

use alloc::sync::Arc;

use spin::Mutex;

use crate::error::{Errno, KResult};
use crate::object::{self, KernelObject, ObjectType};

/// Number of descriptor slots per process.
pub const MAX_DESCRIPTORS: usize = 4096;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u32 {
        const SEND          = 1 << 0;
        const RECEIVE       = 1 << 1;
        const MAP           = 1 << 2;
        const CREATE_THREAD = 1 << 3;
        const OPEN          = 1 << 4;
    }
}

#[derive(Clone)]
struct Occupied {
    object: Arc<dyn KernelObject>,
    permissions: Permissions,
    cookie: u32,
    owner: bool,
}

enum Slot {
    Free,
    InUse(Occupied),
}

/// Fixed-size table of descriptor slots, one per process.
pub struct DescriptorTable {
    slots: Mutex<alloc::boxed::Box<[Slot; MAX_DESCRIPTORS]>>,
}

/// A snapshot of one descriptor's public fields, returned by `dereference`
/// alongside the referenced object.
pub struct Descriptor {
    pub object: Arc<dyn KernelObject>,
    pub permissions: Permissions,
    pub cookie: u32,
}

fn check_fd(fd: i32) -> KResult<usize> {
    if fd < 0 || fd as usize >= MAX_DESCRIPTORS {
        return Err(Errno::Ebadf);
    }
    Ok(fd as usize)
}

impl DescriptorTable {
    pub fn new() -> Self {
        const FREE: Slot = Slot::Free;
        DescriptorTable {
            slots: Mutex::new(alloc::boxed::Box::new([FREE; MAX_DESCRIPTORS])),
        }
    }

    /// Bounds-check, verify in-use, verify the object is alive (self-closing
    /// it and failing `EIO` if not), verify its type matches `expected`, and
    /// verify `required` permissions (and ownership, if `require_owner`) are
    /// held.
    pub fn dereference(
        &self,
        fd: i32,
        expected: ObjectType,
        required: Permissions,
        require_owner: bool,
    ) -> KResult<Descriptor> {
        let idx = check_fd(fd)?;
        let mut slots = self.slots.lock();

        let occupied = match &slots[idx] {
            Slot::InUse(o) => o.clone(),
            Slot::Free => return Err(Errno::Ebadf),
        };

        if occupied.object.header().is_destroyed() {
            object::close_object(occupied.object.as_ref());
            slots[idx] = Slot::Free;
            return Err(Errno::Eio);
        }

        if occupied.object.object_type() != expected {
            return Err(Errno::Ebadf);
        }

        if !occupied.permissions.contains(required) {
            return Err(Errno::Eperm);
        }

        if require_owner && !occupied.owner {
            return Err(Errno::Eperm);
        }

        Ok(Descriptor {
            object: occupied.object,
            permissions: occupied.permissions,
            cookie: occupied.cookie,
        })
    }

    /// Bounds-check and verify the slot is free, for placement of a new
    /// descriptor at a caller-chosen number.
    pub fn dereference_unused(&self, fd: i32) -> KResult<()> {
        let idx = check_fd(fd)?;
        match self.slots.lock()[idx] {
            Slot::Free => Ok(()),
            Slot::InUse(_) => Err(Errno::Ebadf),
        }
    }

    /// Place a new owning descriptor at `fd`, taking a reference on `object`.
    /// `fd` must already have been checked free via `dereference_unused`.
    pub fn install(
        &self,
        fd: i32,
        object: Arc<dyn KernelObject>,
        permissions: Permissions,
        cookie: u32,
        owner: bool,
    ) -> KResult<()> {
        let idx = check_fd(fd)?;
        let mut slots = self.slots.lock();

        if matches!(slots[idx], Slot::InUse(_)) {
            return Err(Errno::Ebadf);
        }

        object::open_object(object.as_ref());
        slots[idx] = Slot::InUse(Occupied {
            object,
            permissions,
            cookie,
            owner,
        });
        Ok(())
    }

    /// Release the reference held by `fd`. The object may or may not be
    /// destroyed as a result.
    pub fn close(&self, fd: i32) -> KResult<()> {
        let idx = check_fd(fd)?;
        let mut slots = self.slots.lock();

        let occupied = match core::mem::replace(&mut slots[idx], Slot::Free) {
            Slot::InUse(o) => o,
            Slot::Free => return Err(Errno::Ebadf),
        };

        object::close_object(occupied.object.as_ref());
        Ok(())
    }

    /// If `fd` is an owner, mark the underlying object destroyed, then
    /// close `fd` as `close` would.
    pub fn destroy(&self, fd: i32) -> KResult<()> {
        let idx = check_fd(fd)?;

        {
            let slots = self.slots.lock();
            match &slots[idx] {
                Slot::InUse(o) if o.owner => o.object.header().mark_destroyed(),
                Slot::InUse(_) => {}
                Slot::Free => return Err(Errno::Ebadf),
            }
        }

        self.close(fd)
    }

    /// Place a copy of `src_table`'s `src_fd` descriptor at `dst_fd` in this
    /// table, with identical permissions, cookie, and ownership.
    pub fn dup(&self, src_table: &DescriptorTable, src_fd: i32, dst_fd: i32) -> KResult<()> {
        let src_idx = check_fd(src_fd)?;
        self.dereference_unused(dst_fd)?;

        let src = src_table.slots.lock();
        let occupied = match &src[src_idx] {
            Slot::InUse(o) => o.clone(),
            Slot::Free => return Err(Errno::Ebadf),
        };
        drop(src);

        self.install(dst_fd, occupied.object, occupied.permissions, occupied.cookie, occupied.owner)
    }

    /// Create a descriptor in `dst_table` referencing the same object as
    /// this table's `owner_fd`, with `perms` a subset of the owner
    /// descriptor's permissions. Ownership is never transferred by mint.
    pub fn mint(
        &self,
        owner_fd: i32,
        dst_table: &DescriptorTable,
        dst_fd: i32,
        perms: Permissions,
        cookie: u32,
    ) -> KResult<()> {
        let owner_idx = check_fd(owner_fd)?;
        dst_table.dereference_unused(dst_fd)?;

        let owner = {
            let slots = self.slots.lock();
            match &slots[owner_idx] {
                Slot::InUse(o) if o.owner => o.clone(),
                Slot::InUse(_) => return Err(Errno::Eperm),
                Slot::Free => return Err(Errno::Ebadf),
            }
        };

        if !owner.permissions.contains(perms) {
            return Err(Errno::Eperm);
        }

        dst_table.install(dst_fd, owner.object, perms, cookie, false)
    }

    /// Close every occupied slot. Used when a process is finalized: it
    /// releases the process's references to everything it still held open.
    pub fn close_all(&self) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if let Slot::InUse(o) = core::mem::replace(slot, Slot::Free) {
                object::close_object(o.object.as_ref());
            }
        }
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize as StdAtomicUsize, Ordering as StdOrdering};

    struct Dummy {
        header: object::ObjectHeader,
        finalized: StdAtomicUsize,
    }

    impl KernelObject for Dummy {
        fn header(&self) -> &object::ObjectHeader {
            &self.header
        }
        fn object_type(&self) -> ObjectType {
            ObjectType::Endpoint
        }
        fn finalize(&self) {
            self.finalized.fetch_add(1, StdOrdering::SeqCst);
        }
        fn as_any(&self) -> &dyn core::any::Any {
            self
        }
    }

    fn dummy() -> Arc<dyn KernelObject> {
        Arc::new(Dummy {
            header: object::ObjectHeader::new(),
            finalized: StdAtomicUsize::new(0),
        })
    }

    #[test]
    fn mint_permissions_are_subset_and_not_owner() {
        let table = DescriptorTable::new();
        let other = DescriptorTable::new();
        let obj = dummy();

        table.install(3, obj.clone(), Permissions::SEND | Permissions::RECEIVE, 7, true).unwrap();
        table.mint(3, &other, 5, Permissions::SEND, 9).unwrap();

        let d = other.dereference(5, ObjectType::Endpoint, Permissions::SEND, false).unwrap();
        assert_eq!(d.cookie, 9);

        assert!(other.dereference(5, ObjectType::Endpoint, Permissions::SEND, true).is_err());
        assert!(table
            .mint(3, &other, 6, Permissions::SEND | Permissions::MAP, 0)
            .is_err());
    }

    #[test]
    fn destroy_runs_finalize_once_last_ref_closes() {
        let table = DescriptorTable::new();
        let obj = dummy();
        table.install(0, obj.clone(), Permissions::SEND, 0, true).unwrap();
        table.destroy(0).unwrap();
        assert!(obj.header().is_destroyed());
    }

    #[test]
    fn dereference_of_destroyed_object_self_closes_and_returns_eio() {
        let table = DescriptorTable::new();
        let obj = dummy();
        table.install(0, obj.clone(), Permissions::SEND, 0, false).unwrap();
        obj.header().mark_destroyed();

        assert_eq!(
            table.dereference(0, ObjectType::Endpoint, Permissions::empty(), false).unwrap_err(),
            Errno::Eio
        );
        assert!(table.dereference_unused(0).is_ok());
    }

    proptest::proptest! {
        /// Descriptor monotonicity (spec §8): `mint` never grants a minted
        /// descriptor permissions the owner descriptor didn't itself hold,
        /// for any owner/requested permission bitset pair.
        #[test]
        fn mint_never_exceeds_owner_permissions(owner_bits in 0u32..32, requested_bits in 0u32..32) {
            let owner_perms = Permissions::from_bits_truncate(owner_bits);
            let requested = Permissions::from_bits_truncate(requested_bits);

            let table = DescriptorTable::new();
            let other = DescriptorTable::new();
            table.install(0, dummy(), owner_perms, 0, true).unwrap();

            let result = table.mint(0, &other, 1, requested, 0);

            if requested.bits() & !owner_perms.bits() != 0 {
                proptest::prop_assert!(result.is_err());
            } else if result.is_ok() {
                let minted = other.dereference(1, ObjectType::Endpoint, requested, false).unwrap();
                proptest::prop_assert!(owner_perms.contains(minted.permissions));
            }
        }
    }
}
