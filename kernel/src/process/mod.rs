//! Process object: the pairing of an address space and a descriptor table.
//!
//! Grounded in spec §3's `Process` data-model entry and in the
//! object/descriptor shape already used by [`crate::thread::Thread`] and
//! [`crate::ipc::Endpoint`].

extern crate alloc;

use alloc::sync::Arc;

use crate::mm::AddressSpace;
use crate::object::descriptor::DescriptorTable;
use crate::object::{KernelObject, ObjectHeader, ObjectType};

pub struct Process {
    header: ObjectHeader,
    pub address_space: AddressSpace,
    pub descriptors: DescriptorTable,
}

impl Process {
    pub fn new(address_space: AddressSpace) -> Arc<Self> {
        Arc::new(Process {
            header: ObjectHeader::new(),
            address_space,
            descriptors: DescriptorTable::new(),
        })
    }
}

impl KernelObject for Process {
    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Process
    }

    /// Close every descriptor the process still holds (dropping the
    /// process's references to the objects they name), then release its
    /// address space. Runs exactly once per process: `close_object`
    /// guarantees `finalize` fires only when the last open reference is
    /// dropped.
    fn finalize(&self) {
        self.descriptors.close_all();

        // SAFETY: a process reaching finalize has no thread left executing
        // in it, so its address space is not the currently active one.
        // `AddressSpace` holds no `Drop` impl (its only resource, the root
        // table, is released explicitly by `destroy`), so reading it out
        // from behind `&self` here and never touching it again through
        // `self` is sound: the later struct-level drop of `self` has
        // nothing left to do for this field.
        unsafe {
            core::ptr::read(&self.address_space).destroy();
        }
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}
