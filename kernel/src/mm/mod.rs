//! Physical/virtual memory management: the page allocator, the dual-format
//! page table layer, and per-process address spaces.

pub mod addrspace;
pub mod page_alloc;
pub mod pagetable;

/// Virtual address at which the kernel's own mappings begin. Below this,
/// addresses belong to user space; at and above, to the kernel, shared
/// identically across every [`addrspace::AddressSpace`].
pub const KLIMIT: usize = 0xC000_0000;

/// Native page size on this architecture.
pub const PAGE_SIZE: usize = 4096;

pub use addrspace::AddressSpace;
pub use pagetable::ProtFlags;
