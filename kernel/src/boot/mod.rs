//! Boot information block and the invariants checked on it before any
//! subsystem trusts its contents.
//!
//! Grounded in spec §6 ("Boot Information" / "Address Map Reported to
//! User") and in the BIOS-style memory map conventions the teacher's
//! `mm/bootloader.rs` also consumes.

extern crate alloc;

use alloc::vec::Vec;

use spin::Once;

use crate::error::fatal;

/// One BIOS-style memory map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMapEntry {
    pub addr: u64,
    pub size: u64,
    pub kind: MemoryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Available,
    Reserved,
    Acpi,
    Nvs,
    Unusable,
    Persistent,
    Oem,
}

/// A physical extent, e.g. the kernel image or the initial RAM disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    pub addr: u64,
    pub size: u64,
}

impl Extent {
    fn end(&self) -> u64 {
        self.addr + self.size
    }

    fn contains(&self, other: Extent) -> bool {
        other.addr >= self.addr && other.end() <= self.end()
    }
}

/// The packed structure handed to the kernel by the architectural setup
/// code, after it has been copied out of boot-time-only memory.
pub struct BootInfo {
    pub boot_heap: Extent,
    pub cmdline_ptr: Option<u32>,
    pub kernel_image_phys: Extent,
    pub kernel_image_virt: Extent,
    pub data_segment_phys: Extent,
    pub data_segment_virt: Extent,
    pub ramdisk: Option<Extent>,
    pub memory_map: Vec<MemoryMapEntry>,
}

impl BootInfo {
    fn available_extents(&self) -> impl Iterator<Item = Extent> + '_ {
        self.memory_map
            .iter()
            .filter(|e| e.kind == MemoryKind::Available)
            .map(|e| Extent { addr: e.addr, size: e.size })
    }

    fn fully_within_available(&self, extent: Extent) -> bool {
        self.available_extents().any(|avail| avail.contains(extent))
    }

    fn available_at_least(&self, at: u64, bytes: u64) -> bool {
        self.available_extents().any(|avail| avail.addr <= at && avail.end() >= at + bytes)
    }

    /// Validate every invariant spec §6 requires of the boot information
    /// before any other subsystem is allowed to trust it. Panics (does not
    /// return an error) per spec §7: "invalid or insufficient physical
    /// memory map" is a fatal condition.
    pub fn validate(&self) {
        if !self.fully_within_available(self.kernel_image_phys) {
            fatal("boot info: kernel image does not fit entirely within available memory");
        }

        if let Some(ramdisk) = self.ramdisk {
            if !self.fully_within_available(ramdisk) {
                fatal("boot info: ram disk does not fit within available memory");
            }
            if ramdisk.addr < self.kernel_image_phys.end() {
                fatal("boot info: ram disk overlaps the kernel-reserved region");
            }
        }

        const ONE_MB: u64 = 1 << 20;
        const SIXTEEN_MB: u64 = 16 << 20;
        const MIN_AT_1MB: u64 = ONE_MB;
        const MIN_AT_16MB: u64 = 8 * ONE_MB;

        if !self.available_at_least(ONE_MB, MIN_AT_1MB) {
            fatal("boot info: insufficient available memory at 1MB");
        }
        if !self.available_at_least(SIXTEEN_MB, MIN_AT_16MB) {
            fatal("boot info: insufficient available memory at 16MB");
        }
    }
}

/// The map returned to user space from `GET_ADDRESS_MAP` (spec §6):
/// the BIOS-style types plus kernel/loader-specific regions.
/// ABI-stable: crosses the `GET_ADDRESS_MAP` syscall boundary into user
/// space as a raw byte copy, so the discriminant width and struct layout
/// below are fixed rather than left to the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReportedRegionKind {
    Available = 0,
    Reserved = 1,
    Acpi = 2,
    Nvs = 3,
    Unusable = 4,
    Persistent = 5,
    Oem = 6,
    Ramdisk = 7,
    KernelImage = 8,
    KernelReserved = 9,
    KernelShared = 10,
    /// Single best-effort hint: the largest usable contiguous range above
    /// the kernel's reserved region.
    LoaderAvailable = 11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ReportedRegion {
    pub addr: u64,
    pub size: u64,
    pub kind: ReportedRegionKind,
}

static BOOT_INFO: Once<BootInfo> = Once::new();

/// Record the validated boot information for later retrieval by
/// `GET_ADDRESS_MAP`. Called once, after [`BootInfo::validate`] passes.
pub fn set(info: BootInfo) {
    BOOT_INFO.call_once(|| info);
}

pub fn get() -> &'static BootInfo {
    BOOT_INFO.get().unwrap_or_else(|| fatal("boot::get called before boot::set"))
}

/// Build the address map reported to user space: the BIOS map translated
/// to [`ReportedRegionKind`], with the kernel image/ram disk carved out and
/// a single `LoaderAvailable` hint appended for the largest contiguous
/// available range above the kernel's reserved region.
pub fn address_map(info: &BootInfo) -> Vec<ReportedRegion> {
    let mut regions: Vec<ReportedRegion> = info
        .memory_map
        .iter()
        .map(|e| ReportedRegion {
            addr: e.addr,
            size: e.size,
            kind: match e.kind {
                MemoryKind::Available => ReportedRegionKind::Available,
                MemoryKind::Reserved => ReportedRegionKind::Reserved,
                MemoryKind::Acpi => ReportedRegionKind::Acpi,
                MemoryKind::Nvs => ReportedRegionKind::Nvs,
                MemoryKind::Unusable => ReportedRegionKind::Unusable,
                MemoryKind::Persistent => ReportedRegionKind::Persistent,
                MemoryKind::Oem => ReportedRegionKind::Oem,
            },
        })
        .collect();

    regions.push(ReportedRegion {
        addr: info.kernel_image_phys.addr,
        size: info.kernel_image_phys.size,
        kind: ReportedRegionKind::KernelImage,
    });

    if let Some(ramdisk) = info.ramdisk {
        regions.push(ReportedRegion {
            addr: ramdisk.addr,
            size: ramdisk.size,
            kind: ReportedRegionKind::Ramdisk,
        });
    }

    let kernel_reserved_end = info.kernel_image_phys.end().max(info.ramdisk.map(|r| r.end()).unwrap_or(0));

    if let Some(best) = info
        .available_extents()
        .filter(|e| e.addr >= kernel_reserved_end)
        .max_by_key(|e| e.size)
    {
        regions.push(ReportedRegion {
            addr: best.addr,
            size: best.size,
            kind: ReportedRegionKind::LoaderAvailable,
        });
    }

    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with_available(ranges: &[(u64, u64)], kernel: Extent, ramdisk: Option<Extent>) -> BootInfo {
        BootInfo {
            boot_heap: Extent::default(),
            cmdline_ptr: None,
            kernel_image_phys: kernel,
            kernel_image_virt: Extent::default(),
            data_segment_phys: Extent::default(),
            data_segment_virt: Extent::default(),
            ramdisk,
            memory_map: ranges
                .iter()
                .map(|&(addr, size)| MemoryMapEntry { addr, size, kind: MemoryKind::Available })
                .collect(),
        }
    }

    #[test]
    fn valid_map_passes() {
        let info = info_with_available(
            &[(0, 16 << 20)],
            Extent { addr: 1 << 20, size: 1 << 20 },
            None,
        );
        info.validate();
    }

    #[test]
    #[should_panic(expected = "kernel image does not fit")]
    fn kernel_outside_available_is_fatal() {
        let info = info_with_available(&[(0, 1 << 20)], Extent { addr: 2 << 20, size: 1 << 20 }, None);
        info.validate();
    }

    #[test]
    #[should_panic(expected = "ram disk overlaps")]
    fn ramdisk_overlapping_kernel_is_fatal() {
        let info = info_with_available(
            &[(0, 16 << 20)],
            Extent { addr: 1 << 20, size: 2 << 20 },
            Some(Extent { addr: (1 << 20) + (1 << 19), size: 1 << 19 }),
        );
        info.validate();
    }

    #[test]
    fn loader_available_picks_largest_range_above_kernel() {
        let info = info_with_available(
            &[(0, 16 << 20), (20 << 20, 4 << 20), (30 << 20, 64 << 20)],
            Extent { addr: 1 << 20, size: 1 << 20 },
            None,
        );
        let map = address_map(&info);
        let hint = map.iter().find(|r| r.kind == ReportedRegionKind::LoaderAvailable).unwrap();
        assert_eq!(hint.addr, 30 << 20);
        assert_eq!(hint.size, 64 << 20);
    }
}
