//! ELF32 boundary validation: the constraints the core requires of an
//! executable before handing it to the (external) loader.
//!
//! Grounded in spec §6's "ELF Constraint (boundary)" paragraph; this module
//! does not implement loading itself (that remains an external
//! collaborator per spec §1) — only the header/program-header checks the
//! core is responsible for enforcing.

extern crate alloc;

use crate::error::{Errno, KResult};

pub const ET_EXEC: u16 = 2;
pub const EM_386: u16 = 3;
pub const ELFCLASS32: u8 = 1;
pub const ELFDATA2LSB: u8 = 1;
pub const EV_CURRENT: u32 = 1;

pub const PT_LOAD: u32 = 1;

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Elf32Ehdr {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Elf32Phdr {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

const EI_MAG0: usize = 0;
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_VERSION: usize = 6;
const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Check the ELF header in isolation: magic, class, endianness, machine,
/// type, version, flags.
pub fn validate_header(ehdr: &Elf32Ehdr) -> KResult<()> {
    if ehdr.e_ident[EI_MAG0..EI_MAG0 + 4] != ELF_MAGIC {
        return Err(Errno::Einval);
    }
    if ehdr.e_ident[EI_CLASS] != ELFCLASS32 {
        return Err(Errno::Einval);
    }
    if ehdr.e_ident[EI_DATA] != ELFDATA2LSB {
        return Err(Errno::Einval);
    }
    if ehdr.e_ident[EI_VERSION] as u32 != EV_CURRENT {
        return Err(Errno::Einval);
    }
    if ehdr.e_type != ET_EXEC {
        return Err(Errno::Einval);
    }
    if ehdr.e_machine != EM_386 {
        return Err(Errno::Einval);
    }
    if ehdr.e_version != EV_CURRENT {
        return Err(Errno::Einval);
    }
    if ehdr.e_flags != 0 {
        return Err(Errno::Einval);
    }
    if ehdr.e_phnum == 0 {
        return Err(Errno::Einval);
    }
    if ehdr.e_phentsize as usize != core::mem::size_of::<Elf32Phdr>() {
        return Err(Errno::Einval);
    }

    Ok(())
}

/// Where the loader should point `AT_PHDR`, and the data segment used to
/// locate it: a unique executable `PT_LOAD`, and a data-containing
/// `PT_LOAD` that completely encloses the program headers' file range.
pub struct LoadPlan {
    pub entry: u32,
    pub executable_segment: usize,
    pub phdr_segment: usize,
    pub at_phdr: u32,
}

/// Validate the program header table against spec §6's constraints and
/// produce the information the loader needs: exactly one executable
/// `PT_LOAD`, a data `PT_LOAD` enclosing the program-header file range, and
/// no `PT_LOAD` overlapping `[stack_base, stack_base + stack_size)`.
pub fn validate_program_headers(
    ehdr: &Elf32Ehdr,
    phdrs: &[Elf32Phdr],
    stack_base: u32,
    stack_size: u32,
) -> KResult<LoadPlan> {
    let loads: alloc::vec::Vec<(usize, &Elf32Phdr)> = phdrs.iter().enumerate().filter(|(_, p)| p.p_type == PT_LOAD).collect();

    if loads.is_empty() {
        return Err(Errno::Einval);
    }

    const PF_X: u32 = 1 << 0;

    let mut executable_segment = None;
    for &(idx, p) in &loads {
        if p.p_flags & PF_X != 0 {
            if executable_segment.is_some() {
                return Err(Errno::Einval);
            }
            executable_segment = Some(idx);
        }
    }
    let executable_segment = executable_segment.ok_or(Errno::Einval)?;

    let phdr_table_start = ehdr.e_phoff;
    let phdr_table_end = ehdr.e_phoff + ehdr.e_phnum as u32 * ehdr.e_phentsize as u32;

    let phdr_segment = loads
        .iter()
        .find(|&&(_, p)| p.p_offset <= phdr_table_start && p.p_offset + p.p_filesz >= phdr_table_end)
        .map(|&(idx, _)| idx)
        .ok_or(Errno::Einval)?;

    let stack_end = stack_base + stack_size;
    for &(_, p) in &loads {
        let seg_start = p.p_vaddr;
        let seg_end = p.p_vaddr + p.p_memsz;
        let overlaps = seg_start < stack_end && stack_base < seg_end;
        if overlaps {
            return Err(Errno::Einval);
        }
    }

    let phdr_phdr = &phdrs[phdr_segment];
    let at_phdr = phdr_phdr.p_vaddr + (phdr_table_start - phdr_phdr.p_offset);

    Ok(LoadPlan {
        entry: ehdr.e_entry,
        executable_segment,
        phdr_segment,
        at_phdr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(e_type: u16, e_phnum: u16, e_flags: u32) -> Elf32Ehdr {
        let mut e_ident = [0u8; 16];
        e_ident[0..4].copy_from_slice(&ELF_MAGIC);
        e_ident[EI_CLASS] = ELFCLASS32;
        e_ident[EI_DATA] = ELFDATA2LSB;
        e_ident[EI_VERSION] = 1;

        Elf32Ehdr {
            e_ident,
            e_type,
            e_machine: EM_386,
            e_version: EV_CURRENT,
            e_entry: 0x1000,
            e_phoff: core::mem::size_of::<Elf32Ehdr>() as u32,
            e_shoff: 0,
            e_flags,
            e_ehsize: core::mem::size_of::<Elf32Ehdr>() as u16,
            e_phentsize: core::mem::size_of::<Elf32Phdr>() as u16,
            e_phnum,
            e_shentsize: 0,
            e_shnum: 0,
            e_shstrndx: 0,
        }
    }

    #[test]
    fn rejects_non_et_exec() {
        let ehdr = header(3, 1, 0);
        assert_eq!(validate_header(&ehdr), Err(Errno::Einval));
    }

    #[test]
    fn rejects_nonzero_flags() {
        let ehdr = header(ET_EXEC, 1, 1);
        assert_eq!(validate_header(&ehdr), Err(Errno::Einval));
    }

    #[test]
    fn accepts_well_formed_header() {
        let ehdr = header(ET_EXEC, 2, 0);
        assert!(validate_header(&ehdr).is_ok());
    }

    #[test]
    fn program_headers_need_unique_executable_segment_and_phdr_coverage() {
        let ehdr = header(ET_EXEC, 2, 0);
        let phdr_bytes_end = ehdr.e_phoff + 2 * ehdr.e_phentsize as u32;

        let exec = Elf32Phdr {
            p_type: PT_LOAD,
            p_offset: 0,
            p_vaddr: 0x1000,
            p_paddr: 0x1000,
            p_filesz: 0x500,
            p_memsz: 0x500,
            p_flags: 1,
            p_align: 0x1000,
        };
        let data = Elf32Phdr {
            p_type: PT_LOAD,
            p_offset: 0,
            p_vaddr: 0x2000,
            p_paddr: 0x2000,
            p_filesz: phdr_bytes_end,
            p_memsz: phdr_bytes_end,
            p_flags: 2,
            p_align: 0x1000,
        };

        let plan = validate_program_headers(&ehdr, &[exec, data], 0x8000_0000, 0x1000).unwrap();
        assert_eq!(plan.executable_segment, 0);
        assert_eq!(plan.phdr_segment, 1);
        assert_eq!(plan.at_phdr, 0x2000 + ehdr.e_phoff);
    }

    #[test]
    fn rejects_segment_overlapping_stack() {
        let ehdr = header(ET_EXEC, 1, 0);
        let exec = Elf32Phdr {
            p_type: PT_LOAD,
            p_offset: 0,
            p_vaddr: 0x8000_0000,
            p_paddr: 0,
            p_filesz: 0x2000,
            p_memsz: 0x2000,
            p_flags: 1,
            p_align: 0x1000,
        };
        assert_eq!(validate_program_headers(&ehdr, &[exec], 0x8000_0000, 0x1000), Err(Errno::Einval));
    }
}
