//! Program header table

use crate::backend::Permissions;
use crate::error::{MemscopeError, Result};
use crate::formats::elf::types::*;
use crate::formats::elf::utils::ByteReader;

/// One program header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub p_type: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64,
}

impl Segment {
    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    /// Whether `address` falls in `[vaddr, vaddr + memsz)`.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.vaddr && address - self.vaddr < self.memsz
    }

    pub fn end(&self) -> u64 {
        self.vaddr.saturating_add(self.memsz)
    }

    pub fn is_readable(&self) -> bool {
        self.flags & PF_R != 0
    }

    pub fn is_writable(&self) -> bool {
        self.flags & PF_W != 0
    }

    pub fn is_executable(&self) -> bool {
        self.flags & PF_X != 0
    }

    /// Segment flags in backend bit order (read=1, write=2, execute=4).
    pub fn permissions(&self) -> Permissions {
        let mut perms = Permissions::empty();
        perms.set(Permissions::READ, self.is_readable());
        perms.set(Permissions::WRITE, self.is_writable());
        perms.set(Permissions::EXECUTE, self.is_executable());
        perms
    }

    /// File bytes backing this segment, clamped to what `data` holds.
    pub fn file_bytes<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let start = (self.offset as usize).min(data.len());
        let end = start.saturating_add(self.filesz as usize).min(data.len());
        &data[start..end]
    }
}

/// Parse the program header table declared in `header`.
pub fn parse_segments(data: &[u8], header: &ElfHeader) -> Result<Vec<Segment>> {
    let class = header.ident.class;
    let count = header.e_phnum as usize;
    if count == 0 {
        return Ok(Vec::new());
    }

    let entsize = header.e_phentsize as usize;
    let minimum = match class {
        ElfClass::Elf32 => 32,
        ElfClass::Elf64 => 56,
    };
    if entsize < minimum {
        return Err(MemscopeError::format(
            header.e_phoff,
            format!("program header entry size {} below {}", entsize, minimum),
        ));
    }

    let mut segments = Vec::with_capacity(count);
    for i in 0..count {
        let at = (header.e_phoff as usize)
            .checked_add(i * entsize)
            .ok_or_else(|| MemscopeError::format(header.e_phoff, "program header overflow"))?;
        let mut r = ByteReader::new(data, at, class, header.ident.data);
        segments.push(parse_program_header(&mut r, class)?);
    }
    Ok(segments)
}

/// Flags sit right after the type in 64-bit headers and just before the
/// alignment in 32-bit ones.
fn parse_program_header(r: &mut ByteReader<'_>, class: ElfClass) -> Result<Segment> {
    let p_type = r.read_u32()?;
    let mut flags = match class {
        ElfClass::Elf64 => r.read_u32()?,
        ElfClass::Elf32 => 0,
    };
    let offset = r.read_word()?;
    let vaddr = r.read_word()?;
    let paddr = r.read_word()?;
    let filesz = r.read_word()?;
    let memsz = r.read_word()?;
    if class == ElfClass::Elf32 {
        flags = r.read_u32()?;
    }
    let align = r.read_word()?;

    Ok(Segment {
        p_type,
        flags,
        offset,
        vaddr,
        paddr,
        filesz,
        memsz,
        align,
    })
}
