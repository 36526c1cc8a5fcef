//! Core ELF types and constants

use crate::error::{MemscopeError, Result};

/// ELF magic number
pub const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// Program header types
pub const PT_NULL: u32 = 0;
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_INTERP: u32 = 3;
pub const PT_NOTE: u32 = 4;

/// Program header flags
pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

/// Note types
pub const NT_GNU_BUILD_ID: u32 = 3;

/// ELF class (32-bit or 64-bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32 = 1,
    Elf64 = 2,
}

impl ElfClass {
    pub fn from_u8(val: u8) -> Result<Self> {
        match val {
            1 => Ok(ElfClass::Elf32),
            2 => Ok(ElfClass::Elf64),
            _ => Err(MemscopeError::format(4, format!("unsupported ELF class {}", val))),
        }
    }

    /// Width of a native word in bytes.
    pub fn word_size(&self) -> usize {
        match self {
            ElfClass::Elf32 => 4,
            ElfClass::Elf64 => 8,
        }
    }
}

/// ELF data encoding (endianness)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfData {
    Little = 1,
    Big = 2,
}

impl ElfData {
    pub fn from_u8(val: u8) -> Result<Self> {
        match val {
            1 => Ok(ElfData::Little),
            2 => Ok(ElfData::Big),
            _ => Err(MemscopeError::format(
                5,
                format!("unsupported ELF data encoding {}", val),
            )),
        }
    }

    pub fn is_little_endian(&self) -> bool {
        matches!(self, ElfData::Little)
    }
}

/// ELF identification (first 16 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfIdent {
    pub class: ElfClass,
    pub data: ElfData,
    pub version: u8,
    pub osabi: u8,
    pub abiversion: u8,
}

/// ELF header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfHeader {
    pub ident: ElfIdent,
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl ElfHeader {
    pub fn entry_point(&self) -> u64 {
        self.e_entry
    }

    pub fn is_aarch64(&self) -> bool {
        self.e_machine == 183
    }
}

/// Dynamic tags
pub const DT_NULL: u64 = 0;
pub const DT_NEEDED: u64 = 1;
pub const DT_PLTRELSZ: u64 = 2;
pub const DT_PLTGOT: u64 = 3;
pub const DT_HASH: u64 = 4;
pub const DT_STRTAB: u64 = 5;
pub const DT_SYMTAB: u64 = 6;
pub const DT_RELA: u64 = 7;
pub const DT_RELASZ: u64 = 8;
pub const DT_RELAENT: u64 = 9;
pub const DT_STRSZ: u64 = 10;
pub const DT_SYMENT: u64 = 11;
pub const DT_SYMBOLIC: u64 = 16;
pub const DT_REL: u64 = 17;
pub const DT_RELSZ: u64 = 18;
pub const DT_RELENT: u64 = 19;
pub const DT_PLTREL: u64 = 20;
pub const DT_JMPREL: u64 = 23;
pub const DT_INIT_ARRAY: u64 = 25;
pub const DT_FINI_ARRAY: u64 = 26;
pub const DT_INIT_ARRAYSZ: u64 = 27;
pub const DT_FINI_ARRAYSZ: u64 = 28;
pub const DT_FLAGS: u64 = 30;
pub const DT_GNU_HASH: u64 = 0x6fff_fef5;
pub const DT_RELACOUNT: u64 = 0x6fff_fff9;

/// Size of one `Elf64_Dyn` entry.
pub const DYN_ENTRY_SIZE: u64 = 16;
/// Size of one `Elf64_Sym` entry.
pub const SYM_ENTRY_SIZE: u64 = 24;
/// Size of one `Elf64_Rela` entry.
pub const RELA_ENTRY_SIZE: u64 = 0x18;

/// Symbolic name of a dynamic tag, when it has one.
pub fn dynamic_tag_name(tag: u64) -> Option<&'static str> {
    Some(match tag {
        DT_NULL => "NULL",
        DT_NEEDED => "NEEDED",
        DT_PLTRELSZ => "PLTRELSZ",
        DT_PLTGOT => "PLTGOT",
        DT_HASH => "HASH",
        DT_STRTAB => "STRTAB",
        DT_SYMTAB => "SYMTAB",
        DT_RELA => "RELA",
        DT_RELASZ => "RELASZ",
        DT_RELAENT => "RELAENT",
        DT_STRSZ => "STRSZ",
        DT_SYMENT => "SYMENT",
        DT_SYMBOLIC => "SYMBOLIC",
        DT_REL => "REL",
        DT_RELSZ => "RELSZ",
        DT_RELENT => "RELENT",
        DT_PLTREL => "PLTREL",
        DT_JMPREL => "JMPREL",
        DT_INIT_ARRAY => "INIT_ARRAY",
        DT_FINI_ARRAY => "FINI_ARRAY",
        DT_INIT_ARRAYSZ => "INIT_ARRAYSZ",
        DT_FINI_ARRAYSZ => "FINI_ARRAYSZ",
        DT_FLAGS => "FLAGS",
        DT_GNU_HASH => "GNU_HASH",
        DT_RELACOUNT => "RELACOUNT",
        _ => return None,
    })
}
