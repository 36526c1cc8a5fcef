//! Common test utilities and helpers.
//!
//! Builds small AArch64 ELF images in memory so integration tests and
//! benches do not depend on sample binaries.

#![allow(dead_code)]

use std::io::Write;
use tempfile::NamedTempFile;

pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_NOTE: u32 = 4;

pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;

struct SegmentSpec {
    p_type: u32,
    flags: u32,
    vaddr: u64,
    data: Vec<u8>,
    memsz: u64,
}

/// Little-endian ELF64 image with a program header table and no sections.
#[derive(Default)]
pub struct ElfBuilder {
    segments: Vec<SegmentSpec>,
    ehsize: Option<u16>,
}

impl ElfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segment(
        mut self,
        p_type: u32,
        flags: u32,
        vaddr: u64,
        data: Vec<u8>,
        memsz: u64,
    ) -> Self {
        self.segments.push(SegmentSpec {
            p_type,
            flags,
            vaddr,
            data,
            memsz,
        });
        self
    }

    /// LOAD segment whose memory size equals its file size.
    pub fn load(self, flags: u32, vaddr: u64, data: Vec<u8>) -> Self {
        let memsz = data.len() as u64;
        self.segment(PT_LOAD, flags, vaddr, data, memsz)
    }

    pub fn note_segment(self, notes: Vec<u8>) -> Self {
        let memsz = notes.len() as u64;
        self.segment(PT_NOTE, PF_R, 0, notes, memsz)
    }

    /// Override `e_ehsize` to produce a malformed header.
    pub fn header_size(mut self, ehsize: u16) -> Self {
        self.ehsize = Some(ehsize);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let phnum = self.segments.len();
        let mut out = vec![0u8; EHDR_SIZE + phnum * PHDR_SIZE];

        out[0..4].copy_from_slice(b"\x7fELF");
        out[4] = 2; // ELFCLASS64
        out[5] = 1; // ELFDATA2LSB
        out[6] = 1;
        out[16..18].copy_from_slice(&3u16.to_le_bytes()); // ET_DYN
        out[18..20].copy_from_slice(&183u16.to_le_bytes()); // EM_AARCH64
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        out[32..40].copy_from_slice(&(EHDR_SIZE as u64).to_le_bytes());
        let ehsize = self.ehsize.unwrap_or(EHDR_SIZE as u16);
        out[52..54].copy_from_slice(&ehsize.to_le_bytes());
        out[54..56].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        out[56..58].copy_from_slice(&(phnum as u16).to_le_bytes());
        out[58..60].copy_from_slice(&64u16.to_le_bytes());

        for (i, seg) in self.segments.iter().enumerate() {
            while out.len() % 16 != 0 {
                out.push(0);
            }
            let offset = out.len() as u64;
            out.extend_from_slice(&seg.data);

            let at = EHDR_SIZE + i * PHDR_SIZE;
            let phdr = &mut out[at..at + PHDR_SIZE];
            phdr[0..4].copy_from_slice(&seg.p_type.to_le_bytes());
            phdr[4..8].copy_from_slice(&seg.flags.to_le_bytes());
            phdr[8..16].copy_from_slice(&offset.to_le_bytes());
            phdr[16..24].copy_from_slice(&seg.vaddr.to_le_bytes());
            phdr[24..32].copy_from_slice(&seg.vaddr.to_le_bytes());
            phdr[32..40].copy_from_slice(&(seg.data.len() as u64).to_le_bytes());
            phdr[40..48].copy_from_slice(&seg.memsz.to_le_bytes());
            phdr[48..56].copy_from_slice(&0x1000u64.to_le_bytes());
        }
        out
    }
}

/// One note record, padded to four bytes.
pub fn note(owner: &str, n_type: u32, desc: &[u8]) -> Vec<u8> {
    let mut name = owner.as_bytes().to_vec();
    name.push(0);
    let mut out = Vec::new();
    out.extend_from_slice(&(name.len() as u32).to_le_bytes());
    out.extend_from_slice(&(desc.len() as u32).to_le_bytes());
    out.extend_from_slice(&n_type.to_le_bytes());
    out.extend_from_slice(&name);
    pad4(&mut out);
    out.extend_from_slice(desc);
    pad4(&mut out);
    out
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn put(buf: &mut [u8], at: usize, bytes: &[u8]) {
    buf[at..at + bytes.len()].copy_from_slice(bytes);
}

fn symbol(st_name: u32, value: u64, size: u64) -> Vec<u8> {
    let mut out = st_name.to_le_bytes().to_vec();
    out.extend_from_slice(&[0x12, 0, 1, 0]);
    out.extend_from_slice(&value.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out
}

/// Layout of the module fixture.
pub mod fixture {
    pub const MODULE_BASE: u64 = 0x10000;
    pub const MODULE_SIZE: u64 = 0x3000;
    pub const HEADER: u64 = MODULE_BASE + 0x100;
    pub const MAIN: u64 = MODULE_BASE + 0x800;
    pub const VTABLE: u64 = MODULE_BASE + 0x880;
    pub const DISPATCH_TABLE: u64 = MODULE_BASE + 0x900;
    pub const GREETING: u64 = MODULE_BASE + 0xa00;

    /// Writable data inside the module; its first word is a relocation
    /// target holding the dispatch-table address.
    pub const DATA: u64 = MODULE_BASE + 0x2000;
    pub const DATA_FILESZ: u64 = 0x100;
    pub const DATA_MEMSZ: u64 = 0x1000;
    /// Slot holding the implementation pointer, eight bytes below the anchor.
    pub const INSTANCE_SLOT: u64 = DATA + 0x10;
    pub const INSTANCE: u64 = 0x7100_4000;
    pub const ANCHOR: u64 = DATA + 0x18;

    /// Writable data past the end of the module that also holds the
    /// dispatch-table address.
    pub const FOREIGN: u64 = 0x20000;

    pub const INTERFACE: &str = "nn::fs::IFileSystem";
    pub const BUILD_ID: [u8; 4] = [0xde, 0xad, 0xbe, 0xef];
    pub const GNU_BUILD_ID: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
}

/// Code segment of the fixture module: header, dynamic table, hash, string
/// and symbol tables, one relocation, and a string at `GREETING`.
pub fn module_text(magic: &[u8; 4]) -> Vec<u8> {
    use fixture::*;

    let mut text = vec![0u8; 0x1000];
    put(&mut text, 4, &0x100u32.to_le_bytes());
    put(&mut text, 0x100, magic);
    put(&mut text, 0x104, &0x100u32.to_le_bytes());

    let dynamic: [(u64, u64); 7] = [
        (4, 0x400),    // DT_HASH
        (5, 0x500),    // DT_STRTAB
        (6, 0x600),    // DT_SYMTAB
        (11, 24),      // DT_SYMENT
        (7, 0x700),    // DT_RELA
        (8, 0x18),     // DT_RELASZ
        (0, 0),        // DT_NULL
    ];
    for (i, (tag, value)) in dynamic.iter().enumerate() {
        put(&mut text, 0x200 + i * 16, &tag.to_le_bytes());
        put(&mut text, 0x208 + i * 16, &value.to_le_bytes());
    }

    put(&mut text, 0x400, &1u32.to_le_bytes());
    put(&mut text, 0x404, &4u32.to_le_bytes());

    let table_name = format!(
        "nn::sf::cmif::server::detail::CmifProcessFunctionTableGetter<{}, void>::s_Table",
        INTERFACE
    );
    let mut strtab = b"\0main\0_ZTVN2nn2fs11IFileSystemE\0".to_vec();
    let vtable_name = 6u32;
    let table_name_at = strtab.len() as u32;
    strtab.extend_from_slice(table_name.as_bytes());
    strtab.push(0);
    put(&mut text, 0x500, &strtab);

    let entries = [
        symbol(0, 0, 0),
        symbol(1, MAIN - MODULE_BASE, 0x20),
        symbol(vtable_name, VTABLE - MODULE_BASE, 0x18),
        symbol(table_name_at, DISPATCH_TABLE - MODULE_BASE, 0x30),
    ];
    for (i, e) in entries.iter().enumerate() {
        put(&mut text, 0x600 + i * 24, e);
    }

    // R_AARCH64_RELATIVE at DATA.
    put(&mut text, 0x700, &(DATA - MODULE_BASE).to_le_bytes());
    put(&mut text, 0x708, &1027u32.to_le_bytes());
    put(&mut text, 0x710, &0u32.to_le_bytes());
    put(&mut text, 0x718, &(DISPATCH_TABLE - MODULE_BASE).to_le_bytes());

    put(&mut text, (GREETING - MODULE_BASE) as usize, b"hello, module\0");
    text
}

/// Complete image: the module's code, its writable data, foreign data and
/// a note segment recording the module and a GNU build ID.
pub fn module_image_with_magic(magic: &[u8; 4]) -> Vec<u8> {
    use fixture::*;

    let mut data = vec![0u8; DATA_FILESZ as usize];
    put(&mut data, 0, &DISPATCH_TABLE.to_le_bytes());
    put(&mut data, 0x10, &INSTANCE.to_le_bytes());
    put(&mut data, 0x18, &DISPATCH_TABLE.to_le_bytes());

    let mut foreign = vec![0u8; 0x20];
    put(&mut foreign, 0, &0x7100_8000u64.to_le_bytes());
    put(&mut foreign, 8, &DISPATCH_TABLE.to_le_bytes());

    let mut module_desc = MODULE_BASE.to_le_bytes().to_vec();
    module_desc.extend_from_slice(&MODULE_SIZE.to_le_bytes());
    module_desc.extend_from_slice(&BUILD_ID);
    let mut notes = note("Twili", 6482, &module_desc);
    notes.extend(note("GNU", 3, &GNU_BUILD_ID));

    ElfBuilder::new()
        .load(PF_R | PF_X, MODULE_BASE, module_text(magic))
        .segment(PT_LOAD, PF_R | PF_W, DATA, data, DATA_MEMSZ)
        .load(PF_R | PF_W, FOREIGN, foreign)
        .note_segment(notes)
        .build()
}

pub fn module_image() -> Vec<u8> {
    module_image_with_magic(b"MOD0")
}

/// Creates a temporary file with the given content.
pub fn create_temp_file(content: &[u8]) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content).unwrap();
    temp_file.flush().unwrap();
    temp_file
}
