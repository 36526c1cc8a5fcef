//! ELF header parsing

use tracing::debug;

use crate::error::{MemscopeError, Result};
use crate::formats::elf::types::*;
use crate::formats::elf::utils::ByteReader;

/// Parse ELF identification bytes
pub fn parse_ident(data: &[u8]) -> Result<ElfIdent> {
    if data.len() < 16 {
        return Err(MemscopeError::format(
            0,
            format!("truncated identification: {} bytes", data.len()),
        ));
    }

    if &data[0..4] != ELF_MAGIC {
        let mut found = [0u8; 4];
        found.copy_from_slice(&data[0..4]);
        return Err(MemscopeError::BadMagic {
            offset: 0,
            expected: u32::from_le_bytes(*ELF_MAGIC),
            found: u32::from_le_bytes(found),
        });
    }

    Ok(ElfIdent {
        class: ElfClass::from_u8(data[4])?,
        data: ElfData::from_u8(data[5])?,
        version: data[6],
        osabi: data[7],
        abiversion: data[8],
    })
}

/// Parse the ELF header field by field.
///
/// Fails with `HeaderSize` when `e_ehsize` disagrees with the number of
/// bytes the header actually occupies for its class.
pub fn parse_header(data: &[u8]) -> Result<ElfHeader> {
    let ident = parse_ident(data)?;
    let mut r = ByteReader::new(data, 16, ident.class, ident.data);

    let e_type = r.read_u16()?;
    let e_machine = r.read_u16()?;
    let e_version = r.read_u32()?;
    let e_entry = r.read_word()?;
    let e_phoff = r.read_word()?;
    let e_shoff = r.read_word()?;
    let e_flags = r.read_u32()?;
    let e_ehsize = r.read_u16()?;
    let e_phentsize = r.read_u16()?;
    let e_phnum = r.read_u16()?;
    let e_shentsize = r.read_u16()?;
    let e_shnum = r.read_u16()?;
    let e_shstrndx = r.read_u16()?;

    let consumed = r.position() as u64;
    if u64::from(e_ehsize) != consumed {
        return Err(MemscopeError::HeaderSize {
            declared: u64::from(e_ehsize),
            consumed,
        });
    }

    debug!(
        class = ?ident.class,
        endian = ?ident.data,
        machine = e_machine,
        phnum = e_phnum,
        "Parsed ELF header"
    );

    Ok(ElfHeader {
        ident,
        e_type,
        e_machine,
        e_version,
        e_entry,
        e_phoff,
        e_shoff,
        e_flags,
        e_ehsize,
        e_phentsize,
        e_phnum,
        e_shentsize,
        e_shnum,
        e_shstrndx,
    })
}
