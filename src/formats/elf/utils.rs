//! Utility functions for ELF parsing

use crate::error::{MemscopeError, Result};
use crate::formats::elf::types::{ElfClass, ElfData};

/// Sequential reader honouring the image's class and byte order.
///
/// Every read advances the cursor, so callers can compare `position()`
/// against sizes the file declares for itself.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    class: ElfClass,
    endian: ElfData,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8], pos: usize, class: ElfClass, endian: ElfData) -> Self {
        Self {
            data,
            pos,
            class,
            endian,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Take the next `len` bytes.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                MemscopeError::format(
                    self.pos as u64,
                    format!("truncated: need {} bytes, {} left", len, self.remaining()),
                )
            })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    /// Skip padding up to the next multiple of `alignment`.
    pub fn align(&mut self, alignment: u64) -> Result<()> {
        let target = align_up(self.pos as u64, alignment) as usize;
        self.bytes(target - self.pos).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        let b = [b[0], b[1]];
        Ok(match self.endian {
            ElfData::Little => u16::from_le_bytes(b),
            ElfData::Big => u16::from_be_bytes(b),
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        let b = [b[0], b[1], b[2], b[3]];
        Ok(match self.endian {
            ElfData::Little => u32::from_le_bytes(b),
            ElfData::Big => u32::from_be_bytes(b),
        })
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.bytes(8)?;
        let b = [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]];
        Ok(match self.endian {
            ElfData::Little => u64::from_le_bytes(b),
            ElfData::Big => u64::from_be_bytes(b),
        })
    }

    /// Read a native word (4 or 8 bytes depending on class).
    pub fn read_word(&mut self) -> Result<u64> {
        match self.class {
            ElfClass::Elf32 => self.read_u32().map(u64::from),
            ElfClass::Elf64 => self.read_u64(),
        }
    }
}

/// Little-endian u32 at the start of `b`. Target memory is always LE.
pub fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Little-endian u64 at the start of `b`.
pub fn le_u64(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// Align a value up to the specified alignment
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 || alignment == 1 {
        value
    } else {
        (value + alignment - 1) & !(alignment - 1)
    }
}
