//! Note segment parsing

use crate::error::{MemscopeError, Result};
use crate::formats::elf::types::*;
use crate::formats::elf::utils::ByteReader;

/// Individual note entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub n_type: u32,
    /// Owner name as stored, including any terminating NUL.
    pub name: Vec<u8>,
    pub desc: Vec<u8>,
}

impl Note {
    /// Owner name without trailing NULs.
    pub fn owner(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        &self.name[..end]
    }

    pub fn is(&self, owner: &str, n_type: u32) -> bool {
        self.n_type == n_type && self.owner() == owner.as_bytes()
    }
}

/// Parse every note in a NOTE segment's bytes.
///
/// A note whose name or descriptor runs past the end of `data` is a format
/// error rather than silently dropped.
pub fn parse_notes(
    data: &[u8],
    base_offset: u64,
    class: ElfClass,
    endian: ElfData,
) -> Result<Vec<Note>> {
    let mut notes = Vec::new();
    let mut r = ByteReader::new(data, 0, class, endian);

    while r.remaining() > 0 {
        let start = r.position();
        let mut field = || r.read_u32().map_err(|_| truncated(base_offset, start));
        let n_namesz = field()?;
        let n_descsz = field()?;
        let n_type = field()?;

        let name = r
            .bytes(n_namesz as usize)
            .map_err(|_| truncated(base_offset, start))?
            .to_vec();
        r.align(4).map_err(|_| truncated(base_offset, start))?;
        let desc = r
            .bytes(n_descsz as usize)
            .map_err(|_| truncated(base_offset, start))?
            .to_vec();
        // Trailing padding of the last note may be omitted.
        if r.remaining() > 0 {
            r.align(4).map_err(|_| truncated(base_offset, start))?;
        }

        notes.push(Note { n_type, name, desc });
    }

    Ok(notes)
}

fn truncated(base_offset: u64, start: usize) -> MemscopeError {
    MemscopeError::format(base_offset + start as u64, "truncated note")
}

/// GNU build ID, if one of `notes` carries it.
pub fn build_id(notes: &[Note]) -> Option<&[u8]> {
    notes
        .iter()
        .find(|n| n.is("GNU", NT_GNU_BUILD_ID))
        .map(|n| n.desc.as_slice())
}
