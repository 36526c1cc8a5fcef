//! Dynamic table walking
//!
//! Unlike section-based parsing, everything here is reached through the
//! loaded image: entries, symbols and relocations are read through a backend
//! at `module base + value`.

use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::backend::MemoryBackend;
use crate::config::LimitsConfig;
use crate::core::registry;
use crate::core::{MemoryPointer, Value};
use crate::demangle;
use crate::error::{MemscopeError, Result};
use crate::formats::elf::types::*;

/// One `(tag, value)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicEntry {
    pub tag: u64,
    pub value: u64,
}

impl DynamicEntry {
    /// Value interpreted as an offset from `base`.
    pub fn target(&self, base: u64) -> u64 {
        base.wrapping_add(self.value)
    }
}

impl fmt::Display for DynamicEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match dynamic_tag_name(self.tag) {
            Some(name) => write!(f, "DT_{} {:#x}", name, self.value),
            None => write!(f, "DT_{:#x} {:#x}", self.tag, self.value),
        }
    }
}

/// A symbol-table entry with its name resolved.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub index: u32,
    pub st_name: u32,
    pub info: u8,
    pub other: u8,
    pub shndx: u16,
    pub value: u64,
    pub size: u64,
    /// `module base + value`.
    pub address: u64,
    raw_name: String,
    demangled: OnceCell<Option<String>>,
}

impl Symbol {
    /// Name as stored in the string table.
    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    /// Demangled display name; the raw name when it does not demangle and
    /// `None` when the symbol is unnamed.
    pub fn demangled_name(&self) -> Option<&str> {
        self.demangled
            .get_or_init(|| demangle::display_name(&self.raw_name))
            .as_deref()
    }

    /// Whether `address` lies in `[address, address + size)`.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address - self.address < self.size.max(1)
    }
}

/// A RELA record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub offset: u64,
    pub reloc_type: u32,
    pub symbol: u32,
    pub addend: i64,
}

impl Relocation {
    /// Patched address, `base + offset`.
    pub fn target(&self, base: u64) -> u64 {
        base.wrapping_add(self.offset)
    }
}

/// The dynamic table of one loaded module.
pub struct DynamicSection {
    backend: Arc<dyn MemoryBackend>,
    base: u64,
    address: u64,
    entries: Vec<DynamicEntry>,
    limits: LimitsConfig,
}

impl DynamicSection {
    /// Read entries starting at `address` until the DT_NULL terminator.
    ///
    /// Running into unreadable memory or past `max_dynamic_entries` before
    /// the terminator is an `UnterminatedDynamic` error.
    pub fn parse(
        backend: Arc<dyn MemoryBackend>,
        base: u64,
        address: u64,
        limits: &LimitsConfig,
    ) -> Result<Self> {
        let table = MemoryPointer::new(Arc::clone(&backend), address, registry::elf_dyn());
        let mut entries = Vec::new();
        loop {
            if entries.len() >= limits.max_dynamic_entries {
                return Err(MemscopeError::UnterminatedDynamic {
                    address,
                    entries: entries.len(),
                });
            }
            let raw = table.index(entries.len() as i64).map_err(|e| {
                trace!(error = %e, "Dynamic walk hit unreadable memory");
                MemscopeError::UnterminatedDynamic {
                    address,
                    entries: entries.len(),
                }
            })?;
            let entry = DynamicEntry {
                tag: struct_field(&raw, "tag")?,
                value: struct_field(&raw, "value")?,
            };
            if entry.tag == DT_NULL {
                break;
            }
            trace!(%entry, "Dynamic entry");
            entries.push(entry);
        }
        debug!(address, entries = entries.len(), "Parsed dynamic table");
        Ok(Self {
            backend,
            base,
            address,
            entries,
            limits: limits.clone(),
        })
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    /// Entries in table order, without the terminator.
    pub fn entries(&self) -> &[DynamicEntry] {
        &self.entries
    }

    /// First entry with `tag`.
    pub fn lookup(&self, tag: u64) -> Option<DynamicEntry> {
        self.entries.iter().copied().find(|e| e.tag == tag)
    }

    pub fn require(&self, tag: u64) -> Result<DynamicEntry> {
        self.lookup(tag).ok_or(MemscopeError::MissingTag { tag })
    }

    /// Absolute address an entry refers to.
    pub fn target(&self, tag: u64) -> Result<u64> {
        self.require(tag).map(|e| e.target(self.base))
    }

    /// `nchain` of the SysV hash table, which equals the symbol count.
    pub fn symbol_count(&self) -> Result<u32> {
        let hash = MemoryPointer::new(
            Arc::clone(&self.backend),
            self.target(DT_HASH)?,
            registry::uint32(),
        );
        let nchain = hash.index(1)?;
        Ok(nchain.as_u64().unwrap_or(0) as u32)
    }

    /// Symbol-table entry `index` with its name read from the string table.
    pub fn symbol(&self, index: u32) -> Result<Symbol> {
        let symtab = self.target(DT_SYMTAB)?;
        let strtab = self.target(DT_STRTAB)?;
        let entry_size = self
            .lookup(DT_SYMENT)
            .map(|e| e.value)
            .filter(|&v| v != 0)
            .unwrap_or(SYM_ENTRY_SIZE);

        let offset = u64::from(index).checked_mul(entry_size).ok_or_else(|| {
            MemscopeError::format(
                symtab,
                format!("symbol {} overflows with entry size {:#x}", index, entry_size),
            )
        })?;
        let slot = MemoryPointer::new(
            Arc::clone(&self.backend),
            symtab.wrapping_add(offset),
            registry::elf_symbol(),
        );
        let raw = slot.deref()?;
        let st_name = struct_field(&raw, "st_name")? as u32;
        let value = struct_field(&raw, "value")?;

        let name = slot
            .at(strtab.wrapping_add(u64::from(st_name)), registry::char())
            .read_c_string(self.limits.max_symbol_name)?;

        Ok(Symbol {
            index,
            st_name,
            info: struct_field(&raw, "info")? as u8,
            other: struct_field(&raw, "other")? as u8,
            shndx: struct_field(&raw, "shndx")? as u16,
            value,
            size: struct_field(&raw, "size")?,
            address: self.base.wrapping_add(value),
            raw_name: name,
            demangled: OnceCell::new(),
        })
    }

    /// All symbols, in table order.
    pub fn symbols(&self) -> Result<Vec<Symbol>> {
        (0..self.symbol_count()?).map(|i| self.symbol(i)).collect()
    }

    /// RELA records covering `[0, DT_RELASZ)` at DT_RELA.
    ///
    /// A module without either tag has no relocations. `DT_RELASZ` above
    /// `max_relocation_bytes` is rejected, and the table must be readable in
    /// full.
    pub fn relocations(&self) -> Result<Vec<Relocation>> {
        let (Some(rela), Some(relasz)) = (self.lookup(DT_RELA), self.lookup(DT_RELASZ)) else {
            return Ok(Vec::new());
        };
        if relasz.value > self.limits.max_relocation_bytes {
            return Err(MemscopeError::format(
                rela.target(self.base),
                format!(
                    "DT_RELASZ {:#x} exceeds limit {:#x}",
                    relasz.value, self.limits.max_relocation_bytes
                ),
            ));
        }
        let table = self.backend.read(rela.target(self.base), relasz.value)?;
        let layout = registry::elf_rela();
        let relocations = table
            .chunks_exact(RELA_ENTRY_SIZE as usize)
            .map(|chunk| {
                let raw = layout.decode(chunk)?;
                Ok(Relocation {
                    offset: struct_field(&raw, "offset")?,
                    reloc_type: struct_field(&raw, "reloc_type")? as u32,
                    symbol: struct_field(&raw, "symbol")? as u32,
                    addend: struct_field(&raw, "addend")? as i64,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(count = relocations.len(), "Parsed relocations");
        Ok(relocations)
    }
}

impl fmt::Debug for DynamicSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicSection")
            .field("base", &format_args!("{:#x}", self.base))
            .field("address", &format_args!("{:#x}", self.address))
            .field("entries", &self.entries)
            .finish()
    }
}

fn struct_field(value: &Value, name: &str) -> Result<u64> {
    value
        .get(name)
        .and_then(Value::as_u64)
        .ok_or_else(|| MemscopeError::format(0, format!("decoded record lacks '{}'", name)))
}
