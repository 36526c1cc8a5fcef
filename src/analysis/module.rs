//! Indexed view of one loaded module.
//!
//! Everything is computed once in `load`: the symbol maps, the dispatch-table
//! anchors and the relocation-target set. Only the object scan runs on
//! demand.

use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::scanner::{DiscoveredObject, ObjectScanner};
use crate::backend::MemoryBackend;
use crate::config::{InspectorConfig, ScanConfig};
use crate::core::{registry, MemoryPointer, TypeRef, Value};
use crate::error::{MemscopeError, Result};
use crate::formats::elf::{DynamicSection, Relocation, Symbol};
use crate::span_trace;

/// Module header fields, all offsets relative to the header itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleHeader {
    pub magic: u32,
    pub dynamic_offset: u32,
    pub bss_start_offset: u32,
    pub bss_end_offset: u32,
    pub eh_frame_hdr_start_offset: u32,
    pub eh_frame_hdr_end_offset: u32,
    pub runtime_module: u32,
}

impl ModuleHeader {
    fn from_value(value: &Value) -> Result<Self> {
        let field = |name: &str| -> Result<u32> {
            value
                .get(name)
                .and_then(Value::as_u64)
                .map(|v| v as u32)
                .ok_or_else(|| MemscopeError::format(0, format!("module header lacks '{}'", name)))
        };
        Ok(Self {
            magic: field("magic")?,
            dynamic_offset: field("dynamic_offset")?,
            bss_start_offset: field("bss_start_offset")?,
            bss_end_offset: field("bss_end_offset")?,
            eh_frame_hdr_start_offset: field("eh_frame_hdr_start_offset")?,
            eh_frame_hdr_end_offset: field("eh_frame_hdr_end_offset")?,
            runtime_module: field("runtime_module")?,
        })
    }
}

pub struct ModuleImage {
    backend: Arc<dyn MemoryBackend>,
    base: u64,
    size: u64,
    build_id: Vec<u8>,
    header_address: u64,
    header: ModuleHeader,
    dynamic: DynamicSection,
    symbols: Vec<Symbol>,
    by_name: HashMap<String, usize>,
    by_address: BTreeMap<u64, usize>,
    dispatch_tables: BTreeMap<String, u64>,
    relocations: Vec<Relocation>,
    relocation_targets: HashSet<u64>,
    scan: ScanConfig,
}

impl ModuleImage {
    /// Validate the module header at `base` and index its dynamic table.
    pub fn load(
        backend: Arc<dyn MemoryBackend>,
        base: u64,
        size: u64,
        build_id: Vec<u8>,
        config: &InspectorConfig,
    ) -> Result<Self> {
        let span = span_trace!("module_load", base, size);
        let _guard = span.enter();

        let start = MemoryPointer::new(Arc::clone(&backend), base, registry::uint32());
        let header_offset = start.index(1)?.as_u64().unwrap_or(0);
        let header_address = base.wrapping_add(header_offset);
        let header_ptr = start.at(header_address, registry::module_header());
        let header = ModuleHeader::from_value(&header_ptr.deref()?)?;

        let expected = config.module.magic_word();
        if header.magic != expected {
            return Err(MemscopeError::BadMagic {
                offset: header_address,
                expected,
                found: header.magic,
            });
        }

        let dynamic = DynamicSection::parse(
            Arc::clone(&backend),
            base,
            header_address.wrapping_add(u64::from(header.dynamic_offset)),
            &config.limits,
        )?;

        let pattern = Regex::new(&config.scan.dispatch_table_pattern)
            .map_err(|e| MemscopeError::Config(format!("dispatch_table_pattern: {}", e)))?;

        let count = dynamic.symbol_count()?;
        let mut symbols = Vec::new();
        let mut by_name = HashMap::new();
        let mut by_address = BTreeMap::new();
        let mut dispatch_tables = BTreeMap::new();
        for index in 0..count {
            let symbol = dynamic.symbol(index)?;
            let Some(name) = symbol.demangled_name() else {
                continue;
            };
            let slot = symbols.len();
            by_name.entry(name.to_string()).or_insert(slot);
            by_address.entry(symbol.address).or_insert(slot);
            if let Some(interface) = pattern.captures(name).and_then(|c| c.get(1)) {
                dispatch_tables
                    .entry(interface.as_str().to_string())
                    .or_insert(symbol.address);
            }
            symbols.push(symbol);
        }

        let relocations = dynamic.relocations()?;
        let relocation_targets = relocations.iter().map(|r| r.target(base)).collect();

        debug!(
            symbols = symbols.len(),
            dispatch_tables = dispatch_tables.len(),
            relocations = relocations.len(),
            "Loaded module"
        );

        Ok(Self {
            backend,
            base,
            size,
            build_id,
            header_address,
            header,
            dynamic,
            symbols,
            by_name,
            by_address,
            dispatch_tables,
            relocations,
            relocation_targets,
            scan: config.scan.clone(),
        })
    }

    /// Load every module recorded in the notes of the backend's image.
    pub fn load_from_notes(
        backend: Arc<dyn MemoryBackend>,
        config: &InspectorConfig,
    ) -> Result<Vec<ModuleImage>> {
        let records = backend
            .image()
            .ok_or_else(|| backend.unsupported("load_from_notes"))?
            .loaded_modules()?;
        records
            .into_iter()
            .map(|r| ModuleImage::load(Arc::clone(&backend), r.base, r.size, r.build_id, config))
            .collect()
    }

    pub fn backend(&self) -> &Arc<dyn MemoryBackend> {
        &self.backend
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn build_id(&self) -> &[u8] {
        &self.build_id
    }

    pub fn header(&self) -> &ModuleHeader {
        &self.header
    }

    pub fn header_address(&self) -> u64 {
        self.header_address
    }

    pub fn dynamic(&self) -> &DynamicSection {
        &self.dynamic
    }

    pub fn scan_config(&self) -> &ScanConfig {
        &self.scan
    }

    /// Whether `address` lies in `[base, base + size)`.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address - self.base < self.size
    }

    /// Named symbols in table order.
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn find_symbol(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name).map(|&i| &self.symbols[i])
    }

    pub fn symbol(&self, name: &str) -> Result<&Symbol> {
        self.find_symbol(name)
            .ok_or_else(|| MemscopeError::UnknownSymbol(name.to_string()))
    }

    /// Symbol starting exactly at `address`.
    pub fn symbol_at(&self, address: u64) -> Option<&Symbol> {
        self.by_address.get(&address).map(|&i| &self.symbols[i])
    }

    /// Closest symbol at or below `address` whose extent covers it.
    pub fn symbol_containing(&self, address: u64) -> Option<&Symbol> {
        self.by_address
            .range(..=address)
            .next_back()
            .map(|(_, &i)| &self.symbols[i])
            .filter(|s| s.contains(address))
    }

    /// Pointer to symbol `name`, bound to `ty`.
    pub fn pointer_to(&self, name: &str, ty: &TypeRef) -> Result<MemoryPointer> {
        let symbol = self.symbol(name)?;
        Ok(MemoryPointer::new(
            Arc::clone(&self.backend),
            symbol.address,
            Arc::clone(ty),
        ))
    }

    /// Symbols whose demangled name starts with `vtable`.
    pub fn vtable_symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols
            .iter()
            .filter(|s| s.demangled_name().is_some_and(|n| n.starts_with("vtable")))
    }

    /// Interface name to dispatch-table address.
    pub fn dispatch_tables(&self) -> &BTreeMap<String, u64> {
        &self.dispatch_tables
    }

    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    pub fn is_relocation_target(&self, address: u64) -> bool {
        self.relocation_targets.contains(&address)
    }

    /// Run the object scan with this module's scan settings.
    pub fn find_service_objects(&self) -> Result<Vec<DiscoveredObject>> {
        ObjectScanner::new(self).scan()
    }
}

impl fmt::Debug for ModuleImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleImage")
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &format_args!("{:#x}", self.size))
            .field("build_id", &hex::encode(&self.build_id))
            .field("symbols", &self.symbols.len())
            .field("dispatch_tables", &self.dispatch_tables.len())
            .finish()
    }
}
