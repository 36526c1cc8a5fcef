//! Heuristic discovery of live service objects.
//!
//! A service object stores a pointer to its interface's dispatch table at a
//! fixed distance from the pointer to its implementation. Writable segments
//! are swept for words equal to a known dispatch-table address; GOT slots
//! (relocation targets) and words outside the module are ignored. The
//! instance is read from `instance_offset` bytes before the hit.
//!
//! The offset is an ABI convention, not something the image declares, so
//! objects laid out differently are simply not found.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::module::ModuleImage;
use crate::config::ScanConfig;
use crate::core::{registry, MemoryPointer};
use crate::error::{MemscopeError, Result};
use crate::formats::elf::utils::le_u64;

/// One object found by the scan.
#[derive(Debug, Clone)]
pub struct DiscoveredObject {
    /// Implementation pointer, bound to `void`.
    pub instance: MemoryPointer,
    /// Interface name captured from the dispatch-table symbol.
    pub interface: String,
    /// Address of the matched dispatch-table word.
    pub anchor: u64,
}

pub struct ObjectScanner<'m> {
    module: &'m ModuleImage,
    config: ScanConfig,
}

impl<'m> ObjectScanner<'m> {
    pub fn new(module: &'m ModuleImage) -> Self {
        Self {
            module,
            config: module.scan_config().clone(),
        }
    }

    pub fn with_config(module: &'m ModuleImage, config: ScanConfig) -> Self {
        Self { module, config }
    }

    /// Sweep the writable LOAD segments of the backend's image.
    ///
    /// Fails with `Unsupported` when the backend has no static image.
    pub fn scan(&self) -> Result<Vec<DiscoveredObject>> {
        let backend = self.module.backend();
        let image = backend
            .image()
            .ok_or_else(|| backend.unsupported("object scan"))?;
        if self.config.stride == 0 {
            return Err(MemscopeError::Config("scan.stride must be non-zero".into()));
        }

        let mut interfaces: HashMap<u64, Vec<&str>> = HashMap::new();
        for (name, &table) in self.module.dispatch_tables() {
            interfaces.entry(table).or_default().push(name.as_str());
        }
        debug!(
            base = self.module.base(),
            interfaces = interfaces.len(),
            "Starting object scan"
        );

        let slot_type = registry::pointer(&registry::void());
        let mut found = Vec::new();
        for seg in image.load_segments().filter(|s| s.is_writable()) {
            let view = image.segment_view(seg);
            let stride = self.config.stride as usize;
            for offset in (0..view.len().saturating_sub(7)).step_by(stride) {
                let word = le_u64(&view[offset..offset + 8]);
                let Some(names) = interfaces.get(&word) else {
                    continue;
                };
                let anchor = seg.vaddr + offset as u64;
                if self.module.is_relocation_target(anchor) {
                    trace!(anchor, "Skipping relocated slot");
                    continue;
                }
                if !self.module.contains(anchor) {
                    continue;
                }

                let slot = MemoryPointer::new(
                    Arc::clone(backend),
                    anchor.wrapping_sub(self.config.instance_offset),
                    Arc::clone(&slot_type),
                );
                let instance = match slot.deref_pointer() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(anchor, error = %e, "Instance slot unreadable");
                        continue;
                    }
                };
                for name in names {
                    found.push(DiscoveredObject {
                        instance: instance.clone(),
                        interface: (*name).to_string(),
                        anchor,
                    });
                }
            }
        }

        debug!(hits = found.len(), "Object scan finished");
        Ok(found)
    }
}
