//! Configuration for image parsing, module loading and the object scan.
//!
//! All sections have defaults matching the target format, so an empty JSON
//! object is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MemscopeError, Result};

/// Default pattern for per-interface dispatch-table anchors. Capture group 1
/// is the interface name.
pub const DEFAULT_DISPATCH_TABLE_PATTERN: &str =
    r"nn::sf::cmif::server::detail::CmifProcessFunctionTableGetter<([a-zA-Z0-9:]+), void>::s_Table";

/// Master configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    /// Resource limits applied while reading untrusted images.
    pub limits: LimitsConfig,
    /// Module header and module-note conventions.
    pub module: ModuleConfig,
    /// Object scan heuristics.
    pub scan: ScanConfig,
}

impl InspectorConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| MemscopeError::Config(format!("invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| MemscopeError::Config(e.to_string()))
    }

    /// Reject values the parsers cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.module.header_magic.len() != 4 {
            return Err(MemscopeError::Config(format!(
                "module.header_magic must be 4 bytes, got {:?}",
                self.module.header_magic
            )));
        }
        if self.scan.stride == 0 {
            return Err(MemscopeError::Config("scan.stride must be non-zero".into()));
        }
        if self.limits.max_symbol_name == 0 {
            return Err(MemscopeError::Config(
                "limits.max_symbol_name must be non-zero".into(),
            ));
        }
        regex::Regex::new(&self.scan.dispatch_table_pattern).map_err(|e| {
            MemscopeError::Config(format!("scan.dispatch_table_pattern: {}", e))
        })?;
        Ok(())
    }
}

/// Bounds applied to reads driven by values found inside an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest file `ElfImage::open` will map.
    pub max_file_size: u64,
    /// Longest symbol name read from a string table.
    pub max_symbol_name: usize,
    /// Dynamic entries read before giving up on finding DT_NULL.
    pub max_dynamic_entries: usize,
    /// Largest DT_RELASZ accepted.
    pub max_relocation_bytes: u64,
    /// Largest memory size accepted for a LOAD segment.
    pub max_segment_size: u64,
    /// Bytes read when previewing a `char*` for display.
    pub string_preview: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: 512 * 1024 * 1024,
            max_symbol_name: 1024,
            max_dynamic_entries: 4096,
            max_relocation_bytes: 64 * 1024 * 1024,
            max_segment_size: 512 * 1024 * 1024,
            string_preview: 512,
        }
    }
}

/// Where modules live and how their header is recognised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Four ASCII bytes, compared as a little-endian u32.
    pub header_magic: String,
    /// Note owner name of module records in a static image.
    pub note_owner: String,
    /// Note type of module records in a static image.
    pub note_type: u32,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            header_magic: "MOD0".to_string(),
            note_owner: "Twili".to_string(),
            note_type: 6482,
        }
    }
}

impl ModuleConfig {
    /// Header magic as the little-endian word stored in memory.
    pub fn magic_word(&self) -> u32 {
        let mut bytes = [0u8; 4];
        for (dst, src) in bytes.iter_mut().zip(self.header_magic.bytes()) {
            *dst = src;
        }
        u32::from_le_bytes(bytes)
    }
}

/// Object scan heuristics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Regex over demangled symbol names; group 1 names the interface.
    pub dispatch_table_pattern: String,
    /// Step between candidate words in writable segments.
    pub stride: u64,
    /// Distance from a matched dispatch-table word back to the slot holding
    /// the instance pointer. Convention, not a verified invariant.
    pub instance_offset: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            dispatch_table_pattern: DEFAULT_DISPATCH_TABLE_PATTERN.to_string(),
            stride: 8,
            instance_offset: 8,
        }
    }
}
