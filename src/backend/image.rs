//! Read-only backend over a parsed static image.

use std::path::Path;
use std::sync::Arc;

use super::{MemoryBackend, Permissions};
use crate::config::InspectorConfig;
use crate::error::Result;
use crate::formats::elf::ElfImage;

/// Serves reads from an `ElfImage`'s LOAD segments.
///
/// Writes fail with `ReadOnly`; allocation and calls are unsupported.
#[derive(Debug, Clone)]
pub struct ImageBackend {
    image: Arc<ElfImage>,
    identifier: String,
}

impl ImageBackend {
    pub fn new(image: Arc<ElfImage>) -> Self {
        Self {
            image,
            identifier: "image".to_string(),
        }
    }

    /// Open and parse `path` in one step.
    pub fn open<P: AsRef<Path>>(path: P, config: &InspectorConfig) -> Result<Self> {
        let path = path.as_ref();
        let image = ElfImage::open(path, config)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self {
            image: Arc::new(image),
            identifier: name,
        })
    }

    pub fn elf(&self) -> &Arc<ElfImage> {
        &self.image
    }
}

impl MemoryBackend for ImageBackend {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn read(&self, address: u64, length: u64) -> Result<Vec<u8>> {
        self.image.read(address, length)
    }

    fn query_permissions(&self, address: u64) -> Result<Permissions> {
        self.image.permissions(address)
    }

    fn image(&self) -> Option<&ElfImage> {
        Some(&self.image)
    }
}
