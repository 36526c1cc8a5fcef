//! Byte storage for static images.
//!
//! Files are memory-mapped after a size check against the configured limit;
//! buffers built in memory (tests, fuzzing, downloaded dumps) are held as
//! owned bytes. Either way the parser sees one immutable `&[u8]`.

use memmap2::Mmap;
use std::fs::File;
use std::ops::Deref;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{MemscopeError, Result};

/// Immutable bytes backing an `ElfImage`.
pub enum ImageBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl ImageBytes {
    /// Memory-map `path`, refusing files larger than `max_file_size`.
    pub fn open<P: AsRef<Path>>(path: P, max_file_size: u64) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        debug!(
            path = %path.display(),
            size = file_size,
            limit = max_file_size,
            "Opening image"
        );

        if file_size > max_file_size {
            warn!(path = %path.display(), size = file_size, "Image is too large");
            return Err(MemscopeError::FileTooLarge {
                limit: max_file_size,
                found: file_size,
            });
        }

        // memmap cannot map empty files.
        if file_size == 0 {
            return Ok(Self::Owned(Vec::new()));
        }

        // SAFETY: the map is read-only and lives as long as `Self`. Concurrent
        // truncation of the file by another process is outside our control.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self::Mapped(mmap))
    }
}

impl From<Vec<u8>> for ImageBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Owned(bytes)
    }
}

impl Deref for ImageBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(m) => m,
            Self::Owned(v) => v,
        }
    }
}

impl std::fmt::Debug for ImageBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Mapped(_) => "Mapped",
            Self::Owned(_) => "Owned",
        };
        write!(f, "ImageBytes::{}({} bytes)", kind, self.len())
    }
}
