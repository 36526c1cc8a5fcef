//! Software breakpoints for AArch64 targets.

use tracing::debug;

use super::pointer::MemoryPointer;
use crate::error::Result;

/// `BRK #0`.
pub const BRK_INSTRUCTION: u32 = 0xd420_0000;

/// A `BRK #0` patched over one instruction word.
///
/// The original word is restored by `uninstall`; dropping an installed
/// breakpoint leaves the patch in place.
#[derive(Debug)]
pub struct SoftwareBreakpoint {
    location: MemoryPointer,
    original: Option<[u8; 4]>,
}

impl SoftwareBreakpoint {
    pub fn new(location: MemoryPointer) -> Self {
        Self {
            location,
            original: None,
        }
    }

    pub fn location(&self) -> &MemoryPointer {
        &self.location
    }

    pub fn is_installed(&self) -> bool {
        self.original.is_some()
    }

    pub fn install(&mut self) -> Result<()> {
        if self.is_installed() {
            return Ok(());
        }
        let bytes = self.location.read_bytes(4)?;
        let mut original = [0u8; 4];
        original.copy_from_slice(&bytes[..4]);
        self.location.write_bytes(&BRK_INSTRUCTION.to_le_bytes())?;
        self.original = Some(original);
        debug!(address = self.location.address(), "Breakpoint installed");
        Ok(())
    }

    pub fn uninstall(&mut self) -> Result<()> {
        if let Some(original) = self.original {
            self.location.write_bytes(&original)?;
            self.original = None;
            debug!(address = self.location.address(), "Breakpoint removed");
        }
        Ok(())
    }
}
