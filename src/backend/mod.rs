//! Byte-access backends.
//!
//! Everything in the typed memory layer goes through `MemoryBackend`: a
//! static image, an in-memory buffer or a live debug channel all look the
//! same to `MemoryPointer` and `CallableReference`. Calls are blocking and
//! the core never retries; backends own their own timeout policy.

use bitflags::bitflags;
use std::fmt;

use crate::error::{MemscopeError, Result};
use crate::formats::elf::ElfImage;

pub mod buffer;
pub mod image;

pub use buffer::{BufferBackend, CallRequest};
pub use image::ImageBackend;

bitflags! {
    /// Page permissions as reported by a backend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Permissions: u32 {
        const READ = 1;
        const WRITE = 2;
        const EXECUTE = 4;
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut perms = String::with_capacity(3);
        perms.push(if self.contains(Self::READ) { 'r' } else { '-' });
        perms.push(if self.contains(Self::WRITE) { 'w' } else { '-' });
        perms.push(if self.contains(Self::EXECUTE) { 'x' } else { '-' });
        write!(f, "{}", perms)
    }
}

/// Raw register pair returned by a call (x0, x1 / d0 low bits).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawReturn {
    pub low: u64,
    pub high: u64,
}

impl RawReturn {
    /// Reassemble a double returned as two 32-bit halves.
    pub fn as_f64(&self) -> f64 {
        crate::core::data_type::join_f64([self.low as u32, self.high as u32])
    }
}

/// Register-file view of one call, as handed to a backend.
#[derive(Debug, Clone, Copy)]
pub struct CallArguments<'a> {
    pub integer: &'a [u64],
    pub vector: &'a [u128],
    /// Float-class arguments, each split into two 32-bit halves.
    pub float: &'a [[u32; 2]],
}

/// Byte-level access to a target address space.
pub trait MemoryBackend: Send + Sync {
    /// Short name used in messages and pointer display.
    fn identifier(&self) -> &str;

    /// Read `length` bytes; fails with `AddressOutOfRange` if unmapped.
    fn read(&self, address: u64, length: u64) -> Result<Vec<u8>>;

    fn write(&self, address: u64, _bytes: &[u8]) -> Result<()> {
        Err(MemscopeError::ReadOnly {
            address,
            backend: self.identifier().to_string(),
        })
    }

    fn malloc(&self, _size: u64) -> Result<u64> {
        Err(self.unsupported("malloc"))
    }

    fn free(&self, _address: u64) -> Result<()> {
        Err(self.unsupported("free"))
    }

    fn query_permissions(&self, address: u64) -> Result<Permissions>;

    /// Call `target` and wait for it to return.
    fn call_synchronous(&self, _target: u64, _args: CallArguments<'_>) -> Result<RawReturn> {
        Err(self.unsupported("call"))
    }

    /// Dispatch a call to `target` without waiting for it.
    fn call_start(&self, _target: u64, _args: CallArguments<'_>) -> Result<()> {
        Err(self.unsupported("start"))
    }

    /// Static image behind this backend, when there is one.
    fn image(&self) -> Option<&ElfImage> {
        None
    }

    fn unsupported(&self, operation: &str) -> MemscopeError {
        MemscopeError::Unsupported {
            operation: operation.to_string(),
            backend: self.identifier().to_string(),
        }
    }
}

impl fmt::Debug for dyn MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryBackend({})", self.identifier())
    }
}
