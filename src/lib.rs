//! memscope: typed inspection of AArch64 module images.
//!
//! Two layers share one backend contract:
//! - `core`: type descriptors, typed pointers and callable references that
//!   navigate and invoke code in any address space;
//! - `formats::elf` and `analysis`: static parsing of ELF images, module
//!   dynamic tables and a heuristic scan for live service objects.

pub mod analysis;
pub mod backend;
pub mod config;
pub mod core;
pub mod demangle;
pub mod error;
pub mod formats;
pub mod io;
pub mod logging;

pub use analysis::{DiscoveredObject, ModuleImage, ObjectScanner};
pub use backend::{BufferBackend, ImageBackend, MemoryBackend, Permissions};
pub use config::InspectorConfig;
pub use core::{
    Argument, CallResult, CallableReference, MemoryPointer, TypeDescriptor, TypeRef, Value,
};
pub use error::{MemscopeError, Result};
pub use formats::elf::{DynamicSection, ElfImage};
