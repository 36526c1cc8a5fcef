//! Module-level analysis over a backend.
//!
//! `ModuleImage` indexes one loaded module's header, symbols and relocations;
//! `ObjectScanner` uses that index to find live service objects.

pub mod module;
pub mod scanner;

pub use module::{ModuleHeader, ModuleImage};
pub use scanner::{DiscoveredObject, ObjectScanner};
