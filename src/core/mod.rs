//! Typed memory layer.
//!
//! Type descriptors describe layouts, pointers bind them to addresses in a
//! backend, and callable references invoke code at those addresses.

pub mod breakpoint;
pub mod callable;
pub mod data_type;
pub mod pointer;
pub mod registry;

pub use breakpoint::SoftwareBreakpoint;
pub use callable::{Argument, CallResult, CallableReference};
pub use data_type::{
    ArgumentClass, Field, NumericKind, StructBuilder, TypeDescriptor, TypeKind, TypeRef, Value,
};
pub use pointer::{MemoryPointer, PointerCursor};
