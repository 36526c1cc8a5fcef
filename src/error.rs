//! Error types for memscope.
//!
//! Every failure carries the address, tag, type or name that caused it so a
//! caller can log it or branch on the category (format, out-of-range,
//! unsupported) without parsing messages.

use thiserror::Error;

/// Main error type for memscope operations.
#[derive(Debug, Error)]
pub enum MemscopeError {
    /// Generic structural problem in a binary.
    #[error("Format error at offset {offset:#x}: {message}")]
    Format { offset: u64, message: String },

    /// A magic number did not match.
    #[error("Bad magic at {offset:#x}: expected {expected:#010x}, found {found:#010x}")]
    BadMagic {
        offset: u64,
        expected: u32,
        found: u32,
    },

    /// ELF header declares a size that differs from what was parsed.
    #[error("Invalid header size: declared {declared}, consumed {consumed}")]
    HeaderSize { declared: u64, consumed: u64 },

    /// Dynamic table ran out of readable memory or entry budget before DT_NULL.
    #[error("Dynamic table at {address:#x} not terminated after {entries} entries")]
    UnterminatedDynamic { address: u64, entries: usize },

    /// No mapping covers the requested range.
    #[error("Address out of range: {address:#x} (len={length})")]
    AddressOutOfRange { address: u64, length: u64 },

    /// Struct has no field with the given name.
    #[error("No field '{field}' in {ty}")]
    UnknownField { ty: String, field: String },

    /// Dynamic table has no entry with the given tag.
    #[error("Dynamic tag {tag:#x} not present")]
    MissingTag { tag: u64 },

    /// Symbol lookup by name failed.
    #[error("Symbol not found: {0}")]
    UnknownSymbol(String),

    /// Operation not provided by this backend.
    #[error("Unsupported operation '{operation}' on backend {backend}")]
    Unsupported { operation: String, backend: String },

    /// Write attempted on an immutable backend.
    #[error("Backend {backend} is read-only (write at {address:#x})")]
    ReadOnly { address: u64, backend: String },

    /// Return type cannot be decoded from a call result.
    #[error("Unsupported return type '{ty}'")]
    UnsupportedReturn { ty: String },

    /// Argument type cannot be marshalled into a register class.
    #[error("Unsupported argument type '{ty}' at position {index}")]
    UnsupportedArgument { index: usize, ty: String },

    /// Indexing through a zero-sized type.
    #[error("Cannot index through opaque type '{ty}'")]
    OpaqueIndex { ty: String },

    /// Member access on a non-struct type.
    #[error("Type '{ty}' is not a struct")]
    NotAStruct { ty: String },

    /// Wrong number of arguments supplied to a call.
    #[error("Argument count mismatch: expected {expected}, got {found}")]
    ArityMismatch { expected: usize, found: usize },

    /// Value shape does not fit the type it is encoded through.
    #[error("Cannot encode {value} as '{ty}'")]
    TypeMismatch { ty: String, value: String },

    /// Refused to map a file above the configured limit.
    #[error("File too large: {found} bytes (limit {limit})")]
    FileTooLarge { limit: u64, found: u64 },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemscopeError {
    /// Bad magic, header size mismatch, missing terminator and similar.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::Format { .. }
                | Self::BadMagic { .. }
                | Self::HeaderSize { .. }
                | Self::UnterminatedDynamic { .. }
        )
    }

    /// Unmapped addresses and unknown field/tag/symbol names.
    pub fn is_out_of_range(&self) -> bool {
        matches!(
            self,
            Self::AddressOutOfRange { .. }
                | Self::UnknownField { .. }
                | Self::MissingTag { .. }
                | Self::UnknownSymbol(_)
        )
    }

    /// Operations the backend or the type system cannot perform.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Self::Unsupported { .. }
                | Self::ReadOnly { .. }
                | Self::UnsupportedReturn { .. }
                | Self::UnsupportedArgument { .. }
                | Self::OpaqueIndex { .. }
                | Self::NotAStruct { .. }
        )
    }

    pub(crate) fn format(offset: u64, message: impl Into<String>) -> Self {
        Self::Format {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn unmapped(address: u64, length: u64) -> Self {
        Self::AddressOutOfRange { address, length }
    }
}

/// Result type alias for memscope operations
pub type Result<T> = std::result::Result<T, MemscopeError>;
