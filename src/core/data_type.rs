//! Type descriptors: in-memory layout and codec for a value kind.
//!
//! A `TypeDescriptor` is immutable once built and shared through `TypeRef`
//! (`Arc`). Kinds form a closed set (`TypeKind`), so every coercion site
//! matches exhaustively. All multi-byte encodings are little-endian, the
//! byte order of the target.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{MemscopeError, Result};

/// Shared handle to an immutable type descriptor.
pub type TypeRef = Arc<TypeDescriptor>;

/// Fixed-width numeric kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericKind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    /// Unsigned byte that also marks text (`char*` arguments).
    Char,
    /// IEEE-754 double, carried as two 32-bit halves across calls.
    F64,
}

impl NumericKind {
    pub fn width(self) -> u64 {
        match self {
            Self::U8 | Self::I8 | Self::Char => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F64)
    }
}

/// Register file an argument is passed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentClass {
    Integer,
    Float,
    Unsupported,
}

/// A named member of a struct layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Offset from byte 0 of the struct (not from the address point).
    pub offset: u64,
    pub ty: TypeRef,
    pub name: String,
}

/// Kind-specific data.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    /// Zero-sized opaque type.
    Void,
    Numeric(NumericKind),
    Boolean,
    /// Ordered fields with non-decreasing offsets.
    Struct(Vec<Field>),
    Pointer(TypeRef),
}

/// Layout and codec for one kind of value.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    name: String,
    size: u64,
    address_point: u64,
    kind: TypeKind,
}

/// Size of a pointer on the target.
pub const POINTER_SIZE: u64 = 8;

impl TypeDescriptor {
    pub fn void(name: &str) -> TypeRef {
        Arc::new(Self {
            name: name.to_string(),
            size: 0,
            address_point: 0,
            kind: TypeKind::Void,
        })
    }

    pub fn numeric(name: &str, kind: NumericKind) -> TypeRef {
        Arc::new(Self {
            name: name.to_string(),
            size: kind.width(),
            address_point: 0,
            kind: TypeKind::Numeric(kind),
        })
    }

    pub fn boolean() -> TypeRef {
        Arc::new(Self {
            name: "bool".to_string(),
            size: 1,
            address_point: 0,
            kind: TypeKind::Boolean,
        })
    }

    /// Pointer to `pointee`; always 8 bytes.
    pub fn pointer_to(pointee: &TypeRef) -> TypeRef {
        Arc::new(Self {
            name: format!("{}*", pointee.name),
            size: POINTER_SIZE,
            address_point: 0,
            kind: TypeKind::Pointer(Arc::clone(pointee)),
        })
    }

    /// Same layout under a different name.
    pub fn typedef(&self, name: &str) -> TypeRef {
        let mut copy = self.clone();
        copy.name = name.to_string();
        Arc::new(copy)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Byte offset treated as the object's logical origin.
    pub fn address_point(&self) -> u64 {
        self.address_point
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Fields in declaration order; empty for non-struct kinds.
    pub fn fields(&self) -> &[Field] {
        match &self.kind {
            TypeKind::Struct(fields) => fields,
            _ => &[],
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields().iter().find(|f| f.name == name)
    }

    pub fn pointee(&self) -> Option<&TypeRef> {
        match &self.kind {
            TypeKind::Pointer(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.kind, TypeKind::Struct(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, TypeKind::Pointer(_))
    }

    pub fn is_char(&self) -> bool {
        matches!(self.kind, TypeKind::Numeric(NumericKind::Char))
    }

    /// Whether a call returning this type can be decoded.
    pub fn is_supported_return_kind(&self) -> bool {
        match &self.kind {
            TypeKind::Void | TypeKind::Numeric(_) | TypeKind::Boolean | TypeKind::Pointer(_) => {
                true
            }
            TypeKind::Struct(_) => false,
        }
    }

    pub fn argument_class(&self) -> ArgumentClass {
        match &self.kind {
            TypeKind::Numeric(k) if k.is_float() => ArgumentClass::Float,
            TypeKind::Numeric(_) | TypeKind::Boolean | TypeKind::Pointer(_) => {
                ArgumentClass::Integer
            }
            TypeKind::Void | TypeKind::Struct(_) => ArgumentClass::Unsupported,
        }
    }

    fn mismatch(&self, value: &Value) -> MemscopeError {
        MemscopeError::TypeMismatch {
            ty: self.name.clone(),
            value: value.to_string(),
        }
    }

    /// Encode `value` into exactly `size()` bytes.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        match &self.kind {
            TypeKind::Void => match value {
                Value::Unit => Ok(Vec::new()),
                other => Err(self.mismatch(other)),
            },
            TypeKind::Numeric(NumericKind::F64) => match value {
                Value::Float(f) => {
                    let [lo, hi] = split_f64(*f);
                    let mut out = lo.to_le_bytes().to_vec();
                    out.extend_from_slice(&hi.to_le_bytes());
                    Ok(out)
                }
                other => Err(self.mismatch(other)),
            },
            TypeKind::Numeric(kind) => {
                let raw = match value {
                    Value::Unsigned(v) => *v,
                    Value::Signed(v) => *v as u64,
                    other => return Err(self.mismatch(other)),
                };
                Ok(raw.to_le_bytes()[..kind.width() as usize].to_vec())
            }
            TypeKind::Boolean => match value {
                Value::Bool(b) => Ok(vec![u8::from(*b)]),
                Value::Unsigned(v) => Ok(vec![u8::from(*v != 0)]),
                other => Err(self.mismatch(other)),
            },
            TypeKind::Pointer(_) => match value {
                Value::Pointer { address, .. } | Value::Unsigned(address) => {
                    Ok(address.to_le_bytes().to_vec())
                }
                other => Err(self.mismatch(other)),
            },
            TypeKind::Struct(fields) => {
                let Value::Struct(members) = value else {
                    return Err(self.mismatch(value));
                };
                let mut out = vec![0u8; self.size as usize];
                for (name, member) in members {
                    let field = self.field(name).ok_or_else(|| MemscopeError::UnknownField {
                        ty: self.name.clone(),
                        field: name.clone(),
                    })?;
                    let bytes = field.ty.encode(member)?;
                    let start = field.offset as usize;
                    out[start..start + bytes.len()].copy_from_slice(&bytes);
                }
                // Fields absent from `members` stay zeroed.
                debug_assert!(fields.iter().all(|f| f.offset + f.ty.size <= self.size));
                Ok(out)
            }
        }
    }

    /// Decode the first `size()` bytes of `bytes`.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value> {
        if (bytes.len() as u64) < self.size {
            return Err(MemscopeError::format(
                0,
                format!(
                    "{} needs {} bytes, got {}",
                    self.name,
                    self.size,
                    bytes.len()
                ),
            ));
        }
        Ok(match &self.kind {
            TypeKind::Void => Value::Unit,
            TypeKind::Numeric(NumericKind::F64) => {
                let lo = le_u32(&bytes[0..4]);
                let hi = le_u32(&bytes[4..8]);
                Value::Float(join_f64([lo, hi]))
            }
            TypeKind::Numeric(kind) => {
                let width = kind.width() as usize;
                let mut buf = [0u8; 8];
                buf[..width].copy_from_slice(&bytes[..width]);
                let raw = u64::from_le_bytes(buf);
                if kind.is_signed() {
                    let shift = 64 - 8 * width as u32;
                    Value::Signed(((raw << shift) as i64) >> shift)
                } else {
                    Value::Unsigned(raw)
                }
            }
            TypeKind::Boolean => Value::Bool(bytes[0] > 0),
            TypeKind::Pointer(pointee) => Value::Pointer {
                address: le_u64(&bytes[0..8]),
                pointee: Arc::clone(pointee),
            },
            TypeKind::Struct(fields) => {
                let mut members = Vec::with_capacity(fields.len());
                for f in fields {
                    let start = f.offset as usize;
                    let end = start + f.ty.size as usize;
                    members.push((f.name.clone(), f.ty.decode(&bytes[start..end])?));
                }
                Value::Struct(members)
            }
        })
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        match &self.kind {
            TypeKind::Struct(fields) => {
                writeln!(f, "{} {{", self.name)?;
                for field in fields {
                    write!(f, "{}", "  ".repeat(indent + 1))?;
                    field.ty.describe(f, indent + 1)?;
                    writeln!(f, " {};", field.name)?;
                }
                write!(f, "{}}}", "  ".repeat(indent))
            }
            _ => write!(f, "{}", self.name),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.describe(f, 0)
    }
}

/// Split an f64 into little-endian 32-bit halves `[low, high]`.
pub fn split_f64(value: f64) -> [u32; 2] {
    let bits = value.to_bits();
    [bits as u32, (bits >> 32) as u32]
}

/// Inverse of [`split_f64`].
pub fn join_f64(halves: [u32; 2]) -> f64 {
    f64::from_bits(u64::from(halves[0]) | (u64::from(halves[1]) << 32))
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_u64(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// Builder for struct layouts.
///
/// Fields are appended at a cursor; `seek` may only move it forward.
#[derive(Debug, Clone)]
pub struct StructBuilder {
    name: String,
    fields: Vec<Field>,
    names: HashSet<String>,
    cursor: u64,
    address_point: u64,
}

impl StructBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: format!("struct {}", name),
            fields: Vec::new(),
            names: HashSet::new(),
            cursor: 0,
            address_point: 0,
        }
    }

    /// Append a field at the cursor and advance past it.
    pub fn field(mut self, ty: &TypeRef, name: &str) -> Result<Self> {
        if !self.names.insert(name.to_string()) {
            return Err(MemscopeError::format(
                self.cursor,
                format!("duplicate field '{}' in {}", name, self.name),
            ));
        }
        self.fields.push(Field {
            offset: self.cursor,
            ty: Arc::clone(ty),
            name: name.to_string(),
        });
        self.cursor += ty.size;
        Ok(self)
    }

    /// Append a field named after its offset (`field_<hex>`).
    pub fn field_auto(self, ty: &TypeRef) -> Result<Self> {
        let name = format!("field_{:x}", self.cursor);
        self.field(ty, &name)
    }

    /// Move the cursor forward, leaving implicit padding.
    pub fn seek(mut self, offset: u64) -> Result<Self> {
        if offset < self.cursor {
            return Err(MemscopeError::format(
                offset,
                format!(
                    "cannot seek backwards in {} (cursor at {:#x})",
                    self.name, self.cursor
                ),
            ));
        }
        self.cursor = offset;
        Ok(self)
    }

    /// Mark the cursor as the object's logical origin.
    pub fn address_point(mut self) -> Self {
        self.address_point = self.cursor;
        self
    }

    /// Start from `base`'s fields with the cursor at its end.
    ///
    /// Only valid as the first step; base fields sit at their own offsets
    /// from zero.
    pub fn inherit(mut self, base: &TypeDescriptor) -> Result<Self> {
        if !self.fields.is_empty() || self.cursor != 0 {
            return Err(MemscopeError::format(
                self.cursor,
                format!("{} must inherit {} before adding fields", self.name, base.name),
            ));
        }
        for field in base.fields() {
            self.names.insert(field.name.clone());
            self.fields.push(field.clone());
        }
        self.cursor = base.size;
        Ok(self)
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn build(self) -> TypeRef {
        Arc::new(TypeDescriptor {
            name: self.name,
            size: self.cursor,
            address_point: self.address_point,
            kind: TypeKind::Struct(self.fields),
        })
    }
}

/// A decoded value, or one to be encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Bool(bool),
    Pointer { address: u64, pointee: TypeRef },
    /// Field values in declaration order.
    Struct(Vec<(String, Value)>),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Unsigned(v) => Some(*v),
            Self::Signed(v) => Some(*v as u64),
            Self::Pointer { address, .. } => Some(*address),
            Self::Bool(b) => Some(u64::from(*b)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Signed(v) => Some(*v),
            Self::Unsigned(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Member of a struct value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Struct(members) => members.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Unsigned(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Unsigned(u64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Signed(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "()"),
            Self::Unsigned(v) => write!(f, "{:#x}", v),
            Self::Signed(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Pointer { address, pointee } => write!(f, "({}*) {:#x}", pointee.name(), address),
            Self::Struct(members) => {
                write!(f, "{{")?;
                for (i, (name, value)) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}
