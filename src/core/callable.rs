//! Calling code in the target address space.
//!
//! Arguments are coerced through their declared types and grouped into the
//! integer and floating-point register files independently, in declaration
//! order. Text and array arguments are copied into scratch memory allocated
//! through the backend; that memory is released on every exit path.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::data_type::{split_f64, ArgumentClass, NumericKind, TypeKind, TypeRef, Value};
use super::pointer::MemoryPointer;
use crate::backend::{CallArguments, MemoryBackend, RawReturn};
use crate::error::{MemscopeError, Result};

/// One argument as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// Scalar coerced through the declared type.
    Value(Value),
    /// Text for a `char*` parameter, passed NUL-terminated.
    Text(String),
    /// In/out array for a pointer parameter; updated after `call`.
    Array(Vec<Value>),
    /// Existing target memory.
    Pointer(MemoryPointer),
    Null,
}

impl From<Value> for Argument {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<&str> for Argument {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<MemoryPointer> for Argument {
    fn from(p: MemoryPointer) -> Self {
        Self::Pointer(p)
    }
}

/// What a completed call produced.
///
/// Pointer-typed results come back bound to the declared pointee, so they
/// can be navigated directly.
#[derive(Debug, Clone)]
pub enum CallResult {
    Value(Value),
    Pointer(MemoryPointer),
}

impl CallResult {
    /// The result as a plain value; pointers become `Value::Pointer`.
    pub fn value(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Pointer(p) => Value::Pointer {
                address: p.address(),
                pointee: Arc::clone(p.ty()),
            },
        }
    }

    pub fn as_pointer(&self) -> Option<&MemoryPointer> {
        match self {
            Self::Pointer(p) => Some(p),
            Self::Value(_) => None,
        }
    }

    pub fn into_pointer(self) -> Option<MemoryPointer> {
        match self {
            Self::Pointer(p) => Some(p),
            Self::Value(_) => None,
        }
    }
}

impl PartialEq<Value> for CallResult {
    fn eq(&self, other: &Value) -> bool {
        self.value() == *other
    }
}

impl fmt::Display for CallResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{}", v),
            Self::Pointer(p) => write!(f, "{}", p),
        }
    }
}

/// Scratch allocation freed when dropped.
struct ScratchBuffer<'a> {
    backend: &'a dyn MemoryBackend,
    address: u64,
}

impl<'a> ScratchBuffer<'a> {
    fn allocate(backend: &'a dyn MemoryBackend, bytes: &[u8]) -> Result<Self> {
        let address = backend.malloc(bytes.len() as u64)?;
        let buffer = Self { backend, address };
        backend.write(address, bytes)?;
        Ok(buffer)
    }
}

impl Drop for ScratchBuffer<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.free(self.address) {
            warn!(address = self.address, error = %e, "Failed to release scratch buffer");
        }
    }
}

struct CopyBack {
    argument: usize,
    address: u64,
    element: TypeRef,
    count: usize,
}

#[derive(Default)]
struct Marshaled<'a> {
    integer: Vec<u64>,
    float: Vec<[u32; 2]>,
    scratch: Vec<ScratchBuffer<'a>>,
    copy_back: Vec<CopyBack>,
}

/// A typed function at a target address.
#[derive(Debug, Clone)]
pub struct CallableReference {
    target: MemoryPointer,
    ret: TypeRef,
    args: Vec<TypeRef>,
    names: Vec<Option<String>>,
}

impl CallableReference {
    /// Fails if the return type or any argument type cannot be marshaled.
    pub fn new(target: MemoryPointer, ret: &TypeRef, args: &[TypeRef]) -> Result<Self> {
        if !ret.is_supported_return_kind() {
            return Err(MemscopeError::UnsupportedReturn {
                ty: ret.name().to_string(),
            });
        }
        for (index, ty) in args.iter().enumerate() {
            if ty.argument_class() == ArgumentClass::Unsupported {
                return Err(MemscopeError::UnsupportedArgument {
                    index,
                    ty: ty.name().to_string(),
                });
            }
        }
        Ok(Self {
            target,
            ret: Arc::clone(ret),
            args: args.to_vec(),
            names: vec![None; args.len()],
        })
    }

    /// Attach parameter names, used only for display.
    pub fn with_names(mut self, names: &[&str]) -> Self {
        for (slot, name) in self.names.iter_mut().zip(names) {
            *slot = Some((*name).to_string());
        }
        self
    }

    pub fn target(&self) -> &MemoryPointer {
        &self.target
    }

    pub fn return_type(&self) -> &TypeRef {
        &self.ret
    }

    pub fn argument_types(&self) -> &[TypeRef] {
        &self.args
    }

    /// Call and wait for the result. Array arguments are updated in place.
    pub fn call(&self, args: &mut [Argument]) -> Result<CallResult> {
        let backend = self.target.backend().as_ref();
        let marshaled = self.marshal(backend, args)?;
        debug!(
            address = self.target.address(),
            integer = marshaled.integer.len(),
            float = marshaled.float.len(),
            scratch = marshaled.scratch.len(),
            "Calling"
        );
        let raw = backend.call_synchronous(
            self.target.address(),
            CallArguments {
                integer: &marshaled.integer,
                vector: &[],
                float: &marshaled.float,
            },
        )?;
        for cb in &marshaled.copy_back {
            let bytes = backend.read(cb.address, cb.element.size() * cb.count as u64)?;
            let values = bytes
                .chunks_exact(cb.element.size() as usize)
                .map(|chunk| cb.element.decode(chunk))
                .collect::<Result<Vec<_>>>()?;
            args[cb.argument] = Argument::Array(values);
        }
        self.decode_return(raw)
    }

    /// Dispatch without waiting. Scratch memory is released once the
    /// backend has accepted the call.
    pub fn start(&self, args: &mut [Argument]) -> Result<()> {
        let backend = self.target.backend().as_ref();
        let marshaled = self.marshal(backend, args)?;
        debug!(address = self.target.address(), "Starting call");
        backend.call_start(
            self.target.address(),
            CallArguments {
                integer: &marshaled.integer,
                vector: &[],
                float: &marshaled.float,
            },
        )
    }


    fn marshal<'a>(
        &self,
        backend: &'a dyn MemoryBackend,
        args: &[Argument],
    ) -> Result<Marshaled<'a>> {
        if args.len() != self.args.len() {
            return Err(MemscopeError::ArityMismatch {
                expected: self.args.len(),
                found: args.len(),
            });
        }
        let mut out = Marshaled::default();
        for (index, (ty, arg)) in self.args.iter().zip(args).enumerate() {
            match ty.argument_class() {
                ArgumentClass::Float => match arg {
                    Argument::Value(Value::Float(f)) => out.float.push(split_f64(*f)),
                    other => return Err(mismatch(ty, other)),
                },
                ArgumentClass::Integer => {
                    let word = self.integer_word(backend, index, ty, arg, &mut out)?;
                    out.integer.push(word);
                }
                ArgumentClass::Unsupported => {
                    return Err(MemscopeError::UnsupportedArgument {
                        index,
                        ty: ty.name().to_string(),
                    })
                }
            }
        }
        Ok(out)
    }

    fn integer_word<'a>(
        &self,
        backend: &'a dyn MemoryBackend,
        index: usize,
        ty: &TypeRef,
        arg: &Argument,
        out: &mut Marshaled<'a>,
    ) -> Result<u64> {
        match arg {
            Argument::Value(v) => {
                let bytes = ty.encode(v)?;
                let mut word = [0u8; 8];
                word[..bytes.len()].copy_from_slice(&bytes);
                Ok(u64::from_le_bytes(word))
            }
            Argument::Null => Ok(0),
            Argument::Pointer(p) if ty.is_pointer() => Ok(p.address()),
            Argument::Text(s) if ty.pointee().is_some_and(|p| p.is_char()) => {
                let mut bytes = Vec::with_capacity(s.len() + 1);
                bytes.extend_from_slice(s.as_bytes());
                bytes.push(0);
                let buffer = ScratchBuffer::allocate(backend, &bytes)?;
                let address = buffer.address;
                out.scratch.push(buffer);
                Ok(address)
            }
            Argument::Array(values) if ty.is_pointer() => {
                let element = ty
                    .pointee()
                    .filter(|p| p.size() > 0)
                    .ok_or_else(|| MemscopeError::OpaqueIndex {
                        ty: ty.name().to_string(),
                    })?;
                let mut bytes = Vec::with_capacity(values.len() * element.size() as usize);
                for v in values {
                    bytes.extend_from_slice(&element.encode(v)?);
                }
                let buffer = ScratchBuffer::allocate(backend, &bytes)?;
                let address = buffer.address;
                out.scratch.push(buffer);
                out.copy_back.push(CopyBack {
                    argument: index,
                    address,
                    element: Arc::clone(element),
                    count: values.len(),
                });
                Ok(address)
            }
            other => Err(mismatch(ty, other)),
        }
    }

    fn decode_return(&self, raw: RawReturn) -> Result<CallResult> {
        match self.ret.kind() {
            TypeKind::Void => Ok(CallResult::Value(Value::Unit)),
            TypeKind::Numeric(NumericKind::F64) => {
                Ok(CallResult::Value(Value::Float(raw.as_f64())))
            }
            TypeKind::Pointer(pointee) => Ok(CallResult::Pointer(
                self.target.at(raw.low, Arc::clone(pointee)),
            )),
            TypeKind::Numeric(_) | TypeKind::Boolean => {
                self.ret.decode(&raw.low.to_le_bytes()).map(CallResult::Value)
            }
            TypeKind::Struct(_) => Err(MemscopeError::UnsupportedReturn {
                ty: self.ret.name().to_string(),
            }),
        }
    }
}

fn mismatch(ty: &TypeRef, arg: &Argument) -> MemscopeError {
    let value = match arg {
        Argument::Value(v) => v.to_string(),
        Argument::Text(s) => format!("{:?}", s),
        Argument::Array(v) => format!("array[{}]", v.len()),
        Argument::Pointer(p) => format!("pointer {:#x}", p.address()),
        Argument::Null => "null".to_string(),
    };
    MemscopeError::TypeMismatch {
        ty: ty.name().to_string(),
        value,
    }
}

impl fmt::Display for CallableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (*)(", self.ret.name())?;
        for (i, (ty, name)) in self.args.iter().zip(&self.names).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", ty.name())?;
            if let Some(name) = name {
                write!(f, " {}", name)?;
            }
        }
        write!(f, ") = {:#x}", self.target.address())
    }
}
