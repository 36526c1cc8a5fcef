//! Typed pointers into a backend's address space.
//!
//! A `MemoryPointer` is an address bound to a type and a backend. It owns
//! nothing; every navigation step produces a new value and every access is a
//! backend round trip.

use std::cmp::Ordering;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::{Add, Sub};
use std::sync::Arc;
use tracing::warn;

use super::callable::CallableReference;
use super::data_type::{TypeRef, Value};
use crate::backend::{MemoryBackend, Permissions};
use crate::config::LimitsConfig;
use crate::error::{MemscopeError, Result};

const STRING_CHUNK: u64 = 64;

#[derive(Clone)]
pub struct MemoryPointer {
    backend: Arc<dyn MemoryBackend>,
    address: u64,
    ty: TypeRef,
}

impl MemoryPointer {
    pub fn new(backend: Arc<dyn MemoryBackend>, address: u64, ty: TypeRef) -> Self {
        Self {
            backend,
            address,
            ty,
        }
    }

    pub fn null(backend: Arc<dyn MemoryBackend>, ty: TypeRef) -> Self {
        Self::new(backend, 0, ty)
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    pub fn backend(&self) -> &Arc<dyn MemoryBackend> {
        &self.backend
    }

    pub fn is_null(&self) -> bool {
        self.address == 0
    }

    /// Another address in the same backend, bound to `ty`.
    pub fn at(&self, address: u64, ty: TypeRef) -> Self {
        Self::new(Arc::clone(&self.backend), address, ty)
    }

    fn element_address(&self, index: i64) -> Result<u64> {
        let size = self.ty.size();
        if size == 0 {
            return Err(MemscopeError::OpaqueIndex {
                ty: self.ty.name().to_string(),
            });
        }
        Ok(self
            .address
            .wrapping_add((index as u64).wrapping_mul(size))
            .wrapping_sub(self.ty.address_point()))
    }

    /// Read element `index`, counted in units of the bound type.
    pub fn index(&self, index: i64) -> Result<Value> {
        let address = self.element_address(index)?;
        let bytes = self.backend.read(address, self.ty.size())?;
        self.ty.decode(&bytes)
    }

    pub fn index_assign(&self, index: i64, value: &Value) -> Result<()> {
        let address = self.element_address(index)?;
        let bytes = self.ty.encode(value)?;
        self.backend.write(address, &bytes)
    }

    pub fn deref(&self) -> Result<Value> {
        self.index(0)
    }

    pub fn assign_deref(&self, value: &Value) -> Result<()> {
        self.index_assign(0, value)
    }

    /// Pointer to struct member `name`, bound to the member's type.
    pub fn member(&self, name: &str) -> Result<MemoryPointer> {
        if !self.ty.is_struct() {
            return Err(MemscopeError::NotAStruct {
                ty: self.ty.name().to_string(),
            });
        }
        let field = self
            .ty
            .field(name)
            .ok_or_else(|| MemscopeError::UnknownField {
                ty: self.ty.name().to_string(),
                field: name.to_string(),
            })?;
        let address = self
            .address
            .wrapping_add(field.offset)
            .wrapping_sub(self.ty.address_point());
        Ok(self.at(address, Arc::clone(&field.ty)))
    }

    /// Value of member `name`.
    pub fn arrow(&self, name: &str) -> Result<Value> {
        self.member(name)?.deref()
    }

    /// Overwrite member `name`.
    pub fn assign(&self, name: &str, value: &Value) -> Result<()> {
        self.member(name)?.assign_deref(value)
    }

    pub fn cast(&self, ty: &TypeRef) -> MemoryPointer {
        self.at(self.address, Arc::clone(ty))
    }

    pub fn rebind(&mut self, ty: &TypeRef) {
        self.ty = Arc::clone(ty);
    }

    /// Advance by `count` elements (bytes for zero-sized types).
    pub fn offset(&self, count: i64) -> MemoryPointer {
        let step = self.ty.size().max(1);
        self.at(
            self.address.wrapping_add((count as u64).wrapping_mul(step)),
            Arc::clone(&self.ty),
        )
    }

    pub fn succ(&self) -> MemoryPointer {
        self.offset(1)
    }

    /// Byte distance `self - other`.
    pub fn distance(&self, other: &MemoryPointer) -> i64 {
        self.address.wrapping_sub(other.address) as i64
    }

    pub fn read_bytes(&self, length: u64) -> Result<Vec<u8>> {
        self.backend.read(self.address, length)
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.backend.write(self.address, bytes)
    }

    /// Read a NUL-terminated string of at most `max` bytes.
    ///
    /// Reading stops at the terminator, at `max`, or where readable memory
    /// ends after at least one byte was read.
    pub fn read_c_string(&self, max: usize) -> Result<String> {
        let mut out: Vec<u8> = Vec::new();
        let max = max as u64;
        while (out.len() as u64) < max {
            let cursor = self.address.wrapping_add(out.len() as u64);
            let want = STRING_CHUNK.min(max - out.len() as u64);
            let chunk = match self.backend.read(cursor, want) {
                Ok(chunk) => chunk,
                // The chunk may straddle the end of a mapping; retry bytewise.
                Err(_) => match self.backend.read(cursor, 1) {
                    Ok(byte) => byte,
                    Err(e) if out.is_empty() => return Err(e),
                    Err(_) => {
                        warn!(
                            address = self.address,
                            len = out.len(),
                            "String runs into unmapped memory"
                        );
                        break;
                    }
                },
            };
            if let Some(nul) = memchr::memchr(0, &chunk) {
                out.extend_from_slice(&chunk[..nul]);
                return Ok(String::from_utf8_lossy(&out).into_owned());
            }
            out.extend_from_slice(&chunk);
        }
        if out.len() as u64 >= max {
            warn!(address = self.address, max, "String not terminated within limit");
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Follow a pointer-typed slot to the pointer stored there.
    pub fn deref_pointer(&self) -> Result<MemoryPointer> {
        let pointee = self.ty.pointee().ok_or_else(|| MemscopeError::TypeMismatch {
            ty: self.ty.name().to_string(),
            value: "pointer dereference".to_string(),
        })?;
        let bytes = self.backend.read(self.address, 8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[..8]);
        Ok(self.at(u64::from_le_bytes(word), Arc::clone(pointee)))
    }

    pub fn permissions(&self) -> Result<Permissions> {
        self.backend.query_permissions(self.address)
    }

    /// Release memory allocated through the backend at this address.
    pub fn free(&self) -> Result<()> {
        self.backend.free(self.address)
    }

    /// Byte cursor positioned at this pointer.
    pub fn cursor(&self) -> PointerCursor {
        PointerCursor {
            base: self.clone(),
            position: 0,
        }
    }

    /// Treat this address as a function of the given signature.
    pub fn as_callable(&self, ret: &TypeRef, args: &[TypeRef]) -> Result<CallableReference> {
        CallableReference::new(self.clone(), ret, args)
    }

    /// `Display` form with a string preview of up to `preview` bytes for
    /// readable `char*` pointers.
    pub fn describe(&self, preview: usize) -> String {
        let mut out = format!(
            "{}* ({}) = {:#x}",
            self.ty.name(),
            self.backend.identifier(),
            self.address
        );
        if self.ty.is_char() && !self.is_null() {
            let readable = self
                .permissions()
                .map(|p| p.contains(Permissions::READ))
                .unwrap_or(false);
            if readable {
                if let Ok(s) = self.read_c_string(preview) {
                    out.push_str(&format!(" {:?}", s));
                }
            }
        }
        out
    }
}

impl fmt::Display for MemoryPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe(LimitsConfig::default().string_preview))
    }
}

impl fmt::Debug for MemoryPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPointer")
            .field("backend", &self.backend.identifier())
            .field("address", &format_args!("{:#x}", self.address))
            .field("ty", &self.ty.name())
            .finish()
    }
}

impl PartialEq for MemoryPointer {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for MemoryPointer {}

impl PartialOrd for MemoryPointer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemoryPointer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address.cmp(&other.address)
    }
}

impl Add<i64> for &MemoryPointer {
    type Output = MemoryPointer;

    fn add(self, count: i64) -> MemoryPointer {
        self.offset(count)
    }
}

impl Add<i64> for MemoryPointer {
    type Output = MemoryPointer;

    fn add(self, count: i64) -> MemoryPointer {
        self.offset(count)
    }
}

impl Sub<i64> for &MemoryPointer {
    type Output = MemoryPointer;

    fn sub(self, count: i64) -> MemoryPointer {
        self.offset(count.wrapping_neg())
    }
}

impl Sub<i64> for MemoryPointer {
    type Output = MemoryPointer;

    fn sub(self, count: i64) -> MemoryPointer {
        self.offset(count.wrapping_neg())
    }
}

impl Sub<&MemoryPointer> for &MemoryPointer {
    type Output = i64;

    fn sub(self, other: &MemoryPointer) -> i64 {
        self.distance(other)
    }
}

/// `Read + Write + Seek` over the bytes at a pointer.
#[derive(Debug, Clone)]
pub struct PointerCursor {
    base: MemoryPointer,
    position: u64,
}

impl PointerCursor {
    pub fn position(&self) -> u64 {
        self.position
    }

    fn current(&self) -> u64 {
        self.base.address.wrapping_add(self.position)
    }
}

fn to_io(e: MemscopeError) -> io::Error {
    io::Error::other(e)
}

impl Read for PointerCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = self
            .base
            .backend
            .read(self.current(), buf.len() as u64)
            .map_err(to_io)?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        self.position += bytes.len() as u64;
        Ok(bytes.len())
    }
}

impl Write for PointerCursor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.base
            .backend
            .write(self.current(), buf)
            .map_err(to_io)?;
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for PointerCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = match pos {
            SeekFrom::Start(n) => n,
            SeekFrom::Current(d) => self.position.wrapping_add(d as u64),
            SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "target memory has no end",
                ))
            }
        };
        Ok(self.position)
    }
}
