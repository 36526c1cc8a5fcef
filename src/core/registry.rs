//! Built-in type descriptors.
//!
//! Every descriptor here is built once on first use and shared for the rest
//! of the process.

use once_cell::sync::Lazy;

use super::data_type::{NumericKind, StructBuilder, TypeDescriptor, TypeRef};

macro_rules! numeric {
    ($static:ident, $fn:ident, $name:literal, $kind:ident) => {
        static $static: Lazy<TypeRef> =
            Lazy::new(|| TypeDescriptor::numeric($name, NumericKind::$kind));

        pub fn $fn() -> TypeRef {
            $static.clone()
        }
    };
}

numeric!(CHAR, char, "char", Char);
numeric!(UINT8, uint8, "uint8", U8);
numeric!(UINT16, uint16, "uint16", U16);
numeric!(UINT32, uint32, "uint32", U32);
numeric!(UINT64, uint64, "uint64", U64);
numeric!(INT8, int8, "int8", I8);
numeric!(INT16, int16, "int16", I16);
numeric!(INT32, int32, "int32", I32);
numeric!(INT64, int64, "int64", I64);
numeric!(FLOAT64, float64, "float64", F64);

static VOID: Lazy<TypeRef> = Lazy::new(|| TypeDescriptor::void("void"));
static BOOL: Lazy<TypeRef> = Lazy::new(TypeDescriptor::boolean);

pub fn void() -> TypeRef {
    VOID.clone()
}

pub fn bool() -> TypeRef {
    BOOL.clone()
}

pub fn pointer(pointee: &TypeRef) -> TypeRef {
    TypeDescriptor::pointer_to(pointee)
}

static MODULE_HEADER: Lazy<TypeRef> = Lazy::new(|| {
    let u32_t = uint32();
    [
        "magic",
        "dynamic_offset",
        "bss_start_offset",
        "bss_end_offset",
        "eh_frame_hdr_start_offset",
        "eh_frame_hdr_end_offset",
        "runtime_module",
    ]
    .iter()
    .try_fold(StructBuilder::new("ModuleHeader"), |b, name| {
        b.field(&u32_t, name)
    })
    .expect("valid module header layout")
    .build()
});

/// Module header located through the word at `base + 4`.
pub fn module_header() -> TypeRef {
    MODULE_HEADER.clone()
}

static ELF_DYN: Lazy<TypeRef> = Lazy::new(|| {
    StructBuilder::new("Elf_Dyn")
        .field(&uint64(), "tag")
        .and_then(|b| b.field(&uint64(), "value"))
        .expect("valid Elf_Dyn layout")
        .build()
});

pub fn elf_dyn() -> TypeRef {
    ELF_DYN.clone()
}

static ELF_SYMBOL: Lazy<TypeRef> = Lazy::new(|| {
    StructBuilder::new("Elf_Symbol")
        .field(&uint32(), "st_name")
        .and_then(|b| b.field(&uint8(), "info"))
        .and_then(|b| b.field(&uint8(), "other"))
        .and_then(|b| b.field(&uint16(), "shndx"))
        .and_then(|b| b.field(&uint64(), "value"))
        .and_then(|b| b.field(&uint64(), "size"))
        .expect("valid Elf_Symbol layout")
        .build()
});

pub fn elf_symbol() -> TypeRef {
    ELF_SYMBOL.clone()
}

static ELF_RELA: Lazy<TypeRef> = Lazy::new(|| {
    StructBuilder::new("Elf_Rela")
        .field(&uint64(), "offset")
        .and_then(|b| b.field(&uint32(), "reloc_type"))
        .and_then(|b| b.field(&uint32(), "symbol"))
        .and_then(|b| b.field(&uint64(), "addend"))
        .expect("valid Elf_Rela layout")
        .build()
});

pub fn elf_rela() -> TypeRef {
    ELF_RELA.clone()
}

static RTTI: Lazy<TypeRef> = Lazy::new(|| {
    StructBuilder::new("RuntimeTypeInfo")
        .field(&pointer(&void()), "vtable")
        .and_then(|b| b.field(&pointer(&char()), "name"))
        .expect("valid RuntimeTypeInfo layout")
        .build()
});

/// Itanium `type_info` prefix: vtable pointer and mangled name.
pub fn rtti() -> TypeRef {
    RTTI.clone()
}

static VTABLE: Lazy<TypeRef> = Lazy::new(|| {
    StructBuilder::new("VTable")
        .field(&pointer(&rtti()), "rtti")
        .and_then(|b| b.field(&uint64(), "this_offset"))
        .map(StructBuilder::address_point)
        .expect("valid VTable layout")
        .build()
});

/// Itanium vtable header. Object vtable pointers refer to the address point,
/// just past `rtti` and `this_offset`.
pub fn vtable() -> TypeRef {
    VTABLE.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_shared_instances() {
        assert!(Arc::ptr_eq(&uint32(), &uint32()));
        assert_eq!(void().size(), 0);
        assert_eq!(char().size(), 1);
        assert_eq!(float64().size(), 8);
    }

    #[test]
    fn test_layouts() {
        let header = module_header();
        assert_eq!(header.size(), 28);
        assert_eq!(header.field("dynamic_offset").unwrap().offset, 4);
        assert_eq!(header.field("runtime_module").unwrap().offset, 24);

        assert_eq!(elf_dyn().size(), 16);
        assert_eq!(elf_symbol().size(), 24);
        assert_eq!(elf_symbol().field("value").unwrap().offset, 8);
        assert_eq!(elf_rela().size(), 0x18);

        let vt = vtable();
        assert_eq!(vt.size(), 16);
        assert_eq!(vt.address_point(), 16);
        assert_eq!(rtti().field("name").unwrap().ty.name(), "char*");
    }
}
