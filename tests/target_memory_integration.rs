//! Typed pointers and calls against a simulated target process.

use std::sync::Arc;

use memscope::backend::{CallRequest, RawReturn};
use memscope::core::data_type::{join_f64, split_f64};
use memscope::core::{registry, SoftwareBreakpoint, StructBuilder};
use memscope::{
    Argument, BufferBackend, CallableReference, MemoryBackend, MemoryPointer, MemscopeError,
    Permissions, Result, Value,
};

const STRLEN: u64 = 0x1000;
const DOUBLE_ALL: u64 = 0x1100;
const SCALE: u64 = 0x1200;
const NAME_OF: u64 = 0x1300;

const OBJECT: u64 = 0x5000;
const VTABLE: u64 = 0x6000;
const RTTI: u64 = 0x7000;
const TYPE_NAME: u64 = 0x7100;

fn read_c_string(backend: &BufferBackend, mut address: u64) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let byte = backend.read(address, 1)?[0];
        if byte == 0 {
            return Ok(out);
        }
        out.push(byte);
        address += 1;
    }
}

fn handle(backend: &BufferBackend, request: &CallRequest) -> Result<RawReturn> {
    match request.target {
        STRLEN => {
            let len = read_c_string(backend, request.integer[0])?.len() as u64;
            Ok(RawReturn { low: len, high: 0 })
        }
        DOUBLE_ALL => {
            let (address, count) = (request.integer[0], request.integer[1]);
            let bytes = backend.read(address, count * 4)?;
            let doubled: Vec<u8> = bytes
                .chunks_exact(4)
                .flat_map(|c| (u32::from_le_bytes([c[0], c[1], c[2], c[3]]) * 2).to_le_bytes())
                .collect();
            backend.write(address, &doubled)?;
            Ok(RawReturn::default())
        }
        SCALE => {
            let x = join_f64(request.float[0]);
            let [low, high] = split_f64(x * request.integer[0] as f64);
            Ok(RawReturn {
                low: u64::from(low),
                high: u64::from(high),
            })
        }
        NAME_OF => Ok(RawReturn {
            low: TYPE_NAME,
            high: 0,
        }),
        other => Err(MemscopeError::AddressOutOfRange {
            address: other,
            length: 4,
        }),
    }
}

/// One object whose vtable leads to RTTI naming its class.
fn process() -> Arc<BufferBackend> {
    let mem = BufferBackend::new("proc").with_call_handler(handle);
    mem.map(0x1000, vec![0x1f, 0x20, 0x03, 0xd5].repeat(0x100), Permissions::all());
    let mut object = (VTABLE + 0x10).to_le_bytes().to_vec();
    object.extend_from_slice(&1u32.to_le_bytes());
    object.extend_from_slice(&[0; 4]);
    mem.map(OBJECT, object, Permissions::READ | Permissions::WRITE);

    let mut vtable = RTTI.to_le_bytes().to_vec();
    vtable.extend_from_slice(&0u64.to_le_bytes());
    vtable.extend_from_slice(&0x1000u64.to_le_bytes());
    mem.map(VTABLE, vtable, Permissions::READ);

    let mut rtti = vec![0u8; 0x100];
    rtti[8..16].copy_from_slice(&TYPE_NAME.to_le_bytes());
    rtti.extend_from_slice(b"N2nn2fs11IFileSystemE\0");
    mem.map(RTTI, rtti, Permissions::READ);
    Arc::new(mem)
}

fn object_pointer(mem: &Arc<BufferBackend>) -> MemoryPointer {
    let layout = StructBuilder::new("Object")
        .field(&registry::pointer(&registry::vtable()), "vtable")
        .and_then(|b| b.field(&registry::uint32(), "refcount"))
        .unwrap()
        .build();
    let backend: Arc<dyn MemoryBackend> = mem.clone();
    MemoryPointer::new(backend, OBJECT, layout)
}

#[test]
fn walks_vtable_to_type_name() {
    let mem = process();
    let object = object_pointer(&mem);

    let vtable = object.member("vtable").unwrap().deref_pointer().unwrap();
    assert_eq!(vtable.address(), VTABLE + 0x10);
    assert_eq!(vtable.arrow("this_offset").unwrap(), Value::Unsigned(0));

    let rtti = vtable.member("rtti").unwrap().deref_pointer().unwrap();
    assert_eq!(rtti.address(), RTTI);
    let name = rtti.member("name").unwrap().deref_pointer().unwrap();
    assert_eq!(name.read_c_string(64).unwrap(), "N2nn2fs11IFileSystemE");
    assert_eq!(
        name.to_string(),
        "char* (proc) = 0x7100 \"N2nn2fs11IFileSystemE\""
    );
}

#[test]
fn member_assignment_round_trips() {
    let mem = process();
    let object = object_pointer(&mem);
    object.assign("refcount", &Value::from(7u32)).unwrap();
    assert_eq!(object.arrow("refcount").unwrap(), Value::Unsigned(7));
    assert_eq!(mem.read(OBJECT + 8, 4).unwrap(), vec![7, 0, 0, 0]);

    assert!(matches!(
        object.arrow("missing"),
        Err(MemscopeError::UnknownField { .. })
    ));
    let rtti = object.at(RTTI, registry::rtti());
    assert!(matches!(
        rtti.assign("name", &Value::from(0u64)),
        Err(MemscopeError::ReadOnly { .. })
    ));
}

#[test]
fn calls_marshal_text_and_release_scratch() {
    let mem = process();
    let target = MemoryPointer::new(mem.clone(), STRLEN, registry::void());
    let strlen = target
        .as_callable(&registry::uint64(), &[registry::pointer(&registry::char())])
        .unwrap()
        .with_names(&["text"]);
    assert_eq!(strlen.to_string(), "uint64 (*)(char* text) = 0x1000");

    let result = strlen.call(&mut [Argument::from("sixteen letters!")]).unwrap();
    assert_eq!(result, Value::Unsigned(16));

    let stats = mem.stats();
    assert_eq!(stats.allocations, 1);
    assert_eq!(stats.live, 0);
}

#[test]
fn array_arguments_are_copied_back() {
    let mem = process();
    let double_all = CallableReference::new(
        MemoryPointer::new(mem.clone(), DOUBLE_ALL, registry::void()),
        &registry::void(),
        &[registry::pointer(&registry::uint32()), registry::uint64()],
    )
    .unwrap();

    let values = vec![Value::from(1u32), Value::from(20u32), Value::from(300u32)];
    let mut args = [Argument::Array(values), Argument::from(Value::from(3u64))];
    assert_eq!(double_all.call(&mut args).unwrap(), Value::Unit);
    assert_eq!(
        args[0],
        Argument::Array(vec![
            Value::Unsigned(2),
            Value::Unsigned(40),
            Value::Unsigned(600)
        ])
    );
    assert_eq!(mem.stats().live, 0);
}

#[test]
fn float_arguments_use_their_own_registers() {
    let mem = process();
    let scale = CallableReference::new(
        MemoryPointer::new(mem.clone(), SCALE, registry::void()),
        &registry::float64(),
        &[registry::float64(), registry::uint32()],
    )
    .unwrap();
    let result = scale
        .call(&mut [Argument::from(Value::from(1.25)), Argument::from(Value::from(4u32))])
        .unwrap();
    assert_eq!(result, Value::Float(5.0));

    let calls = mem.calls();
    let request = &calls[0];
    assert_eq!(request.integer, vec![4]);
    assert_eq!(request.float, vec![split_f64(1.25)]);
    assert!(request.vector.is_empty());
}

#[test]
fn pointer_results_bind_declared_type() {
    let mem = process();
    let name_of = CallableReference::new(
        MemoryPointer::new(mem.clone(), NAME_OF, registry::void()),
        &registry::pointer(&registry::char()),
        &[],
    )
    .unwrap();
    let result = name_of.call(&mut []).unwrap();
    let name = result.as_pointer().unwrap();
    assert_eq!(name.address(), TYPE_NAME);
    assert_eq!(name.ty().name(), "char");
    assert_eq!(name.read_c_string(8).unwrap(), "N2nn2fs1");
    assert_eq!(result.to_string(), name.to_string());
}

#[test]
fn failed_call_still_releases_scratch() {
    let mem = process();
    let missing = CallableReference::new(
        MemoryPointer::new(mem.clone(), 0xdead_0000, registry::void()),
        &registry::void(),
        &[registry::pointer(&registry::char())],
    )
    .unwrap();
    assert!(missing.call(&mut [Argument::from("x")]).is_err());
    let stats = mem.stats();
    assert_eq!(stats.allocations, 1);
    assert_eq!(stats.frees, 1);
}

#[test]
fn start_dispatches_without_result() {
    let mem = process();
    let strlen = CallableReference::new(
        MemoryPointer::new(mem.clone(), STRLEN, registry::void()),
        &registry::uint64(),
        &[registry::pointer(&registry::char())],
    )
    .unwrap();
    strlen.start(&mut [Argument::from("abc")]).unwrap();
    let calls = mem.calls();
    assert_eq!(calls.len(), 1);
    assert!(!calls[0].synchronous);
    assert_eq!(mem.stats().live, 0);
}

#[test]
fn breakpoint_patches_code() {
    let mem = process();
    let location = MemoryPointer::new(mem.clone(), STRLEN + 8, registry::uint32());
    let mut bp = SoftwareBreakpoint::new(location.clone());
    bp.install().unwrap();
    assert_eq!(location.deref().unwrap(), Value::Unsigned(0xd420_0000));
    bp.uninstall().unwrap();
    assert_eq!(location.deref().unwrap(), Value::Unsigned(0xd503_201f));
}
