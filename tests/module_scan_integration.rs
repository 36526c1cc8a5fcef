mod common;

use std::sync::Arc;

use common::fixture::*;
use memscope::analysis::ObjectScanner;
use memscope::config::{InspectorConfig, ScanConfig};
use memscope::core::registry;
use memscope::formats::elf::ElfImage;
use memscope::{ImageBackend, MemoryBackend, MemscopeError, ModuleImage};

fn backend() -> Arc<dyn MemoryBackend> {
    let image = ElfImage::from_bytes(common::module_image()).unwrap();
    Arc::new(ImageBackend::new(Arc::new(image)))
}

fn module() -> ModuleImage {
    ModuleImage::load(
        backend(),
        MODULE_BASE,
        MODULE_SIZE,
        BUILD_ID.to_vec(),
        &InspectorConfig::default(),
    )
    .unwrap()
}

#[test]
fn module_loads_from_static_image() {
    let module = module();
    assert_eq!(module.header_address(), HEADER);
    assert_eq!(module.header().dynamic_offset, 0x100);
    assert_eq!(module.dynamic().address(), HEADER + 0x100);
    assert_eq!(module.dynamic().entries().len(), 6);

    assert_eq!(module.symbols().len(), 3);
    assert_eq!(module.symbol("main").unwrap().address, MAIN);
    assert_eq!(
        module.symbol_containing(VTABLE + 0x10).unwrap().raw_name(),
        "_ZTVN2nn2fs11IFileSystemE"
    );
    let vtables: Vec<_> = module.vtable_symbols().map(|s| s.address).collect();
    assert_eq!(vtables, vec![VTABLE]);
    assert_eq!(module.dispatch_tables().get(INTERFACE), Some(&DISPATCH_TABLE));

    assert_eq!(module.relocations().len(), 1);
    assert_eq!(module.relocations()[0].reloc_type, 1027);
    assert!(module.is_relocation_target(DATA));
}

#[test]
fn symbol_pointer_reads_through_image() {
    let module = module();
    let greeting = module.pointer_to("main", &registry::char()).unwrap();
    let text = greeting
        .at(GREETING, registry::char())
        .read_c_string(64)
        .unwrap();
    assert_eq!(text, "hello, module");

    // Static images are read-only.
    let err = greeting.write_bytes(&[0]).unwrap_err();
    assert!(matches!(err, MemscopeError::ReadOnly { .. }));
}

#[test]
fn scan_finds_single_object() {
    let module = module();
    let objects = module.find_service_objects().unwrap();
    assert_eq!(objects.len(), 1);

    let object = &objects[0];
    assert_eq!(object.anchor, ANCHOR);
    assert_eq!(object.interface, INTERFACE);
    assert_eq!(object.instance.address(), INSTANCE);
    assert_eq!(object.instance.ty().name(), "void");
}

#[test]
fn scan_offset_is_configurable() {
    let module = module();
    let config = ScanConfig {
        instance_offset: 0x18,
        ..ScanConfig::default()
    };
    let objects = ObjectScanner::with_config(&module, config).scan().unwrap();
    assert_eq!(objects.len(), 1);
    // The relocated slot at DATA now supplies the instance word.
    assert_eq!(objects[0].instance.address(), DISPATCH_TABLE);
}

#[test]
fn scan_rejects_zero_stride() {
    let module = module();
    let config = ScanConfig {
        stride: 0,
        ..ScanConfig::default()
    };
    let err = ObjectScanner::with_config(&module, config).scan().unwrap_err();
    assert!(matches!(err, MemscopeError::Config(_)));
}

#[test]
fn modules_load_from_notes() {
    let modules = ModuleImage::load_from_notes(backend(), &InspectorConfig::default()).unwrap();
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].base(), MODULE_BASE);
    assert_eq!(modules[0].size(), MODULE_SIZE);
    assert_eq!(modules[0].build_id(), &BUILD_ID);
    assert_eq!(modules[0].find_service_objects().unwrap().len(), 1);
}

#[test]
fn wrong_module_magic() {
    let image = ElfImage::from_bytes(common::module_image_with_magic(b"NRO0")).unwrap();
    let backend: Arc<dyn MemoryBackend> = Arc::new(ImageBackend::new(Arc::new(image)));
    let err = ModuleImage::load_from_notes(backend, &InspectorConfig::default()).unwrap_err();
    assert!(matches!(err, MemscopeError::BadMagic { offset, .. } if offset == HEADER));
}

#[test]
fn custom_module_magic() {
    let image = ElfImage::from_bytes(common::module_image_with_magic(b"NRO0")).unwrap();
    let backend: Arc<dyn MemoryBackend> = Arc::new(ImageBackend::new(Arc::new(image)));
    let mut config = InspectorConfig::default();
    config.module.header_magic = "NRO0".to_string();
    let module = ModuleImage::load(backend, MODULE_BASE, MODULE_SIZE, Vec::new(), &config).unwrap();
    assert_eq!(module.symbols().len(), 3);
}

#[test]
fn backend_opens_file() {
    let file = common::create_temp_file(&common::module_image());
    let backend = ImageBackend::open(file.path(), &InspectorConfig::default()).unwrap();
    let name = file.path().file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(backend.identifier(), name);
    assert!(backend.elf().build_id().is_some());
}
