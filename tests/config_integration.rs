mod common;

use std::sync::Arc;

use common::fixture::*;
use memscope::config::*;
use memscope::{ElfImage, ImageBackend, MemoryBackend, MemscopeError, ModuleImage};

#[test]
fn test_inspector_config_creation() {
    let config = InspectorConfig::default();

    assert_eq!(config.limits.max_file_size, 512 * 1024 * 1024);
    assert_eq!(config.limits.max_symbol_name, 1024);
    assert_eq!(config.limits.max_dynamic_entries, 4096);
    assert_eq!(config.limits.max_segment_size, 512 * 1024 * 1024);
    assert_eq!(config.module.header_magic, "MOD0");
    assert_eq!(config.module.note_owner, "Twili");
    assert_eq!(config.module.note_type, 6482);
    assert_eq!(config.scan.stride, 8);
    assert_eq!(config.scan.instance_offset, 8);
    assert_eq!(config.scan.dispatch_table_pattern, DEFAULT_DISPATCH_TABLE_PATTERN);
}

#[test]
fn test_partial_json_keeps_defaults() {
    let config = InspectorConfig::from_json_str(r#"{"scan": {"instance_offset": 16}}"#).unwrap();
    assert_eq!(config.scan.instance_offset, 16);
    assert_eq!(config.scan.stride, 8);
    assert_eq!(config.limits, LimitsConfig::default());

    let empty = InspectorConfig::from_json_str("{}").unwrap();
    assert_eq!(empty, InspectorConfig::default());
}

#[test]
fn test_invalid_configs_rejected() {
    for text in [
        r#"{"module": {"header_magic": "MOD"}}"#,
        r#"{"scan": {"stride": 0}}"#,
        r#"{"scan": {"dispatch_table_pattern": "("}}"#,
        r#"{"limits": {"max_symbol_name": 0}}"#,
        "not json",
    ] {
        let err = InspectorConfig::from_json_str(text).unwrap_err();
        assert!(matches!(err, MemscopeError::Config(_)), "{}", text);
    }
}

#[test]
fn test_config_file_round_trip() {
    let mut config = InspectorConfig::default();
    config.limits.max_relocation_bytes = 0x1000;
    config.module.note_owner = "Other".to_string();
    let file = common::create_temp_file(config.to_json().unwrap().as_bytes());
    assert_eq!(InspectorConfig::from_json_file(file.path()).unwrap(), config);
}

#[test]
fn test_note_owner_selects_modules() {
    let text = r#"{"module": {"note_owner": "Other"}}"#;
    let config = InspectorConfig::from_json_str(text).unwrap();
    let image = ElfImage::from_bytes_with_config(common::module_image(), &config).unwrap();
    assert!(image.loaded_modules().unwrap().is_empty());
}

#[test]
fn test_relocation_limit_applies() {
    let mut config = InspectorConfig::default();
    config.limits.max_relocation_bytes = 8;
    let image = ElfImage::from_bytes(common::module_image()).unwrap();
    let backend: Arc<dyn MemoryBackend> = Arc::new(ImageBackend::new(Arc::new(image)));
    let err = ModuleImage::load(backend, MODULE_BASE, MODULE_SIZE, Vec::new(), &config).unwrap_err();
    assert!(err.is_format_error());
}

#[test]
fn test_dynamic_entry_limit_applies() {
    let mut config = InspectorConfig::default();
    config.limits.max_dynamic_entries = 3;
    let image = ElfImage::from_bytes(common::module_image()).unwrap();
    let backend: Arc<dyn MemoryBackend> = Arc::new(ImageBackend::new(Arc::new(image)));
    let err = ModuleImage::load(backend, MODULE_BASE, MODULE_SIZE, Vec::new(), &config).unwrap_err();
    assert!(matches!(
        err,
        MemscopeError::UnterminatedDynamic { entries: 3, .. }
    ));
}
