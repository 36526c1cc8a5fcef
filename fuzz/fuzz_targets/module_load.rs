#![no_main]
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

use memscope::{BufferBackend, InspectorConfig, MemoryBackend, ModuleImage, Permissions};

// Arbitrary bytes mapped as a module: header word, dynamic table and symbol
// tables all come from the input.
fuzz_target!(|data: &[u8]| {
    let mem = BufferBackend::new("fuzz");
    mem.map(0x10000, data.to_vec(), Permissions::READ);
    let backend: Arc<dyn MemoryBackend> = Arc::new(mem);
    let mut config = InspectorConfig::default();
    config.limits.max_relocation_bytes = 0x10000;
    if let Ok(module) = ModuleImage::load(backend, 0x10000, data.len() as u64, Vec::new(), &config) {
        let _ = module.symbols().len();
    }
});
