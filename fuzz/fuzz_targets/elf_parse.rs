#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(image) = memscope::ElfImage::from_bytes(data.to_vec()) else {
        return;
    };
    let _ = image.loaded_modules();
    for seg in image.load_segments() {
        let _ = image.read(seg.vaddr, seg.memsz.min(0x1000));
    }
    let _ = image.search(&[0, 0, 0, 0], 4, None, None);
});
