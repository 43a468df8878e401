#![no_main]

use libfuzzer_sys::fuzz_target;
use shadec_library::ShaderLibraryData;

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let at = (split as usize * rest.len()) / 255;
    let (structure, shader_data) = rest.split_at(at);
    if let Ok(library) = ShaderLibraryData::from_buffers(structure, shader_data) {
        for index in 0..library.blobs.len() {
            let _ = library.unpack_shader(index as u32);
        }
    }
});
