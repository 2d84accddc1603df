#![no_main]

use inspa_rs::archive::ZstdArchiveReader;
use libfuzzer_sys::fuzz_target;
use std::io::Read;

fuzz_target!(|data: &[u8]| {
    let compressed = match zstd::encode_all(data, 1) {
        Ok(c) => c,
        Err(_) => return,
    };

    let mut reader = match ZstdArchiveReader::new(&compressed[..]) {
        Ok(r) => r,
        Err(_) => return,
    };

    // Walk records with arbitrary lengths - should never panic
    let mut sink = Vec::new();
    while let Ok(Some(entry)) = reader.next_entry() {
        if entry.is_directory {
            continue;
        }
        sink.clear();
        if reader.content().take(1 << 20).read_to_end(&mut sink).is_err() {
            return;
        }
    }
});
