#![no_main]

use inspa_rs::archive::decode;
use inspa_rs::ContainerReader;
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    // Open and parse - should never panic
    let mut reader = match ContainerReader::from_reader(Cursor::new(data)) {
        Ok(r) => r,
        Err(_) => return,
    };
    let _ = reader.read_footer();

    let parsed = match reader.parse() {
        Ok(p) => p,
        Err(_) => return, // Expected for invalid data
    };

    let _ = parsed.verify_digest();
    let _ = parsed.header.original_size();
    let _ = parsed.header.file_count();

    // Decoding whatever archive bytes were located - should never panic
    let _ = decode(&parsed.compressed, parsed.header.compression.algo);
});
