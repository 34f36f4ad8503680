#![no_main]
use chd_reader::Chd;
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    if let Ok(mut chd) = Chd::open(Cursor::new(data), None) {
        let mut hunk_buf = chd.get_hunksized_buffer();
        // hunk_count comes from the input, so cap the work per case
        for hunk_num in 0..chd.header().hunk_count.min(1024) {
            let _ = chd.read_hunk(hunk_num, &mut hunk_buf);
        }
        let _ = chd.metadata_refs().count();
    }
});
