#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Limit input size to prevent timeout
    if data.len() > 1_000_000 {
        return;
    }

    // Meta pages and frames must reject garbage without panicking
    let _ = stashdb_engine::validate_image(data);
    let _ = stashdb_engine::MetaPage::select(data);
    let _ = stashdb_engine::Frame::decode(data);
});
