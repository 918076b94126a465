#![no_main]

use agora_core::core_store::{decode_snapshot, HistoricalStoreState, MapStoreState};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // A damaged store file is quarantined on load; parsing it must not panic
    let _ = decode_snapshot::<MapStoreState>(data, 1024 * 1024);
    let _ = decode_snapshot::<HistoricalStoreState>(data, 1024 * 1024);
});
