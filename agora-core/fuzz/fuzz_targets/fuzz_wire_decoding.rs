#![no_main]

use agora_core::core_gossip::NetworkMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary frames from a peer must decode or fail, never panic
    if let Ok(message) = NetworkMessage::decode(data, 64 * 1024) {
        // whatever decoded must encode again
        let _ = message.encode();
        let _ = message.required_capabilities();
    }
});
