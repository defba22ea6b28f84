#![no_main]

use libfuzzer_sys::fuzz_target;

use altsync_wire::{build, parse};

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must never panic the decoder
    let Ok(message) = parse(data) else {
        return;
    };
    let _ = message.validate();

    // Whatever decoded survives a re-encode unchanged
    if let Some(bytes) = build(&message) {
        assert_eq!(parse(&bytes).ok(), Some(message));
    }
});
