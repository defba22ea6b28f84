#![no_main]

use std::net::SocketAddr;

use libfuzzer_sys::fuzz_target;

use altsync_transport::decode_datagram;

fuzz_target!(|data: &[u8]| {
    let addr = SocketAddr::from(([127, 0, 0, 1], 9));
    if let Some(inbound) = decode_datagram(data, addr) {
        assert!(inbound.bytes.len() < data.len());
    }
});
