//! Fuzz target: build structured envelopes from arbitrary field bounds.
//! Inverted or oversized bounds must not panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rand::SeedableRng;
use rand::rngs::StdRng;

use ipcfuzz::generator::EnvelopeSpec;

fuzz_target!(|data: &[u8]| {
    if data.len() < 15 {
        return;
    }
    let send_len = usize::from(u16::from_le_bytes([data[0], data[1]]));
    let field_min = u16::from_le_bytes([data[2], data[3]]);
    let field_max = u16::from_le_bytes([data[4], data[5]]);
    let fill = data[6];
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&data[7..15]);

    let spec = EnvelopeSpec {
        send_len,
        field_min,
        field_max,
        fill,
    };
    let message = spec.build(&mut StdRng::seed_from_u64(u64::from_le_bytes(seed)));
    assert_eq!(message.size(), message.payload().len());
});
