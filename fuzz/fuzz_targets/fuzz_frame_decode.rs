// Copyright (c) 2026 Driftnet
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Session frames arrive straight off the radio link; decoding must
    // never panic.
    let _ = driftnet::sync::wire::decode(data);
});
