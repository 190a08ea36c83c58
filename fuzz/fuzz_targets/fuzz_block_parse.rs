// Copyright (c) 2026 Driftnet
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parser robustness only; signature checks are covered by unit tests.
    if let Ok(view) = driftnet::core::block::BlockView::parse(data) {
        let _ = view.date_utc_ms();
        let _ = view.body();
        let _ = view.content_hash();
        let _ = view.verify();
    }
    let _ = driftnet::core::block::BlockView::parse_prefix_len(data);
});
