// Copyright (c) 2026 Driftnet
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use driftnet::sync::reconcile::{PagedDiffReconciler, Reconciler};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut recon = PagedDiffReconciler::new(Vec::new());
    let _ = recon.respond(data);
    let mut recon = PagedDiffReconciler::new(Vec::new());
    let _ = recon.fold(data);
});
