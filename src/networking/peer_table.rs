// Copyright (c) 2026 Driftnet
// Licensed under the Apache License, Version 2.0
//
//! Bounded table of recently-sighted peers, with per-peer sync results and
//! re-pairing back-off. Deterministic and borrow-safe; callers pass `now`.

#![forbid(unsafe_code)]

use crate::core::types::Bssid;
use std::time::{Duration, Instant};
use tracing::debug;

/// Outcome of the last sync attempt with a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SyncResult {
    /// Never synced.
    #[default]
    Unknown,
    /// Last session completed cleanly.
    Ok,
    /// Last session failed.
    Fail,
}

/// One tracked peer.
#[derive(Clone, Debug)]
pub struct PeerRecord {
    pub bssid: Bssid,
    pub rssi: i8,
    pub last_seen: Instant,
    pub last_synced: Option<Instant>,
    pub last_result: SyncResult,
    pub payload: Vec<u8>,
}

/// Table parameters.
#[derive(Clone, Debug)]
pub struct PeerTableParams {
    pub capacity: usize,
    pub backoff_ok: Duration,
    pub backoff_fail: Duration,
}

impl Default for PeerTableParams {
    fn default() -> Self {
        Self {
            capacity: 7,
            backoff_ok: Duration::from_secs(20),
            backoff_fail: Duration::from_secs(7),
        }
    }
}

/// Bounded in-memory peer registry.
pub struct PeerTable {
    params: PeerTableParams,
    records: Vec<PeerRecord>,
}

impl PeerTable {
    pub fn new(params: PeerTableParams) -> Self {
        Self {
            records: Vec::with_capacity(params.capacity),
            params,
        }
    }

    /// Number of tracked peers.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record a sighting: refresh a known peer, fill an empty slot, or
    /// evict the weakest-signal record.
    pub fn observe(&mut self, bssid: Bssid, rssi: i8, payload: &[u8], now: Instant) {
        if let Some(rec) = self.records.iter_mut().find(|r| r.bssid == bssid) {
            rec.rssi = rssi;
            rec.last_seen = now;
            rec.payload = payload.to_vec();
            return;
        }

        let rec = PeerRecord {
            bssid,
            rssi,
            last_seen: now,
            last_synced: None,
            last_result: SyncResult::Unknown,
            payload: payload.to_vec(),
        };

        if self.records.len() < self.params.capacity {
            self.records.push(rec);
            return;
        }

        // Full: replace the weakest signal.
        if let Some(weakest) = self
            .records
            .iter_mut()
            .min_by_key(|r| r.rssi)
        {
            debug!(evicted = %weakest.bssid, replacement = %bssid, "peer table full");
            *weakest = rec;
        }
    }

    fn backed_off(&self, rec: &PeerRecord, now: Instant) -> bool {
        let Some(synced) = rec.last_synced else {
            return false;
        };
        let window = match rec.last_result {
            SyncResult::Ok => self.params.backoff_ok,
            SyncResult::Fail => self.params.backoff_fail,
            SyncResult::Unknown => return false,
        };
        now.saturating_duration_since(synced) < window
    }

    /// Best candidate for initiating a pairing: strongest signal among the
    /// peers not inside a back-off window, freshest sighting on ties.
    pub fn select(&self, now: Instant) -> Option<Bssid> {
        self.records
            .iter()
            .filter(|r| !self.backed_off(r, now))
            .max_by(|a, b| {
                a.rssi
                    .cmp(&b.rssi)
                    .then_with(|| a.last_seen.cmp(&b.last_seen))
            })
            .map(|r| r.bssid)
    }

    /// Record a sync outcome for a peer.
    pub fn mark_result(&mut self, bssid: Bssid, ok: bool, now: Instant) {
        if let Some(rec) = self.records.iter_mut().find(|r| r.bssid == bssid) {
            rec.last_synced = Some(now);
            rec.last_result = if ok { SyncResult::Ok } else { SyncResult::Fail };
        }
    }

    /// Look a record up (for payload inspection).
    pub fn get(&self, bssid: Bssid) -> Option<&PeerRecord> {
        self.records.iter().find(|r| r.bssid == bssid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bssid(i: u8) -> Bssid {
        Bssid([i, 0, 0, 0, 0, i])
    }

    fn table() -> PeerTable {
        PeerTable::new(PeerTableParams::default())
    }

    #[test]
    fn observe_updates_existing_record() {
        let mut t = table();
        let now = Instant::now();
        t.observe(bssid(1), -70, b"a", now);
        t.observe(bssid(1), -40, b"b", now + Duration::from_secs(1));
        assert_eq!(t.len(), 1);
        let rec = t.get(bssid(1)).expect("record");
        assert_eq!(rec.rssi, -40);
        assert_eq!(rec.payload, b"b");
    }

    #[test]
    fn full_table_evicts_weakest_signal() {
        let mut t = table();
        let now = Instant::now();
        for i in 0..7u8 {
            t.observe(bssid(i), -50 - i as i8, b"", now);
        }
        assert_eq!(t.len(), 7);
        // bssid(6) has the weakest signal (-56) and gets replaced.
        t.observe(bssid(9), -30, b"", now);
        assert_eq!(t.len(), 7);
        assert!(t.get(bssid(6)).is_none());
        assert!(t.get(bssid(9)).is_some());
    }

    #[test]
    fn select_prefers_strongest_signal() {
        let mut t = table();
        let now = Instant::now();
        t.observe(bssid(1), -80, b"", now);
        t.observe(bssid(2), -30, b"", now);
        t.observe(bssid(3), -60, b"", now);
        assert_eq!(t.select(now), Some(bssid(2)));
    }

    #[test]
    fn select_ties_break_by_freshest_sighting() {
        let mut t = table();
        let now = Instant::now();
        t.observe(bssid(1), -50, b"", now);
        t.observe(bssid(2), -50, b"", now + Duration::from_secs(2));
        assert_eq!(t.select(now + Duration::from_secs(3)), Some(bssid(2)));
    }

    #[test]
    fn successful_sync_backs_off_for_twenty_seconds() {
        let mut t = table();
        let now = Instant::now();
        t.observe(bssid(1), -30, b"", now);
        t.mark_result(bssid(1), true, now);

        // Five seconds later the peer is still excluded.
        assert_eq!(t.select(now + Duration::from_secs(5)), None);
        // Another peer is picked when available.
        t.observe(bssid(2), -90, b"", now);
        assert_eq!(t.select(now + Duration::from_secs(5)), Some(bssid(2)));
        // The window expires.
        t.mark_result(bssid(2), true, now + Duration::from_secs(5));
        assert_eq!(t.select(now + Duration::from_secs(21)), Some(bssid(1)));
    }

    #[test]
    fn failed_sync_backs_off_for_seven_seconds() {
        let mut t = table();
        let now = Instant::now();
        t.observe(bssid(1), -30, b"", now);
        t.mark_result(bssid(1), false, now);
        assert_eq!(t.select(now + Duration::from_secs(6)), None);
        assert_eq!(t.select(now + Duration::from_secs(7)), Some(bssid(1)));
    }
}
