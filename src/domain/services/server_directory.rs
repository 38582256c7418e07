//! Server Directory Service
//!
//! Holds the set of known upstream endpoints with their availability leases
//! and the next permitted bulk-send timeslot.
//!
//! Every read-then-write operation runs under a single lock acquisition, and
//! the lock is never held across I/O.

use crate::domain::entities::Endpoint;
use crate::error::{Result, UplinkError};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::Serialize;

#[derive(Debug, Default)]
struct DirectoryState {
    next_send_timeslot: u64,
    endpoints: Vec<Endpoint>,
}

/// Serializable point-in-time view of the directory, for logs and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectorySnapshot {
    pub next_send_timeslot: u64,
    pub endpoints: Vec<Endpoint>,
}

/// What a `merge` changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub kept: usize,
    pub dropped: usize,
}

/// Directory of upstream collection servers.
///
/// Selection is uniformly random among the endpoints whose lease has
/// expired, so no single server is starved and no cursor state is needed.
#[derive(Debug, Default)]
pub struct ServerDirectory {
    state: Mutex<DirectoryState>,
}

impl ServerDirectory {
    /// Create a directory holding the given bootstrap endpoints.
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            state: Mutex::new(DirectoryState {
                next_send_timeslot: 0,
                endpoints,
            }),
        }
    }

    /// Create a directory with a single initial server, available immediately.
    pub fn with_initial(host: impl Into<String>, port: u16) -> Self {
        Self::new(vec![Endpoint::new(host, port)])
    }

    /// Pick a random endpoint whose lease has expired at `now`.
    ///
    /// Fails with `NoServerAvailable` when every endpoint is leased out
    /// (or the directory is empty).
    pub fn select_available(&self, now: u64) -> Result<Endpoint> {
        let state = self.state.lock();
        let available: Vec<&Endpoint> = state
            .endpoints
            .iter()
            .filter(|e| e.is_available(now))
            .collect();

        available
            .choose(&mut rand::thread_rng())
            .map(|e| (*e).clone())
            .ok_or(UplinkError::NoServerAvailable)
    }

    /// Lease out `endpoint` for `busy_seconds` from `now`.
    ///
    /// Negative durations move the lease into the past. Returns false if the
    /// endpoint is no longer in the directory.
    pub fn mark_blocked(&self, endpoint: &Endpoint, busy_seconds: i16, now: u64) -> bool {
        let mut state = self.state.lock();
        match state.endpoints.iter_mut().find(|e| e.same_address(endpoint)) {
            Some(existing) => {
                existing.available_from = now.saturating_add_signed(i64::from(busy_seconds));
                tracing::info!(
                    "server {} blocked for {}s, available from {}",
                    existing,
                    busy_seconds,
                    existing.available_from
                );
                true
            }
            None => {
                tracing::debug!("server {} blocked but no longer in directory", endpoint);
                false
            }
        }
    }

    /// Replace the endpoint set with `new_hosts`.
    ///
    /// A host that is already known keeps its existing entry (and lease), so a
    /// refresh cannot revive a server known to be busy. Known hosts missing from
    /// `new_hosts` are dropped; unknown ones are added with `available_from = 0`.
    pub fn merge(&self, new_hosts: &[(String, u16)], now: u64) -> MergeSummary {
        let mut state = self.state.lock();
        let mut merged: Vec<Endpoint> = Vec::with_capacity(new_hosts.len());
        let mut summary = MergeSummary::default();

        for (host, port) in new_hosts {
            if merged.iter().any(|e| &e.host == host) {
                continue;
            }

            match state.endpoints.iter().find(|e| &e.host == host) {
                Some(existing) => {
                    if !existing.is_available(now) {
                        tracing::debug!(
                            "keeping lease of known server {} until {}",
                            existing,
                            existing.available_from
                        );
                    }
                    merged.push(existing.clone());
                    summary.kept += 1;
                }
                None => {
                    let endpoint = Endpoint::new(host.clone(), *port);
                    tracing::info!("added new server: {}", endpoint);
                    merged.push(endpoint);
                    summary.added += 1;
                }
            }
        }

        summary.dropped = state
            .endpoints
            .iter()
            .filter(|e| !merged.iter().any(|m| m.host == e.host))
            .count();
        state.endpoints = merged;

        summary
    }

    /// Record the next permitted bulk-send window (unix seconds).
    pub fn set_next_timeslot(&self, timeslot: u64) {
        let mut state = self.state.lock();
        if state.next_send_timeslot != timeslot {
            tracing::info!("send timeslot changed to {}", timeslot);
        }
        state.next_send_timeslot = timeslot;
    }

    pub fn next_send_timeslot(&self) -> u64 {
        self.state.lock().next_send_timeslot
    }

    pub fn len(&self) -> usize {
        self.state.lock().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().endpoints.is_empty()
    }

    /// Copy of the current endpoints.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.state.lock().endpoints.clone()
    }

    pub fn snapshot(&self) -> DirectorySnapshot {
        let state = self.state.lock();
        DirectorySnapshot {
            next_send_timeslot: state.next_send_timeslot,
            endpoints: state.endpoints.clone(),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::HashSet;

    // ===== Test Helpers =====

    fn leased(host: &str, port: u16, available_from: u64) -> Endpoint {
        Endpoint {
            available_from,
            ..Endpoint::new(host, port)
        }
    }

    fn hosts(list: &[&str]) -> Vec<(String, u16)> {
        list.iter().map(|h| (h.to_string(), 5000)).collect()
    }

    // ===== Selection Tests =====

    #[test]
    fn test_select_single_available() {
        let dir = ServerDirectory::with_initial("10.0.0.1", 5000);
        let ep = dir.select_available(1_000).unwrap();
        assert_eq!(ep.host, "10.0.0.1");
        assert_eq!(ep.port, 5000);
    }

    #[test]
    fn test_select_skips_leased_endpoints() {
        let dir = ServerDirectory::new(vec![
            leased("10.0.0.1", 5000, 2_000),
            leased("10.0.0.2", 5000, 0),
            leased("10.0.0.3", 5000, 1_001),
        ]);

        for _ in 0..50 {
            let ep = dir.select_available(1_000).unwrap();
            assert_eq!(ep.host, "10.0.0.2");
        }
    }

    #[test]
    fn test_select_fails_when_all_leased() {
        let dir = ServerDirectory::new(vec![
            leased("10.0.0.1", 5000, 2_000),
            leased("10.0.0.2", 5000, 1_500),
        ]);

        let result = dir.select_available(1_000);
        assert!(matches!(result, Err(UplinkError::NoServerAvailable)));
    }

    #[test]
    fn test_select_fails_on_empty_directory() {
        let dir = ServerDirectory::new(vec![]);
        assert!(matches!(
            dir.select_available(0),
            Err(UplinkError::NoServerAvailable)
        ));
    }

    #[test]
    fn test_select_spreads_across_available() {
        let dir = ServerDirectory::new(vec![
            Endpoint::new("10.0.0.1", 5000),
            Endpoint::new("10.0.0.2", 5000),
            Endpoint::new("10.0.0.3", 5000),
        ]);

        let mut seen = HashSet::new();
        for _ in 0..300 {
            seen.insert(dir.select_available(0).unwrap().host);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_select_never_returns_future_lease() {
        let dir = ServerDirectory::new(
            (0..10u64)
                .map(|i| leased(&format!("10.0.0.{}", i), 5000, i * 100))
                .collect(),
        );

        for now in [0u64, 150, 450, 999] {
            for _ in 0..20 {
                let ep = dir.select_available(now).unwrap();
                assert!(ep.available_from <= now);
            }
        }
    }

    // ===== Blocking Tests =====

    #[test]
    fn test_mark_blocked_sets_lease() {
        let dir = ServerDirectory::with_initial("10.0.0.1", 5000);
        let ep = dir.select_available(1_000).unwrap();

        assert!(dir.mark_blocked(&ep, 5, 1_000));
        assert_eq!(dir.endpoints()[0].available_from, 1_005);

        assert!(matches!(
            dir.select_available(1_004),
            Err(UplinkError::NoServerAvailable)
        ));
        assert!(dir.select_available(1_005).is_ok());
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_mark_blocked_logs_lease() {
        let dir = ServerDirectory::with_initial("10.0.0.1", 5000);
        dir.mark_blocked(&Endpoint::new("10.0.0.1", 5000), 5, 1_000);
        assert!(logs_contain("server 10.0.0.1:5000 blocked for 5s, available from 1005"));
    }

    #[test]
    fn test_mark_blocked_matches_host_and_port() {
        let dir = ServerDirectory::new(vec![
            Endpoint::new("10.0.0.1", 5000),
            Endpoint::new("10.0.0.1", 5001),
        ]);

        dir.mark_blocked(&Endpoint::new("10.0.0.1", 5001), 30, 100);

        let endpoints = dir.endpoints();
        assert_eq!(endpoints[0].available_from, 0);
        assert_eq!(endpoints[1].available_from, 130);
    }

    #[test]
    fn test_mark_blocked_absent_is_noop() {
        let dir = ServerDirectory::with_initial("10.0.0.1", 5000);
        assert!(!dir.mark_blocked(&Endpoint::new("10.9.9.9", 5000), 30, 100));
        assert_eq!(dir.endpoints()[0].available_from, 0);
    }

    #[test]
    fn test_mark_blocked_negative_duration() {
        let dir = ServerDirectory::with_initial("10.0.0.1", 5000);
        dir.mark_blocked(&Endpoint::new("10.0.0.1", 5000), -10, 100);
        assert_eq!(dir.endpoints()[0].available_from, 90);

        dir.mark_blocked(&Endpoint::new("10.0.0.1", 5000), -10, 5);
        assert_eq!(dir.endpoints()[0].available_from, 0);
    }

    // ===== Merge Tests =====

    #[test]
    fn test_merge_adds_new_hosts() {
        let dir = ServerDirectory::with_initial("10.0.0.1", 5000);
        let summary = dir.merge(&hosts(&["10.0.0.2", "10.0.0.3"]), 0);

        assert_eq!(
            summary,
            MergeSummary {
                added: 2,
                kept: 0,
                dropped: 1
            }
        );
        let endpoints = dir.endpoints();
        assert_eq!(endpoints.len(), 2);
        assert!(endpoints.iter().all(|e| e.available_from == 0 && e.port == 5000));
    }

    #[test]
    fn test_merge_preserves_existing_lease() {
        let dir = ServerDirectory::new(vec![
            leased("10.0.0.1", 5000, 2_000),
            leased("10.0.0.2", 5000, 0),
        ]);

        let summary = dir.merge(&hosts(&["10.0.0.1", "10.0.0.4"]), 1_000);
        assert_eq!(summary.kept, 1);
        assert_eq!(summary.added, 1);
        assert_eq!(summary.dropped, 1);

        let endpoints = dir.endpoints();
        let kept = endpoints.iter().find(|e| e.host == "10.0.0.1").unwrap();
        assert_eq!(kept.available_from, 2_000);
        assert!(endpoints.iter().all(|e| e.host != "10.0.0.2"));
    }

    #[test]
    fn test_merge_sequence_retains_unexpired_leases() {
        let dir = ServerDirectory::with_initial("10.0.0.1", 5000);
        dir.mark_blocked(&Endpoint::new("10.0.0.1", 5000), 600, 1_000);

        dir.merge(&hosts(&["10.0.0.1", "10.0.0.2"]), 1_100);
        dir.merge(&hosts(&["10.0.0.2", "10.0.0.1"]), 1_200);
        dir.merge(&hosts(&["10.0.0.1"]), 1_300);

        let endpoints = dir.endpoints();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].available_from, 1_600);
    }

    #[test]
    fn test_merge_collapses_duplicate_hosts() {
        let dir = ServerDirectory::with_initial("10.0.0.1", 5000);
        dir.merge(&hosts(&["10.0.0.2", "10.0.0.2"]), 0);
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_merge_empty_empties_directory() {
        let dir = ServerDirectory::with_initial("10.0.0.1", 5000);
        let summary = dir.merge(&[], 0);
        assert_eq!(summary.dropped, 1);
        assert!(dir.is_empty());
    }

    // ===== Timeslot Tests =====

    #[test]
    fn test_timeslot_roundtrip() {
        let dir = ServerDirectory::with_initial("10.0.0.1", 5000);
        assert_eq!(dir.next_send_timeslot(), 0);

        dir.set_next_timeslot(1_700_000_600);
        assert_eq!(dir.next_send_timeslot(), 1_700_000_600);
    }

    #[test]
    fn test_snapshot_serializes() {
        let dir = ServerDirectory::with_initial("10.0.0.1", 5000);
        dir.set_next_timeslot(42);

        let snapshot = dir.snapshot();
        assert_eq!(snapshot.next_send_timeslot, 42);
        assert_eq!(snapshot.endpoints.len(), 1);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["next_send_timeslot"], 42);
        assert_eq!(json["endpoints"][0]["host"], "10.0.0.1");
        assert_eq!(json["endpoints"][0]["available_from"], 0);
    }
}
