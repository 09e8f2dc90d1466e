//! Heartbeat / KEEPALIVE handling (C9).
//!
//! Builds the node's own periodic KEEPALIVE payload and classifies an
//! incoming neighbor's KEEPALIVE as fresh, stale, or replayed. TTL is
//! always 1: a KEEPALIVE never gets forwarded past a direct neighbor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use backbone_common::Callsign;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(300);

/// KEEPALIVEs whose timestamp is further than this from our own clock are
/// logged as stale or replayed, but still processed (§4.9).
pub const STALE_WARN_THRESHOLD: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveMetrics {
    pub queue_depth: u32,
    pub neighbor_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepalivePayload {
    pub node_id: String,
    pub sequence: u64,
    pub protocol_version: u8,
    /// Unix seconds, per the originating node's clock.
    pub timestamp: u64,
    pub services: Vec<String>,
    pub metrics: KeepaliveMetrics,
    pub capabilities: Vec<String>,
}

impl KeepalivePayload {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Replayed,
}

/// Tracks the last-seen sequence number per neighbor so replayed or
/// out-of-order KEEPALIVEs can be flagged (they're still applied to the
/// neighbor table — §4.9 says "processed regardless").
#[derive(Debug, Default)]
pub struct HeartbeatTracker {
    last_sequence: std::collections::HashMap<Callsign, u64>,
}

impl HeartbeatTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `payload` from `from`, given our own current unix-seconds
    /// clock, then record its sequence for future replay detection.
    pub fn classify(&mut self, from: &Callsign, payload: &KeepalivePayload, now_unix: u64) -> Freshness {
        let age = now_unix.saturating_sub(payload.timestamp);
        let is_replay = match self.last_sequence.get(from) {
            Some(&last) => payload.sequence <= last,
            None => false,
        };
        self.last_sequence.insert(from.clone(), payload.sequence.max(
            self.last_sequence.get(from).copied().unwrap_or(0),
        ));

        if is_replay {
            Freshness::Replayed
        } else if age > STALE_WARN_THRESHOLD.as_secs() {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cs(s: &str) -> Callsign {
        Callsign::parse(s).unwrap()
    }

    fn payload(sequence: u64, timestamp: u64) -> KeepalivePayload {
        KeepalivePayload {
            node_id: "W1ABC".into(),
            sequence,
            protocol_version: 1,
            timestamp,
            services: vec![],
            metrics: KeepaliveMetrics {
                queue_depth: 0,
                neighbor_count: 0,
            },
            capabilities: vec![],
        }
    }

    #[test]
    fn json_round_trips() {
        let p = payload(1, 1000);
        let bytes = p.to_json().unwrap();
        let back = KeepalivePayload::from_json(&bytes).unwrap();
        assert_eq!(back.sequence, 1);
        assert_eq!(back.timestamp, 1000);
    }

    #[test]
    fn first_sighting_is_fresh() {
        let mut tracker = HeartbeatTracker::new();
        let f = tracker.classify(&cs("K2XYZ"), &payload(1, 1000), 1000);
        assert_eq!(f, Freshness::Fresh);
    }

    #[test]
    fn i8_stale_timestamp_is_flagged_but_still_processed() {
        let mut tracker = HeartbeatTracker::new();
        let f = tracker.classify(&cs("K2XYZ"), &payload(1, 1000), 1000 + STALE_WARN_THRESHOLD.as_secs() + 1);
        assert_eq!(f, Freshness::Stale);
    }

    #[test]
    fn replayed_sequence_is_flagged() {
        let mut tracker = HeartbeatTracker::new();
        tracker.classify(&cs("K2XYZ"), &payload(5, 1000), 1000);
        let f = tracker.classify(&cs("K2XYZ"), &payload(5, 1001), 1001);
        assert_eq!(f, Freshness::Replayed);
    }

    #[test]
    fn out_of_order_lower_sequence_is_replayed() {
        let mut tracker = HeartbeatTracker::new();
        tracker.classify(&cs("K2XYZ"), &payload(10, 1000), 1000);
        let f = tracker.classify(&cs("K2XYZ"), &payload(3, 1001), 1001);
        assert_eq!(f, Freshness::Replayed);
    }
}
