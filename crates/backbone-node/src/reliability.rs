//! Reliability layer (C13): ACK tracking, retry/backoff, RTT estimation.
//!
//! One [`PendingAck`] per in-flight message requiring acknowledgement.
//! `tick()` is driven by the coordinator's drain loop and returns the
//! messages that are due for retransmission or have exhausted their
//! retry budget.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use backbone_common::Callsign;

/// Initial ACK wait before the first retry; doubles on each subsequent
/// retry (§4.13).
pub const INITIAL_ACK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Message is given up on after this many retries.
pub const MAX_RETRIES: u8 = 5;

/// EWMA smoothing factor for round-trip time.
pub const RTT_ALPHA: f64 = 0.125;

#[derive(Debug, Clone)]
pub struct PendingAck {
    pub message_id: [u8; 16],
    pub destination: Callsign,
    pub packet_bytes: Vec<u8>,
    pub sent_at: Instant,
    pub timeout: Duration,
    pub retries: u8,
}

#[derive(Debug, Clone, Copy)]
pub enum TickOutcome {
    Retry,
    GivenUp,
}

/// Smoothed round-trip time estimate, one per neighbor.
#[derive(Debug, Default)]
pub struct RttEstimator {
    estimates: HashMap<Callsign, f64>,
}

impl RttEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `rtt = (1 - alpha) * rtt + alpha * sample` (§4.13).
    pub fn observe(&mut self, neighbor: &Callsign, sample: Duration) {
        let sample_ms = sample.as_secs_f64() * 1000.0;
        let entry = self.estimates.entry(neighbor.clone()).or_insert(sample_ms);
        *entry = (1.0 - RTT_ALPHA) * *entry + RTT_ALPHA * sample_ms;
    }

    pub fn get(&self, neighbor: &Callsign) -> Option<f64> {
        self.estimates.get(neighbor).copied()
    }

    /// Snapshot keyed by the callsign's string form, for the status
    /// surface's `averageRtt` aggregation.
    pub fn samples(&self) -> HashMap<String, f64> {
        self.estimates.iter().map(|(c, ms)| (c.as_str().to_string(), *ms)).collect()
    }
}

/// Tracks outstanding ACKs and drives the retry/backoff state machine.
#[derive(Debug, Default)]
pub struct ReliabilityTracker {
    pending: HashMap<[u8; 16], PendingAck>,
    rtt: RttEstimator,
}

impl ReliabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, message_id: [u8; 16], destination: Callsign, packet_bytes: Vec<u8>, now: Instant) {
        self.pending.insert(
            message_id,
            PendingAck {
                message_id,
                destination,
                packet_bytes,
                sent_at: now,
                timeout: INITIAL_ACK_TIMEOUT,
                retries: 0,
            },
        );
    }

    /// An ACK arrived: stop tracking the message and feed the observed RTT
    /// into the estimator for `source` (the neighbor the ACK came from).
    pub fn ack(&mut self, message_id: &[u8; 16], source: &Callsign, now: Instant) -> bool {
        if let Some(p) = self.pending.remove(message_id) {
            self.rtt.observe(source, now.duration_since(p.sent_at));
            true
        } else {
            false
        }
    }

    /// A NACK arrived: force an immediate retry regardless of the timeout
    /// clock (§4.13 "NACK triggers immediate retry").
    pub fn nack(&mut self, message_id: &[u8; 16]) {
        if let Some(p) = self.pending.get_mut(message_id) {
            p.timeout = Duration::ZERO;
        }
    }

    pub fn rtt(&self, neighbor: &Callsign) -> Option<f64> {
        self.rtt.get(neighbor)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn rtt_samples(&self) -> HashMap<String, f64> {
        self.rtt.samples()
    }

    /// Scan all pending ACKs; messages whose deadline has passed either get
    /// their retry counter bumped and timeout doubled (`Retry`), or are
    /// dropped from tracking once `MAX_RETRIES` is exceeded (`GivenUp`).
    pub fn tick(&mut self, now: Instant) -> Vec<(PendingAck, TickOutcome)> {
        let mut due = Vec::new();
        let mut give_up = Vec::new();

        for (id, p) in self.pending.iter_mut() {
            if now.duration_since(p.sent_at) >= p.timeout {
                if p.retries >= MAX_RETRIES {
                    give_up.push(*id);
                } else {
                    p.retries += 1;
                    p.sent_at = now;
                    p.timeout *= 2;
                    due.push((p.clone(), TickOutcome::Retry));
                }
            }
        }

        let mut results = due;
        for id in give_up {
            if let Some(p) = self.pending.remove(&id) {
                results.push((p, TickOutcome::GivenUp));
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cs(s: &str) -> Callsign {
        Callsign::parse(s).unwrap()
    }

    #[test]
    fn ack_stops_tracking_and_feeds_rtt() {
        let mut tracker = ReliabilityTracker::new();
        let t0 = Instant::now();
        tracker.track([1; 16], cs("K2XYZ"), vec![], t0);
        let t1 = t0 + Duration::from_millis(50);
        assert!(tracker.ack(&[1; 16], &cs("K2XYZ"), t1));
        assert_eq!(tracker.pending_len(), 0);
        assert!(tracker.rtt(&cs("K2XYZ")).unwrap() > 0.0);
    }

    #[test]
    fn rtt_samples_are_keyed_by_callsign_string() {
        let mut tracker = ReliabilityTracker::new();
        let t0 = Instant::now();
        tracker.track([7; 16], cs("K2XYZ"), vec![], t0);
        tracker.ack(&[7; 16], &cs("K2XYZ"), t0 + Duration::from_millis(50));
        let samples = tracker.rtt_samples();
        assert_eq!(samples.len(), 1);
        assert!(samples.contains_key("K2XYZ"));
    }

    #[test]
    fn unknown_message_id_ack_is_a_no_op() {
        let mut tracker = ReliabilityTracker::new();
        assert!(!tracker.ack(&[9; 16], &cs("K2XYZ"), Instant::now()));
    }

    #[test]
    fn i5_timeout_doubles_on_each_retry() {
        let mut tracker = ReliabilityTracker::new();
        let t0 = Instant::now();
        tracker.track([2; 16], cs("K2XYZ"), vec![], t0);

        let t1 = t0 + INITIAL_ACK_TIMEOUT + Duration::from_millis(1);
        let results = tracker.tick(t1);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].1, TickOutcome::Retry));
        assert_eq!(results[0].0.retries, 1);

        let t2 = t1 + INITIAL_ACK_TIMEOUT * 2 + Duration::from_millis(1);
        let results2 = tracker.tick(t2);
        assert_eq!(results2.len(), 1);
        assert_eq!(results2[0].0.retries, 2);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let mut tracker = ReliabilityTracker::new();
        let mut now = Instant::now();
        tracker.track([3; 16], cs("K2XYZ"), vec![], now);

        for _ in 0..=MAX_RETRIES {
            let timeout = tracker.pending.get(&[3; 16]).map(|p| p.timeout);
            let Some(timeout) = timeout else { break };
            now += timeout + Duration::from_millis(1);
            tracker.tick(now);
        }
        assert_eq!(tracker.pending_len(), 0);
    }

    #[test]
    fn nack_forces_immediate_retry() {
        let mut tracker = ReliabilityTracker::new();
        let t0 = Instant::now();
        tracker.track([4; 16], cs("K2XYZ"), vec![], t0);
        tracker.nack(&[4; 16]);
        let results = tracker.tick(t0);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].1, TickOutcome::Retry));
    }
}
