//! Programmatic status surface (§6 `status_report()`, §7 user-visible
//! failure reporting).
//!
//! A plain, `Serialize`-able snapshot. Rendering it over HTTP for a
//! browser UI is out of scope; this module stops at the typed struct.

use std::collections::HashMap;

use serde::Serialize;

use crate::transport::TransportId;

#[derive(Debug, Clone, Copy, Serialize)]
pub enum TransportMode {
    Mesh,
    Server,
    Client,
    Rf,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransportStatus {
    pub transport_id: TransportId,
    pub connected: bool,
    pub mode: TransportMode,
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DroppedByPriority {
    pub emergency: u64,
    pub high: u64,
    pub normal: u64,
    pub low: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub transports: Vec<TransportStatus>,
    pub pending_queue_depth: usize,
    pub oldest_message_age_secs: Option<f64>,
    pub dropped_by_priority: DroppedByPriority,
    pub average_rtt_ms: Option<f64>,
    pub neighbor_count: usize,
    pub route_count: usize,
}

impl StatusReport {
    /// Build a report from the coordinator's current state. Kept as a free
    /// function taking plain values rather than a method on `Coordinator`
    /// so it can be unit-tested without constructing a whole coordinator.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        transports: Vec<TransportStatus>,
        pending_queue_depth: usize,
        oldest_message_age_secs: Option<f64>,
        dropped_by_priority: DroppedByPriority,
        rtt_samples: &HashMap<String, f64>,
        neighbor_count: usize,
        route_count: usize,
    ) -> Self {
        let average_rtt_ms = if rtt_samples.is_empty() {
            None
        } else {
            Some(rtt_samples.values().sum::<f64>() / rtt_samples.len() as f64)
        };

        StatusReport {
            transports,
            pending_queue_depth,
            oldest_message_age_secs,
            dropped_by_priority,
            average_rtt_ms,
            neighbor_count,
            route_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rtt_samples_yield_no_average() {
        let report = StatusReport::build(vec![], 0, None, DroppedByPriority::default(), &HashMap::new(), 0, 0);
        assert!(report.average_rtt_ms.is_none());
    }

    #[test]
    fn average_rtt_is_mean_of_samples() {
        let mut samples = HashMap::new();
        samples.insert("K2XYZ".to_string(), 100.0);
        samples.insert("N0CALL".to_string(), 200.0);
        let report = StatusReport::build(vec![], 0, None, DroppedByPriority::default(), &samples, 2, 1);
        assert_eq!(report.average_rtt_ms, Some(150.0));
    }

    #[test]
    fn serializes_to_json() {
        let report = StatusReport::build(
            vec![TransportStatus {
                transport_id: 0,
                connected: true,
                mode: TransportMode::Mesh,
                reconnect_attempts: 0,
            }],
            3,
            Some(1.5),
            DroppedByPriority::default(),
            &HashMap::new(),
            2,
            2,
        );
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"pending_queue_depth\":3"));
    }
}
