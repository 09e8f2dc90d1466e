//! Neighbor table (C8).
//!
//! Indexed by canonical callsign; each record holds a per-transport
//! sub-map so a neighbor reachable by both RF and Internet carries two
//! entries. Mirrors the teacher's `LinkMetrics`-per-link bookkeeping
//! (`net/interface.rs`) but keyed by callsign rather than link id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use backbone_common::Callsign;

use crate::transport::TransportId;

/// Neighbor entries whose most-recent transport `last_seen` exceeds this
/// are removed by the periodic cleanup.
pub const NEIGHBOR_TIMEOUT: Duration = Duration::from_secs(900);

/// How often the cleanup sweep runs.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Raw link-quality inputs used to compute a transport's cost contribution.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkMetrics {
    pub packet_loss: f64,
    pub latency_ms: f64,
    pub snr: f64,
}

impl LinkMetrics {
    /// `baseCost + packetLoss*100 + latencyMs/100 + max(0, 10-SNR)` (§4.8).
    pub fn cost(&self, base_cost: f64) -> f64 {
        base_cost + self.packet_loss * 100.0 + self.latency_ms / 100.0 + (10.0 - self.snr).max(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct TransportEntry {
    pub metrics: LinkMetrics,
    pub cost: f64,
    pub last_seen: Instant,
    pub via_hub: bool,
}

#[derive(Debug, Clone)]
pub struct NeighborEntry {
    pub callsign: Callsign,
    pub transports: HashMap<TransportId, TransportEntry>,
    pub services: Vec<String>,
    pub capabilities: Vec<String>,
    pub protocol_version: u8,
    pub sequence: u64,
    pub first_seen: Instant,
    pub last_seen: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeighborEvent {
    Added(Callsign),
    Updated(Callsign),
    Removed(Callsign),
}

fn base_cost_for(transport_id: TransportId, is_internet: bool) -> f64 {
    let _ = transport_id;
    if is_internet {
        1.0
    } else {
        10.0
    }
}

/// The node's view of directly reachable neighbors.
#[derive(Debug, Default)]
pub struct NeighborTable {
    entries: HashMap<Callsign, NeighborEntry>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh (or create) the entry for `callsign` on `transport_id`.
    /// `is_internet` picks the base-cost constant; everything else is RF.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        callsign: Callsign,
        transport_id: TransportId,
        is_internet: bool,
        metrics: LinkMetrics,
        services: Vec<String>,
        capabilities: Vec<String>,
        protocol_version: u8,
        sequence: u64,
        via_hub: bool,
        now: Instant,
    ) -> NeighborEvent {
        let base_cost = base_cost_for(transport_id, is_internet);
        let cost = metrics.cost(base_cost);
        let is_new = !self.entries.contains_key(&callsign);

        let entry = self.entries.entry(callsign.clone()).or_insert_with(|| NeighborEntry {
            callsign: callsign.clone(),
            transports: HashMap::new(),
            services: Vec::new(),
            capabilities: Vec::new(),
            protocol_version,
            sequence,
            first_seen: now,
            last_seen: now,
        });

        entry.transports.insert(
            transport_id,
            TransportEntry {
                metrics,
                cost,
                last_seen: now,
                via_hub,
            },
        );
        entry.services = services;
        entry.capabilities = capabilities;
        entry.protocol_version = protocol_version;
        entry.sequence = sequence;
        entry.last_seen = now;

        if is_new {
            NeighborEvent::Added(callsign)
        } else {
            NeighborEvent::Updated(callsign)
        }
    }

    pub fn get(&self, callsign: &Callsign) -> Option<&NeighborEntry> {
        self.entries.get(callsign)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NeighborEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove any entry whose newest transport `last_seen` has exceeded
    /// `NEIGHBOR_TIMEOUT`, or whose single remaining transport disconnected.
    pub fn cleanup(&mut self, now: Instant) -> Vec<NeighborEvent> {
        let mut removed = Vec::new();
        self.entries.retain(|callsign, entry| {
            let freshest = entry
                .transports
                .values()
                .map(|t| t.last_seen)
                .max()
                .unwrap_or(entry.last_seen);
            let keep = now.duration_since(freshest) < NEIGHBOR_TIMEOUT;
            if !keep {
                removed.push(NeighborEvent::Removed(callsign.clone()));
            }
            keep
        });
        removed
    }

    /// Drop a single transport from every neighbor, removing neighbors
    /// left with no transport at all (used on transport disconnect).
    pub fn remove_transport(&mut self, transport_id: TransportId) -> Vec<NeighborEvent> {
        let mut removed = Vec::new();
        self.entries.retain(|callsign, entry| {
            entry.transports.remove(&transport_id);
            let keep = !entry.transports.is_empty();
            if !keep {
                removed.push(NeighborEvent::Removed(callsign.clone()));
            }
            keep
        });
        removed
    }
}
