//! Priority queue (C12).
//!
//! Four bands, scanned highest-to-lowest on dequeue; within a band, FIFO.
//! Congestion is managed by occupancy-ratio thresholds rather than a hard
//! per-band cutoff alone, so a burst of low-priority traffic degrades
//! gracefully instead of wedging the whole queue.

use std::collections::VecDeque;
use std::time::Instant;

use backbone_common::Callsign;
use backbone_proto::packet::Priority as WirePriority;

/// Four queue bands, ordered low to high so `as u8` sorts naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Band {
    Low = 0,
    Normal = 1,
    High = 2,
    Emergency = 3,
}

/// Maps the wire's six priority levels onto the queue's four bands (§9
/// open question: "EMERGENCY->EMERGENCY; URGENT->HIGH; HIGH->HIGH;
/// NORMAL->NORMAL; LOW/LOWEST->LOW").
pub fn band_for(priority: WirePriority) -> Band {
    match priority {
        WirePriority::Emergency => Band::Emergency,
        WirePriority::Urgent => Band::High,
        WirePriority::High => Band::High,
        WirePriority::Normal => Band::Normal,
        WirePriority::Low | WirePriority::Lowest => Band::Low,
    }
}

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message_id: [u8; 16],
    pub destination: Callsign,
    pub source: Callsign,
    pub packet_bytes: Vec<u8>,
    pub priority: WirePriority,
    pub require_ack: bool,
    pub enqueued_at: Instant,
    pub retries: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub capacity: usize,
    pub per_band_cap: usize,
    pub low_drop_threshold: f64,
    pub normal_drop_threshold: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            capacity: 1000,
            per_band_cap: 500,
            low_drop_threshold: 0.8,
            normal_drop_threshold: 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped: u64,
}

#[derive(Debug)]
pub enum EnqueueOutcome {
    Accepted,
    DroppedCongestion,
    DroppedBandFull,
}

/// The four-band priority queue owned by the coordinator.
pub struct PriorityQueue {
    config: QueueConfig,
    bands: [VecDeque<QueuedMessage>; 4],
    stats_by_band: [QueueStats; 4],
}

impl PriorityQueue {
    pub fn new(config: QueueConfig) -> Self {
        PriorityQueue {
            config,
            bands: Default::default(),
            stats_by_band: Default::default(),
        }
    }

    pub fn total_len(&self) -> usize {
        self.bands.iter().map(|b| b.len()).sum()
    }

    fn occupancy_ratio(&self) -> f64 {
        self.total_len() as f64 / self.config.capacity as f64
    }

    pub fn enqueue(&mut self, message: QueuedMessage) -> EnqueueOutcome {
        let band = band_for(message.priority);
        let ratio = self.occupancy_ratio();

        let congested = match band {
            Band::Low => ratio > self.config.low_drop_threshold,
            Band::Normal => ratio > self.config.normal_drop_threshold,
            Band::High | Band::Emergency => false,
        };
        if congested {
            self.stats_by_band[band as usize].dropped += 1;
            return EnqueueOutcome::DroppedCongestion;
        }
        if self.bands[band as usize].len() >= self.config.per_band_cap {
            self.stats_by_band[band as usize].dropped += 1;
            return EnqueueOutcome::DroppedBandFull;
        }

        self.stats_by_band[band as usize].enqueued += 1;
        self.bands[band as usize].push_back(message);
        EnqueueOutcome::Accepted
    }

    /// Scan bands from `Emergency` down to `Low`, returning the FIFO head
    /// of the first non-empty band.
    pub fn dequeue(&mut self) -> Option<QueuedMessage> {
        for band in [Band::Emergency, Band::High, Band::Normal, Band::Low] {
            if let Some(msg) = self.bands[band as usize].pop_front() {
                self.stats_by_band[band as usize].dequeued += 1;
                return Some(msg);
            }
        }
        None
    }

    pub fn stats(&self, band: Band) -> QueueStats {
        self.stats_by_band[band as usize]
    }

    /// Enqueue time of the longest-waiting message across all bands, for
    /// the status surface's `oldestMessageAge`.
    pub fn oldest_enqueued_at(&self) -> Option<Instant> {
        self.bands.iter().filter_map(|b| b.front().map(|m| m.enqueued_at)).min()
    }
}
