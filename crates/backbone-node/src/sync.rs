//! BBS sync wire contract (C16).
//!
//! The sync subsystem itself (the message store, Winlink-style folder
//! semantics) is an external collaborator. This module implements only
//! what rides the wire: the envelope type carried as an ordinary DATA
//! payload, a compact Bloom-filter summary, and a version-vector
//! comparison helper, plus the narrow capability the coordinator hands
//! that collaborator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use backbone_common::Callsign;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrdering {
    Equal,
    Ancestor,
    Descendant,
    Concurrent,
}

/// A version vector keyed by node callsign.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionVector {
    counters: HashMap<String, u64>,
}

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, node: &Callsign) {
        *self.counters.entry(node.as_str().to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, node: &Callsign) -> u64 {
        self.counters.get(node.as_str()).copied().unwrap_or(0)
    }

    /// Compare `self` against `other`. `Descendant` means self dominates
    /// (self >= other on every entry, strictly greater on at least one).
    pub fn compare(&self, other: &VersionVector) -> VersionOrdering {
        let mut self_ahead = false;
        let mut other_ahead = false;

        let mut keys: std::collections::HashSet<&String> = self.counters.keys().collect();
        keys.extend(other.counters.keys());

        for key in keys {
            let a = self.counters.get(key).copied().unwrap_or(0);
            let b = other.counters.get(key).copied().unwrap_or(0);
            match a.cmp(&b) {
                std::cmp::Ordering::Greater => self_ahead = true,
                std::cmp::Ordering::Less => other_ahead = true,
                std::cmp::Ordering::Equal => {}
            }
        }

        match (self_ahead, other_ahead) {
            (false, false) => VersionOrdering::Equal,
            (true, false) => VersionOrdering::Descendant,
            (false, true) => VersionOrdering::Ancestor,
            (true, true) => VersionOrdering::Concurrent,
        }
    }
}

/// Compact Bloom-filter summary: a bit vector plus a hash-count, built
/// with two independent 64-bit hashes combined per the standard
/// double-hashing scheme (Kirsch-Mitzenmacher) rather than shipping `k`
/// distinct hash functions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BloomFilterSummary {
    bits: Vec<u64>,
    num_bits: usize,
    num_hashes: u32,
}

impl BloomFilterSummary {
    pub fn new(num_bits: usize, num_hashes: u32) -> Self {
        let words = num_bits.div_ceil(64).max(1);
        BloomFilterSummary {
            bits: vec![0u64; words],
            num_bits: num_bits.max(1),
            num_hashes: num_hashes.max(1),
        }
    }

    fn hash_pair(item: &str) -> (u64, u64) {
        (fnv1a64(item.as_bytes(), 0xcbf29ce484222325), fnv1a64(item.as_bytes(), 0x9e3779b97f4a7c15))
    }

    pub fn insert(&mut self, item: &str) {
        let (h1, h2) = Self::hash_pair(item);
        for i in 0..self.num_hashes as u64 {
            let idx = (h1.wrapping_add(i.wrapping_mul(h2)) as usize) % self.num_bits;
            self.bits[idx / 64] |= 1 << (idx % 64);
        }
    }

    /// `false` is authoritative (definitely absent); `true` means "maybe
    /// present" as with any Bloom filter.
    pub fn might_contain(&self, item: &str) -> bool {
        let (h1, h2) = Self::hash_pair(item);
        (0..self.num_hashes as u64).all(|i| {
            let idx = (h1.wrapping_add(i.wrapping_mul(h2)) as usize) % self.num_bits;
            self.bits[idx / 64] & (1 << (idx % 64)) != 0
        })
    }
}

fn fnv1a64(bytes: &[u8], seed: u64) -> u64 {
    let mut hash = seed;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Digest,
    Want,
    Have,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEnvelope {
    pub kind: SyncKind,
    pub vv: VersionVector,
    pub bloom: BloomFilterSummary,
}

impl SyncEnvelope {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Narrow capability handed to the external BBS sync collaborator: it can
/// send DATA and subscribe to a service name, but never reaches into the
/// coordinator's tables directly (§9).
pub trait SyncCapability {
    fn send_data(&self, destination: &Callsign, payload: &[u8]) -> Result<(), crate::transport::TransportError>;
    fn subscribe(&mut self, service: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cs(s: &str) -> Callsign {
        Callsign::parse(s).unwrap()
    }

    #[test]
    fn identical_vectors_compare_equal() {
        let mut a = VersionVector::new();
        a.increment(&cs("W1ABC"));
        let b = a.clone();
        assert_eq!(a.compare(&b), VersionOrdering::Equal);
    }

    #[test]
    fn strictly_ahead_is_descendant() {
        let mut a = VersionVector::new();
        a.increment(&cs("W1ABC"));
        a.increment(&cs("W1ABC"));
        let mut b = VersionVector::new();
        b.increment(&cs("W1ABC"));
        assert_eq!(a.compare(&b), VersionOrdering::Descendant);
        assert_eq!(b.compare(&a), VersionOrdering::Ancestor);
    }

    #[test]
    fn divergent_updates_are_concurrent() {
        let mut a = VersionVector::new();
        a.increment(&cs("W1ABC"));
        let mut b = VersionVector::new();
        b.increment(&cs("K2XYZ"));
        assert_eq!(a.compare(&b), VersionOrdering::Concurrent);
    }

    #[test]
    fn bloom_filter_never_false_negatives() {
        let mut bloom = BloomFilterSummary::new(256, 4);
        let items = ["msg-1", "msg-2", "msg-3"];
        for item in items {
            bloom.insert(item);
        }
        for item in items {
            assert!(bloom.might_contain(item));
        }
    }

    #[test]
    fn bloom_filter_usually_rejects_absent_items() {
        let mut bloom = BloomFilterSummary::new(256, 4);
        bloom.insert("present");
        assert!(!bloom.might_contain("definitely-absent-item"));
    }

    #[test]
    fn envelope_json_round_trips() {
        let mut vv = VersionVector::new();
        vv.increment(&cs("W1ABC"));
        let mut bloom = BloomFilterSummary::new(128, 3);
        bloom.insert("a");
        let envelope = SyncEnvelope {
            kind: SyncKind::Digest,
            vv,
            bloom,
        };
        let json = envelope.to_json().unwrap();
        let back = SyncEnvelope::from_json(&json).unwrap();
        assert_eq!(back.kind, SyncKind::Digest);
        assert!(back.bloom.might_contain("a"));
    }
}
