//! Duplicate/seen cache (C7).
//!
//! Two independent caches, both bounded at a max entry count with
//! oldest-first eviction once the bound is exceeded, mirroring the
//! bounded-map discipline used by the teacher's ARQ loss detector
//! (`nacked: HashMap<u64, NackState>` with its own `cleanup_stale`).

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Default bound on either cache's entry count.
pub const MAX_ENTRIES: usize = 1000;

/// TTL for the backbone `messageId` cache.
pub const MESSAGE_ID_TTL: Duration = Duration::from_secs(300);

/// TTL for the AX.25 frame-digest cache.
pub const FRAME_DIGEST_TTL: Duration = Duration::from_secs(5);

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A bounded, TTL-expiring, oldest-first-evicting cache keyed by an
/// arbitrary hashable key.
struct BoundedTtlCache<K, V> {
    ttl: Duration,
    max_entries: usize,
    order: VecDeque<K>,
    entries: HashMap<K, Entry<V>>,
}

impl<K: std::hash::Hash + Eq + Clone, V> BoundedTtlCache<K, V> {
    fn new(ttl: Duration, max_entries: usize) -> Self {
        BoundedTtlCache {
            ttl,
            max_entries,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    /// Insert `key` with `value` if not already present (and not expired).
    /// Returns `true` if this was a first sighting.
    fn insert_if_absent(&mut self, key: K, value: V, now: Instant) -> bool {
        self.evict_expired(now);
        if self.entries.contains_key(&key) {
            return false;
        }
        if self.entries.len() >= self.max_entries {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
        true
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key).map(|e| &mut e.value)
    }

    fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(front) = self.order.front() {
            match self.entries.get(front) {
                Some(e) if e.expires_at <= now => {
                    let k = self.order.pop_front().unwrap();
                    self.entries.remove(&k);
                }
                _ => break,
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Identifies an output transport channel for dedup bookkeeping.
pub type TransportId = u8;

/// Value tracked against an AX.25 frame-digest key.
#[derive(Debug, Clone, Default)]
pub struct FrameDigestEntry {
    pub transports_delivered: Vec<TransportId>,
    pub serviced_wide: bool,
}

/// The pair of caches owned by a single node's protocol layer.
pub struct SeenCache {
    message_ids: BoundedTtlCache<[u8; 16], ()>,
    frame_digests: BoundedTtlCache<Vec<u8>, FrameDigestEntry>,
}

impl SeenCache {
    pub fn new() -> Self {
        SeenCache {
            message_ids: BoundedTtlCache::new(MESSAGE_ID_TTL, MAX_ENTRIES),
            frame_digests: BoundedTtlCache::new(FRAME_DIGEST_TTL, MAX_ENTRIES),
        }
    }

    /// Record a `messageId` sighting. Returns `true` if this is the first
    /// time it has been seen within the TTL window (caller should process
    /// it); `false` means it's a duplicate (`ReplayRejected`).
    pub fn record_message_id(&mut self, id: [u8; 16], now: Instant) -> bool {
        self.message_ids.insert_if_absent(id, (), now)
    }

    /// Build the AX.25 frame-digest key: the canonicalized address list
    /// (WIDE entries collapsed to their base, e.g. `WIDE2-2` and `WIDE2-1`
    /// hash identically) concatenated with the payload bytes.
    pub fn frame_digest_key(addresses: &[crate::ax25::Ax25Address], payload: &[u8]) -> Vec<u8> {
        let mut key = Vec::new();
        for addr in addresses {
            if addr.wide_n().is_some() {
                key.extend_from_slice(b"WIDE");
            } else {
                key.extend_from_slice(&addr.base[..addr.base_len]);
            }
            key.push(b'/');
        }
        key.extend_from_slice(payload);
        key
    }

    /// Record (or fetch) the frame-digest entry for `key`, inserting a
    /// fresh one if this is the first sighting.
    pub fn frame_digest_entry(
        &mut self,
        key: Vec<u8>,
        now: Instant,
    ) -> &mut FrameDigestEntry {
        self.frame_digests
            .insert_if_absent(key.clone(), FrameDigestEntry::default(), now);
        self.frame_digests.get_mut(&key).expect("just inserted")
    }

    pub fn has_frame_digest(&self, key: &[u8]) -> bool {
        self.frame_digests.contains(&key.to_vec())
    }

    pub fn message_id_cache_len(&self) -> usize {
        self.message_ids.len()
    }

    pub fn frame_digest_cache_len(&self) -> usize {
        self.frame_digests.len()
    }
}

impl Default for SeenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i4_first_sighting_true_second_false() {
        let mut cache = SeenCache::new();
        let now = Instant::now();
        let id = [7u8; 16];
        assert!(cache.record_message_id(id, now));
        assert!(!cache.record_message_id(id, now));
    }

    #[test]
    fn message_id_expires_after_ttl() {
        let mut cache = SeenCache::new();
        let t0 = Instant::now();
        let id = [1u8; 16];
        assert!(cache.record_message_id(id, t0));
        let later = t0 + MESSAGE_ID_TTL + Duration::from_secs(1);
        assert!(cache.record_message_id(id, later));
    }

    #[test]
    fn bounded_cache_evicts_oldest_first() {
        let mut cache: BoundedTtlCache<u32, ()> = BoundedTtlCache::new(Duration::from_secs(600), 3);
        let now = Instant::now();
        assert!(cache.insert_if_absent(1, (), now));
        assert!(cache.insert_if_absent(2, (), now));
        assert!(cache.insert_if_absent(3, (), now));
        assert!(cache.insert_if_absent(4, (), now));
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&1));
        assert!(cache.contains(&4));
    }

    #[test]
    fn frame_digest_wide_entries_collapse_to_same_key() {
        let path_a = [crate::ax25::wide_address(2, 2)];
        let path_b = [crate::ax25::wide_address(2, 1)];
        let key_a = SeenCache::frame_digest_key(&path_a, b"payload");
        let key_b = SeenCache::frame_digest_key(&path_b, b"payload");
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn frame_digest_tracks_serviced_wide_and_transports() {
        let mut cache = SeenCache::new();
        let now = Instant::now();
        let key = SeenCache::frame_digest_key(&[crate::ax25::wide_address(2, 2)], b"x");
        {
            let entry = cache.frame_digest_entry(key.clone(), now);
            assert!(!entry.serviced_wide);
            entry.serviced_wide = true;
            entry.transports_delivered.push(0);
        }
        let entry = cache.frame_digest_entry(key, now);
        assert!(entry.serviced_wide);
        assert_eq!(entry.transports_delivered, vec![0]);
    }
}
