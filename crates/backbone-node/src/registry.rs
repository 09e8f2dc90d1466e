//! User registry & Winlink-forwarder capability surface (C17).
//!
//! Maps `callsign -> home node`, merging `REGISTRY_UPDATE` entries by
//! newer timestamp. The forwarder that actually speaks the end-user
//! mailbox protocol is external; this module only owns the map, its
//! persistence, and the narrow capability struct handed to that
//! forwarder so it never reaches into the coordinator directly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use backbone_common::Callsign;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryEntry {
    pub callsign: Callsign,
    pub home_node: Callsign,
    pub timestamp: u64,
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryUpdatePayload {
    pub from_node: Callsign,
    pub timestamp: u64,
    pub users: Vec<RegistryEntry>,
}

/// Persisted user registry, keyed by callsign.
#[derive(Debug, Default)]
pub struct UserRegistry {
    entries: HashMap<Callsign, RegistryEntry>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one incoming entry, keeping it only if newer than what's on
    /// file (or if the callsign is unknown). Returns `true` if the entry
    /// was applied.
    pub fn merge(&mut self, entry: RegistryEntry) -> bool {
        match self.entries.get(&entry.callsign) {
            Some(existing) if existing.timestamp >= entry.timestamp => false,
            _ => {
                self.entries.insert(entry.callsign.clone(), entry);
                true
            }
        }
    }

    /// Apply an entire `REGISTRY_UPDATE` payload.
    pub fn apply_update(&mut self, payload: RegistryUpdatePayload) -> usize {
        payload.users.into_iter().filter(|e| self.merge_ref(e)).count()
    }

    fn merge_ref(&mut self, entry: &RegistryEntry) -> bool {
        self.merge(entry.clone())
    }

    pub fn home_node(&self, callsign: &Callsign) -> Option<&Callsign> {
        self.entries.get(callsign).map(|e| &e.home_node)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        let all: Vec<&RegistryEntry> = self.entries.values().collect();
        serde_json::to_string(&all)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        let entries: Vec<RegistryEntry> = serde_json::from_str(raw)?;
        let mut registry = UserRegistry::new();
        for e in entries {
            registry.merge(e);
        }
        Ok(registry)
    }
}

/// The narrow capability handed to an external Winlink-style forwarder so
/// it can send DATA and resolve home nodes without holding a reference to
/// the coordinator (breaks the coordinator<->forwarder cycle, §9).
pub trait ForwarderCapability {
    fn send_data(&self, destination: &Callsign, payload: &[u8]) -> Result<(), crate::transport::TransportError>;
    fn get_home_node(&self, callsign: &Callsign) -> Option<Callsign>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cs(s: &str) -> Callsign {
        Callsign::parse(s).unwrap()
    }

    fn entry(callsign: &str, home: &str, ts: u64) -> RegistryEntry {
        RegistryEntry {
            callsign: cs(callsign),
            home_node: cs(home),
            timestamp: ts,
            services: vec![],
        }
    }

    #[test]
    fn newer_entry_overwrites_older() {
        let mut reg = UserRegistry::new();
        assert!(reg.merge(entry("W1ABC", "K2XYZ", 100)));
        assert!(!reg.merge(entry("W1ABC", "N0CALL", 50)));
        assert_eq!(reg.home_node(&cs("W1ABC")), Some(&cs("K2XYZ")));
        assert!(reg.merge(entry("W1ABC", "N0CALL", 200)));
        assert_eq!(reg.home_node(&cs("W1ABC")), Some(&cs("N0CALL")));
    }

    #[test]
    fn unknown_callsign_has_no_home_node() {
        let reg = UserRegistry::new();
        assert_eq!(reg.home_node(&cs("GHOST")), None);
    }

    #[test]
    fn json_round_trips() {
        let mut reg = UserRegistry::new();
        reg.merge(entry("W1ABC", "K2XYZ", 100));
        let json = reg.to_json().unwrap();
        let back = UserRegistry::from_json(&json).unwrap();
        assert_eq!(back.home_node(&cs("W1ABC")), Some(&cs("K2XYZ")));
    }

    #[test]
    fn apply_update_counts_only_applied_entries() {
        let mut reg = UserRegistry::new();
        reg.merge(entry("W1ABC", "K2XYZ", 200));
        let payload = RegistryUpdatePayload {
            from_node: cs("K2XYZ"),
            timestamp: 201,
            users: vec![entry("W1ABC", "N0CALL", 100), entry("N9NEW", "K2XYZ", 1)],
        };
        let applied = reg.apply_update(payload);
        assert_eq!(applied, 1);
        assert_eq!(reg.home_node(&cs("W1ABC")), Some(&cs("K2XYZ")));
        assert_eq!(reg.home_node(&cs("N9NEW")), Some(&cs("K2XYZ")));
    }
}
