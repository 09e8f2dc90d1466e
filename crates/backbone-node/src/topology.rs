//! Topology graph (C10).
//!
//! A directed multi-graph keyed by callsign: each node may have several
//! outgoing edges to the same neighbor (one per transport). `routing.rs`
//! consumes a snapshot of this graph to run Dijkstra.

use std::collections::{HashMap, HashSet, VecDeque};

use backbone_common::Callsign;

use crate::transport::TransportId;

#[derive(Debug, Clone)]
pub struct Edge {
    pub to: Callsign,
    pub transport: TransportId,
    pub cost: f64,
    pub quality: u8,
    pub bandwidth: u32,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, Default)]
pub struct NodeAttributes {
    pub services: Vec<String>,
    pub capabilities: Vec<String>,
}

/// Directed multi-graph of the network as currently understood.
#[derive(Debug, Default)]
pub struct TopologyGraph {
    nodes: HashMap<Callsign, NodeAttributes>,
    edges: HashMap<Callsign, Vec<Edge>>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_node(&mut self, callsign: &Callsign) {
        self.nodes.entry(callsign.clone()).or_default();
        self.edges.entry(callsign.clone()).or_default();
    }

    pub fn set_node_attributes(&mut self, callsign: &Callsign, attrs: NodeAttributes) {
        self.nodes.insert(callsign.clone(), attrs);
    }

    pub fn edges_from(&self, callsign: &Callsign) -> &[Edge] {
        self.edges.get(callsign).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Replace the outgoing edge list for `callsign` wholesale. Used today
    /// by tests exercising multi-hop graphs directly; an LSA handler would
    /// call this once §4.15's reserved `LSA` dispatch is implemented.
    pub fn set_edges(&mut self, callsign: &Callsign, edges: Vec<Edge>) {
        self.ensure_node(callsign);
        self.edges.insert(callsign.clone(), edges);
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Callsign> {
        self.nodes.keys()
    }

    /// Rebuild `self`'s outgoing edges from its neighbor table, then drop
    /// any edge whose target is no longer present in the supplied set of
    /// currently-known callsigns (§4.10).
    pub fn update_from_neighbor_table(
        &mut self,
        me: &Callsign,
        neighbors: &crate::neighbor::NeighborTable,
    ) {
        self.ensure_node(me);
        let mut fresh = Vec::new();
        let mut known: HashSet<Callsign> = HashSet::new();
        known.insert(me.clone());

        for n in neighbors.iter() {
            known.insert(n.callsign.clone());
            self.ensure_node(&n.callsign);
            self.set_node_attributes(
                &n.callsign,
                NodeAttributes {
                    services: n.services.clone(),
                    capabilities: n.capabilities.clone(),
                },
            );
            for (&transport_id, t) in &n.transports {
                fresh.push(Edge {
                    to: n.callsign.clone(),
                    transport: transport_id,
                    cost: t.cost,
                    quality: 100,
                    bandwidth: 0,
                    latency_ms: t.metrics.latency_ms,
                });
            }
        }

        self.edges.insert(me.clone(), fresh);
        self.edges.retain(|callsign, edges| {
            edges.retain(|e| known.contains(&e.to) || callsign == me);
            true
        });
    }

    /// BFS reachability.
    pub fn has_path(&self, u: &Callsign, v: &Callsign) -> bool {
        if u == v {
            return true;
        }
        let mut visited: HashSet<Callsign> = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(u.clone());
        visited.insert(u.clone());
        while let Some(current) = queue.pop_front() {
            for edge in self.edges_from(&current) {
                if &edge.to == v {
                    return true;
                }
                if visited.insert(edge.to.clone()) {
                    queue.push_back(edge.to.clone());
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbor::{LinkMetrics, NeighborTable};
    use std::time::Instant;

    fn cs(s: &str) -> Callsign {
        Callsign::parse(s).unwrap()
    }

    #[test]
    fn update_from_neighbor_table_adds_edges() {
        let mut neighbors = NeighborTable::new();
        let now = Instant::now();
        neighbors.update(cs("K2XYZ"), 0, true, LinkMetrics::default(), vec![], vec![], 1, 1, false, now);

        let mut graph = TopologyGraph::new();
        graph.update_from_neighbor_table(&cs("W1ABC"), &neighbors);

        assert!(graph.has_path(&cs("W1ABC"), &cs("K2XYZ")));
        assert!(!graph.has_path(&cs("K2XYZ"), &cs("W1ABC")));
    }

    #[test]
    fn stale_callsigns_are_pruned() {
        let mut neighbors = NeighborTable::new();
        let now = Instant::now();
        neighbors.update(cs("K2XYZ"), 0, true, LinkMetrics::default(), vec![], vec![], 1, 1, false, now);

        let mut graph = TopologyGraph::new();
        graph.update_from_neighbor_table(&cs("W1ABC"), &neighbors);
        assert!(graph.has_path(&cs("W1ABC"), &cs("K2XYZ")));

        let later = now + crate::neighbor::NEIGHBOR_TIMEOUT + std::time::Duration::from_secs(1);
        neighbors.cleanup(later);
        graph.update_from_neighbor_table(&cs("W1ABC"), &neighbors);
        assert!(!graph.has_path(&cs("W1ABC"), &cs("K2XYZ")));
    }

    #[test]
    fn self_path_is_trivially_true() {
        let graph = TopologyGraph::new();
        assert!(graph.has_path(&cs("W1ABC"), &cs("W1ABC")));
    }
}
