//! Routing engine (C11).
//!
//! Classical Dijkstra from `self` over the topology graph. Ties on cost
//! are broken by lower hop count, then lexical callsign order, so the
//! routing table is deterministic for a given graph snapshot.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use backbone_common::Callsign;

use crate::topology::TopologyGraph;
use crate::transport::TransportId;

#[derive(Debug, Clone)]
pub struct Route {
    pub destination: Callsign,
    pub next_hop: Callsign,
    pub cost: f64,
    pub path: Vec<Callsign>,
    pub transport: TransportId,
    pub hop_count: u32,
    pub last_update: Instant,
}

/// An immutable snapshot of the current best known routes, published by
/// the routing engine and held by the coordinator.
#[derive(Debug, Default, Clone)]
pub struct RoutingTable {
    routes: HashMap<Callsign, Route>,
}

impl RoutingTable {
    pub fn get(&self, destination: &Callsign) -> Option<&Route> {
        self.routes.get(destination)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }
}

#[derive(Clone, PartialEq)]
struct HeapEntry {
    cost: f64,
    hop_count: u32,
    callsign: Callsign,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse cost/hop_count so the smallest
        // comes out first, matching a classic Dijkstra min-priority-queue.
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.hop_count.cmp(&self.hop_count))
            .then_with(|| other.callsign.cmp(&self.callsign))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Run Dijkstra from `me` over `graph`, producing a fresh routing table.
pub fn compute_routes(graph: &TopologyGraph, me: &Callsign, now: Instant) -> RoutingTable {
    let mut best_cost: HashMap<Callsign, f64> = HashMap::new();
    let mut best_hops: HashMap<Callsign, u32> = HashMap::new();
    // predecessor + the transport/first-hop used to reach it from `me`
    let mut prev: HashMap<Callsign, Callsign> = HashMap::new();
    let mut heap = BinaryHeap::new();

    best_cost.insert(me.clone(), 0.0);
    best_hops.insert(me.clone(), 0);
    heap.push(HeapEntry {
        cost: 0.0,
        hop_count: 0,
        callsign: me.clone(),
    });

    while let Some(HeapEntry {
        cost,
        hop_count,
        callsign,
    }) = heap.pop()
    {
        if cost > *best_cost.get(&callsign).unwrap_or(&f64::INFINITY) {
            continue;
        }
        for edge in graph.edges_from(&callsign) {
            let next_cost = cost + edge.cost;
            let next_hops = hop_count + 1;
            let better = match best_cost.get(&edge.to) {
                None => true,
                Some(&existing) => {
                    next_cost < existing
                        || (next_cost == existing && next_hops < *best_hops.get(&edge.to).unwrap())
                        || (next_cost == existing
                            && next_hops == *best_hops.get(&edge.to).unwrap()
                            && edge.to < callsign)
                }
            };
            if better {
                best_cost.insert(edge.to.clone(), next_cost);
                best_hops.insert(edge.to.clone(), next_hops);
                prev.insert(edge.to.clone(), callsign.clone());
                heap.push(HeapEntry {
                    cost: next_cost,
                    hop_count: next_hops,
                    callsign: edge.to.clone(),
                });
            }
        }
    }

    let mut routes = HashMap::new();
    for node in graph.nodes() {
        if node == me {
            continue;
        }
        let Some(&cost) = best_cost.get(node) else {
            continue;
        };
        let mut path = vec![node.clone()];
        let mut cur = node.clone();
        while let Some(p) = prev.get(&cur) {
            path.push(p.clone());
            if p == me {
                break;
            }
            cur = p.clone();
        }
        path.reverse();
        let next_hop = path.get(1).cloned().unwrap_or_else(|| node.clone());
        let transport = graph
            .edges_from(me)
            .iter()
            .find(|e| e.to == next_hop)
            .map(|e| e.transport)
            .unwrap_or(0);

        routes.insert(
            node.clone(),
            Route {
                destination: node.clone(),
                next_hop,
                cost,
                path,
                transport,
                hop_count: *best_hops.get(node).unwrap_or(&0),
                last_update: now,
            },
        );
    }

    RoutingTable { routes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbor::{LinkMetrics, NeighborTable};

    fn cs(s: &str) -> Callsign {
        Callsign::parse(s).unwrap()
    }

    #[test]
    fn direct_neighbor_has_one_hop_route() {
        let mut neighbors = NeighborTable::new();
        let now = Instant::now();
        neighbors.update(cs("K2XYZ"), 0, true, LinkMetrics::default(), vec![], vec![], 1, 1, false, now);
        let mut graph = TopologyGraph::new();
        graph.update_from_neighbor_table(&cs("W1ABC"), &neighbors);

        let table = compute_routes(&graph, &cs("W1ABC"), now);
        let route = table.get(&cs("K2XYZ")).unwrap();
        assert_eq!(route.next_hop, cs("K2XYZ"));
        assert_eq!(route.hop_count, 1);
    }

    #[test]
    fn i7_intermediate_node_cost_never_exceeds_destination_cost() {
        // W1ABC -> K2XYZ -> N0CALL, a two-hop chain.
        let mut graph = TopologyGraph::new();
        graph.ensure_node(&cs("W1ABC"));
        graph.ensure_node(&cs("K2XYZ"));
        graph.ensure_node(&cs("N0CALL"));

        let edges_w1abc = vec![crate::topology::Edge {
            to: cs("K2XYZ"),
            transport: 0,
            cost: 5.0,
            quality: 100,
            bandwidth: 0,
            latency_ms: 0.0,
        }];
        let edges_k2xyz = vec![crate::topology::Edge {
            to: cs("N0CALL"),
            transport: 0,
            cost: 5.0,
            quality: 100,
            bandwidth: 0,
            latency_ms: 0.0,
        }];
        graph.set_edges(&cs("W1ABC"), edges_w1abc);
        graph.set_edges(&cs("K2XYZ"), edges_k2xyz);

        let now = Instant::now();
        let table = compute_routes(&graph, &cs("W1ABC"), now);
        let route_to_n0call = table.get(&cs("N0CALL")).unwrap();
        assert_eq!(route_to_n0call.cost, 10.0);

        for intermediate in &route_to_n0call.path[..route_to_n0call.path.len() - 1] {
            if intermediate == &cs("W1ABC") {
                continue;
            }
            let intermediate_route = table.get(intermediate).unwrap();
            assert!(intermediate_route.cost <= route_to_n0call.cost);
        }
    }

    #[test]
    fn unreachable_node_has_no_route() {
        let mut graph = TopologyGraph::new();
        graph.ensure_node(&cs("W1ABC"));
        graph.ensure_node(&cs("ISOLATE"));
        let now = Instant::now();
        let table = compute_routes(&graph, &cs("W1ABC"), now);
        assert!(table.get(&cs("ISOLATE")).is_none());
    }
}
