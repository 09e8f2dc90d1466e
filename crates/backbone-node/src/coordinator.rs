//! Coordinator (C15): central dispatch, outbound queueing, and the
//! periodic-timer loop that ties every other module in this crate together.
//!
//! Grounded on `BondingRuntime`'s shape: a background worker thread owns all
//! mutable state and is driven by a mailbox, rather than exposing the state
//! behind a lock that callers reach into directly.

use std::collections::HashMap;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use backbone_common::{ids, Callsign};
use backbone_proto::fragment::{fragment, Fragment, ReassemblyBuffer};
use backbone_proto::packet::{Flags, Packet, PacketType, Priority};
use backbone_proto::routing_info::RoutingInfo;
use backbone_proto::seen::SeenCache;

use crate::heartbeat::{HeartbeatTracker, KeepaliveMetrics, KeepalivePayload, HEARTBEAT_INTERVAL};
use crate::internet::NEIGHBOR_LIST_INTERVAL;
use crate::neighbor::{LinkMetrics, NeighborEvent, NeighborTable};
use crate::queue::{EnqueueOutcome, PriorityQueue, QueueConfig, QueuedMessage};
use crate::registry::{RegistryUpdatePayload, UserRegistry};
use crate::reliability::{ReliabilityTracker, TickOutcome};
use crate::routing::{self, RoutingTable};
use crate::status::{DroppedByPriority, StatusReport, TransportMode, TransportStatus};
use crate::topology::TopologyGraph;
use crate::transport::{SendOptions, Transport, TransportError, TransportEvent, TransportId, TransportKind};

/// Default TTL stamped on freshly originated packets (§4.1).
pub const DEFAULT_TTL: u8 = 16;

/// How often the outbound queue is drained.
pub const QUEUE_DRAIN_INTERVAL: Duration = Duration::from_millis(100);

/// How often outstanding ACKs are checked for timeout/backoff.
pub const RELIABILITY_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// How often the Dijkstra routing table is recomputed.
pub const ROUTING_RECOMPUTE_INTERVAL: Duration = Duration::from_secs(60);

/// A send that fails at the transport layer is re-enqueued up to this many times.
pub const MAX_SEND_RETRIES: u8 = 5;

/// How the Internet transport's configured mode constrains route selection (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternetRoutingMode {
    Mesh,
    Server,
    Client,
}

/// Events published by the coordinator toward external collaborators (§6).
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    Ready,
    NeighborAdded(Callsign),
    NeighborUpdated(Callsign),
    NeighborRemoved(Callsign),
    RoutesUpdated { route_count: usize },
    Data {
        source: Callsign,
        destination: Callsign,
        payload: Vec<u8>,
        message_id: [u8; 16],
        transport_id: TransportId,
    },
    MessageDropped { message_id: [u8; 16], reason: String },
    MessageSent { message_id: [u8; 16], destination: Callsign },
    MessageAcknowledged { message_id: [u8; 16], rtt_ms: f64 },
    MessageFailed { message_id: [u8; 16], reason: String },
    SyncNeeded { applied_entries: usize },
}

#[derive(Debug, Serialize, Deserialize)]
struct NeighborListEntry {
    callsign: Callsign,
    #[serde(default)]
    services: Vec<String>,
    transport: String,
    #[serde(default)]
    via: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NeighborListPayload {
    timestamp: u64,
    hub: Callsign,
    neighbors: Vec<NeighborListEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HelloPayload {
    #[serde(default)]
    services: Vec<String>,
    #[serde(default)]
    capabilities: Vec<String>,
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Commands accepted by the coordinator's worker thread.
enum Command {
    SendData {
        destination: Callsign,
        payload: Vec<u8>,
        require_ack: bool,
        priority: Priority,
    },
    StatusRequest {
        reply: Sender<StatusReport>,
    },
    Shutdown,
}

/// A live handle to a running coordinator; cheap to clone, safe to share.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: Sender<Command>,
}

impl CoordinatorHandle {
    /// Build a DATA packet for `payload` and enqueue it (§4.15 `sendData`).
    /// Returns the generated logical message id.
    pub fn send_data(
        &self,
        destination: Callsign,
        payload: Vec<u8>,
        require_ack: bool,
        priority: Priority,
    ) -> Result<[u8; 16], TransportError> {
        let message_id = ids::generate();
        self.commands
            .send(Command::SendData {
                destination,
                payload,
                require_ack,
                priority,
            })
            .map_err(|_| TransportError::Unavailable)?;
        Ok(message_id)
    }

    pub fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Fetch a [`StatusReport`] snapshot from the running coordinator
    /// (§6 `status_report()`). Returns `None` if the worker thread has
    /// already shut down.
    pub fn status_report(&self) -> Option<StatusReport> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.commands.send(Command::StatusRequest { reply: reply_tx }).ok()?;
        reply_rx.recv().ok()
    }
}

/// Narrow capability surface handed to the BBS sync and Winlink forwarder
/// collaborators (§4.17, §4.18) so they never reach into the coordinator's
/// tables directly.
impl crate::sync::SyncCapability for CoordinatorHandle {
    fn send_data(&self, destination: &Callsign, payload: &[u8]) -> Result<(), TransportError> {
        CoordinatorHandle::send_data(self, destination.clone(), payload.to_vec(), true, Priority::Normal)
            .map(|_| ())
    }

    fn subscribe(&mut self, _service: &str) {
        // Service subscription bookkeeping lives with the external
        // collaborator; the coordinator has nothing to record here until
        // SERVICE_QUERY/SERVICE_REPLY dispatch is implemented.
    }
}

impl crate::registry::ForwarderCapability for CoordinatorHandle {
    fn send_data(&self, destination: &Callsign, payload: &[u8]) -> Result<(), TransportError> {
        CoordinatorHandle::send_data(self, destination.clone(), payload.to_vec(), true, Priority::Normal)
            .map(|_| ())
    }

    fn get_home_node(&self, _callsign: &Callsign) -> Option<Callsign> {
        // The registry itself owns this lookup; the capability forwards
        // through a channel with no request/reply leg today, so a forwarder
        // needing this must consult the registry snapshot it was handed at
        // construction rather than asking the coordinator live.
        None
    }
}

/// Owns every piece of mutable coordinator state (§5: "owned by the
/// coordinator; accessed under its lock or via its mailbox").
pub struct Coordinator {
    me: Callsign,
    transports: Vec<Box<dyn Transport>>,
    neighbors: NeighborTable,
    topology: TopologyGraph,
    routes: RoutingTable,
    queue: PriorityQueue,
    reliability: ReliabilityTracker,
    seen: SeenCache,
    heartbeat: HeartbeatTracker,
    registry: UserRegistry,
    reassembly: HashMap<[u8; 16], ReassemblyBuffer>,
    heartbeat_sequence: u64,
    services: Vec<String>,
    capabilities: Vec<String>,
    internet_mode: Option<InternetRoutingMode>,
    internet_hub: Option<Callsign>,
    events: Sender<CoordinatorEvent>,
    last_heartbeat: Instant,
    last_routing_recompute: Instant,
    last_neighbor_cleanup: Instant,
    last_reliability_check: Instant,
    last_neighbor_list: Instant,
    packets_relayed: u64,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    fn new(
        me: Callsign,
        transports: Vec<Box<dyn Transport>>,
        services: Vec<String>,
        capabilities: Vec<String>,
        internet_mode: Option<InternetRoutingMode>,
        internet_hub: Option<Callsign>,
        events: Sender<CoordinatorEvent>,
        now: Instant,
    ) -> Self {
        Coordinator {
            me,
            transports,
            neighbors: NeighborTable::new(),
            topology: TopologyGraph::new(),
            routes: RoutingTable::default(),
            queue: PriorityQueue::new(QueueConfig::default()),
            reliability: ReliabilityTracker::new(),
            seen: SeenCache::new(),
            heartbeat: HeartbeatTracker::new(),
            registry: UserRegistry::new(),
            reassembly: HashMap::new(),
            heartbeat_sequence: 0,
            services,
            capabilities,
            internet_mode,
            internet_hub,
            events,
            last_heartbeat: now,
            last_routing_recompute: now,
            last_neighbor_cleanup: now,
            last_reliability_check: now,
            last_neighbor_list: now,
            packets_relayed: 0,
        }
    }

    fn emit(&self, event: CoordinatorEvent) {
        let _ = self.events.send(event);
    }

    fn transport_mtu_floor(&self) -> usize {
        self.transports
            .iter()
            .map(|t| t.mtu())
            .min()
            .unwrap_or(crate::transport::canonical_mtu::RF)
    }

    /// Outbound entry point: build a DATA packet (fragmenting if the
    /// payload won't fit in the smallest available transport's MTU) and
    /// enqueue it (§4.15).
    fn send_data(
        &mut self,
        destination: Callsign,
        payload: Vec<u8>,
        require_ack: bool,
        priority: Priority,
        now: Instant,
    ) {
        let mtu = self.transport_mtu_floor();
        let logical_id = ids::generate();
        let probe = self.build_data_packet(&destination, logical_id, &payload, Flags::empty(), priority);

        if probe.encode().len() <= mtu {
            self.enqueue_packet(destination, logical_id, probe, require_ack, priority);
            return;
        }

        for frag in fragment(logical_id, &payload, mtu) {
            let frag_bytes = frag.encode();
            let message_id = ids::generate();
            let packet = self.build_data_packet(&destination, message_id, &frag_bytes, Flags::FRAGMENTED, priority);
            self.enqueue_packet(destination.clone(), message_id, packet, require_ack, priority);
        }
    }

    fn build_data_packet(
        &self,
        destination: &Callsign,
        message_id: [u8; 16],
        payload: &[u8],
        flags: Flags,
        priority: Priority,
    ) -> Packet {
        Packet {
            version: backbone_proto::packet::PROTOCOL_VERSION,
            packet_type: PacketType::Data,
            flags,
            source: self.me.as_str().to_string(),
            destination: destination.as_str().to_string(),
            message_id,
            ttl: DEFAULT_TTL,
            priority,
            routing_info: RoutingInfo::default(),
            payload: bytes::Bytes::copy_from_slice(payload),
        }
    }

    fn enqueue_packet(
        &mut self,
        destination: Callsign,
        message_id: [u8; 16],
        packet: Packet,
        require_ack: bool,
        priority: Priority,
    ) {
        let queued = QueuedMessage {
            message_id,
            destination,
            source: self.me.clone(),
            packet_bytes: packet.encode().to_vec(),
            priority,
            require_ack,
            enqueued_at: Instant::now(),
            retries: 0,
        };
        match self.queue.enqueue(queued) {
            EnqueueOutcome::Accepted => {}
            EnqueueOutcome::DroppedCongestion => {
                self.emit(CoordinatorEvent::MessageDropped {
                    message_id,
                    reason: "congestion".to_string(),
                });
            }
            EnqueueOutcome::DroppedBandFull => {
                self.emit(CoordinatorEvent::MessageDropped {
                    message_id,
                    reason: "band full".to_string(),
                });
            }
        }
    }

    /// Choose the next hop and the transport to send it over for
    /// `destination`, implementing §4.11's selection override.
    fn pick_transport_and_next_hop(&self, destination: &Callsign) -> Option<(TransportId, Callsign)> {
        if let Some(InternetRoutingMode::Client) = self.internet_mode {
            if let Some(tid) = self.transport_id_of_kind(TransportKind::Internet) {
                let hub = self.internet_hub.clone().unwrap_or_else(|| destination.clone());
                return Some((tid, hub));
            }
        }

        if let Some(entry) = self.neighbors.get(destination) {
            if let Some((&tid, _)) = entry.transports.iter().min_by(|a, b| a.1.cost.partial_cmp(&b.1.cost).unwrap()) {
                return Some((tid, destination.clone()));
            }
        }

        if let Some(route) = self.routes.get(destination) {
            return Some((route.transport, route.next_hop.clone()));
        }

        // Fall back to the cheapest available transport, best effort.
        self.transports
            .iter()
            .filter(|t| t.is_available())
            .min_by_key(|t| t.cost())
            .map(|t| (t.id(), destination.clone()))
    }

    fn transport_id_of_kind(&self, kind: TransportKind) -> Option<TransportId> {
        self.transports.iter().find(|t| t.kind() == kind).map(|t| t.id())
    }

    fn transport_by_id(&self, id: TransportId) -> Option<&dyn Transport> {
        self.transports.iter().find(|t| t.id() == id).map(|b| b.as_ref())
    }

    /// Drains up to one message from the priority queue and attempts delivery.
    fn drain_queue_once(&mut self, now: Instant) {
        let Some(mut msg) = self.queue.dequeue() else {
            return;
        };

        let Some((transport_id, next_hop)) = self.pick_transport_and_next_hop(&msg.destination) else {
            self.emit(CoordinatorEvent::MessageDropped {
                message_id: msg.message_id,
                reason: format!("no route to {}", msg.destination),
            });
            return;
        };

        let Some(transport) = self.transport_by_id(transport_id) else {
            self.emit(CoordinatorEvent::MessageDropped {
                message_id: msg.message_id,
                reason: "selected transport no longer exists".to_string(),
            });
            return;
        };

        let options = SendOptions {
            require_ack: msg.require_ack,
        };
        match transport.send(&next_hop, &msg.packet_bytes, options) {
            Ok(()) => {
                if msg.require_ack {
                    self.reliability
                        .track(msg.message_id, msg.destination.clone(), msg.packet_bytes.clone(), now);
                }
                self.emit(CoordinatorEvent::MessageSent {
                    message_id: msg.message_id,
                    destination: msg.destination.clone(),
                });
            }
            Err(_) => {
                if msg.retries < MAX_SEND_RETRIES {
                    msg.retries += 1;
                    self.queue.enqueue(msg);
                } else {
                    self.emit(CoordinatorEvent::MessageFailed {
                        message_id: msg.message_id,
                        reason: "transport unavailable after max retries".to_string(),
                    });
                }
            }
        }
    }

    fn retry_pending(&mut self, now: Instant) {
        let due = self.reliability.tick(now);
        for (pending, outcome) in due {
            match outcome {
                TickOutcome::Retry => {
                    if let Some((transport_id, next_hop)) = self.pick_transport_and_next_hop(&pending.destination) {
                        if let Some(transport) = self.transport_by_id(transport_id) {
                            let _ = transport.send(&next_hop, &pending.packet_bytes, SendOptions { require_ack: true });
                        }
                    }
                }
                TickOutcome::GivenUp => {
                    self.emit(CoordinatorEvent::MessageFailed {
                        message_id: pending.message_id,
                        reason: "max retries exceeded".to_string(),
                    });
                }
            }
        }
    }

    fn broadcast_heartbeat(&mut self, now: Instant) {
        self.heartbeat_sequence += 1;
        let payload = KeepalivePayload {
            node_id: self.me.as_str().to_string(),
            sequence: self.heartbeat_sequence,
            protocol_version: backbone_proto::packet::PROTOCOL_VERSION,
            timestamp: now_unix(),
            services: self.services.clone(),
            metrics: KeepaliveMetrics {
                queue_depth: self.queue.total_len() as u32,
                neighbor_count: self.neighbors.len() as u32,
            },
            capabilities: self.capabilities.clone(),
        };
        let Ok(body) = payload.to_json() else { return };
        let packet = Packet {
            version: backbone_proto::packet::PROTOCOL_VERSION,
            packet_type: PacketType::Keepalive,
            flags: Flags::empty(),
            source: self.me.as_str().to_string(),
            destination: Callsign::broadcast().as_str().to_string(),
            message_id: ids::generate(),
            ttl: 1,
            priority: Priority::Low,
            routing_info: RoutingInfo::default(),
            payload: bytes::Bytes::from(body),
        };
        let bytes = packet.encode();
        for transport in &self.transports {
            let _ = transport.broadcast(&bytes);
        }
        let _ = now;
    }

    /// Server-mode-only periodic broadcast (§4.6): enumerate currently
    /// connected neighbors and announce them over the Internet transport.
    fn broadcast_neighbor_list(&mut self) {
        let Some(internet_tid) = self.transport_id_of_kind(TransportKind::Internet) else {
            return;
        };

        let neighbors = self
            .neighbors
            .iter()
            .map(|entry| {
                let via_hub = entry.transports.get(&internet_tid).map(|t| t.via_hub).unwrap_or(true);
                NeighborListEntry {
                    callsign: entry.callsign.clone(),
                    services: entry.services.clone(),
                    transport: "internet".to_string(),
                    via: if via_hub { Some(self.me.as_str().to_string()) } else { None },
                }
            })
            .collect();

        let payload = NeighborListPayload {
            timestamp: now_unix(),
            hub: self.me.clone(),
            neighbors,
        };
        let Ok(body) = serde_json::to_vec(&payload) else { return };
        let packet = Packet {
            version: backbone_proto::packet::PROTOCOL_VERSION,
            packet_type: PacketType::NeighborList,
            flags: Flags::empty(),
            source: self.me.as_str().to_string(),
            destination: Callsign::broadcast().as_str().to_string(),
            message_id: ids::generate(),
            ttl: 1,
            priority: Priority::Low,
            routing_info: RoutingInfo::default(),
            payload: bytes::Bytes::from(body),
        };
        if let Some(transport) = self.transport_by_id(internet_tid) {
            let _ = transport.broadcast(&packet.encode());
        }
    }

    fn recompute_routes(&mut self, now: Instant) {
        self.topology.update_from_neighbor_table(&self.me, &self.neighbors);
        self.routes = routing::compute_routes(&self.topology, &self.me, now);
        self.emit(CoordinatorEvent::RoutesUpdated {
            route_count: self.routes.len(),
        });
    }

    fn cleanup_neighbors(&mut self, now: Instant) {
        for event in self.neighbors.cleanup(now) {
            self.emit(neighbor_event_to_coordinator_event(event));
        }
    }

    fn cleanup_reassembly(&mut self, now: Instant) {
        self.reassembly.retain(|_, buf| !buf.is_expired(now));
    }

    /// Called once per worker-thread wakeup; fires whichever periodic work
    /// is due (§5's interval list) and always drains at most one queued
    /// message, since the caller is expected to loop roughly every
    /// [`QUEUE_DRAIN_INTERVAL`].
    fn tick(&mut self, now: Instant) {
        self.drain_queue_once(now);

        if now.duration_since(self.last_reliability_check) >= RELIABILITY_CHECK_INTERVAL {
            self.retry_pending(now);
            self.last_reliability_check = now;
        }
        if now.duration_since(self.last_heartbeat) >= HEARTBEAT_INTERVAL {
            self.broadcast_heartbeat(now);
            self.last_heartbeat = now;
        }
        if now.duration_since(self.last_routing_recompute) >= ROUTING_RECOMPUTE_INTERVAL {
            self.recompute_routes(now);
            self.last_routing_recompute = now;
        }
        if now.duration_since(self.last_neighbor_cleanup) >= crate::neighbor::CLEANUP_INTERVAL {
            self.cleanup_neighbors(now);
            self.cleanup_reassembly(now);
            self.last_neighbor_cleanup = now;
        }
        if self.internet_mode == Some(InternetRoutingMode::Server)
            && now.duration_since(self.last_neighbor_list) >= NEIGHBOR_LIST_INTERVAL
        {
            self.broadcast_neighbor_list();
            self.last_neighbor_list = now;
        }
    }

    /// Dispatches one inbound event from a transport (§4.15's `Receive`).
    fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Packet { transport_id, packet } => {
                self.receive_packet(transport_id, *packet, now);
            }
            TransportEvent::Connected { transport_id, peer } => {
                if let Some(peer) = peer {
                    let is_internet = self
                        .transport_by_id(transport_id)
                        .map(|t| t.kind() == TransportKind::Internet)
                        .unwrap_or(false);
                    let event = self.neighbors.update(
                        peer,
                        transport_id,
                        is_internet,
                        LinkMetrics::default(),
                        vec![],
                        vec![],
                        backbone_proto::packet::PROTOCOL_VERSION,
                        0,
                        false,
                        now,
                    );
                    self.emit(neighbor_event_to_coordinator_event(event));
                }
            }
            TransportEvent::Disconnected { transport_id, peer: _ } => {
                for event in self.neighbors.remove_transport(transport_id) {
                    self.emit(neighbor_event_to_coordinator_event(event));
                }
            }
            TransportEvent::Error { transport_id: _, message } => {
                self.emit(CoordinatorEvent::MessageDropped {
                    message_id: [0; 16],
                    reason: format!("transport error: {message}"),
                });
            }
        }
    }

    fn receive_packet(&mut self, transport_id: TransportId, packet: Packet, now: Instant) {
        if !self.seen.record_message_id(packet.message_id, now) {
            return;
        }

        let mut packet = packet;
        let is_local = packet.destination == self.me.as_str() || packet.destination == backbone_common::callsign::BROADCAST;
        if !is_local {
            if packet.ttl == 0 {
                self.emit(CoordinatorEvent::MessageDropped {
                    message_id: packet.message_id,
                    reason: "ttl exhausted".to_string(),
                });
                return;
            }
            packet.ttl -= 1;
        }

        match packet.packet_type {
            PacketType::Hello => self.handle_hello(transport_id, packet, now),
            PacketType::Keepalive => self.handle_keepalive(transport_id, &packet, now),
            PacketType::Data => self.handle_data(transport_id, packet, now),
            PacketType::Ack => self.handle_ack(&packet, now),
            PacketType::NeighborList => self.handle_neighbor_list(transport_id, &packet, now),
            PacketType::RegistryUpdate => self.handle_registry_update(&packet),
            PacketType::Lsa | PacketType::ServiceQuery | PacketType::ServiceReply | PacketType::Error => {
                // Reserved for a future protocol revision (§4.15).
            }
        }
    }

    fn handle_hello(&mut self, transport_id: TransportId, packet: Packet, now: Instant) {
        let Ok(source) = Callsign::parse(&packet.source) else { return };
        let hello: HelloPayload = serde_json::from_slice(&packet.payload).unwrap_or_default();
        let is_internet = self
            .transport_by_id(transport_id)
            .map(|t| t.kind() == TransportKind::Internet)
            .unwrap_or(false);
        let event = self.neighbors.update(
            source,
            transport_id,
            is_internet,
            LinkMetrics::default(),
            hello.services,
            hello.capabilities,
            packet.version,
            0,
            false,
            now,
        );
        self.emit(neighbor_event_to_coordinator_event(event));
    }

    fn handle_keepalive(&mut self, transport_id: TransportId, packet: &Packet, now: Instant) {
        let Ok(source) = Callsign::parse(&packet.source) else { return };
        let Ok(payload) = KeepalivePayload::from_json(&packet.payload) else { return };
        // Classification result only affects logging today (§4.9: "still processed").
        let _ = self.heartbeat.classify(&source, &payload, now_unix());

        let is_internet = self
            .transport_by_id(transport_id)
            .map(|t| t.kind() == TransportKind::Internet)
            .unwrap_or(false);
        let event = self.neighbors.update(
            source,
            transport_id,
            is_internet,
            LinkMetrics::default(),
            payload.services,
            payload.capabilities,
            payload.protocol_version,
            payload.sequence,
            false,
            now,
        );
        self.emit(neighbor_event_to_coordinator_event(event));
    }

    fn handle_data(&mut self, transport_id: TransportId, packet: Packet, now: Instant) {
        let Ok(source) = Callsign::parse(&packet.source) else { return };
        let destination_is_broadcast = packet.destination == backbone_common::callsign::BROADCAST;
        let destination_is_me = packet.destination == self.me.as_str();

        if destination_is_me || destination_is_broadcast {
            if packet.flags.contains(Flags::FRAGMENTED) {
                self.handle_data_fragment(transport_id, &packet, &source, now);
            } else {
                self.emit(CoordinatorEvent::Data {
                    source: source.clone(),
                    destination: self.me.clone(),
                    payload: packet.payload.to_vec(),
                    message_id: packet.message_id,
                    transport_id,
                });
            }

            if !destination_is_broadcast {
                self.send_ack(transport_id, &source, packet.message_id, now);
            }
            return;
        }

        // Not addressed to us: route+enqueue toward the real destination.
        let Ok(destination) = Callsign::parse(&packet.destination) else { return };

        if self.internet_mode == Some(InternetRoutingMode::Server) {
            if self.relay_directly_to_client(&destination, &packet) {
                return;
            }
        }

        let queued = QueuedMessage {
            message_id: packet.message_id,
            destination,
            source,
            packet_bytes: packet.encode().to_vec(),
            priority: packet.priority,
            require_ack: false,
            enqueued_at: now,
            retries: 0,
        };
        if let EnqueueOutcome::DroppedCongestion | EnqueueOutcome::DroppedBandFull = self.queue.enqueue(queued) {
            self.emit(CoordinatorEvent::MessageDropped {
                message_id: packet.message_id,
                reason: "relay queue congested".to_string(),
            });
        }
    }

    /// Server-mode-only fast path (§4.6): if `destination` is another client
    /// directly connected over our Internet transport, write the packet's
    /// bytes straight to its socket instead of going through the generic
    /// queue/routing path. Returns whether the relay was taken.
    fn relay_directly_to_client(&mut self, destination: &Callsign, packet: &Packet) -> bool {
        let Some(internet_tid) = self.transport_id_of_kind(TransportKind::Internet) else {
            return false;
        };
        let is_direct_client = self
            .neighbors
            .get(destination)
            .map(|entry| entry.transports.get(&internet_tid).map(|t| !t.via_hub).unwrap_or(false))
            .unwrap_or(false);
        if !is_direct_client {
            return false;
        }
        let Some(transport) = self.transport_by_id(internet_tid) else {
            return false;
        };
        let bytes = packet.encode();
        if transport.send(destination, &bytes, SendOptions { require_ack: false }).is_ok() {
            self.packets_relayed += 1;
            true
        } else {
            false
        }
    }

    fn handle_data_fragment(&mut self, transport_id: TransportId, packet: &Packet, source: &Callsign, now: Instant) {
        let Ok(frag) = Fragment::decode(&packet.payload) else {
            self.emit(CoordinatorEvent::MessageDropped {
                message_id: packet.message_id,
                reason: "malformed fragment".to_string(),
            });
            return;
        };

        let logical_id = frag.message_id;
        let complete = {
            let buf = self
                .reassembly
                .entry(logical_id)
                .or_insert_with(|| ReassemblyBuffer::new(&frag, now));
            if buf.add(&frag, now).is_err() {
                self.emit(CoordinatorEvent::MessageDropped {
                    message_id: packet.message_id,
                    reason: "fragment reassembly mismatch".to_string(),
                });
                return;
            }
            buf.is_complete()
        };

        if complete {
            if let Some(buf) = self.reassembly.remove(&logical_id) {
                self.emit(CoordinatorEvent::Data {
                    source: source.clone(),
                    destination: self.me.clone(),
                    payload: buf.reassemble().to_vec(),
                    message_id: logical_id,
                    transport_id,
                });
            }
        }
    }

    fn send_ack(&mut self, transport_id: TransportId, to: &Callsign, message_id: [u8; 16], now: Instant) {
        let ack = Packet {
            version: backbone_proto::packet::PROTOCOL_VERSION,
            packet_type: PacketType::Ack,
            flags: Flags::empty(),
            source: self.me.as_str().to_string(),
            destination: to.as_str().to_string(),
            message_id,
            ttl: 1,
            priority: Priority::High,
            routing_info: RoutingInfo::default(),
            payload: bytes::Bytes::new(),
        };
        let bytes = ack.encode();
        if let Some(transport) = self.transport_by_id(transport_id) {
            let _ = transport.send(to, &bytes, SendOptions { require_ack: false });
        }
        let _ = now;
    }

    fn handle_ack(&mut self, packet: &Packet, now: Instant) {
        let Ok(source) = Callsign::parse(&packet.source) else { return };
        if self.reliability.ack(&packet.message_id, &source, now) {
            if let Some(rtt) = self.reliability.rtt(&source) {
                self.emit(CoordinatorEvent::MessageAcknowledged {
                    message_id: packet.message_id,
                    rtt_ms: rtt,
                });
            }
        }
    }

    fn handle_neighbor_list(&mut self, transport_id: TransportId, packet: &Packet, now: Instant) {
        let Ok(list) = serde_json::from_slice::<NeighborListPayload>(&packet.payload) else {
            return;
        };
        for n in list.neighbors {
            let is_internet = n.transport == "internet";
            let event = self.neighbors.update(
                n.callsign,
                transport_id,
                is_internet,
                LinkMetrics::default(),
                n.services,
                vec![],
                backbone_proto::packet::PROTOCOL_VERSION,
                0,
                true,
                now,
            );
            self.emit(neighbor_event_to_coordinator_event(event));
        }
    }

    fn handle_registry_update(&mut self, packet: &Packet) {
        let Ok(payload) = serde_json::from_slice::<RegistryUpdatePayload>(&packet.payload) else {
            return;
        };
        let applied = self.registry.apply_update(payload);
        if applied > 0 {
            self.emit(CoordinatorEvent::SyncNeeded { applied_entries: applied });
        }
    }

    /// Build the §6 `status_report()` snapshot from current coordinator state.
    fn status_report(&self, now: Instant) -> StatusReport {
        let transports = self
            .transports
            .iter()
            .map(|t| TransportStatus {
                transport_id: t.id(),
                connected: t.is_available(),
                mode: transport_mode(t.kind(), self.internet_mode),
                reconnect_attempts: 0,
            })
            .collect();

        let dropped_by_priority = DroppedByPriority {
            emergency: self.queue.stats(crate::queue::Band::Emergency).dropped,
            high: self.queue.stats(crate::queue::Band::High).dropped,
            normal: self.queue.stats(crate::queue::Band::Normal).dropped,
            low: self.queue.stats(crate::queue::Band::Low).dropped,
        };

        let oldest_message_age_secs = self
            .queue
            .oldest_enqueued_at()
            .map(|t| now.duration_since(t).as_secs_f64());

        StatusReport::build(
            transports,
            self.queue.total_len(),
            oldest_message_age_secs,
            dropped_by_priority,
            &self.reliability.rtt_samples(),
            self.neighbors.len(),
            self.routes.len(),
        )
    }
}

fn transport_mode(kind: TransportKind, internet_mode: Option<InternetRoutingMode>) -> TransportMode {
    match kind {
        TransportKind::Rf => TransportMode::Rf,
        TransportKind::Internet => match internet_mode {
            Some(InternetRoutingMode::Server) => TransportMode::Server,
            Some(InternetRoutingMode::Client) => TransportMode::Client,
            Some(InternetRoutingMode::Mesh) | None => TransportMode::Mesh,
        },
    }
}

fn neighbor_event_to_coordinator_event(event: NeighborEvent) -> CoordinatorEvent {
    match event {
        NeighborEvent::Added(c) => CoordinatorEvent::NeighborAdded(c),
        NeighborEvent::Updated(c) => CoordinatorEvent::NeighborUpdated(c),
        NeighborEvent::Removed(c) => CoordinatorEvent::NeighborRemoved(c),
    }
}

/// Spawn the coordinator's worker thread, wiring every transport's event
/// sender to a shared mailbox. Returns a cheap handle plus the event
/// receiver external collaborators drain.
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    me: Callsign,
    mut transports: Vec<Box<dyn Transport>>,
    services: Vec<String>,
    capabilities: Vec<String>,
    internet_mode: Option<InternetRoutingMode>,
    internet_hub: Option<Callsign>,
) -> (CoordinatorHandle, Receiver<CoordinatorEvent>, JoinHandle<()>) {
    let (transport_tx, transport_rx) = crossbeam_channel::unbounded::<TransportEvent>();
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<Command>();
    let (event_tx, event_rx) = crossbeam_channel::unbounded::<CoordinatorEvent>();

    for transport in transports.iter_mut() {
        let _ = transport.connect(transport_tx.clone());
    }

    let mut coordinator = Coordinator::new(
        me,
        transports,
        services,
        capabilities,
        internet_mode,
        internet_hub,
        event_tx.clone(),
        Instant::now(),
    );
    coordinator.emit(CoordinatorEvent::Ready);

    let handle = std::thread::Builder::new()
        .name("backbone-coordinator".to_string())
        .spawn(move || loop {
            crossbeam_channel::select! {
                recv(transport_rx) -> msg => {
                    if let Ok(event) = msg {
                        coordinator.handle_transport_event(event, Instant::now());
                    }
                }
                recv(cmd_rx) -> msg => {
                    match msg {
                        Ok(Command::SendData { destination, payload, require_ack, priority }) => {
                            coordinator.send_data(destination, payload, require_ack, priority, Instant::now());
                        }
                        Ok(Command::StatusRequest { reply }) => {
                            let _ = reply.send(coordinator.status_report(Instant::now()));
                        }
                        Ok(Command::Shutdown) | Err(_) => break,
                    }
                }
                default(QUEUE_DRAIN_INTERVAL) => {
                    coordinator.tick(Instant::now());
                }
            }
        })
        .expect("failed to spawn coordinator worker thread");

    (CoordinatorHandle { commands: cmd_tx }, event_rx, handle)
}
