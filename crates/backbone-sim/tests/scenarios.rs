//! End-to-end scenarios S1-S6: each drives real coordinator instances (or,
//! where the scenario is inherently single-component, the exact module the
//! scenario exercises) rather than re-deriving invariants already covered by
//! unit tests colocated with their module.

use std::time::{Duration, Instant};

use backbone_common::Callsign;
use backbone_node::queue::{EnqueueOutcome, PriorityQueue, QueueConfig, QueuedMessage};
use backbone_node::{CoordinatorEvent, InternetRoutingMode, TransportKind};
use backbone_proto::ax25::{service_path, wide_address, DigipeaterRole};
use backbone_proto::seen::SeenCache;
use backbone_proto::{Packet, PacketType, Priority, RoutingInfo};

use backbone_sim::network::Network;
use backbone_sim::test_util::{spawn_node, spawn_node_with_mode, wait_for, DEFAULT_WAIT};

fn data_packet(source: &str, destination: &str, message_id: [u8; 16], ttl: u8, payload: &[u8]) -> Packet {
    Packet {
        version: 1,
        packet_type: PacketType::Data,
        flags: backbone_proto::packet::Flags::empty(),
        source: source.to_string(),
        destination: destination.to_string(),
        message_id,
        ttl,
        priority: Priority::Normal,
        routing_info: RoutingInfo::default(),
        payload: bytes::Bytes::copy_from_slice(payload),
    }
}

/// S1 - Codec round-trip: encode then decode must yield identical fields.
#[test]
fn s1_codec_round_trip() {
    let packet = data_packet("W1ABC-10", "K2XYZ-5", [0x0F; 16], 12, b"hello");
    let encoded = packet.encode();
    let decoded = Packet::decode(&encoded).expect("round-trip decode");

    assert_eq!(decoded.version, packet.version);
    assert_eq!(decoded.packet_type, packet.packet_type);
    assert_eq!(decoded.source, packet.source);
    assert_eq!(decoded.destination, packet.destination);
    assert_eq!(decoded.message_id, packet.message_id);
    assert_eq!(decoded.ttl, packet.ttl);
    assert_eq!(decoded.priority, packet.priority);
    assert_eq!(decoded.payload, packet.payload);
}

/// S2 - Dedup on alt transport: the same messageId arriving twice yields
/// exactly one `Data` event; the second reception is silently dropped by
/// the coordinator's seen cache.
#[test]
fn s2_dedup_on_alt_transport() {
    let network = Network::new();
    let receiver = spawn_node("K2XYZ", &network, TransportKind::Rf, 500);
    let sender = spawn_node("W1ABC", &network, TransportKind::Rf, 500);

    let destination = Callsign::parse("K2XYZ").unwrap();
    let message_id = sender
        .handle
        .send_data(destination.clone(), b"dup-me".to_vec(), false, Priority::Normal)
        .expect("first send enqueues");

    let first = wait_for(&receiver.events, DEFAULT_WAIT, |e| matches!(e, CoordinatorEvent::Data { .. }));
    assert!(first.is_some(), "expected exactly one Data event for the first delivery");

    // Re-encode and redeliver the identical wire packet (same messageId) as
    // if it had arrived over a second transport; the seen cache must reject
    // it as a replay rather than emitting a second Data event.
    let resend = data_packet("W1ABC", "K2XYZ", message_id, 16, b"dup-me");
    network.deliver_raw(&Callsign::parse("W1ABC").unwrap(), &destination, resend.encode().to_vec());

    let duplicate_data = wait_for(&receiver.events, Duration::from_millis(500), |e| matches!(e, CoordinatorEvent::Data { .. }));
    assert!(duplicate_data.is_none(), "duplicate messageId must not produce a second Data event");

    receiver.shutdown();
    sender.shutdown();
}

/// S3 - WIDE2-2 digipeat: the path servicer decrements hop count and sets
/// the H-bit; once serviced anywhere, the frame-digest cache marks it
/// serviced so a second candidate channel does not also service it.
#[test]
fn s3_wide2_2_digipeat_serviced_once() {
    let mut path = vec![wide_address(2, 2)];
    let idx = service_path(&mut path, DigipeaterRole::Wide, 2).expect("wide2-2 is eligible");
    assert_eq!(path[idx].base_str(), "WIDE2");
    assert_eq!(path[idx].ssid, 1, "hop count decrements from 2 to 1");
    assert!(path[idx].has_been_repeated, "H-bit set after servicing");

    // Channel B services it first and records the fact in the seen cache;
    // channel C, consulting the same cache, must not service it again.
    let mut seen = SeenCache::new();
    let key = SeenCache::frame_digest_key(&path, b"payload");
    let now = Instant::now();
    assert!(!seen.frame_digest_entry(key.clone(), now).serviced_wide);
    seen.frame_digest_entry(key.clone(), now).serviced_wide = true;

    assert!(seen.frame_digest_entry(key, now).serviced_wide, "second channel sees it already serviced");
}

/// S4 - Priority preemption: enqueue LOW then EMERGENCY; the first dequeue
/// returns EMERGENCY.
#[test]
fn s4_priority_preemption() {
    let mut queue = PriorityQueue::new(QueueConfig::default());
    let destination = Callsign::parse("K2XYZ").unwrap();

    queue.enqueue(QueuedMessage {
        message_id: [1; 16],
        destination: destination.clone(),
        source: destination.clone(),
        packet_bytes: vec![1],
        priority: Priority::Low,
        require_ack: false,
        enqueued_at: Instant::now(),
        retries: 0,
    });
    let outcome = queue.enqueue(QueuedMessage {
        message_id: [2; 16],
        destination: destination.clone(),
        source: destination,
        packet_bytes: vec![2],
        priority: Priority::Emergency,
        require_ack: false,
        enqueued_at: Instant::now(),
        retries: 0,
    });
    assert!(matches!(outcome, EnqueueOutcome::Accepted));

    let first = queue.dequeue().expect("queue is non-empty");
    assert_eq!(first.priority, Priority::Emergency);
}

/// S5 - ACK retry then give up: a destination with no reachable mailbox is
/// retried with doubling backoff (1s, 2s, 4s, 8s, 16s) and then fails after
/// the retry cap (~31s).
#[test]
fn s5_ack_retry_then_give_up() {
    let network = Network::new();
    let sender = spawn_node("W1ABC", &network, TransportKind::Rf, 500);
    // K2XYZ is never registered on the network, standing in for "a
    // transport that drops all traffic to this destination".
    let destination = Callsign::parse("K2XYZ").unwrap();

    sender
        .handle
        .send_data(destination, b"never-delivered".to_vec(), true, Priority::Normal)
        .expect("enqueue succeeds even though delivery will never be acknowledged");

    let failed = wait_for(&sender.events, Duration::from_secs(40), |e| matches!(e, CoordinatorEvent::MessageFailed { .. }));
    assert!(failed.is_some(), "expected message-failed after exhausting retries");

    sender.shutdown();
}

/// S6 - Hub-spoke routing: in client mode, sendData to a non-neighbor is
/// transmitted on the Internet transport toward the configured hub rather
/// than failing for lack of a direct route.
#[test]
fn s6_hub_spoke_routing() {
    let network = Network::new();
    let hub = spawn_node_with_mode("Z1HUB", &network, TransportKind::Internet, 10, Some(InternetRoutingMode::Server), None);
    let spoke = spawn_node_with_mode(
        "W1ABC",
        &network,
        TransportKind::Internet,
        10,
        Some(InternetRoutingMode::Client),
        Some("Z1HUB"),
    );

    // No direct neighbor relationship has been established between the
    // spoke and the ultimate destination; the client-mode override must
    // still route through the configured hub rather than failing outright.
    let far_destination = Callsign::parse("Z9ABC-1").unwrap();
    let result = spoke.handle.send_data(far_destination, b"via-hub".to_vec(), false, Priority::Normal);
    assert!(result.is_ok());

    let sent = wait_for(&spoke.events, DEFAULT_WAIT, |e| matches!(e, CoordinatorEvent::MessageSent { .. }));
    assert!(sent.is_some(), "expected the queued message to drain onto the hub-bound transport");

    spoke.shutdown();
    hub.shutdown();
}
