//! Helpers for standing up in-process nodes and waiting on their events.

use std::time::{Duration, Instant};

use backbone_common::Callsign;
use backbone_node::{spawn_coordinator, CoordinatorEvent, CoordinatorHandle, InternetRoutingMode, Transport, TransportKind};

use crate::network::{InMemoryTransport, Network};

pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// A running simulated node: its handle for sending, and the receiver for
/// observing what the coordinator does.
pub struct TestNode {
    pub callsign: Callsign,
    pub handle: CoordinatorHandle,
    pub events: crossbeam_channel::Receiver<CoordinatorEvent>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl TestNode {
    pub fn shutdown(mut self) {
        self.handle.clone().shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Spawn a node with a single in-memory transport of the given kind/cost,
/// joined to `network`.
pub fn spawn_node(callsign: &str, network: &Network, kind: TransportKind, cost: u32) -> TestNode {
    spawn_node_with_mode(callsign, network, kind, cost, None, None)
}

pub fn spawn_node_with_mode(
    callsign: &str,
    network: &Network,
    kind: TransportKind,
    cost: u32,
    internet_mode: Option<InternetRoutingMode>,
    internet_hub: Option<&str>,
) -> TestNode {
    let call = Callsign::parse(callsign).expect("valid test callsign");
    let transport: Box<dyn Transport> = Box::new(InMemoryTransport::new(0, call.clone(), kind, cost, network.clone()));
    let hub = internet_hub.map(|h| Callsign::parse(h).expect("valid hub callsign"));
    let (handle, events, worker) = spawn_coordinator(call.clone(), vec![transport], Vec::new(), Vec::new(), internet_mode, hub);
    TestNode { callsign: call, handle, events, worker: Some(worker) }
}

/// Poll `events` until `predicate` matches an event or `timeout` elapses.
/// Returns the matching event, or `None` on timeout.
pub fn wait_for<F>(events: &crossbeam_channel::Receiver<CoordinatorEvent>, timeout: Duration, mut predicate: F) -> Option<CoordinatorEvent>
where
    F: FnMut(&CoordinatorEvent) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match events.recv_timeout(remaining) {
            Ok(event) if predicate(&event) => return Some(event),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

/// Drain and discard whatever events are currently queued, without blocking.
pub fn drain(events: &crossbeam_channel::Receiver<CoordinatorEvent>) {
    while events.try_recv().is_ok() {}
}
