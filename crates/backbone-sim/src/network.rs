//! In-process network fabric for scenario tests.
//!
//! A [`Network`] is a shared registry of mailboxes keyed by callsign. Each
//! [`InMemoryTransport`] registers its owning node's callsign on connect and
//! looks up peers by callsign on send, mirroring the real transports'
//! send-by-destination-callsign contract without touching a socket or TTY.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;

use backbone_common::Callsign;
use backbone_proto::Packet;

use backbone_node::{SendOptions, Transport, TransportError, TransportEvent, TransportId, TransportKind};

#[derive(Debug, Clone, Default)]
pub struct LinkFault {
    /// Drop every packet sent across this link.
    pub drop_all: bool,
}

struct Mailbox {
    inject: Box<dyn Fn(Vec<u8>) + Send>,
}

struct Inner {
    mailboxes: HashMap<Callsign, Mailbox>,
    faults: HashMap<(Callsign, Callsign), LinkFault>,
}

/// Shared fabric connecting every [`InMemoryTransport`] in a scenario.
///
/// Cheap to clone: all state lives behind an `Arc<Mutex<_>>`, matching the
/// style of the teacher's `Arc<Mutex<HashMap<...>>>` peer tables in
/// `internet.rs`.
#[derive(Clone, Default)]
pub struct Network {
    inner: Arc<Mutex<Inner>>,
}

impl Network {
    pub fn new() -> Self {
        Network {
            inner: Arc::new(Mutex::new(Inner {
                mailboxes: HashMap::new(),
                faults: HashMap::new(),
            })),
        }
    }

    /// Make `from -> to` silently drop every packet until cleared.
    pub fn fail_link(&self, from: Callsign, to: Callsign) {
        let mut inner = self.inner.lock().expect("network lock poisoned");
        inner.faults.insert((from, to), LinkFault { drop_all: true });
    }

    pub fn heal_link(&self, from: Callsign, to: Callsign) {
        let mut inner = self.inner.lock().expect("network lock poisoned");
        inner.faults.remove(&(from, to));
    }

    fn register(&self, callsign: Callsign, inject: Box<dyn Fn(Vec<u8>) + Send>) {
        let mut inner = self.inner.lock().expect("network lock poisoned");
        inner.mailboxes.insert(callsign, Mailbox { inject });
    }

    fn unregister(&self, callsign: &Callsign) {
        let mut inner = self.inner.lock().expect("network lock poisoned");
        inner.mailboxes.remove(callsign);
    }

    /// Hand `bytes` directly to `to`'s mailbox as if it arrived from `from`,
    /// without going through a registered [`InMemoryTransport`]'s `send`.
    /// Used by scenario tests that need to simulate "the same packet
    /// arriving a second time" without re-running the coordinator's own
    /// send path (which would mint a fresh messageId).
    pub fn deliver_raw(&self, from: &Callsign, to: &Callsign, bytes: Vec<u8>) {
        self.deliver(from, to, bytes);
    }

    fn deliver(&self, from: &Callsign, to: &Callsign, bytes: Vec<u8>) {
        let inner = self.inner.lock().expect("network lock poisoned");
        if inner.faults.get(&(from.clone(), to.clone())).is_some_and(|f| f.drop_all) {
            return;
        }
        if let Some(mailbox) = inner.mailboxes.get(to) {
            (mailbox.inject)(bytes);
        }
    }

    fn broadcast(&self, from: &Callsign, bytes: Vec<u8>) {
        let inner = self.inner.lock().expect("network lock poisoned");
        for (callsign, mailbox) in inner.mailboxes.iter() {
            if callsign == from {
                continue;
            }
            if inner.faults.get(&(from.clone(), callsign.clone())).is_some_and(|f| f.drop_all) {
                continue;
            }
            (mailbox.inject)(bytes.clone());
        }
    }
}

/// An in-process stand-in for [`backbone_node::rf::RfTransport`] /
/// [`backbone_node::internet::InternetTransport`] that moves already-encoded
/// [`Packet`] bytes through a shared [`Network`] instead of KISS framing or
/// TCP. Every simulated node gets one of these per logical link so scenarios
/// can drive multi-node topologies without any real I/O.
pub struct InMemoryTransport {
    id: TransportId,
    local: Callsign,
    kind: TransportKind,
    cost: u32,
    network: Network,
    connected: bool,
}

impl InMemoryTransport {
    pub fn new(id: TransportId, local: Callsign, kind: TransportKind, cost: u32, network: Network) -> Self {
        InMemoryTransport { id, local, kind, cost, network, connected: false }
    }
}

impl Transport for InMemoryTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn connect(&mut self, events: Sender<TransportEvent>) -> Result<(), TransportError> {
        let id = self.id;
        let events_inject = events.clone();
        self.network.register(
            self.local.clone(),
            Box::new(move |bytes| match Packet::decode(&bytes) {
                Ok(packet) => {
                    let _ = events_inject.send(TransportEvent::Packet { transport_id: id, packet: Box::new(packet) });
                }
                Err(e) => {
                    let _ = events_inject.send(TransportEvent::Error { transport_id: id, message: e.to_string() });
                }
            }),
        );
        self.connected = true;
        let _ = events.send(TransportEvent::Connected { transport_id: id, peer: None });
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.network.unregister(&self.local);
        self.connected = false;
        Ok(())
    }

    fn send(&self, destination: &Callsign, bytes: &[u8], _options: SendOptions) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Unavailable);
        }
        self.network.deliver(&self.local, destination, bytes.to_vec());
        Ok(())
    }

    fn broadcast(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Unavailable);
        }
        self.network.broadcast(&self.local, bytes.to_vec());
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.connected
    }

    fn cost(&self) -> u32 {
        self.cost
    }

    fn mtu(&self) -> usize {
        match self.kind {
            TransportKind::Internet => 8192,
            TransportKind::Rf => 200,
        }
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }
}
