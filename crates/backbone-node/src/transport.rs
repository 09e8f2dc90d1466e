//! Transport interface (C4).
//!
//! Every concrete transport (RF in [`crate::rf`], Internet in
//! [`crate::internet`]) satisfies this contract. The coordinator holds a
//! `Vec<Box<dyn Transport>>` and never downcasts back to a concrete type;
//! it only ever asks "are you available", "what do you cost", "send this".

use backbone_common::Callsign;
use backbone_proto::Packet;
use crossbeam_channel::Sender;

/// Canonical per-transport cost used by the routing engine (§4.4) when no
/// better link-quality estimate is available yet.
pub mod canonical_cost {
    pub const INTERNET: u32 = 10;
    pub const RF: u32 = 500;
}

/// Canonical per-transport MTU (§4.4).
pub mod canonical_mtu {
    pub const INTERNET: usize = 8192;
    pub const RF: usize = 200;
}

/// Identifies a transport instance within a node (index into the
/// coordinator's transport list, stable for the node's lifetime).
pub type TransportId = u8;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not available")]
    Unavailable,
    #[error("connect attempt timed out")]
    ConnectTimeout,
    #[error("no route to {0}")]
    NoRoute(String),
    #[error("io error: {0}")]
    Io(String),
}

/// Events a transport emits toward the coordinator. Delivered over a
/// `crossbeam-channel` mailbox rather than a callback, per the "explicit
/// event enum" redesign direction.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Packet {
        transport_id: TransportId,
        packet: Box<Packet>,
    },
    Connected {
        transport_id: TransportId,
        peer: Option<Callsign>,
    },
    Disconnected {
        transport_id: TransportId,
        peer: Option<Callsign>,
    },
    Error {
        transport_id: TransportId,
        message: String,
    },
}

/// Options accompanying an outbound send.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    pub require_ack: bool,
}

/// The contract every transport implementation satisfies.
pub trait Transport: Send {
    fn id(&self) -> TransportId;

    fn connect(&mut self, events: Sender<TransportEvent>) -> Result<(), TransportError>;

    fn disconnect(&mut self) -> Result<(), TransportError>;

    fn send(
        &self,
        destination: &Callsign,
        bytes: &[u8],
        options: SendOptions,
    ) -> Result<(), TransportError>;

    fn broadcast(&self, bytes: &[u8]) -> Result<(), TransportError>;

    fn is_available(&self) -> bool;

    /// Lower is better.
    fn cost(&self) -> u32;

    fn mtu(&self) -> usize;

    fn kind(&self) -> TransportKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Rf,
    Internet,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Rf => write!(f, "rf"),
            TransportKind::Internet => write!(f, "internet"),
        }
    }
}
