//! Backbone wire protocol.
//!
//! This crate is transport-agnostic: it knows how to encode/decode the
//! wire packet format, service AX.25 digipeater paths, de-escape KISS
//! framing, detect duplicates, and fragment/reassemble oversized payloads.
//! It has no knowledge of sockets, queues, or routing — those live in
//! `backbone-node`.

pub mod ax25;
pub mod fragment;
pub mod kiss;
pub mod packet;
pub mod routing_info;
pub mod seen;

pub use packet::{CodecError, Packet, PacketType, Priority};
pub use routing_info::{RoutingAnnotation, RoutingInfo};
