//! Backbone node runtime: transports, tables, and the coordinator that
//! ties them together into a running packet-radio backbone node.

pub mod coordinator;
pub mod heartbeat;
pub mod internet;
pub mod neighbor;
pub mod queue;
pub mod registry;
pub mod reliability;
pub mod rf;
pub mod routing;
pub mod status;
pub mod sync;
pub mod topology;
pub mod transport;

pub use coordinator::{spawn as spawn_coordinator, Coordinator, CoordinatorEvent, CoordinatorHandle, InternetRoutingMode};
pub use transport::{SendOptions, Transport, TransportError, TransportEvent, TransportId, TransportKind};
