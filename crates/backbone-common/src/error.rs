//! Shared error taxonomy (§7).
//!
//! Each crate defines its own `thiserror`-derived enum for the errors it can
//! actually produce; this module holds the kinds that are common enough to
//! be reused verbatim by both the protocol crate (codec-level failures) and
//! the node crate (routing/delivery failures), plus the classification used
//! to decide whether a failure is retried locally or surfaced to the
//! operator (SPEC_FULL §7).

use std::fmt;

/// How a failure should be handled once it occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Recovered locally; nothing surfaces beyond a counter/log line.
    RecoveredLocally,
    /// Retried with backoff up to a cap, then surfaced.
    RetriedThenSurfaced,
    /// Surfaced immediately to collaborators/operator.
    Surfaced,
    /// Fatal — the affected subsystem (or the whole node) shuts down.
    Fatal,
}

/// Error kinds shared across crate boundaries (§7 taxonomy).
///
/// This is deliberately not the *only* error type in the workspace: the
/// protocol crate has its own decode-specific enum, and the node crate has
/// its own delivery-specific enum. Both convert into this one at their
/// public boundary via `#[from]` so operator-facing code (status reports,
/// logs) can classify any error uniformly.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackboneError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("congestion: {0}")]
    Congestion(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("replay rejected: {0}")]
    ReplayRejected(String),
}

impl BackboneError {
    pub fn disposition(&self) -> Disposition {
        match self {
            BackboneError::MalformedInput(_) => Disposition::RecoveredLocally,
            BackboneError::ReplayRejected(_) => Disposition::RecoveredLocally,
            BackboneError::TransportUnavailable(_) => Disposition::RetriedThenSurfaced,
            BackboneError::Timeout(_) => Disposition::RetriedThenSurfaced,
            BackboneError::Congestion(_) => Disposition::Surfaced,
            BackboneError::ProtocolViolation(_) => Disposition::Surfaced,
            BackboneError::Configuration(_) => Disposition::Fatal,
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Disposition::RecoveredLocally => "recovered-locally",
            Disposition::RetriedThenSurfaced => "retried-then-surfaced",
            Disposition::Surfaced => "surfaced",
            Disposition::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_input_recovers_locally() {
        assert_eq!(
            BackboneError::MalformedInput("bad crc".into()).disposition(),
            Disposition::RecoveredLocally
        );
    }

    #[test]
    fn configuration_errors_are_fatal() {
        assert_eq!(
            BackboneError::Configuration("bad json".into()).disposition(),
            Disposition::Fatal
        );
    }
}
