//! Amateur-radio callsign domain type.
//!
//! A callsign is 1–6 alphanumerics, optionally followed by `-N` where
//! `N` is the SSID (0..15). Comparison and hashing always use the
//! canonical uppercase form, so `w1abc-10` and `W1ABC-10` are the same
//! node. The special broadcast destination `CQ` and the RF discovery
//! alias `NODES` are valid callsigns for matching purposes but are never
//! assigned to a real node.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Wildcard destination meaning "everyone listening".
pub const BROADCAST: &str = "CQ";

/// RF destination alias some TNCs use for node-discovery frames.
pub const NODES_ALIAS: &str = "NODES";

/// Maximum length of the base (non-SSID) portion of a callsign.
const MAX_BASE_LEN: usize = 6;

/// Maximum on-wire length of a callsign string (`source`/`destination` fields).
pub const MAX_WIRE_LEN: usize = 10;

/// Maximum SSID value.
pub const MAX_SSID: u8 = 15;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CallsignError {
    #[error("callsign is empty")]
    Empty,
    #[error("callsign {0:?} exceeds wire length of {MAX_WIRE_LEN}")]
    TooLong(String),
    #[error("callsign base {0:?} must be 1-{MAX_BASE_LEN} alphanumerics")]
    InvalidBase(String),
    #[error("SSID {0} exceeds maximum of {MAX_SSID}")]
    SsidOutOfRange(u8),
    #[error("SSID suffix {0:?} is not a valid number 0-15")]
    InvalidSsid(String),
}

/// A validated, canonicalized amateur-radio callsign with optional SSID.
///
/// Constructed only through [`Callsign::parse`] (or `FromStr`/`TryFrom`),
/// so a value in hand is always well-formed — no downstream code needs to
/// re-check the shape of a `Callsign`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Callsign(String);

impl Callsign {
    /// Parse and canonicalize a callsign string of the form `BASE` or `BASE-N`.
    pub fn parse(raw: &str) -> Result<Self, CallsignError> {
        if raw.is_empty() {
            return Err(CallsignError::Empty);
        }
        if raw.len() > MAX_WIRE_LEN {
            return Err(CallsignError::TooLong(raw.to_string()));
        }

        let (base, ssid) = match raw.split_once('-') {
            Some((b, s)) => (b, Some(s)),
            None => (raw, None),
        };

        if base.is_empty()
            || base.len() > MAX_BASE_LEN
            || !base.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(CallsignError::InvalidBase(base.to_string()));
        }
        let base = base.to_ascii_uppercase();

        let canonical = match ssid {
            None => base,
            Some(s) => {
                let n: u8 = s
                    .parse()
                    .map_err(|_| CallsignError::InvalidSsid(s.to_string()))?;
                if n > MAX_SSID {
                    return Err(CallsignError::SsidOutOfRange(n));
                }
                format!("{base}-{n}")
            }
        };
        Ok(Callsign(canonical))
    }

    /// The broadcast wildcard destination `CQ`.
    pub fn broadcast() -> Self {
        Callsign(BROADCAST.to_string())
    }

    /// `true` if this callsign is the broadcast wildcard `CQ`.
    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST
    }

    /// `true` if this is the RF node-discovery alias `NODES`.
    pub fn is_nodes_alias(&self) -> bool {
        self.0 == NODES_ALIAS
    }

    /// The canonical (uppercase) string form, e.g. `"W1ABC-10"`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base callsign without the SSID suffix, e.g. `"W1ABC"` for `"W1ABC-10"`.
    pub fn base(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }

    /// SSID, or 0 if none was given.
    pub fn ssid(&self) -> u8 {
        self.0
            .split_once('-')
            .and_then(|(_, s)| s.parse().ok())
            .unwrap_or(0)
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Callsign {
    type Err = CallsignError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Callsign::parse(s)
    }
}

impl TryFrom<&str> for Callsign {
    type Error = CallsignError;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Callsign::parse(s)
    }
}

impl TryFrom<String> for Callsign {
    type Error = CallsignError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Callsign::parse(&s)
    }
}

impl Serialize for Callsign {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Callsign {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Callsign::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_case() {
        assert_eq!(Callsign::parse("w1abc-10").unwrap().as_str(), "W1ABC-10");
        assert_eq!(
            Callsign::parse("w1abc-10").unwrap(),
            Callsign::parse("W1ABC-10").unwrap()
        );
    }

    #[test]
    fn accepts_bare_base() {
        let c = Callsign::parse("K2XYZ").unwrap();
        assert_eq!(c.as_str(), "K2XYZ");
        assert_eq!(c.base(), "K2XYZ");
        assert_eq!(c.ssid(), 0);
    }

    #[test]
    fn rejects_oversized_ssid() {
        assert!(matches!(
            Callsign::parse("W1ABC-16"),
            Err(CallsignError::SsidOutOfRange(16))
        ));
        assert!(Callsign::parse("W1ABC-15").is_ok());
    }

    #[test]
    fn rejects_overlong_base() {
        assert!(Callsign::parse("TOOLONGCALL").is_err());
    }

    #[test]
    fn rejects_non_alphanumeric() {
        assert!(Callsign::parse("W1-ABC-3").is_err());
        assert!(Callsign::parse("").is_err());
    }

    #[test]
    fn broadcast_recognized() {
        assert!(Callsign::broadcast().is_broadcast());
        assert!(Callsign::parse("CQ").unwrap().is_broadcast());
        assert!(!Callsign::parse("W1ABC").unwrap().is_broadcast());
    }

    #[test]
    fn base_and_ssid_split_correctly() {
        let c = Callsign::parse("N0CALL-7").unwrap();
        assert_eq!(c.base(), "N0CALL");
        assert_eq!(c.ssid(), 7);
    }

    #[test]
    fn json_roundtrip() {
        let c = Callsign::parse("W1ABC-10").unwrap();
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"W1ABC-10\"");
        let back: Callsign = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
