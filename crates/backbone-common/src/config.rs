//! Persisted node configuration (§6).
//!
//! `NodeConfig` mirrors the JSON document on disk field-for-field. Every
//! field that has a spec-given default implements `Default` for it via
//! `#[serde(default)]`, so a mostly-empty config file is valid. Unrecognized
//! top-level keys are rejected unless they land in the `extras` bucket
//! (§9 "duck-typed configuration objects").

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::BackboneError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub local_callsign: String,
    #[serde(default)]
    pub transports: TransportsConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    /// Unknown-but-tolerated fields, kept verbatim rather than rejected.
    #[serde(default, flatten)]
    pub extras: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TransportsConfig {
    #[serde(default)]
    pub rf: RfConfig,
    #[serde(default)]
    pub internet: InternetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RfConfig {
    #[serde(default)]
    pub enabled: bool,
    /// TNC/KISS device path, e.g. `/dev/ttyUSB0`.
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default)]
    pub digipeater_role: DigipeaterRole,
    #[serde(default = "default_max_wide_n")]
    pub max_wide_n: u8,
}

impl Default for RfConfig {
    fn default() -> Self {
        RfConfig {
            enabled: false,
            device: None,
            baud: default_baud(),
            digipeater_role: DigipeaterRole::default(),
            max_wide_n: default_max_wide_n(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DigipeaterRole {
    /// Services only `WIDE1-*`.
    #[default]
    FillIn,
    /// Services `WIDEk-*` for k >= 2, up to `max_wide_n`.
    Wide,
    /// Does not service any WIDE path entries.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InternetConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mode: InternetMode,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_true")]
    pub tls: bool,
    /// Mesh-mode peers to dial in addition to listening.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Client-mode hub (legacy single-hub field).
    #[serde(default)]
    pub hub_server: Option<String>,
    /// Client-mode ordered hub fallback list.
    #[serde(default)]
    pub hub_servers: HubServersConfig,
}

impl Default for InternetConfig {
    fn default() -> Self {
        InternetConfig {
            enabled: false,
            mode: InternetMode::default(),
            port: default_port(),
            bind_address: default_bind_address(),
            tls: true,
            peers: Vec::new(),
            hub_server: None,
            hub_servers: HubServersConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InternetMode {
    #[default]
    Mesh,
    Server,
    Client,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct HubServersConfig {
    #[serde(default)]
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_update_interval_s")]
    pub update_interval_s: u64,
    #[serde(default = "default_max_hops")]
    pub max_hops: u8,
    #[serde(default)]
    pub prefer_internet: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig {
            algorithm: default_algorithm(),
            update_interval_s: default_update_interval_s(),
            max_hops: default_max_hops(),
            prefer_internet: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ServicesConfig {
    #[serde(default)]
    pub offer: Vec<String>,
    #[serde(default)]
    pub request: Vec<String>,
}

fn default_true() -> bool {
    true
}
fn default_baud() -> u32 {
    9600
}
fn default_max_wide_n() -> u8 {
    2
}
fn default_port() -> u16 {
    14240
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_algorithm() -> String {
    "dijkstra".to_string()
}
fn default_update_interval_s() -> u64 {
    60
}
fn default_max_hops() -> u8 {
    16
}

impl NodeConfig {
    /// Parse and validate a configuration document.
    ///
    /// Fatal at startup per SPEC_FULL §4.16: callers should treat a parse
    /// failure as `BackboneError::Configuration` and exit before opening any
    /// socket.
    pub fn from_json(raw: &str) -> Result<Self, BackboneError> {
        let cfg: NodeConfig = serde_json::from_str(raw)
            .map_err(|e| BackboneError::Configuration(format!("invalid config json: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), BackboneError> {
        crate::callsign::Callsign::parse(&self.local_callsign).map_err(|e| {
            BackboneError::Configuration(format!("invalid local_callsign: {e}"))
        })?;
        if self.transports.internet.enabled
            && self.transports.internet.mode != InternetMode::Client
            && self.transports.internet.port == 0
        {
            return Err(BackboneError::Configuration(
                "internet transport requires a non-zero listen port unless mode=client".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let raw = r#"{"localCallsign": "W1ABC-10"}"#;
        // NodeConfig uses snake_case field names by default (no rename_all),
        // matching the plain JSON keys from SPEC_FULL §6 at the Rust level.
        let raw = raw.replace("localCallsign", "local_callsign");
        let cfg = NodeConfig::from_json(&raw).unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.transports.rf.baud, 9600);
        assert_eq!(cfg.transports.internet.port, 14240);
        assert!(cfg.transports.internet.tls);
        assert_eq!(cfg.routing.max_hops, 16);
    }

    #[test]
    fn rejects_invalid_callsign() {
        let raw = r#"{"local_callsign": "this-callsign-is-too-long-123"}"#;
        assert!(NodeConfig::from_json(raw).is_err());
    }

    #[test]
    fn unknown_top_level_fields_land_in_extras_bucket() {
        // Nested structs still `deny_unknown_fields`; only the top level
        // tolerates unrecognized keys, and only into `extras` (§9).
        let raw = r#"{"local_callsign": "W1ABC", "experimental_flag": true}"#;
        let cfg = NodeConfig::from_json(raw).unwrap();
        assert_eq!(
            cfg.extras.get("experimental_flag"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[test]
    fn nested_unknown_fields_are_rejected() {
        let raw = r#"{"local_callsign": "W1ABC", "routing": {"bogus": 1}}"#;
        assert!(NodeConfig::from_json(raw).is_err());
    }

    #[test]
    fn full_config_round_trips() {
        let cfg = NodeConfig {
            enabled: true,
            local_callsign: "W1ABC-10".to_string(),
            transports: TransportsConfig {
                rf: RfConfig {
                    enabled: true,
                    device: Some("/dev/ttyUSB0".into()),
                    baud: 1200,
                    digipeater_role: DigipeaterRole::Wide,
                    max_wide_n: 3,
                },
                internet: InternetConfig {
                    enabled: true,
                    mode: InternetMode::Client,
                    port: 14240,
                    bind_address: "0.0.0.0".into(),
                    tls: true,
                    peers: vec![],
                    hub_server: Some("hub.example.net:14240".into()),
                    hub_servers: HubServersConfig::default(),
                },
            },
            routing: RoutingConfig::default(),
            services: ServicesConfig::default(),
            extras: BTreeMap::new(),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back = NodeConfig::from_json(&json).unwrap();
        assert_eq!(back.transports.rf.max_wide_n, 3);
        assert_eq!(back.transports.internet.mode, InternetMode::Client);
    }
}
