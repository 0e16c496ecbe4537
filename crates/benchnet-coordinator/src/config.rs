//! Coordinator configuration, assembled from CLI flags and defaults.

use serde::{Deserialize, Serialize};

use benchnet_protocol::{ProtocolTiming, COORDINATOR_PORT};

/// A peer Coordinator to sign in at on startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub namespace: String,
    pub address: String,
}

impl PeerEntry {
    /// Parse one `namespace=host:port` entry.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (namespace, address) = raw
            .split_once('=')
            .ok_or_else(|| format!("expected namespace=host:port, got {raw:?}"))?;
        if namespace.is_empty() || address.is_empty() {
            return Err(format!("empty namespace or address in {raw:?}"));
        }
        Ok(Self {
            namespace: namespace.to_owned(),
            address: normalize_address(address),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Namespace this Coordinator hosts. Defaults to the host's short name.
    pub namespace: String,
    /// Host name advertised to peers.
    pub host: String,
    /// Port of the routed control socket.
    pub port: u16,
    /// Peers to sign in at on startup.
    pub peers: Vec<PeerEntry>,
    pub timing: ProtocolTiming,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let host = local_host_name();
        Self {
            namespace: default_namespace(&host),
            host,
            port: COORDINATOR_PORT,
            peers: Vec::new(),
            timing: ProtocolTiming::default(),
        }
    }
}

impl CoordinatorConfig {
    /// The address peers reach this Coordinator under.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The host's short name, `localhost` if unavailable.
pub fn local_host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_owned())
}

/// Default namespace: the host's name with dots replaced by underscores,
/// so it stays a single name segment.
pub fn default_namespace(host: &str) -> String {
    host.replace('.', "_")
}

/// Append the default control port if the address carries none.
fn normalize_address(address: &str) -> String {
    if address.contains(':') {
        address.to_owned()
    } else {
        format!("{address}:{COORDINATOR_PORT}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_entry_parse() {
        let entry = PeerEntry::parse("N2=127.0.0.1:60001").unwrap();
        assert_eq!(entry.namespace, "N2");
        assert_eq!(entry.address, "127.0.0.1:60001");
    }

    #[test]
    fn test_peer_entry_fills_default_port() {
        let entry = PeerEntry::parse("N2=node2.lab").unwrap();
        assert_eq!(entry.address, format!("node2.lab:{COORDINATOR_PORT}"));
    }

    #[test]
    fn test_peer_entry_rejects_malformed() {
        assert!(PeerEntry::parse("N2").is_err());
        assert!(PeerEntry::parse("=addr").is_err());
        assert!(PeerEntry::parse("N2=").is_err());
    }

    #[test]
    fn test_default_namespace_replaces_dots() {
        assert_eq!(default_namespace("pc1.lab.example.com"), "pc1_lab_example_com");
        assert_eq!(default_namespace("bench3"), "bench3");
    }

    #[test]
    fn test_default_config() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.port, COORDINATOR_PORT);
        assert!(!cfg.namespace.contains('.'));
        assert!(cfg.address().ends_with(":12300"));
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let cfg = CoordinatorConfig {
            namespace: "N1".into(),
            host: "pc1.lab".into(),
            port: 60000,
            peers: vec![PeerEntry {
                namespace: "N2".into(),
                address: "127.0.0.1:60001".into(),
            }],
            timing: ProtocolTiming::default(),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: CoordinatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.namespace, "N1");
        assert_eq!(back.port, 60000);
        assert_eq!(back.peers, cfg.peers);
        assert_eq!(back.timing, cfg.timing);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: CoordinatorConfig =
            serde_json::from_str(r#"{"namespace": "N1", "port": 60000}"#).unwrap();
        assert_eq!(cfg.namespace, "N1");
        assert_eq!(cfg.port, 60000);
        assert!(cfg.peers.is_empty());
        assert_eq!(cfg.timing, ProtocolTiming::default());
    }
}
