//! Directory of local Components and peer Coordinators.
//!
//! `local_name -> identity` is a bijection: at most one Component record per
//! name, and an identity hosts at most one Component. Socket identities are
//! private to each hop and never appear in any frame.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc;

use benchnet_protocol::rpc::RpcError;
use benchnet_protocol::ControlMessage;

/// Private transport identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A Component signed in at this Coordinator.
#[derive(Debug, Clone)]
pub struct ComponentRecord {
    pub identity: ConnectionId,
    pub last_heartbeat: Instant,
}

/// A peer Coordinator. Every peer link is two TCP connections, one initiated
/// each way, hence the two directional sign-in states.
pub struct PeerRecord {
    pub namespace: String,
    pub address: String,
    /// Identity of the connection the peer dialled in on.
    pub identity_in: Option<ConnectionId>,
    pub signed_in_in: bool,
    pub signed_in_out: bool,
    /// Queue into the outbound dialler task, present while the link is up.
    pub outbound: Option<mpsc::Sender<ControlMessage>>,
    pub last_heartbeat: Instant,
}

impl PeerRecord {
    fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_owned(),
            address: String::new(),
            identity_in: None,
            signed_in_in: false,
            signed_in_out: false,
            outbound: None,
            last_heartbeat: Instant::now(),
        }
    }

    /// A peer is healthy iff the outbound link is signed in and recently
    /// heard from.
    pub fn is_healthy(&self, stale: Duration) -> bool {
        self.signed_in_out && self.outbound.is_some() && self.last_heartbeat.elapsed() < stale
    }
}

pub struct Directory {
    namespace: String,
    address: String,
    components: HashMap<String, ComponentRecord>,
    peers: HashMap<String, PeerRecord>,
    /// Component names of remote namespaces, filled by replication.
    remote_components: HashMap<String, Vec<String>>,
}

impl Directory {
    pub fn new(namespace: &str, address: &str) -> Self {
        Self {
            namespace: namespace.to_owned(),
            address: address.to_owned(),
            components: HashMap::new(),
            peers: HashMap::new(),
            remote_components: HashMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    // -- Components --

    /// Sign a Component in. Identity churn on a live record is a duplicate;
    /// a stale record is replaced.
    pub fn add_component(
        &mut self,
        name: &str,
        identity: ConnectionId,
        stale_after: Duration,
    ) -> Result<(), RpcError> {
        if let Some(existing) = self.components.get(name) {
            if existing.identity != identity && existing.last_heartbeat.elapsed() < stale_after {
                return Err(RpcError::duplicate_name());
            }
        }
        self.components.insert(
            name.to_owned(),
            ComponentRecord {
                identity,
                last_heartbeat: Instant::now(),
            },
        );
        Ok(())
    }

    /// Sign a Component out. With `Some(identity)` the record is only
    /// removed when the identity matches; a mismatch leaves the directory
    /// untouched and is an error. `None` forces removal.
    pub fn remove_component(
        &mut self,
        name: &str,
        identity: Option<ConnectionId>,
    ) -> Result<(), RpcError> {
        match self.components.get(name) {
            None => Ok(()), // already removed
            Some(record) => {
                if let Some(id) = identity {
                    if record.identity != id {
                        return Err(RpcError::server_error()
                            .with_data(Value::String("identity does not match".into())));
                    }
                }
                self.components.remove(name);
                Ok(())
            }
        }
    }

    pub fn component_identity(&self, name: &str) -> Option<ConnectionId> {
        self.components.get(name).map(|record| record.identity)
    }

    pub fn component_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.components.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn update_component_heartbeat(&mut self, name: &str, identity: ConnectionId) -> bool {
        match self.components.get_mut(name) {
            Some(record) if record.identity == identity => {
                record.last_heartbeat = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Identity disappearance: remove every record on that connection.
    pub fn remove_components_with_identity(&mut self, identity: ConnectionId) -> Vec<String> {
        let gone: Vec<String> = self
            .components
            .iter()
            .filter(|(_, record)| record.identity == identity)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &gone {
            self.components.remove(name);
        }
        gone
    }

    /// Components silent for more than `expiration`, to be admonished.
    pub fn expired_components(&self, expiration: Duration) -> Vec<(ConnectionId, String)> {
        self.components
            .iter()
            .filter(|(_, record)| {
                let elapsed = record.last_heartbeat.elapsed();
                elapsed > expiration && elapsed <= expiration * 3
            })
            .map(|(name, record)| (record.identity, name.clone()))
            .collect()
    }

    /// Drop Components silent for more than three expiration periods.
    pub fn drop_dead_components(&mut self, expiration: Duration) -> Vec<String> {
        let dead: Vec<String> = self
            .components
            .iter()
            .filter(|(_, record)| record.last_heartbeat.elapsed() > expiration * 3)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &dead {
            self.components.remove(name);
        }
        dead
    }

    // -- Peers --

    pub fn peer(&self, namespace: &str) -> Option<&PeerRecord> {
        self.peers.get(namespace)
    }

    pub fn peer_mut(&mut self, namespace: &str) -> Option<&mut PeerRecord> {
        self.peers.get_mut(namespace)
    }

    pub fn peer_namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.peers.keys().cloned().collect();
        namespaces.sort();
        namespaces
    }

    pub fn healthy_peer_namespaces(&self, stale: Duration) -> Vec<String> {
        let mut namespaces: Vec<String> = self
            .peers
            .values()
            .filter(|peer| peer.is_healthy(stale))
            .map(|peer| peer.namespace.clone())
            .collect();
        namespaces.sort();
        namespaces
    }

    /// Record a peer's address without touching an existing link.
    pub fn upsert_peer_address(&mut self, namespace: &str, address: &str) {
        let peer = self
            .peers
            .entry(namespace.to_owned())
            .or_insert_with(|| PeerRecord::new(namespace));
        if !address.is_empty() {
            peer.address = address.to_owned();
        }
    }

    /// Register the receiving side of a peer link (`coordinator_sign_in`).
    pub fn set_peer_inbound(
        &mut self,
        namespace: &str,
        identity: ConnectionId,
    ) -> Result<(), RpcError> {
        let peer = self
            .peers
            .entry(namespace.to_owned())
            .or_insert_with(|| PeerRecord::new(namespace));
        if let Some(existing) = peer.identity_in {
            if existing != identity && peer.signed_in_in {
                return Err(RpcError::duplicate_name());
            }
        }
        peer.identity_in = Some(identity);
        peer.signed_in_in = true;
        peer.last_heartbeat = Instant::now();
        Ok(())
    }

    /// Register the sending side of a peer link after a successful dial.
    pub fn set_peer_outbound(
        &mut self,
        namespace: &str,
        address: &str,
        outbound: mpsc::Sender<ControlMessage>,
    ) {
        let peer = self
            .peers
            .entry(namespace.to_owned())
            .or_insert_with(|| PeerRecord::new(namespace));
        if !address.is_empty() {
            peer.address = address.to_owned();
        }
        peer.outbound = Some(outbound);
        peer.signed_in_out = true;
        peer.last_heartbeat = Instant::now();
    }

    /// Mark the outbound link dead; the record and address survive for the
    /// background reconnect.
    pub fn mark_peer_down(&mut self, namespace: &str) {
        if let Some(peer) = self.peers.get_mut(namespace) {
            peer.outbound = None;
            peer.signed_in_out = false;
        }
    }

    /// Remove a peer entirely (explicit `coordinator_sign_out`).
    pub fn remove_peer(&mut self, namespace: &str) -> Option<PeerRecord> {
        self.remote_components.remove(namespace);
        self.peers.remove(namespace)
    }

    pub fn update_peer_heartbeat(&mut self, namespace: &str) {
        if let Some(peer) = self.peers.get_mut(namespace) {
            peer.last_heartbeat = Instant::now();
        }
    }

    /// The namespace whose inbound link uses this identity, if any.
    pub fn peer_namespace_for_identity(&self, identity: ConnectionId) -> Option<String> {
        self.peers
            .values()
            .find(|peer| peer.identity_in == Some(identity))
            .map(|peer| peer.namespace.clone())
    }

    /// Inbound link loss: clear the receiving side of the peer.
    pub fn clear_peer_inbound(&mut self, identity: ConnectionId) -> Option<String> {
        for peer in self.peers.values_mut() {
            if peer.identity_in == Some(identity) {
                peer.identity_in = None;
                peer.signed_in_in = false;
                return Some(peer.namespace.clone());
            }
        }
        None
    }

    /// Known peers as `namespace -> address`, including this Coordinator.
    pub fn nodes_map(&self) -> HashMap<String, String> {
        let mut nodes = HashMap::new();
        nodes.insert(self.namespace.clone(), self.address.clone());
        for peer in self.peers.values() {
            if !peer.address.is_empty() {
                nodes.insert(peer.namespace.clone(), peer.address.clone());
            }
        }
        nodes
    }

    // -- Replicated remote directory --

    pub fn set_remote_components(&mut self, namespace: &str, names: Vec<String>) {
        self.remote_components.insert(namespace.to_owned(), names);
    }

    /// All known Components per namespace: local ones plus replicas.
    pub fn global_components(&self) -> HashMap<String, Vec<String>> {
        let mut global = self.remote_components.clone();
        global.insert(self.namespace.clone(), self.component_names());
        global
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STALE: Duration = Duration::from_secs(15);

    fn directory() -> Directory {
        Directory::new("N1", "127.0.0.1:12300")
    }

    #[test]
    fn test_sign_in_and_out() {
        let mut dir = directory();
        dir.add_component("c1", ConnectionId(1), STALE).unwrap();
        assert_eq!(dir.component_names(), vec!["c1"]);
        assert_eq!(dir.component_identity("c1"), Some(ConnectionId(1)));

        dir.remove_component("c1", Some(ConnectionId(1))).unwrap();
        assert!(dir.component_names().is_empty());
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut dir = directory();
        dir.add_component("c1", ConnectionId(1), STALE).unwrap();
        let err = dir.add_component("c1", ConnectionId(2), STALE).unwrap_err();
        assert_eq!(err.code, benchnet_protocol::rpc::codes::DUPLICATE_NAME);
        // the first record survives
        assert_eq!(dir.component_identity("c1"), Some(ConnectionId(1)));
    }

    #[test]
    fn test_same_identity_can_sign_in_again() {
        let mut dir = directory();
        dir.add_component("c1", ConnectionId(1), STALE).unwrap();
        dir.add_component("c1", ConnectionId(1), STALE).unwrap();
        assert_eq!(dir.component_names(), vec!["c1"]);
    }

    #[test]
    fn test_sign_out_with_wrong_identity_is_a_noop() {
        let mut dir = directory();
        dir.add_component("c1", ConnectionId(1), STALE).unwrap();
        assert!(dir.remove_component("c1", Some(ConnectionId(2))).is_err());
        assert_eq!(dir.component_identity("c1"), Some(ConnectionId(1)));
    }

    #[test]
    fn test_sign_out_unknown_name_is_silent() {
        let mut dir = directory();
        assert!(dir.remove_component("ghost", Some(ConnectionId(1))).is_ok());
    }

    #[test]
    fn test_directory_matches_sign_in_history() {
        let mut dir = directory();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            dir.add_component(name, ConnectionId(i as u64), STALE).unwrap();
        }
        dir.remove_component("b", Some(ConnectionId(1))).unwrap();
        assert_eq!(dir.component_names(), vec!["a", "c"]);
    }

    #[test]
    fn test_identity_disappearance_removes_component() {
        let mut dir = directory();
        dir.add_component("c1", ConnectionId(7), STALE).unwrap();
        let gone = dir.remove_components_with_identity(ConnectionId(7));
        assert_eq!(gone, vec!["c1"]);
        assert!(dir.component_names().is_empty());
    }

    #[test]
    fn test_stale_record_can_be_replaced() {
        let mut dir = directory();
        dir.add_component("c1", ConnectionId(1), STALE).unwrap();
        // with a zero staleness threshold the old record counts as stale
        dir.add_component("c1", ConnectionId(2), Duration::ZERO)
            .unwrap();
        assert_eq!(dir.component_identity("c1"), Some(ConnectionId(2)));
    }

    #[test]
    fn test_heartbeat_requires_matching_identity() {
        let mut dir = directory();
        dir.add_component("c1", ConnectionId(1), STALE).unwrap();
        assert!(dir.update_component_heartbeat("c1", ConnectionId(1)));
        assert!(!dir.update_component_heartbeat("c1", ConnectionId(2)));
        assert!(!dir.update_component_heartbeat("ghost", ConnectionId(1)));
    }

    #[test]
    fn test_nodes_map_includes_self() {
        let mut dir = directory();
        dir.upsert_peer_address("N2", "127.0.0.1:60001");
        let nodes = dir.nodes_map();
        assert_eq!(nodes["N1"], "127.0.0.1:12300");
        assert_eq!(nodes["N2"], "127.0.0.1:60001");
    }

    #[test]
    fn test_peer_health_requires_outbound_link() {
        let mut dir = directory();
        dir.upsert_peer_address("N2", "127.0.0.1:60001");
        assert!(!dir.peer("N2").unwrap().is_healthy(STALE));

        let (tx, _rx) = mpsc::channel(1);
        dir.set_peer_outbound("N2", "127.0.0.1:60001", tx);
        assert!(dir.peer("N2").unwrap().is_healthy(STALE));

        dir.mark_peer_down("N2");
        assert!(!dir.peer("N2").unwrap().is_healthy(STALE));
        // address survives for the reconnect
        assert_eq!(dir.peer("N2").unwrap().address, "127.0.0.1:60001");
    }

    #[test]
    fn test_second_inbound_peer_identity_is_rejected() {
        let mut dir = directory();
        dir.set_peer_inbound("N2", ConnectionId(1)).unwrap();
        let err = dir.set_peer_inbound("N2", ConnectionId(2)).unwrap_err();
        assert_eq!(err.code, benchnet_protocol::rpc::codes::DUPLICATE_NAME);
    }

    #[test]
    fn test_inbound_loss_clears_receiving_side_only() {
        let mut dir = directory();
        let (tx, _rx) = mpsc::channel(1);
        dir.set_peer_inbound("N2", ConnectionId(1)).unwrap();
        dir.set_peer_outbound("N2", "127.0.0.1:60001", tx);

        assert_eq!(dir.clear_peer_inbound(ConnectionId(1)), Some("N2".into()));
        let peer = dir.peer("N2").unwrap();
        assert!(!peer.signed_in_in);
        assert!(peer.signed_in_out);
    }

    #[test]
    fn test_global_components_merges_replicas() {
        let mut dir = directory();
        dir.add_component("local1", ConnectionId(1), STALE).unwrap();
        dir.set_remote_components("N2", vec!["remote1".into(), "remote2".into()]);

        let global = dir.global_components();
        assert_eq!(global["N1"], vec!["local1"]);
        assert_eq!(global["N2"], vec!["remote1", "remote2"]);
    }
}
