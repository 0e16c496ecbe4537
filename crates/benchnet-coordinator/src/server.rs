//! Coordinator server -- accept loop, per-connection tasks, and the router.
//!
//! Every connection funnels into one router task that owns the directory and
//! all routing decisions. Connection tasks only frame and unframe bytes;
//! identities exist only inside the router.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Framed;

use benchnet_protocol::rpc::{Request, Response, RpcEnvelope, RpcError, RpcItem};
use benchnet_protocol::{ControlCodec, ControlMessage, FullName, ProtocolError, ProtocolTiming};

use crate::config::CoordinatorConfig;
use crate::directory::{ConnectionId, Directory};
use crate::peers::run_peer_link;
use crate::CoordinatorError;

/// Everything the router reacts to.
pub(crate) enum RouterEvent {
    Inbound {
        id: ConnectionId,
        message: ControlMessage,
    },
    Disconnected {
        id: ConnectionId,
    },
    PeerLinkUp {
        dialed: String,
        namespace: String,
        address: String,
        tx: mpsc::Sender<ControlMessage>,
    },
    PeerLinkFailed {
        dialed: String,
        retry: bool,
    },
    PeerLinkDown {
        namespace: String,
    },
    PeerInbound {
        namespace: String,
        message: ControlMessage,
    },
}

#[derive(Clone)]
enum ConnKind {
    /// Not signed in; only sign-in requests and keepalives pass.
    Anonymous,
    /// A signed-in Component with this local name.
    Component(String),
    /// The receiving side of a peer Coordinator link.
    Peer(String),
}

struct ConnState {
    tx: mpsc::Sender<ControlMessage>,
    kind: ConnKind,
}

#[derive(Clone)]
enum Origin {
    Local(ConnectionId),
    PeerLink(String),
}

pub struct CoordinatorServer {
    config: CoordinatorConfig,
    listener: TcpListener,
}

impl CoordinatorServer {
    /// Bind the routed control socket. Startup fails fast if it cannot.
    pub async fn bind(mut config: CoordinatorConfig) -> Result<Self, CoordinatorError> {
        let bind_addr = format!("0.0.0.0:{}", config.port);
        let listener =
            TcpListener::bind(&bind_addr)
                .await
                .map_err(|source| CoordinatorError::Bind {
                    addr: bind_addr,
                    source,
                })?;
        if config.port == 0 {
            // ephemeral bind: advertise the actual port
            config.port = listener.local_addr()?.port();
        }
        tracing::info!(
            namespace = %config.namespace,
            address = %config.address(),
            "coordinator listening"
        );
        Ok(Self { config, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Route messages until shut down.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), CoordinatorError> {
        let Self { config, listener } = self;
        let full_name = FullName::coordinator(&config.namespace)?;
        let (events_tx, mut events_rx) = mpsc::channel(1024);

        let mut router = Router {
            directory: Directory::new(&config.namespace, &config.address()),
            conns: HashMap::new(),
            dialing: HashSet::new(),
            full_name,
            timing: config.timing,
            events_tx,
            next_conn: 0,
            next_rpc_id: 1,
            running: true,
        };

        // sign in at the configured peers
        for entry in &config.peers {
            router.ensure_peer(&entry.namespace, &entry.address);
        }

        let mut sweep = tokio::time::interval(config.timing.directory_sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while router.running {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => router.accept(stream, remote),
                    Err(error) => tracing::warn!(%error, "accept failed"),
                },
                event = events_rx.recv() => match event {
                    None => break,
                    Some(event) => router.handle_event(event),
                },
                _ = sweep.tick() => router.sweep(),
            }
        }

        tracing::info!(namespace = %config.namespace, "coordinator stopped");
        Ok(())
    }
}

struct Router {
    directory: Directory,
    conns: HashMap<ConnectionId, ConnState>,
    /// Namespaces with a dial task in flight.
    dialing: HashSet<String>,
    full_name: FullName,
    timing: ProtocolTiming,
    events_tx: mpsc::Sender<RouterEvent>,
    next_conn: u64,
    next_rpc_id: i64,
    running: bool,
}

impl Router {
    fn accept(&mut self, stream: TcpStream, remote: SocketAddr) {
        self.next_conn += 1;
        let id = ConnectionId(self.next_conn);
        let (tx, rx) = mpsc::channel(256);
        self.conns.insert(
            id,
            ConnState {
                tx,
                kind: ConnKind::Anonymous,
            },
        );
        tracing::debug!(conn = %id, %remote, "connection accepted");
        tokio::spawn(run_connection(id, stream, rx, self.events_tx.clone()));
    }

    fn handle_event(&mut self, event: RouterEvent) {
        match event {
            RouterEvent::Inbound { id, message } => self.route_from_local(id, message),
            RouterEvent::Disconnected { id } => self.connection_lost(id),
            RouterEvent::PeerLinkUp {
                dialed,
                namespace,
                address,
                tx,
            } => self.peer_link_up(dialed, namespace, address, tx),
            RouterEvent::PeerLinkFailed { dialed, retry } => {
                self.dialing.remove(&dialed);
                let address = self
                    .directory
                    .peer(&dialed)
                    .map(|peer| peer.address.clone())
                    .unwrap_or_default();
                if retry && !address.is_empty() {
                    self.spawn_peer_link(&dialed, &address, Some(self.timing.reconnect_delay()));
                }
            }
            RouterEvent::PeerLinkDown { namespace } => {
                tracing::warn!(peer = %namespace, "peer link down");
                self.directory.mark_peer_down(&namespace);
                let address = self
                    .directory
                    .peer(&namespace)
                    .map(|peer| peer.address.clone())
                    .unwrap_or_default();
                if !address.is_empty() {
                    self.spawn_peer_link(&namespace, &address, Some(self.timing.reconnect_delay()));
                }
            }
            RouterEvent::PeerInbound { namespace, message } => {
                self.directory.update_peer_heartbeat(&namespace);
                self.route_message(Origin::PeerLink(namespace), message);
            }
        }
    }

    fn connection_lost(&mut self, id: ConnectionId) {
        self.conns.remove(&id);
        let gone = self.directory.remove_components_with_identity(id);
        if !gone.is_empty() {
            tracing::info!(conn = %id, components = ?gone, "components gone with connection");
            self.replicate_directory();
        }
        if let Some(namespace) = self.directory.clear_peer_inbound(id) {
            tracing::info!(conn = %id, peer = %namespace, "peer inbound link lost");
        }
    }

    fn peer_link_up(
        &mut self,
        dialed: String,
        namespace: String,
        address: String,
        tx: mpsc::Sender<ControlMessage>,
    ) {
        self.dialing.remove(&dialed);
        if namespace == *self.directory.namespace() {
            tracing::warn!(%address, "dialled myself, dropping link");
            return;
        }
        tracing::info!(peer = %namespace, %address, "peer link up");
        self.directory.set_peer_outbound(&namespace, &address, tx);
        // exchange directories with the fresh peer
        self.send_directory_to_peer(&namespace);
    }

    /// Handle one message read from a local connection.
    fn route_from_local(&mut self, id: ConnectionId, message: ControlMessage) {
        let kind = match self.conns.get(&id) {
            Some(conn) => conn.kind.clone(),
            None => return,
        };
        match kind {
            ConnKind::Component(name) => {
                let namespace_ok = message.sender.namespace.is_empty()
                    || message.sender.namespace == *self.directory.namespace();
                if message.sender.local != name || !namespace_ok {
                    tracing::warn!(
                        conn = %id,
                        claimed = %message.sender,
                        signed_in_as = %name,
                        "sender does not match sign-in"
                    );
                    self.reply_direct_error(id, &message, RpcError::not_signed_in());
                    return;
                }
                self.directory.update_component_heartbeat(&name, id);
            }
            ConnKind::Peer(namespace) => {
                self.directory.update_peer_heartbeat(&namespace);
            }
            ConnKind::Anonymous => {
                if !allowed_pre_sign_in(&message) {
                    self.reply_direct_error(id, &message, RpcError::not_signed_in());
                    return;
                }
            }
        }
        self.route_message(Origin::Local(id), message);
    }

    /// The routing decision for one frame. Failures are answered on the
    /// reverse path, the connection the frame arrived on; replies we compose
    /// are never routed, so errors cannot cascade.
    fn route_message(&mut self, origin: Origin, mut message: ControlMessage) {
        if message.sender.namespace.is_empty() {
            message.sender.namespace = self.directory.namespace().to_owned();
        }

        let own = self.directory.namespace().to_owned();
        let receiver_namespace = message.receiver.namespace.clone();

        if !receiver_namespace.is_empty() && receiver_namespace != own {
            self.forward_to_peer(origin, message);
        } else if message.receiver.is_coordinator() {
            self.handle_admin(origin, message);
        } else {
            match self.directory.component_identity(&message.receiver.local) {
                Some(identity) => {
                    let tx = self.conns.get(&identity).map(|conn| conn.tx.clone());
                    match tx {
                        Some(tx) => {
                            if tx.try_send(message).is_err() {
                                tracing::warn!(conn = %identity, "local delivery queue full, dropping");
                            }
                        }
                        None => tracing::warn!(conn = %identity, "record without connection"),
                    }
                }
                None => {
                    tracing::debug!(receiver = %message.receiver, "receiver unknown");
                    let receiver = message.receiver.to_string();
                    self.routing_failure(
                        &origin,
                        &message,
                        RpcError::receiver_unknown().with_data(Value::String(receiver)),
                    );
                }
            }
        }
    }

    fn forward_to_peer(&mut self, origin: Origin, message: ControlMessage) {
        let namespace = message.receiver.namespace.clone();
        let stale = self.timing.peer_stale();
        let link = self.directory.peer(&namespace).and_then(|peer| {
            peer.is_healthy(stale)
                .then(|| peer.outbound.clone())
                .flatten()
        });
        match link {
            Some(tx) => {
                if tx.try_send(message.clone()).is_err() {
                    tracing::warn!(peer = %namespace, "peer queue refused, marking down");
                    self.directory.mark_peer_down(&namespace);
                    let address = self
                        .directory
                        .peer(&namespace)
                        .map(|peer| peer.address.clone())
                        .unwrap_or_default();
                    if !address.is_empty() {
                        self.spawn_peer_link(
                            &namespace,
                            &address,
                            Some(self.timing.reconnect_delay()),
                        );
                    }
                    self.routing_failure(
                        &origin,
                        &message,
                        RpcError::node_unknown().with_data(Value::String(namespace)),
                    );
                }
            }
            None => {
                tracing::debug!(peer = %namespace, "node unknown or unhealthy");
                self.routing_failure(
                    &origin,
                    &message,
                    RpcError::node_unknown().with_data(Value::String(namespace)),
                );
            }
        }
    }

    /// Answer a routing failure towards the original sender, on the reverse
    /// path. Replies to our own replies are impossible by construction.
    fn routing_failure(&mut self, origin: &Origin, original: &ControlMessage, error: RpcError) {
        if !original_expects_reply(original) {
            // response direction: drop instead of answering an answer
            return;
        }
        match ControlMessage::error_reply(original, self.full_name.clone(), error) {
            Ok(reply) => self.send_direct(origin, reply),
            Err(error) => tracing::error!(%error, "error reply compose failed"),
        }
    }

    fn reply_direct_error(&mut self, id: ConnectionId, original: &ControlMessage, error: RpcError) {
        match ControlMessage::error_reply(original, self.full_name.clone(), error) {
            Ok(reply) => {
                if let Some(conn) = self.conns.get(&id) {
                    conn.tx.try_send(reply).ok();
                }
            }
            Err(error) => tracing::error!(%error, "error reply compose failed"),
        }
    }

    fn send_direct(&mut self, origin: &Origin, message: ControlMessage) {
        match origin {
            Origin::Local(id) => {
                if let Some(conn) = self.conns.get(id) {
                    conn.tx.try_send(message).ok();
                }
            }
            Origin::PeerLink(namespace) => {
                let link = self
                    .directory
                    .peer(namespace)
                    .and_then(|peer| peer.outbound.clone());
                if let Some(tx) = link {
                    tx.try_send(message).ok();
                }
            }
        }
    }

    // -- Administrative RPC --

    fn handle_admin(&mut self, origin: Origin, message: ControlMessage) {
        if message.payload.is_empty() {
            return; // bare heartbeat
        }
        let envelope = match RpcEnvelope::parse(&message.payload[0]) {
            Err(error) => {
                self.admin_reply(
                    &origin,
                    &message,
                    RpcEnvelope::single_response(Response::error(None, error)),
                );
                return;
            }
            Ok(envelope) => envelope,
        };
        let (items, was_batch) = match envelope {
            RpcEnvelope::Single(item) => (vec![item], false),
            RpcEnvelope::Batch(items) => (items, true),
        };

        let mut responses = Vec::new();
        for item in &items {
            match item {
                RpcItem::Request(request) => {
                    if let Some(response) = self.admin_dispatch(&origin, &message, request) {
                        responses.push(RpcItem::Response(response));
                    }
                }
                // replies to our own pings and the like
                RpcItem::Response(_) => {}
            }
        }
        if responses.is_empty() {
            return;
        }
        let reply = if was_batch {
            RpcEnvelope::Batch(responses)
        } else {
            match responses.pop() {
                Some(RpcItem::Response(response)) => RpcEnvelope::single_response(response),
                _ => return,
            }
        };
        self.admin_reply(&origin, &message, reply);
    }

    fn admin_reply(&mut self, origin: &Origin, original: &ControlMessage, content: RpcEnvelope) {
        let reply = match ControlMessage::reply_to(original, self.full_name.clone(), &content) {
            Ok(reply) => reply,
            Err(error) => {
                tracing::error!(%error, "admin reply compose failed");
                return;
            }
        };
        // always the reverse path: the connection the request arrived on
        self.send_direct(origin, reply);
    }

    fn admin_dispatch(
        &mut self,
        origin: &Origin,
        message: &ControlMessage,
        request: &Request,
    ) -> Option<Response> {
        let outcome = match request.method.as_str() {
            "sign_in" => self.admin_sign_in(origin, message),
            "sign_out" => self.admin_sign_out(origin, message),
            "pong" => Ok(Value::Null),
            "send_local_components" => Ok(json!(self.directory.component_names())),
            "send_nodes" => Ok(json!(self.directory.nodes_map())),
            "send_global_components" => Ok(json!(self.directory.global_components())),
            "add_nodes" => self.admin_add_nodes(&request.params),
            "set_nodes" => self.admin_set_nodes(&request.params),
            "set_local_components" => self.admin_set_local_components(message, &request.params),
            "coordinator_sign_in" => self.admin_coordinator_sign_in(origin, message),
            "coordinator_sign_out" => self.admin_coordinator_sign_out(origin, message),
            "shut_down" => {
                tracing::info!("shut down by request");
                self.running = false;
                Ok(Value::Null)
            }
            _ => Err(RpcError::method_not_found()),
        };
        if request.is_notification() {
            return None;
        }
        Some(match outcome {
            Ok(value) => Response::result(request.id.clone(), value),
            Err(error) => Response::error(request.id.clone(), error),
        })
    }

    fn admin_sign_in(
        &mut self,
        origin: &Origin,
        message: &ControlMessage,
    ) -> Result<Value, RpcError> {
        let Origin::Local(id) = origin else {
            return Err(RpcError::invalid_request());
        };
        let name = message.sender.local.clone();
        if name.is_empty() || message.sender.is_coordinator() {
            return Err(RpcError::invalid_params());
        }
        self.directory
            .add_component(&name, *id, self.timing.component_expiration())?;
        if let Some(conn) = self.conns.get_mut(id) {
            conn.kind = ConnKind::Component(name.clone());
        }
        tracing::info!(component = %name, conn = %id, "component signed in");
        self.replicate_directory();
        Ok(Value::Null)
    }

    fn admin_sign_out(
        &mut self,
        origin: &Origin,
        message: &ControlMessage,
    ) -> Result<Value, RpcError> {
        let Origin::Local(id) = origin else {
            return Err(RpcError::invalid_request());
        };
        let name = message.sender.local.clone();
        self.directory.remove_component(&name, Some(*id))?;
        if let Some(conn) = self.conns.get_mut(id) {
            conn.kind = ConnKind::Anonymous;
        }
        tracing::info!(component = %name, "component signed out");
        self.replicate_directory();
        Ok(Value::Null)
    }

    fn admin_coordinator_sign_in(
        &mut self,
        origin: &Origin,
        message: &ControlMessage,
    ) -> Result<Value, RpcError> {
        let Origin::Local(id) = origin else {
            return Err(RpcError::invalid_request());
        };
        let namespace = message.sender.namespace.clone();
        if namespace.is_empty()
            || namespace == *self.directory.namespace()
            || !message.sender.is_coordinator()
        {
            return Err(RpcError::duplicate_name());
        }
        self.directory.set_peer_inbound(&namespace, *id)?;
        if let Some(conn) = self.conns.get_mut(id) {
            conn.kind = ConnKind::Peer(namespace.clone());
        }
        tracing::info!(peer = %namespace, conn = %id, "peer coordinator signed in");
        Ok(Value::Null)
    }

    fn admin_coordinator_sign_out(
        &mut self,
        origin: &Origin,
        message: &ControlMessage,
    ) -> Result<Value, RpcError> {
        let Origin::Local(id) = origin else {
            return Err(RpcError::invalid_request());
        };
        let namespace = message.sender.namespace.clone();
        let matches = matches!(
            self.conns.get(id).map(|conn| &conn.kind),
            Some(ConnKind::Peer(ns)) if *ns == namespace
        );
        if !matches {
            return Err(RpcError::server_error()
                .with_data(Value::String("identity does not match".into())));
        }
        self.directory.remove_peer(&namespace);
        if let Some(conn) = self.conns.get_mut(id) {
            conn.kind = ConnKind::Anonymous;
        }
        tracing::info!(peer = %namespace, "peer coordinator signed out");
        Ok(Value::Null)
    }

    fn admin_add_nodes(&mut self, params: &Option<Value>) -> Result<Value, RpcError> {
        for (namespace, address) in nodes_param(params)? {
            // existing entries stay untouched
            if self.directory.peer(&namespace).is_none() {
                self.ensure_peer(&namespace, &address);
            }
        }
        Ok(Value::Null)
    }

    fn admin_set_nodes(&mut self, params: &Option<Value>) -> Result<Value, RpcError> {
        for (namespace, address) in nodes_param(params)? {
            self.ensure_peer(&namespace, &address);
        }
        Ok(Value::Null)
    }

    fn admin_set_local_components(
        &mut self,
        message: &ControlMessage,
        params: &Option<Value>,
    ) -> Result<Value, RpcError> {
        let namespace = message.sender.namespace.clone();
        if namespace.is_empty() || namespace == *self.directory.namespace() {
            return Err(RpcError::invalid_request());
        }
        let names = components_param(params)?;
        self.directory.set_remote_components(&namespace, names);
        Ok(Value::Null)
    }

    // -- Peer link management and directory replication --

    /// Make sure a peer record exists and a link is being established.
    fn ensure_peer(&mut self, namespace: &str, address: &str) {
        if namespace == self.directory.namespace() {
            return;
        }
        self.directory.upsert_peer_address(namespace, address);
        let has_link = self
            .directory
            .peer(namespace)
            .map(|peer| peer.outbound.is_some())
            .unwrap_or(false);
        if has_link || self.dialing.contains(namespace) {
            return;
        }
        let address = self
            .directory
            .peer(namespace)
            .map(|peer| peer.address.clone())
            .unwrap_or_default();
        if address.is_empty() {
            return; // learned of the namespace, but not where it lives
        }
        self.spawn_peer_link(namespace, &address, None);
    }

    fn spawn_peer_link(&mut self, namespace: &str, address: &str, delay: Option<Duration>) {
        if self.dialing.contains(namespace) {
            return;
        }
        self.dialing.insert(namespace.to_owned());
        let dialed = namespace.to_owned();
        let address = address.to_owned();
        let own_name = self.full_name.clone();
        let timing = self.timing;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            run_peer_link(dialed, address, own_name, timing, events).await;
        });
    }

    /// Push the full peer map and the local component list to one peer.
    fn send_directory_to_peer(&mut self, namespace: &str) {
        let nodes = self.directory.nodes_map();
        let components = self.directory.component_names();
        let link = self
            .directory
            .peer(namespace)
            .and_then(|peer| peer.outbound.clone());
        let Some(tx) = link else { return };
        let Ok(receiver) = FullName::coordinator(namespace) else {
            return;
        };
        for request in [
            Request::notification_with_params("set_nodes", json!({ "nodes": nodes })),
            Request::notification_with_params(
                "set_local_components",
                json!({ "components": components }),
            ),
        ] {
            match ControlMessage::rpc(
                receiver.clone(),
                self.full_name.clone(),
                &RpcEnvelope::single_request(request),
            ) {
                Ok(message) => {
                    tx.try_send(message).ok();
                }
                Err(error) => tracing::error!(%error, "replication compose failed"),
            }
        }
    }

    /// Broadcast the directory to every healthy peer. Full maps every time;
    /// O(components x peers) chatter is fine at lab scale.
    fn replicate_directory(&mut self) {
        for namespace in self
            .directory
            .healthy_peer_namespaces(self.timing.peer_stale())
        {
            self.send_directory_to_peer(&namespace);
        }
    }

    // -- Maintenance sweep --

    fn sweep(&mut self) {
        let expiration = self.timing.component_expiration();

        // admonish silent components with a ping
        for (identity, name) in self.directory.expired_components(expiration) {
            tracing::debug!(component = %name, "component silent, pinging");
            self.ping_component(identity, &name);
        }

        // drop the long-dead
        let dead = self.directory.drop_dead_components(expiration);
        if !dead.is_empty() {
            tracing::info!(components = ?dead, "components expired");
            self.replicate_directory();
        }

        // keep peer links warm, redial stale ones
        let stale = self.timing.peer_stale();
        for namespace in self.directory.peer_namespaces() {
            let Some(peer) = self.directory.peer(&namespace) else {
                continue;
            };
            let elapsed = peer.last_heartbeat.elapsed();
            let address = peer.address.clone();
            let has_link = peer.outbound.is_some();
            if has_link && elapsed > stale {
                tracing::warn!(peer = %namespace, "peer silent, tearing link down");
                self.directory.mark_peer_down(&namespace);
                if !address.is_empty() {
                    self.spawn_peer_link(&namespace, &address, Some(self.timing.reconnect_delay()));
                }
            } else if has_link && elapsed > stale / 3 {
                self.ping_peer(&namespace);
            }
        }
    }

    fn ping_component(&mut self, identity: ConnectionId, name: &str) {
        let Some(conn) = self.conns.get(&identity) else {
            return;
        };
        let tx = conn.tx.clone();
        self.next_rpc_id += 1;
        let request = Request::new(self.next_rpc_id, "pong");
        let Ok(receiver) = FullName::new(self.directory.namespace(), name) else {
            return;
        };
        if let Ok(message) = ControlMessage::rpc(
            receiver,
            self.full_name.clone(),
            &RpcEnvelope::single_request(request),
        ) {
            tx.try_send(message).ok();
        }
    }

    fn ping_peer(&mut self, namespace: &str) {
        let link = self
            .directory
            .peer(namespace)
            .and_then(|peer| peer.outbound.clone());
        let Some(tx) = link else { return };
        self.next_rpc_id += 1;
        let request = Request::new(self.next_rpc_id, "pong");
        let Ok(receiver) = FullName::coordinator(namespace) else {
            return;
        };
        if let Ok(message) = ControlMessage::rpc(
            receiver,
            self.full_name.clone(),
            &RpcEnvelope::single_request(request),
        ) {
            tx.try_send(message).ok();
        }
    }
}

/// Whether a routing failure for this message deserves an error reply:
/// only frames carrying a request do, responses are dropped.
fn original_expects_reply(message: &ControlMessage) -> bool {
    match message.payload.first() {
        None => false,
        Some(raw) => RpcEnvelope::parse(raw)
            .map(|envelope| envelope.contains_request())
            .unwrap_or(false),
    }
}

/// Before sign-in, only sign-in requests and keepalives addressed to the
/// Coordinator may pass.
fn allowed_pre_sign_in(message: &ControlMessage) -> bool {
    if !message.receiver.is_coordinator() {
        return false;
    }
    let Some(first) = message.payload.first() else {
        return false;
    };
    let Ok(envelope) = RpcEnvelope::parse(first) else {
        return false;
    };
    matches!(
        envelope.single_method(),
        Some("sign_in" | "coordinator_sign_in" | "pong")
    )
}

fn nodes_param(params: &Option<Value>) -> Result<Vec<(String, String)>, RpcError> {
    let params = params.as_ref().ok_or_else(RpcError::invalid_params)?;
    let map = params
        .get("nodes")
        .unwrap_or(params)
        .as_object()
        .ok_or_else(RpcError::invalid_params)?;
    map.iter()
        .map(|(namespace, address)| {
            let address = address.as_str().ok_or_else(RpcError::invalid_params)?;
            Ok((namespace.clone(), address.to_owned()))
        })
        .collect()
}

fn components_param(params: &Option<Value>) -> Result<Vec<String>, RpcError> {
    let params = params.as_ref().ok_or_else(RpcError::invalid_params)?;
    let list = params
        .get("components")
        .unwrap_or(params)
        .as_array()
        .ok_or_else(RpcError::invalid_params)?;
    list.iter()
        .map(|name| {
            name.as_str()
                .map(str::to_owned)
                .ok_or_else(RpcError::invalid_params)
        })
        .collect()
}

/// Frame and unframe one connection; all decisions stay with the router.
async fn run_connection(
    id: ConnectionId,
    stream: TcpStream,
    mut outgoing: mpsc::Receiver<ControlMessage>,
    events: mpsc::Sender<RouterEvent>,
) {
    if let Err(error) = stream.set_nodelay(true) {
        tracing::debug!(conn = %id, %error, "set_nodelay failed");
    }
    let mut framed = Framed::new(stream, ControlCodec::new());
    let mut logged_malformed = false;

    loop {
        tokio::select! {
            out = outgoing.recv() => match out {
                None => break, // router let go of us
                Some(message) => {
                    if framed.send(message).await.is_err() {
                        break;
                    }
                }
            },
            incoming = framed.next() => match incoming {
                None => break,
                Some(Ok(message)) => {
                    if events.send(RouterEvent::Inbound { id, message }).await.is_err() {
                        break;
                    }
                }
                Some(Err(error)) => {
                    // malformed frame: drop it, log once per connection
                    if !logged_malformed {
                        tracing::warn!(conn = %id, %error, "dropping malformed frame");
                        logged_malformed = true;
                    }
                    if matches!(error, ProtocolError::MessageTooLarge { .. }) {
                        // cannot resynchronise, close
                        break;
                    }
                }
            },
        }
    }
    events.send(RouterEvent::Disconnected { id }).await.ok();
}
