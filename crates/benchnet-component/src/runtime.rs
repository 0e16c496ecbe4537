//! Component runtime -- sign-in state machine, heartbeat, dispatch loop.
//!
//! The `Component` owns its transport session and runs the dispatch loop in
//! one task. Cloneable `ComponentHandle`s submit work through a command
//! channel and await replies through the correlation buffer.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};

use benchnet_protocol::name::COORDINATOR_LOCAL_NAME;
use benchnet_protocol::rpc::{codes, Request, Response, RpcEnvelope, RpcItem};
use benchnet_protocol::{ControlMessage, FullName, ProtocolTiming, DEFAULT_TIMING};

use crate::correlation::CorrelationBuffer;
use crate::registry::RpcRegistry;
use crate::transport::Session;
use crate::ComponentError;

/// Sign-in life cycle of a Component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInState {
    Unsigned,
    SigningIn,
    Signed,
    Failed,
}

pub(crate) enum Command {
    Send(ControlMessage),
    ShutDown,
}

struct Shared {
    full_name: RwLock<FullName>,
    signed_in: AtomicBool,
    next_rpc_id: AtomicI64,
}

/// The owner of one routed connection; drives the dispatch loop.
pub struct Component {
    session: Session,
    registry: RpcRegistry,
    buffer: CorrelationBuffer,
    timing: ProtocolTiming,
    state: SignInState,
    shared: Arc<Shared>,
    cmd_tx: mpsc::Sender<Command>,
    cmd_rx: mpsc::Receiver<Command>,
    last_traffic: Instant,
    resign_requested: bool,
    on_unhandled: Box<dyn FnMut(ControlMessage) + Send>,
}

impl Component {
    /// Open the connection to a Coordinator. Sign-in is a separate step so
    /// methods can be registered first.
    pub async fn connect(name: &str, host: &str, port: u16) -> Result<Self, ComponentError> {
        let session = Session::connect(host, port).await?;
        tracing::info!(name, host, port, "connected to coordinator");

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let shared = Arc::new(Shared {
            full_name: RwLock::new(FullName::local_only(name)?),
            signed_in: AtomicBool::new(false),
            next_rpc_id: AtomicI64::new(1),
        });

        let mut registry = RpcRegistry::new();
        registry.register("pong", |_| Ok(Value::Null));
        let shutdown_tx = cmd_tx.clone();
        registry.register("shut_down", move |_| {
            shutdown_tx.try_send(Command::ShutDown).ok();
            Ok(Value::Null)
        });

        Ok(Self {
            session,
            registry,
            buffer: CorrelationBuffer::new(),
            timing: DEFAULT_TIMING,
            state: SignInState::Unsigned,
            shared,
            cmd_tx,
            cmd_rx,
            last_traffic: Instant::now(),
            resign_requested: false,
            on_unhandled: Box::new(|message| {
                tracing::debug!(sender = %message.sender, "dropping unsolicited message");
            }),
        })
    }

    pub fn with_timing(mut self, timing: ProtocolTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn registry_mut(&mut self) -> &mut RpcRegistry {
        &mut self.registry
    }

    /// Replace the asynchronous handler for notifications and orphan replies.
    pub fn on_unhandled<F>(&mut self, handler: F)
    where
        F: FnMut(ControlMessage) + Send + 'static,
    {
        self.on_unhandled = Box::new(handler);
    }

    pub fn handle(&self) -> ComponentHandle {
        ComponentHandle {
            cmd_tx: self.cmd_tx.clone(),
            buffer: self.buffer.clone(),
            shared: self.shared.clone(),
        }
    }

    pub fn full_name(&self) -> FullName {
        self.shared.full_name.read().expect("name lock").clone()
    }

    pub fn state(&self) -> SignInState {
        self.state
    }

    fn next_rpc_id(&self) -> i64 {
        self.shared.next_rpc_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sign in at the Coordinator and adopt the assigned namespace.
    pub async fn sign_in(&mut self) -> Result<(), ComponentError> {
        self.state = SignInState::SigningIn;
        let request = Request::new(self.next_rpc_id(), "sign_in");
        let sender = FullName::local_only(&self.full_name().local)?;
        let message = ControlMessage::rpc(
            FullName::local_only(COORDINATOR_LOCAL_NAME)?,
            sender,
            &RpcEnvelope::single_request(request),
        )?;
        let conversation_id = message.conversation_id();
        self.session.send(message).await?;

        let deadline = Instant::now() + self.timing.ask_timeout();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.state = SignInState::Failed;
                return Err(ComponentError::Timeout);
            }
            let Some(reply) = self.session.poll(remaining).await? else {
                self.state = SignInState::Failed;
                return Err(ComponentError::Timeout);
            };
            if reply.conversation_id() != conversation_id {
                self.handle_incoming(reply).await?;
                continue;
            }
            let response = reply.rpc_content()?.into_single_response().ok_or_else(|| {
                ComponentError::UnexpectedReply("sign-in reply is not a response".into())
            })?;
            return match response.into_result() {
                Ok(_) => {
                    self.finish_sign_in(&reply);
                    Ok(())
                }
                Err(error) => {
                    self.state = SignInState::Failed;
                    // fresh identity before any retry
                    self.session.reconnect().await.ok();
                    tracing::warn!(%error, "sign-in rejected");
                    Err(ComponentError::SignInRejected(error))
                }
            };
        }
    }

    /// Adopt the namespace assigned by the Coordinator.
    fn finish_sign_in(&mut self, reply: &ControlMessage) {
        let local = self.full_name().local;
        let full = FullName {
            namespace: reply.sender.namespace.clone(),
            local,
        };
        *self.shared.full_name.write().expect("name lock") = full.clone();
        self.shared.signed_in.store(true, Ordering::SeqCst);
        self.state = SignInState::Signed;
        self.last_traffic = Instant::now();
        tracing::info!(full_name = %full, "signed in");
    }

    pub async fn sign_out(&mut self) -> Result<(), ComponentError> {
        if self.state != SignInState::Signed {
            return Ok(());
        }
        let request = Request::new(self.next_rpc_id(), "sign_out");
        let message = ControlMessage::rpc(
            FullName::local_only(COORDINATOR_LOCAL_NAME)?,
            self.full_name(),
            &RpcEnvelope::single_request(request),
        )?;
        let conversation_id = message.conversation_id();
        self.session.send(message).await?;

        let deadline = Instant::now() + self.timing.ask_timeout();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!("sign-out timed out");
                break;
            }
            match self.session.poll(remaining).await {
                Ok(Some(reply)) if reply.conversation_id() == conversation_id => break,
                Ok(Some(other)) => self.handle_incoming(other).await?,
                _ => break,
            }
        }
        self.state = SignInState::Unsigned;
        self.shared.signed_in.store(false, Ordering::SeqCst);
        let local = self.full_name().local;
        *self.shared.full_name.write().expect("name lock") = FullName::local_only(&local)?;
        tracing::info!("signed out");
        Ok(())
    }

    /// Run the dispatch loop until shut down. Signs in first if necessary;
    /// signs out on exit.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ComponentError> {
        if self.state != SignInState::Signed {
            self.sign_in().await?;
        }
        let mut heartbeat = tokio::time::interval(self.timing.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                command = self.cmd_rx.recv() => match command {
                    None | Some(Command::ShutDown) => break,
                    Some(Command::Send(mut message)) => {
                        if message.sender.is_empty() {
                            message.sender = self.full_name();
                        }
                        if let Err(error) = self.session.send(message).await {
                            tracing::error!(%error, "send failed");
                        }
                    }
                },
                incoming = self.session.recv() => match incoming {
                    Ok(message) => {
                        if let Err(error) = self.handle_incoming(message).await {
                            tracing::warn!(%error, "failed to handle message");
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%error, "connection lost, reconnecting");
                        self.recover().await;
                    }
                },
                _ = heartbeat.tick() => self.heartbeat_tick().await,
            }

            if self.resign_requested {
                self.resign_requested = false;
                self.state = SignInState::Unsigned;
                self.shared.signed_in.store(false, Ordering::SeqCst);
                if let Err(error) = self.sign_in().await {
                    tracing::error!(%error, "re-sign-in failed");
                }
            }
        }

        self.sign_out().await.ok();
        Ok(())
    }

    /// Interpret one incoming message.
    async fn handle_incoming(&mut self, message: ControlMessage) -> Result<(), ComponentError> {
        self.last_traffic = Instant::now();
        if message.payload.is_empty() {
            return Ok(()); // bare heartbeat
        }

        // The Coordinator telling us we are unknown forces a new sign-in.
        if message.sender.is_coordinator() && self.state == SignInState::Signed {
            if let Ok(RpcEnvelope::Single(RpcItem::Response(Response {
                error: Some(error), ..
            }))) = message.rpc_content()
            {
                if error.code == codes::NOT_SIGNED_IN {
                    tracing::warn!("coordinator does not know us, signing in again");
                    self.resign_requested = true;
                }
            }
        }

        // Awaited replies go to their waiter.
        let message = match self.buffer.deliver(message) {
            None => return Ok(()),
            Some(unclaimed) => unclaimed,
        };

        let raw = message.payload[0].clone();
        match RpcEnvelope::parse(&raw) {
            Err(error) => {
                let reply = ControlMessage::error_reply(&message, self.full_name(), error)?;
                self.session.send(reply).await?;
            }
            Ok(envelope) if envelope.contains_request() => {
                if let Some(response) = self.registry.handle_envelope(&envelope) {
                    let reply = ControlMessage::reply_to(&message, self.full_name(), &response)?;
                    self.session.send(reply).await?;
                }
            }
            Ok(_) => (self.on_unhandled)(message),
        }
        Ok(())
    }

    async fn heartbeat_tick(&mut self) {
        let idle = self.last_traffic.elapsed();
        if idle >= self.timing.heartbeat_timeout() {
            tracing::warn!(idle_secs = idle.as_secs(), "coordinator silent, reconnecting");
            self.recover().await;
        } else if idle >= self.timing.heartbeat_interval() {
            // keepalive; the reply refreshes the traffic timestamp
            let request = Request::new(self.next_rpc_id(), "pong");
            let message = ControlMessage::rpc(
                FullName::local_only(COORDINATOR_LOCAL_NAME).expect("static name"),
                self.full_name(),
                &RpcEnvelope::single_request(request),
            );
            match message {
                Ok(message) => {
                    if let Err(error) = self.session.send(message).await {
                        tracing::warn!(%error, "heartbeat send failed");
                    }
                }
                Err(error) => tracing::error!(%error, "heartbeat compose failed"),
            }
        }
    }

    /// Reconnect with a fresh identity and sign in again.
    async fn recover(&mut self) {
        self.state = SignInState::Unsigned;
        self.shared.signed_in.store(false, Ordering::SeqCst);
        tokio::time::sleep(self.timing.reconnect_delay()).await;
        match self.session.reconnect().await {
            Ok(()) => {
                self.last_traffic = Instant::now();
                if let Err(error) = self.sign_in().await {
                    tracing::error!(%error, "sign-in after reconnect failed");
                }
            }
            Err(error) => tracing::warn!(%error, "reconnect failed"),
        }
    }
}

/// Thread-safe handle for submitting messages and awaiting replies.
#[derive(Clone)]
pub struct ComponentHandle {
    cmd_tx: mpsc::Sender<Command>,
    buffer: CorrelationBuffer,
    shared: Arc<Shared>,
}

impl ComponentHandle {
    pub fn full_name(&self) -> FullName {
        self.shared.full_name.read().expect("name lock").clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.shared.signed_in.load(Ordering::SeqCst)
    }

    /// Submit a message for transmission by the owner task.
    pub async fn send(&self, message: ControlMessage) -> Result<(), ComponentError> {
        self.cmd_tx
            .send(Command::Send(message))
            .await
            .map_err(|_| ComponentError::ConnectionClosed)
    }

    /// Send a message and await the reply with the same conversation id.
    pub async fn ask(
        &self,
        message: ControlMessage,
        timeout: Duration,
    ) -> Result<ControlMessage, ComponentError> {
        let slot = self.buffer.expect(message.conversation_id());
        if self.cmd_tx.send(Command::Send(message)).await.is_err() {
            self.buffer.discard(&slot);
            return Err(ComponentError::ConnectionClosed);
        }
        slot.wait(timeout).await
    }

    /// Call a remote method and await its result.
    pub async fn ask_rpc(
        &self,
        receiver: &str,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ComponentError> {
        let id = self.shared.next_rpc_id.fetch_add(1, Ordering::Relaxed);
        let request = match params {
            Some(params) => Request::with_params(id, method, params),
            None => Request::new(id, method),
        };
        let message = ControlMessage::rpc(
            FullName::parse(receiver)?,
            self.full_name(),
            &RpcEnvelope::single_request(request),
        )?;
        let reply = self.ask(message, timeout).await?;
        let response = reply.rpc_content()?.into_single_response().ok_or_else(|| {
            ComponentError::UnexpectedReply(format!("no response from {receiver}"))
        })?;
        response.into_result().map_err(ComponentError::Rpc)
    }

    /// Stop the owner task's dispatch loop.
    pub async fn shut_down(&self) {
        self.cmd_tx.send(Command::ShutDown).await.ok();
    }
}
