//! Outbound peer links -- the dealer side of Coordinator federation.
//!
//! One task per peer: dial, `coordinator_sign_in`, then pump queued frames
//! out and feed incoming frames back to the router.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::Framed;

use benchnet_protocol::name::COORDINATOR_LOCAL_NAME;
use benchnet_protocol::rpc::{Request, RpcEnvelope};
use benchnet_protocol::{ControlCodec, ControlMessage, FullName, ProtocolTiming};

use crate::server::RouterEvent;

type PeerFramed = Framed<TcpStream, ControlCodec>;

/// Dial a peer Coordinator, sign in, and run the link until it drops.
pub(crate) async fn run_peer_link(
    dialed: String,
    address: String,
    own_name: FullName,
    timing: ProtocolTiming,
    events: mpsc::Sender<RouterEvent>,
) {
    match sign_in_at(&address, &own_name, &timing).await {
        Err((reason, retry)) => {
            tracing::debug!(peer = %dialed, %address, %reason, "peer sign-in failed");
            events
                .send(RouterEvent::PeerLinkFailed { dialed, retry })
                .await
                .ok();
        }
        Ok((framed, namespace)) => {
            if namespace != dialed {
                tracing::warn!(
                    expected = %dialed,
                    actual = %namespace,
                    "peer answered under a different namespace"
                );
            }
            let (tx, rx) = mpsc::channel(256);
            let up = RouterEvent::PeerLinkUp {
                dialed,
                namespace: namespace.clone(),
                address,
                tx,
            };
            if events.send(up).await.is_err() {
                return; // router gone
            }
            pump(framed, rx, namespace, own_name, events).await;
        }
    }
}

/// Connect and perform the `coordinator_sign_in` handshake.
///
/// Returns the framed connection and the peer's actual namespace (from the
/// acknowledgement's sender frame). The `retry` flag distinguishes transient
/// failures from a rejected sign-in.
async fn sign_in_at(
    address: &str,
    own_name: &FullName,
    timing: &ProtocolTiming,
) -> Result<(PeerFramed, String), (String, bool)> {
    let connect = TcpStream::connect(address);
    let stream = match tokio::time::timeout(timing.ask_timeout(), connect).await {
        Err(_elapsed) => return Err(("connect timed out".into(), true)),
        Ok(Err(error)) => return Err((error.to_string(), true)),
        Ok(Ok(stream)) => stream,
    };
    stream.set_nodelay(true).map_err(|e| (e.to_string(), true))?;
    let mut framed = Framed::new(stream, ControlCodec::new());

    let request = Request::new(1, "coordinator_sign_in");
    let receiver = FullName::local_only(COORDINATOR_LOCAL_NAME).expect("static name");
    let message = ControlMessage::rpc(
        receiver,
        own_name.clone(),
        &RpcEnvelope::single_request(request),
    )
    .map_err(|e| (e.to_string(), false))?;
    let conversation_id = message.conversation_id();
    framed
        .send(message)
        .await
        .map_err(|e| (e.to_string(), true))?;

    let deadline = Instant::now() + timing.ask_timeout();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(("sign-in timed out".into(), true));
        }
        let reply = match tokio::time::timeout(remaining, framed.next()).await {
            Err(_elapsed) => return Err(("sign-in timed out".into(), true)),
            Ok(None) => return Err(("connection closed during sign-in".into(), true)),
            Ok(Some(Err(error))) => return Err((error.to_string(), true)),
            Ok(Some(Ok(reply))) => reply,
        };
        if reply.conversation_id() != conversation_id {
            continue; // nothing is awaited yet, drop it
        }
        let response = reply
            .rpc_content()
            .ok()
            .and_then(RpcEnvelope::into_single_response)
            .ok_or_else(|| ("sign-in reply is not a response".to_string(), false))?;
        return match response.into_result() {
            Ok(_) => Ok((framed, reply.sender.namespace.clone())),
            Err(error) => Err((error.to_string(), false)),
        };
    }
}

/// Pump frames in both directions until the link drops or the router lets
/// go of the queue.
async fn pump(
    mut framed: PeerFramed,
    mut outgoing: mpsc::Receiver<ControlMessage>,
    namespace: String,
    own_name: FullName,
    events: mpsc::Sender<RouterEvent>,
) {
    loop {
        tokio::select! {
            out = outgoing.recv() => match out {
                None => {
                    // intentional teardown: say goodbye, no reconnect
                    sign_out_from(&mut framed, &namespace, &own_name).await;
                    return;
                }
                Some(message) => {
                    if let Err(error) = framed.send(message).await {
                        tracing::warn!(peer = %namespace, %error, "peer link send failed");
                        break;
                    }
                }
            },
            incoming = framed.next() => match incoming {
                None => break,
                Some(Err(error)) => {
                    tracing::warn!(peer = %namespace, %error, "peer link receive failed");
                    break;
                }
                Some(Ok(message)) => {
                    let event = RouterEvent::PeerInbound {
                        namespace: namespace.clone(),
                        message,
                    };
                    if events.send(event).await.is_err() {
                        return; // router gone
                    }
                }
            },
        }
    }
    events
        .send(RouterEvent::PeerLinkDown { namespace })
        .await
        .ok();
}

async fn sign_out_from(framed: &mut PeerFramed, namespace: &str, own_name: &FullName) {
    let Ok(receiver) = FullName::coordinator(namespace) else {
        return;
    };
    let request = Request::notification("coordinator_sign_out");
    if let Ok(message) =
        ControlMessage::rpc(receiver, own_name.clone(), &RpcEnvelope::single_request(request))
    {
        framed.send(message).await.ok();
    }
}
