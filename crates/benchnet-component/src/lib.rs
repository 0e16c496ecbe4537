//! Benchnet component runtime -- the machinery every Component shares.
//!
//! A Component owns one routed connection to its Coordinator, signs in,
//! answers RPC requests through its method registry, and correlates awaited
//! replies by conversation id. Directors and Actors are thin layers on top.

pub mod actor;
pub mod correlation;
pub mod director;
pub mod publisher;
pub mod registry;
pub mod runtime;
pub mod subscriber;
pub mod transport;

pub use actor::ActorRegistry;
pub use correlation::{CorrelationBuffer, ReplySlot};
pub use director::{CoordinatorDirector, Director};
pub use publisher::DataPublisher;
pub use registry::RpcRegistry;
pub use runtime::{Component, ComponentHandle, SignInState};
pub use subscriber::DataSubscriber;
pub use transport::Session;

use benchnet_protocol::rpc::RpcError;
use benchnet_protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    #[error("timed out waiting for a reply")]
    Timeout,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("sign-in rejected: {0}")]
    SignInRejected(RpcError),
    #[error("remote error: {0}")]
    Rpc(RpcError),
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComponentError {
    /// The remote error carried by this failure, if any.
    pub fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            Self::Rpc(error) | Self::SignInRejected(error) => Some(error),
            _ => None,
        }
    }
}
