//! Benchnet protocol -- wire envelopes, frame codec, JSON-RPC content layer.
//!
//! Control plane: multipart datagrams over TCP, routed by Coordinators.
//! Data plane: topic-prefixed datagrams fanned out by the proxy.

pub mod codec;
pub mod message;
pub mod name;
pub mod rpc;
pub mod timing;

pub use codec::{ControlCodec, DataCodec, FrameCodec};
pub use message::{
    ControlHeader, ControlMessage, ConversationId, DataHeader, DataMessage, MessageType,
};
pub use name::FullName;
pub use timing::{ProtocolTiming, DEFAULT_TIMING};

/// Version byte of the control wire format.
pub const WIRE_VERSION: u8 = 0;

/// Control header length: conversation_id(16) || message_id(3) || message_type(1).
pub const CONTROL_HEADER_LEN: usize = 20;

/// Data header length: conversation_id(16) || message_type(1).
pub const DATA_HEADER_LEN: usize = 17;

/// Default port of a Coordinator's routed control socket.
pub const COORDINATOR_PORT: u16 = 12300;

/// Default port the proxy receives published data on.
pub const PROXY_INGRESS_PORT: u16 = 11100;

/// Default port the proxy re-emits data on.
pub const PROXY_EGRESS_PORT: u16 = 11099;

/// Default ingress port of the log-stream proxy instance.
pub const LOG_INGRESS_PORT: u16 = 11098;

/// Default egress port of the log-stream proxy instance.
pub const LOG_EGRESS_PORT: u16 = 11097;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
