//! Control- and data-plane envelopes.
//!
//! Control frames: version | receiver | sender | header(20) | payload...
//! Data frames:    topic | header(17) | payload...

use std::fmt;

use bytes::Bytes;

use crate::name::FullName;
use crate::rpc::{RpcEnvelope, RpcError};
use crate::{ProtocolError, CONTROL_HEADER_LEN, DATA_HEADER_LEN, WIRE_VERSION};

/// 16-byte time-ordered correlation key (UUIDv7), generated by the
/// originator of a request and echoed unchanged on the response.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationId([u8; 16]);

impl ConversationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().into_bytes())
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, ProtocolError> {
        let bytes: [u8; 16] = raw.try_into().map_err(|_| {
            ProtocolError::MalformedFrame(format!(
                "conversation id is {} bytes, not 16",
                raw.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        uuid::Uuid::from_bytes(self.0).as_simple().fmt(f)
    }
}

impl fmt::Debug for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConversationId({self})")
    }
}

/// Content type of the payload frames.
///
/// `0` is undefined, `1` is JSON; values >= 128 are user-defined binary.
/// Unknown values are accepted and preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Undefined,
    Json,
    Other(u8),
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::Undefined,
            1 => Self::Json,
            other => Self::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Undefined => 0,
            Self::Json => 1,
            Self::Other(byte) => byte,
        }
    }
}

/// Fixed 20-byte control header.
///
/// `message_id` is reserved: transmitted as zeros, any value accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlHeader {
    pub conversation_id: ConversationId,
    pub message_id: [u8; 3],
    pub message_type: MessageType,
}

impl ControlHeader {
    pub fn new(conversation_id: ConversationId, message_type: MessageType) -> Self {
        Self {
            conversation_id,
            message_id: [0; 3],
            message_type,
        }
    }

    pub fn to_bytes(&self) -> [u8; CONTROL_HEADER_LEN] {
        let mut out = [0u8; CONTROL_HEADER_LEN];
        out[..16].copy_from_slice(self.conversation_id.as_bytes());
        out[16..19].copy_from_slice(&self.message_id);
        out[19] = self.message_type.as_byte();
        out
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, ProtocolError> {
        if raw.len() != CONTROL_HEADER_LEN {
            return Err(ProtocolError::MalformedFrame(format!(
                "control header is {} bytes, not {CONTROL_HEADER_LEN}",
                raw.len()
            )));
        }
        Ok(Self {
            conversation_id: ConversationId::from_slice(&raw[..16])?,
            message_id: raw[16..19].try_into().expect("slice length checked"),
            message_type: MessageType::from_byte(raw[19]),
        })
    }
}

/// Fixed 17-byte data-plane header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub conversation_id: ConversationId,
    pub message_type: MessageType,
}

impl DataHeader {
    pub fn new(conversation_id: ConversationId, message_type: MessageType) -> Self {
        Self {
            conversation_id,
            message_type,
        }
    }

    pub fn to_bytes(&self) -> [u8; DATA_HEADER_LEN] {
        let mut out = [0u8; DATA_HEADER_LEN];
        out[..16].copy_from_slice(self.conversation_id.as_bytes());
        out[16] = self.message_type.as_byte();
        out
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, ProtocolError> {
        if raw.len() != DATA_HEADER_LEN {
            return Err(ProtocolError::MalformedFrame(format!(
                "data header is {} bytes, not {DATA_HEADER_LEN}",
                raw.len()
            )));
        }
        Ok(Self {
            conversation_id: ConversationId::from_slice(&raw[..16])?,
            message_type: MessageType::from_byte(raw[16]),
        })
    }
}

/// A control-plane message: addressing, header, and opaque payload frames.
///
/// For `MessageType::Json` the first payload frame is UTF-8 JSON; further
/// frames are binary attachments referenced by the JSON content.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    pub version: u8,
    pub receiver: FullName,
    pub sender: FullName,
    pub header: ControlHeader,
    pub payload: Vec<Bytes>,
}

impl ControlMessage {
    /// A message without payload (pure heartbeat).
    pub fn empty(receiver: FullName, sender: FullName) -> Self {
        Self {
            version: WIRE_VERSION,
            receiver,
            sender,
            header: ControlHeader::new(ConversationId::generate(), MessageType::Undefined),
            payload: Vec::new(),
        }
    }

    /// A JSON message with a fresh conversation id.
    pub fn rpc(
        receiver: FullName,
        sender: FullName,
        content: &RpcEnvelope,
    ) -> Result<Self, ProtocolError> {
        Self::rpc_with_id(receiver, sender, ConversationId::generate(), content)
    }

    /// A JSON message under a caller-chosen conversation id.
    pub fn rpc_with_id(
        receiver: FullName,
        sender: FullName,
        conversation_id: ConversationId,
        content: &RpcEnvelope,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            version: WIRE_VERSION,
            receiver,
            sender,
            header: ControlHeader::new(conversation_id, MessageType::Json),
            payload: vec![Bytes::from(serde_json::to_vec(content)?)],
        })
    }

    /// Envelope a reply: sender/receiver swapped, conversation id echoed.
    pub fn reply_to(
        request: &ControlMessage,
        sender: FullName,
        content: &RpcEnvelope,
    ) -> Result<Self, ProtocolError> {
        Self::rpc_with_id(
            request.sender.clone(),
            sender,
            request.header.conversation_id,
            content,
        )
    }

    /// Envelope an error reply to `request`.
    pub fn error_reply(
        request: &ControlMessage,
        sender: FullName,
        error: RpcError,
    ) -> Result<Self, ProtocolError> {
        let response = crate::rpc::Response::error(request.rpc_id(), error);
        Self::reply_to(request, sender, &RpcEnvelope::single_response(response))
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.header.conversation_id
    }

    /// Parse the first payload frame as JSON-RPC content.
    pub fn rpc_content(&self) -> Result<RpcEnvelope, ProtocolError> {
        let first = self
            .payload
            .first()
            .ok_or_else(|| ProtocolError::MalformedFrame("no payload frame".into()))?;
        Ok(serde_json::from_slice(first)?)
    }

    /// Id of the single request in the payload, if any.
    ///
    /// Used to address error replies; batches and notifications yield `None`.
    pub fn rpc_id(&self) -> Option<crate::rpc::RequestId> {
        match self.rpc_content() {
            Ok(RpcEnvelope::Single(crate::rpc::RpcItem::Request(req))) => req.id,
            _ => None,
        }
    }

    pub fn to_frames(&self) -> Vec<Bytes> {
        let mut frames = Vec::with_capacity(4 + self.payload.len());
        frames.push(Bytes::copy_from_slice(&[self.version]));
        frames.push(Bytes::from(self.receiver.to_bytes()));
        frames.push(Bytes::from(self.sender.to_bytes()));
        frames.push(Bytes::copy_from_slice(&self.header.to_bytes()));
        frames.extend(self.payload.iter().cloned());
        frames
    }

    pub fn from_frames(frames: Vec<Bytes>) -> Result<Self, ProtocolError> {
        if frames.len() < 4 {
            return Err(ProtocolError::MalformedFrame(format!(
                "control message has {} frames, expected at least 4",
                frames.len()
            )));
        }
        if frames[0].len() != 1 {
            return Err(ProtocolError::MalformedFrame(format!(
                "version frame is {} bytes, not 1",
                frames[0].len()
            )));
        }
        let version = frames[0][0];
        if version != WIRE_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        Ok(Self {
            version,
            receiver: FullName::from_bytes(&frames[1])?,
            sender: FullName::from_bytes(&frames[2])?,
            header: ControlHeader::from_bytes(&frames[3])?,
            payload: frames[4..].to_vec(),
        })
    }
}

/// A data-plane message: topic (the sender's full name), header, data frames.
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    pub topic: String,
    pub header: DataHeader,
    pub frames: Vec<Bytes>,
}

impl DataMessage {
    pub fn new(topic: &str, message_type: MessageType, frames: Vec<Bytes>) -> Self {
        Self {
            topic: topic.to_owned(),
            header: DataHeader::new(ConversationId::generate(), message_type),
            frames,
        }
    }

    /// A single-frame JSON data message.
    pub fn json(topic: &str, data: &serde_json::Value) -> Result<Self, ProtocolError> {
        Ok(Self::new(
            topic,
            MessageType::Json,
            vec![Bytes::from(serde_json::to_vec(data)?)],
        ))
    }

    /// Parse the first data frame as JSON.
    pub fn data(&self) -> Result<serde_json::Value, ProtocolError> {
        let first = self
            .frames
            .first()
            .ok_or_else(|| ProtocolError::MalformedFrame("no data frame".into()))?;
        Ok(serde_json::from_slice(first)?)
    }

    pub fn to_frames(&self) -> Vec<Bytes> {
        let mut frames = Vec::with_capacity(2 + self.frames.len());
        frames.push(Bytes::from(self.topic.clone().into_bytes()));
        frames.push(Bytes::copy_from_slice(&self.header.to_bytes()));
        frames.extend(self.frames.iter().cloned());
        frames
    }

    pub fn from_frames(frames: Vec<Bytes>) -> Result<Self, ProtocolError> {
        if frames.len() < 3 {
            return Err(ProtocolError::MalformedFrame(format!(
                "data message has {} frames, expected at least 3",
                frames.len()
            )));
        }
        let topic = String::from_utf8(frames[0].to_vec())
            .map_err(|_| ProtocolError::MalformedFrame("topic frame is not UTF-8".into()))?;
        Ok(Self {
            topic,
            header: DataHeader::from_bytes(&frames[1])?,
            frames: frames[2..].to_vec(),
        })
    }
}
