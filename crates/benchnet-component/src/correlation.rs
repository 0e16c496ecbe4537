//! Correlation buffer -- pairs replies with waiters by conversation id.
//!
//! A mutex-guarded map of one-shot senders. At most one waiter exists per
//! conversation id; deliveries that find no waiter are handed back so the
//! dispatch layer can treat them as unsolicited messages.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use benchnet_protocol::{ControlMessage, ConversationId};

use crate::ComponentError;

type Waiters = Arc<Mutex<HashMap<[u8; 16], oneshot::Sender<ControlMessage>>>>;

#[derive(Clone, Default)]
pub struct CorrelationBuffer {
    waiters: Waiters,
}

/// A registered pending reply.
pub struct ReplySlot {
    conversation_id: ConversationId,
    rx: oneshot::Receiver<ControlMessage>,
    waiters: Waiters,
}

impl CorrelationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending reply. A later `expect` for the same id replaces
    /// the earlier waiter.
    pub fn expect(&self, conversation_id: ConversationId) -> ReplySlot {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .expect("correlation lock")
            .insert(*conversation_id.as_bytes(), tx);
        ReplySlot {
            conversation_id,
            rx,
            waiters: self.waiters.clone(),
        }
    }

    /// Wake the waiter registered for this message's conversation id.
    ///
    /// Returns the message back if no waiter claims it (none registered, or
    /// the waiter already timed out).
    pub fn deliver(&self, message: ControlMessage) -> Option<ControlMessage> {
        let tx = self
            .waiters
            .lock()
            .expect("correlation lock")
            .remove(message.conversation_id().as_bytes());
        match tx {
            Some(tx) => tx.send(message).err(),
            None => Some(message),
        }
    }

    pub fn discard(&self, slot: &ReplySlot) {
        self.waiters
            .lock()
            .expect("correlation lock")
            .remove(slot.conversation_id.as_bytes());
    }

    pub fn pending(&self) -> usize {
        self.waiters.lock().expect("correlation lock").len()
    }
}

impl ReplySlot {
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Wait for the reply. Timing out discards the slot; a reply arriving
    /// later is then offered to the dispatch layer as unsolicited.
    pub async fn wait(mut self, timeout: Duration) -> Result<ControlMessage, ComponentError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_closed)) => Err(ComponentError::ConnectionClosed),
            Err(_elapsed) => {
                self.waiters
                    .lock()
                    .expect("correlation lock")
                    .remove(self.conversation_id.as_bytes());
                Err(ComponentError::Timeout)
            }
        }
    }
}
