//! Transport session -- one dealer-style connection to a Coordinator.
//!
//! The session serialises and transmits envelopes; it never interprets
//! payloads. The routed socket is not safe to share: exactly one owner task
//! holds the session.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use benchnet_protocol::{ControlCodec, ControlMessage};

use crate::ComponentError;

pub struct Session {
    host: String,
    port: u16,
    framed: Framed<TcpStream, ControlCodec>,
}

impl Session {
    pub async fn connect(host: &str, port: u16) -> Result<Self, ComponentError> {
        Ok(Self {
            host: host.to_owned(),
            port,
            framed: Self::open(host, port).await?,
        })
    }

    async fn open(host: &str, port: u16) -> Result<Framed<TcpStream, ControlCodec>, ComponentError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Framed::new(stream, ControlCodec::new()))
    }

    /// Close and reopen the connection, emitting a fresh transport identity.
    pub async fn reconnect(&mut self) -> Result<(), ComponentError> {
        self.framed = Self::open(&self.host, self.port).await?;
        tracing::debug!(host = %self.host, port = self.port, "session reconnected");
        Ok(())
    }

    pub async fn send(&mut self, message: ControlMessage) -> Result<(), ComponentError> {
        self.framed.send(message).await?;
        Ok(())
    }

    /// Read the next message. Cancel-safe, for use inside `select!`.
    pub async fn recv(&mut self) -> Result<ControlMessage, ComponentError> {
        match self.framed.next().await {
            None => Err(ComponentError::ConnectionClosed),
            Some(Ok(message)) => Ok(message),
            Some(Err(error)) => Err(error.into()),
        }
    }

    /// Read at most one message, waiting up to `timeout`.
    pub async fn poll(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ControlMessage>, ComponentError> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(result) => result.map(Some),
        }
    }
}
