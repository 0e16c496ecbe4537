//! Benchnet proxy -- the data-plane fan-out relay.
//!
//! Publishers push multipart datagrams into the ingress socket; every
//! datagram is re-emitted verbatim to all subscribers on the egress socket.
//! The proxy never parses topic, header, or payload; topic filtering is the
//! subscribers' business.

use std::net::SocketAddr;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, FramedWrite};

use benchnet_protocol::FrameCodec;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capacity of the fan-out bus; slow subscribers skip, they do not block.
const BUS_CAPACITY: usize = 1024;

pub struct ProxyServer {
    ingress: TcpListener,
    egress: TcpListener,
}

impl ProxyServer {
    /// Bind both sockets. Startup fails fast if either bind fails.
    pub async fn bind(ingress_port: u16, egress_port: u16) -> Result<Self, ProxyError> {
        let ingress = Self::bind_one(ingress_port).await?;
        let egress = Self::bind_one(egress_port).await?;
        tracing::info!(
            ingress = %ingress.local_addr()?,
            egress = %egress.local_addr()?,
            "proxy listening"
        );
        Ok(Self { ingress, egress })
    }

    async fn bind_one(port: u16) -> Result<TcpListener, ProxyError> {
        let addr = format!("0.0.0.0:{port}");
        TcpListener::bind(&addr)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })
    }

    pub fn ingress_addr(&self) -> std::io::Result<SocketAddr> {
        self.ingress.local_addr()
    }

    pub fn egress_addr(&self) -> std::io::Result<SocketAddr> {
        self.egress.local_addr()
    }

    /// Relay datagrams until shut down.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ProxyError> {
        let (bus, _) = broadcast::channel::<Vec<Bytes>>(BUS_CAPACITY);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = self.ingress.accept() => match accepted {
                    Ok((stream, remote)) => {
                        tracing::debug!(%remote, "publisher connected");
                        tokio::spawn(run_publisher(stream, bus.clone()));
                    }
                    Err(error) => tracing::warn!(%error, "ingress accept failed"),
                },
                accepted = self.egress.accept() => match accepted {
                    Ok((stream, remote)) => {
                        tracing::debug!(%remote, "subscriber connected");
                        tokio::spawn(run_subscriber(stream, bus.subscribe()));
                    }
                    Err(error) => tracing::warn!(%error, "egress accept failed"),
                },
            }
        }
        tracing::info!("proxy stopped");
        Ok(())
    }
}

/// Read datagrams from one publisher onto the bus.
async fn run_publisher(stream: TcpStream, bus: broadcast::Sender<Vec<Bytes>>) {
    let mut framed = FramedRead::new(stream, FrameCodec::new());
    while let Some(next) = framed.next().await {
        match next {
            Ok(frames) => {
                // no subscribers is fine, the message just vanishes
                bus.send(frames).ok();
            }
            Err(error) => {
                tracing::warn!(%error, "dropping malformed publisher datagram");
                break;
            }
        }
    }
}

/// Re-emit every bus datagram to one subscriber.
async fn run_subscriber(stream: TcpStream, mut bus: broadcast::Receiver<Vec<Bytes>>) {
    let mut framed = FramedWrite::new(stream, FrameCodec::new());
    let mut lag_logged = false;
    loop {
        match bus.recv().await {
            Ok(frames) => {
                if framed.send(frames).await.is_err() {
                    break; // subscriber gone
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                if !lag_logged {
                    tracing::warn!(missed, "subscriber lagging, datagrams skipped");
                    lag_logged = true;
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
