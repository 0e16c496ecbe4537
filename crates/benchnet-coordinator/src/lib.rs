//! Benchnet coordinator -- routes control-plane messages among Components
//! and federates with peer Coordinators into a multi-namespace mesh.

pub mod config;
pub mod directory;
pub mod peers;
pub mod server;

pub use config::CoordinatorConfig;
pub use directory::{ComponentRecord, ConnectionId, Directory, PeerRecord};
pub use server::CoordinatorServer;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Protocol(#[from] benchnet_protocol::ProtocolError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
