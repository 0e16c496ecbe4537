//! Protocol timing profile -- the cadence parameters peers should agree on.
//!
//! Pool-local choices (ask timeouts) live here too so binaries and tests
//! share one set of defaults. All values are overridable per process.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::MAX_DATAGRAM_SIZE;

/// Timing parameters of a control-plane deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolTiming {
    // -- Component heartbeat --
    /// Seconds of silence before a Component sends a keepalive.
    pub heartbeat_interval_secs: u64,
    /// Seconds of silence before a Component declares its Coordinator dead
    /// and reconnects.
    pub heartbeat_timeout_secs: u64,

    // -- Coordinator directory maintenance --
    /// Seconds between two directory sweeps.
    pub directory_sweep_interval_secs: u64,
    /// Seconds before a silent Component is admonished with a ping; removed
    /// after three times this value.
    pub component_expiration_secs: u64,
    /// Seconds before a silent peer Coordinator link counts as unhealthy.
    pub peer_stale_secs: u64,

    // -- Requests --
    /// Default wait for a reply, in milliseconds.
    pub ask_timeout_ms: u64,
    /// Delay before re-dialling a lost peer link.
    pub reconnect_delay_secs: u64,

    // -- Transport --
    /// Wire limit per multipart datagram, in bytes.
    pub max_datagram_bytes: usize,
}

impl ProtocolTiming {
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub const fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub const fn directory_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.directory_sweep_interval_secs)
    }

    pub const fn component_expiration(&self) -> Duration {
        Duration::from_secs(self.component_expiration_secs)
    }

    pub const fn peer_stale(&self) -> Duration {
        Duration::from_secs(self.peer_stale_secs)
    }

    pub const fn ask_timeout(&self) -> Duration {
        Duration::from_millis(self.ask_timeout_ms)
    }

    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl Default for ProtocolTiming {
    fn default() -> Self {
        DEFAULT_TIMING
    }
}

/// Defaults suitable for a lab-scale network.
pub const DEFAULT_TIMING: ProtocolTiming = ProtocolTiming {
    heartbeat_interval_secs: 10,
    heartbeat_timeout_secs: 30,
    directory_sweep_interval_secs: 5,
    component_expiration_secs: 15,
    peer_stale_secs: 30,
    ask_timeout_ms: 5000,
    reconnect_delay_secs: 2,
    max_datagram_bytes: MAX_DATAGRAM_SIZE,
};
