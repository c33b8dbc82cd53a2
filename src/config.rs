//! Relay tunables
//!
//! Queue sizes and keepalive timing shared by the accept loop, the Hub and
//! every session.

use std::time::Duration;

/// Default outbound queue capacity per session
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Default Hub intake capacity
pub const DEFAULT_HUB_CAPACITY: usize = 256;

/// Default read deadline, refreshed by every received frame
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Default deadline for writing a queued message
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(30);

/// Default deadline for writing a ping
pub const DEFAULT_PING_WAIT: Duration = Duration::from_secs(10);

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Outbound queue capacity per session
    pub outbound_capacity: usize,
    /// Hub intake capacity
    pub hub_capacity: usize,
    /// Read deadline
    pub pong_wait: Duration,
    /// Keepalive ping interval, must be shorter than `pong_wait`
    pub ping_period: Duration,
    /// Deadline for writing a ping
    pub ping_wait: Duration,
    /// Deadline for writing a queued message
    pub write_wait: Duration,
}

impl RelayConfig {
    /// Config with the given read deadline and a ping period of 9/10 of it
    pub fn with_pong_wait(pong_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            ..Self::default()
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            hub_capacity: DEFAULT_HUB_CAPACITY,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: DEFAULT_PONG_WAIT * 9 / 10,
            ping_wait: DEFAULT_PING_WAIT,
            write_wait: DEFAULT_WRITE_WAIT,
        }
    }
}
