//! Timers and platform policy shared across the receive and transmit paths.
//!
//! Fixed timers are `const`; application-configurable ones are fields on the
//! relevant `*Config` struct with these as their `Default`.

use std::time::Duration;

/// Per-packet network-data-loss timer (fixed, E1.31 §6.7.1).
pub const T_LOSS: Duration = Duration::from_millis(2500);

/// Sampling period length and PAP-wait grace period (fixed).
pub const T_SAMPLE: Duration = Duration::from_millis(1500);

/// Default termination-set notification delay.
pub const DEFAULT_T_WAIT: Duration = Duration::from_millis(1000);

/// Default level keep-alive interval at steady state.
pub const DEFAULT_T_KEEPALIVE: Duration = Duration::from_millis(1000);

/// Default PAP keep-alive interval at steady state.
pub const DEFAULT_T_KEEPALIVE_PAP: Duration = Duration::from_millis(1000);

/// Universe-discovery send interval (fixed).
pub const T_DISCOVERY: Duration = Duration::from_secs(10);

/// Source-detector per-source silence timeout (fixed).
pub const SOURCE_DETECTOR_EXPIRY: Duration = Duration::from_secs(20);

/// Default receive-thread poll timeout.
pub const DEFAULT_T_READ: Duration = Duration::from_millis(100);

/// Default source-thread tick cadence, matching E1.31's recommended maximum
/// refresh rate of ~44 Hz (one level tick, one PAP tick, per cycle).
pub const DEFAULT_SOURCE_TICK_INTERVAL: Duration = Duration::from_millis(23);

/// Number of forced (non-suppressed) packets sent after any data update,
/// per E1.31 §6.6.1.
pub const FORCED_PACKET_COUNT: u32 = 4;

/// Number of terminate packets sent before a universe/destination/source is
/// torn down, per E1.31 §6.2.6.
pub const TERMINATE_PACKET_COUNT: u32 = 3;

/// Maximum number of multicast group memberships a single shared socket
/// will take on before a new [crate::net::SocketRef] is created.
pub const DEFAULT_SOCKET_SHARE_LIMIT: usize = 20;

/// Chooses how receiver sockets are bound, mirroring the reference
/// implementation's `SACN_RECEIVER_LIMIT_BIND`build-time switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindPolicy {
    /// Every [crate::net::SocketRef] binds to the wildcard address on port
    /// 5568. Default off Linux.
    BindAll,
    /// Only one socket per IP family per receive thread is bound; others are
    /// created without binding, to avoid duplicate multicast delivery on
    /// kernels that deliver one copy of a datagram per socket joined to the
    /// same group. Default on Linux.
    BindLimited,
}

impl Default for BindPolicy {
    fn default() -> Self {
        if cfg!(target_os = "linux") {
            BindPolicy::BindLimited
        } else {
            BindPolicy::BindAll
        }
    }
}

/// Which IP families a receiver or source should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpPolicy {
    /// IPv4 only.
    Ipv4Only,
    /// IPv6 only.
    Ipv6Only,
    /// Both families.
    Both,
}

impl IpPolicy {
    /// Whether this policy admits IPv4 sockets.
    pub fn allows_v4(self) -> bool {
        matches!(self, IpPolicy::Ipv4Only | IpPolicy::Both)
    }

    /// Whether this policy admits IPv6 sockets.
    pub fn allows_v6(self) -> bool {
        matches!(self, IpPolicy::Ipv6Only | IpPolicy::Both)
    }
}

impl Default for IpPolicy {
    fn default() -> Self {
        IpPolicy::Ipv4Only
    }
}

/// Whether a universe/socket should be joined per-NIC (one [crate::net::SocketRef]
/// per interface) rather than shared across all interfaces on one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketSharingMode {
    /// One socket shared by all interfaces a universe is joined on.
    #[default]
    Shared,
    /// One socket per interface.
    PerNic,
}
