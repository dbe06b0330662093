//! The socket/subscription plane backing receivers, merge receivers, the
//! source detector, and sources (spec.md §4.1).

pub mod error;
pub mod interfaces;
pub mod queue;
pub mod socket;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::net::UdpSocket;

pub use error::NetError;
pub use interfaces::{Interface, InterfaceId, InterfaceSet, InterfaceStatus};
pub use queue::{DrainedOps, OperationQueues, SubscriptionKey};
pub use socket::{IpFamily, SocketId, SocketRef, SocketTable};

use crate::config::BindPolicy;
use crate::universe::UniverseId;

/// A datagram handed up from the socket plane to a receive-thread
/// dispatcher, with enough context to resolve the tracked source and
/// arriving interface (spec.md §4.1 "Read").
#[derive(Debug)]
pub struct Datagram {
    /// The raw bytes received.
    pub bytes: Vec<u8>,
    /// The address the datagram arrived from.
    pub from: SocketAddr,
    /// The interface it arrived on, if determinable (per-NIC mode
    /// determines this directly; shared-socket mode may not).
    pub interface: Option<InterfaceId>,
}

/// Owns the socket table, interface snapshot, and operation queues for one
/// receive thread.
pub struct SocketPlane {
    policy: BindPolicy,
    interfaces: RwLock<InterfaceSet>,
    sockets: RwLock<SocketTable>,
    queues: OperationQueues,
}

impl SocketPlane {
    /// Creates a socket plane over a freshly-discovered interface snapshot.
    pub fn new(policy: BindPolicy) -> Result<Self, NetError> {
        let interfaces = InterfaceSet::discover()?;
        Ok(Self {
            policy,
            interfaces: RwLock::new(interfaces),
            sockets: RwLock::new(SocketTable::new()),
            queues: OperationQueues::new(),
        })
    }

    /// Creates a socket plane over an explicit interface set, bypassing
    /// host enumeration (used by tests and loopback-only configurations).
    pub fn with_interfaces(policy: BindPolicy, interfaces: InterfaceSet) -> Self {
        Self {
            policy,
            interfaces: RwLock::new(interfaces),
            sockets: RwLock::new(SocketTable::new()),
            queues: OperationQueues::new(),
        }
    }

    /// The current interface snapshot.
    pub fn interfaces(&self) -> InterfaceSet {
        self.interfaces.read().clone()
    }

    /// Replaces the interface snapshot, returning the interfaces that were
    /// dropped. Callers (receivers, sources) must react per spec.md §4.1.
    pub fn reset_interfaces(&self, new: Vec<Interface>) -> Vec<Interface> {
        self.interfaces.write().reset(new)
    }

    /// The queued-operation mailboxes for this plane's receive thread.
    pub fn queues(&self) -> &OperationQueues {
        &self.queues
    }

    /// Acquires a socket of `family`, joining `universe`'s multicast group
    /// on every interface in `on_interfaces`. Returns the socket id and the
    /// interfaces that failed to join (not fatal unless all of them fail —
    /// spec.md §4.1 "Failures").
    pub fn join_universe(
        &self,
        family: IpFamily,
        universe: UniverseId,
        on_interfaces: &[Interface],
    ) -> Result<(SocketId, Vec<InterfaceId>), NetError> {
        let socket_id = self.sockets.write().acquire(family, self.policy)?;

        let mut failed = Vec::new();
        {
            let mut sockets = self.sockets.write();
            let socket = sockets.get_mut(socket_id).expect("socket we just acquired is missing");
            for iface in on_interfaces {
                if socket.join_multicast(iface.id, iface.ip, universe).is_err() {
                    failed.push(iface.id);
                }
            }
        }

        if failed.len() == on_interfaces.len() && !on_interfaces.is_empty() {
            self.release_socket(socket_id);
            return Err(NetError::NoUsableInterfaces);
        }

        Ok((socket_id, failed))
    }

    /// Releases one reference on `socket_id`. If this was the last
    /// reference the socket is queued as dead rather than closed inline
    /// (spec.md §5: actual `close()` is deferred to the receive thread).
    pub fn release_socket(&self, socket_id: SocketId) {
        if self.sockets.write().release(socket_id) {
            self.queues.enqueue_dead_socket(socket_id);
        }
    }

    /// Drains and actually closes every socket queued as dead. Called once
    /// per receive-thread loop iteration, after [OperationQueues::drain].
    pub fn close_dead_sockets(&self, dead: &[SocketId]) {
        let mut sockets = self.sockets.write();
        for &id in dead {
            sockets.remove(id);
        }
    }

    /// Sends `buf` to `universe`'s multicast group over `family`, on the
    /// socket actually joined to `interface` if one is known (per-NIC/
    /// multi-NIC fan-out, spec.md §4.1 `sendMulticast(universe, ipPolicy,
    /// buf, netint)`) — falling back to any socket of the right family if
    /// `interface` is `None` or isn't backed by a joined socket (e.g. a
    /// sender with no matching receiver on this host).
    pub async fn send_multicast(
        &self,
        family: IpFamily,
        universe: UniverseId,
        buf: &[u8],
        interface: Option<InterfaceId>,
    ) -> Result<(), NetError> {
        let group: IpAddr = match family {
            IpFamily::V4 => crate::universe::multicast_group_v4(universe).into(),
            IpFamily::V6 => crate::universe::multicast_group_v6(universe).into(),
        };
        self.send_to_any(family, buf, SocketAddr::new(group, socket::SACN_PORT), Some((universe, interface))).await
    }

    /// Sends `buf` to a single unicast destination.
    pub async fn send_unicast(&self, dst: IpAddr, buf: &[u8]) -> Result<(), NetError> {
        let family = if dst.is_ipv4() { IpFamily::V4 } else { IpFamily::V6 };
        self.send_to_any(family, buf, SocketAddr::new(dst, socket::SACN_PORT), None).await
    }

    /// Snapshots every live socket's id and an owned clone of its handle,
    /// for [crate::lifecycle]'s receive loop to poll without holding the
    /// socket table lock across an await point.
    pub(crate) fn socket_snapshot(&self) -> Vec<(SocketId, Arc<UdpSocket>)> {
        self.sockets.read().sockets().iter().map(|s| (s.id(), s.clone_handle())).collect()
    }

    async fn send_to_any(
        &self,
        family: IpFamily,
        buf: &[u8],
        dst: SocketAddr,
        joined_to: Option<(UniverseId, Option<InterfaceId>)>,
    ) -> Result<(), NetError> {
        let sockets = self.sockets.read();
        let preferred = match joined_to {
            Some((universe, Some(interface))) => {
                sockets.sockets().iter().find(|s| s.family() == family && s.joined_to(interface, universe))
            }
            _ => None,
        };
        let socket = preferred
            .or_else(|| sockets.sockets().iter().find(|s| s.family() == family))
            .ok_or(NetError::NoUsableInterfaces)?;
        socket.send_to(buf, dst).await
    }
}
