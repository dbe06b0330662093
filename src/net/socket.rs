//! Shared multicast sockets (spec.md §4.1 "Socket sharing model").

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use super::error::NetError;
use super::interfaces::InterfaceId;
use crate::config::{BindPolicy, DEFAULT_SOCKET_SHARE_LIMIT};
use crate::universe::UniverseId;

/// The UDP port sACN is transmitted and received on (E1.31 §6).
pub const SACN_PORT: u16 = 5568;

/// Which IP family a [SocketRef] was created for. A socket is never shared
/// across families (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

/// An opaque identifier for a [SocketRef] within a [SocketTable].
pub type SocketId = u32;

/// A shared UDP socket joined to zero or more multicast groups on behalf of
/// up to [DEFAULT_SOCKET_SHARE_LIMIT] universes.
pub struct SocketRef {
    id: SocketId,
    family: IpFamily,
    socket: Arc<UdpSocket>,
    refcount: usize,
    joined: HashSet<(InterfaceId, UniverseId)>,
}

impl SocketRef {
    /// Creates and binds a new socket for `family`, honoring `policy` and
    /// whether this is the first socket of its family on the receive
    /// thread (`is_first_of_family` forces a bind even under
    /// [BindPolicy::BindLimited], since exactly one bound socket per family
    /// is required to receive anything at all).
    pub fn bind(
        id: SocketId,
        family: IpFamily,
        policy: BindPolicy,
        is_first_of_family: bool,
    ) -> Result<Self, NetError> {
        let domain = match family {
            IpFamily::V4 => Domain::IPV4,
            IpFamily::V6 => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(NetError::Bind)?;
        socket.set_reuse_address(true).map_err(NetError::Bind)?;
        #[cfg(unix)]
        socket.set_reuse_port(true).map_err(NetError::Bind)?;

        let should_bind = matches!(policy, BindPolicy::BindAll) || is_first_of_family;
        if should_bind {
            let addr: SocketAddr = match family {
                IpFamily::V4 => (Ipv4Addr::UNSPECIFIED, SACN_PORT).into(),
                IpFamily::V6 => (Ipv6Addr::UNSPECIFIED, SACN_PORT).into(),
            };
            socket.bind(&addr.into()).map_err(NetError::Bind)?;
        }

        socket.set_nonblocking(true).map_err(NetError::Bind)?;
        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket).map_err(NetError::Bind)?;

        Ok(Self { id, family, socket: Arc::new(socket), refcount: 0, joined: HashSet::new() })
    }

    /// This socket's id within its owning [SocketTable].
    pub fn id(&self) -> SocketId {
        self.id
    }

    /// The IP family this socket serves.
    pub fn family(&self) -> IpFamily {
        self.family
    }

    /// The number of universes currently using this socket.
    pub fn refcount(&self) -> usize {
        self.refcount
    }

    /// Whether this socket has room for another universe under the
    /// default share limit (spec.md §4.1, K = 20).
    pub fn has_capacity(&self) -> bool {
        self.refcount < DEFAULT_SOCKET_SHARE_LIMIT
    }

    pub(super) fn incref(&mut self) {
        self.refcount += 1;
    }

    /// Decrements the refcount, returning the value after decrementing.
    pub(super) fn decref(&mut self) -> usize {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount
    }

    /// Joins `universe`'s multicast group on `interface`. A no-op (but
    /// still `Ok`) if already joined.
    pub fn join_multicast(
        &mut self,
        interface: InterfaceId,
        interface_ip: IpAddr,
        universe: UniverseId,
    ) -> Result<(), NetError> {
        if self.joined.contains(&(interface, universe)) {
            return Ok(());
        }

        match (interface_ip, self.family) {
            (IpAddr::V4(iface), IpFamily::V4) => {
                let group = crate::universe::multicast_group_v4(universe);
                self.socket.join_multicast_v4(&group, &iface).map_err(NetError::Join)?;
            }
            (IpAddr::V6(_), IpFamily::V6) => {
                let group = crate::universe::multicast_group_v6(universe);
                // Interface-index resolution is platform-specific; index 0
                // lets the kernel pick the default multicast-capable
                // interface, matching the common single-NIC deployment.
                self.socket.join_multicast_v6(&group, 0).map_err(NetError::Join)?;
            }
            _ => return Err(NetError::FamilyMismatch),
        }

        self.joined.insert((interface, universe));
        Ok(())
    }

    /// Leaves `universe`'s multicast group on `interface`.
    pub fn leave_multicast(
        &mut self,
        interface: InterfaceId,
        interface_ip: IpAddr,
        universe: UniverseId,
    ) -> Result<(), NetError> {
        if !self.joined.remove(&(interface, universe)) {
            return Ok(());
        }

        match (interface_ip, self.family) {
            (IpAddr::V4(iface), IpFamily::V4) => {
                let group = crate::universe::multicast_group_v4(universe);
                self.socket.leave_multicast_v4(&group, &iface).map_err(NetError::Leave)
            }
            (IpAddr::V6(_), IpFamily::V6) => {
                let group = crate::universe::multicast_group_v6(universe);
                self.socket.leave_multicast_v6(&group, 0).map_err(NetError::Leave)
            }
            _ => Err(NetError::FamilyMismatch),
        }
    }

    /// Sends `buf` to `dst` (multicast group or unicast address), truncated
    /// to its own length — never to an MTU estimate (spec.md §4.1).
    pub async fn send_to(&self, buf: &[u8], dst: SocketAddr) -> Result<(), NetError> {
        self.socket.send_to(buf, dst).await.map_err(NetError::Send)?;
        Ok(())
    }

    /// Receives one datagram, returning its bytes and sender address.
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), NetError> {
        self.socket.recv_from(buf).await.map_err(NetError::Receive)
    }

    /// The local port this socket is bound to, if any.
    pub fn local_port(&self) -> Option<u16> {
        self.socket.local_addr().ok().map(|addr| addr.port())
    }

    /// Whether this socket is currently joined to `universe`'s multicast
    /// group on `interface` — used on the send path to prefer the socket
    /// actually backing a given interface in per-NIC/multi-NIC deployments
    /// (spec.md §4.1 `sendMulticast(universe, ipPolicy, buf, netint)`).
    pub fn joined_to(&self, interface: InterfaceId, universe: UniverseId) -> bool {
        self.joined.contains(&(interface, universe))
    }

    /// Clones the underlying socket handle, for a caller that needs to
    /// `recv_from` several sockets concurrently without holding the
    /// [SocketTable] lock across the await (spec.md §5 lock discipline).
    pub(crate) fn clone_handle(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }
}

/// Owns every [SocketRef] on one receive thread, handing out shared
/// sockets by IP family up to the default share limit.
#[derive(Default)]
pub struct SocketTable {
    next_id: SocketId,
    sockets: Vec<SocketRef>,
}

impl SocketTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds a socket of `family` with spare capacity, or creates one.
    /// Returns the socket's id with its refcount already incremented.
    pub fn acquire(&mut self, family: IpFamily, policy: BindPolicy) -> Result<SocketId, NetError> {
        if let Some(socket) =
            self.sockets.iter_mut().find(|s| s.family == family && s.has_capacity())
        {
            socket.incref();
            return Ok(socket.id());
        }

        let is_first_of_family = !self.sockets.iter().any(|s| s.family == family);
        let id = self.next_id;
        self.next_id += 1;
        let mut socket = SocketRef::bind(id, family, policy, is_first_of_family)?;
        socket.incref();
        self.sockets.push(socket);
        Ok(id)
    }

    /// Releases one reference on `id`. Returns `true` if the socket's
    /// refcount reached zero (the caller should enqueue it as a dead
    /// socket rather than closing it inline — spec.md §4.1, §5).
    pub fn release(&mut self, id: SocketId) -> bool {
        if let Some(socket) = self.sockets.iter_mut().find(|s| s.id() == id) {
            socket.decref() == 0
        } else {
            false
        }
    }

    /// Removes and returns a socket by id, for actual closing once it's
    /// been dequeued from the dead-socket queue.
    pub fn remove(&mut self, id: SocketId) -> Option<SocketRef> {
        let pos = self.sockets.iter().position(|s| s.id() == id)?;
        Some(self.sockets.remove(pos))
    }

    /// Looks up a socket by id.
    pub fn get(&self, id: SocketId) -> Option<&SocketRef> {
        self.sockets.iter().find(|s| s.id() == id)
    }

    /// Looks up a socket by id, mutably.
    pub fn get_mut(&mut self, id: SocketId) -> Option<&mut SocketRef> {
        self.sockets.iter_mut().find(|s| s.id() == id)
    }

    /// Every socket currently live on this thread.
    pub fn sockets(&self) -> &[SocketRef] {
        &self.sockets
    }
}
