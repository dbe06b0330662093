//! Multicast-capable interface enumeration (spec.md §4.1).

use std::net::IpAddr;

use super::error::NetError;

/// An opaque, process-local interface identifier. Stable for the lifetime
/// of one [InterfaceSet] snapshot; a [InterfaceSet::reset] may renumber.
pub type InterfaceId = u32;

/// One network interface the socket plane can join multicast groups on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    /// This snapshot's identifier for the interface.
    pub id: InterfaceId,
    /// The OS-reported interface name (e.g. `eth0`).
    pub name: String,
    /// The interface's IP address.
    pub ip: IpAddr,
}

/// The outcome of validating an application-supplied interface restriction
/// list against the host's actual interfaces (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceStatus {
    /// The interface exists and was accepted.
    Ok,
    /// The interface address didn't match any host interface, or later
    /// failed to join its multicast group.
    JoinFailed,
}

/// A snapshot of the host's multicast-capable interfaces.
#[derive(Debug, Clone, Default)]
pub struct InterfaceSet {
    interfaces: Vec<Interface>,
}

impl InterfaceSet {
    /// Enumerates the host's current non-loopback, multicast-capable
    /// interfaces.
    pub fn discover() -> Result<Self, NetError> {
        let addrs = if_addrs::get_if_addrs().map_err(NetError::Receive)?;
        let interfaces = addrs
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .enumerate()
            .map(|(id, iface)| Interface { id: id as InterfaceId, name: iface.name, ip: iface.ip() })
            .collect();
        Ok(Self { interfaces })
    }

    /// Wraps an already-known interface list (used by tests and by
    /// [InterfaceSet::restrict_to]).
    pub fn from_interfaces(interfaces: Vec<Interface>) -> Self {
        Self { interfaces }
    }

    /// The interfaces in this snapshot.
    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    /// Replaces the snapshot, returning the interfaces that were dropped.
    /// Callers must force every receiver into a new sampling period and
    /// terminate any tracked source whose sole interface disappeared
    /// (spec.md §4.1).
    pub fn reset(&mut self, new: Vec<Interface>) -> Vec<Interface> {
        std::mem::replace(&mut self.interfaces, new)
    }

    /// Restricts this set to the interfaces whose address is in `wanted`,
    /// reporting a status per requested address (spec.md §4.1: "each entry
    /// in that list receives a status code indicating whether it survived
    /// validation").
    pub fn restrict_to(&self, wanted: &[IpAddr]) -> (Self, Vec<(IpAddr, InterfaceStatus)>) {
        let mut kept = Vec::new();
        let mut statuses = Vec::with_capacity(wanted.len());

        for &ip in wanted {
            match self.interfaces.iter().find(|iface| iface.ip == ip) {
                Some(iface) => {
                    kept.push(iface.clone());
                    statuses.push((ip, InterfaceStatus::Ok));
                }
                None => statuses.push((ip, InterfaceStatus::JoinFailed)),
            }
        }

        (Self { interfaces: kept }, statuses)
    }
}
