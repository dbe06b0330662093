//! Universe numbers, slot footprints, and multicast group derivation.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::Error;

/// # E1.31 3.3 Universe Number
///
/// From an ACN perspective, a receiving device has some number of properties
/// whose value is addressed by the combination of a universe number and a
/// data slot number.
pub type UniverseId = u16;

/// The lowest valid universe number.
pub const MIN_UNIVERSE: UniverseId = 1;

/// The highest valid universe number.
pub const MAX_UNIVERSE: UniverseId = 63_999;

/// The universe reserved for Universe Discovery (E1.31 §8).
pub const DISCOVERY_UNIVERSE: UniverseId = 64_214;

/// Validates that `universe` is in the addressable range `1..=63_999`.
///
/// Note this deliberately accepts [DISCOVERY_UNIVERSE] being passed to a data
/// packet validator is a separate, caller-side concern (ordinary sources must
/// never claim it; the source detector owns it exclusively).
pub fn validate_universe(universe: UniverseId) -> Result<(), Error> {
    if (MIN_UNIVERSE..=MAX_UNIVERSE).contains(&universe) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("universe {universe} out of range 1..=63999")))
    }
}

/// Derives the IPv4 multicast group for `universe`.
///
/// `239.255.<hi>.<lo>` where `universe = (hi << 8) | lo`.
pub fn multicast_group_v4(universe: UniverseId) -> Ipv4Addr {
    let [hi, lo] = universe.to_be_bytes();
    Ipv4Addr::new(239, 255, hi, lo)
}

/// Derives the IPv6 multicast group for `universe`.
///
/// `ff18::8300:<universe>` (big-endian).
pub fn multicast_group_v6(universe: UniverseId) -> Ipv6Addr {
    let [hi, lo] = universe.to_be_bytes();
    Ipv6Addr::new(0xff18, 0, 0, 0, 0, 0, 0x8300, u16::from_be_bytes([hi, lo]))
}

/// Link-local equivalent IPv6 group accepted on receive per §6.
pub fn multicast_group_v6_link_local(universe: UniverseId) -> Ipv6Addr {
    let [hi, lo] = universe.to_be_bytes();
    Ipv6Addr::new(0xff12, 0, 0, 0, 0, 0, 0x8300, u16::from_be_bytes([hi, lo]))
}
