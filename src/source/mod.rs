//! An sACN Source: the transmit side of the protocol (E1.31 §6, spec.md
//! §4.5 "Source"/"Source universe").
//!
//! Mirrors [crate::receiver::Receiver]'s decoupled-send design: [Source]
//! never touches a socket itself. [Source::tick] returns the packets due to
//! go out as plain bytes plus an abstract [Destination]; a caller (the
//! receive/transmit loop owned by [crate::lifecycle]) is responsible for
//! actually writing them through a [crate::net::SocketPlane].

pub mod discovery;
pub mod unicast;
pub mod universe;

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::cid::{Cid, SourceName};
use crate::config::{DEFAULT_T_KEEPALIVE, DEFAULT_T_KEEPALIVE_PAP, IpPolicy};
use crate::error::Error;
use crate::net::{IpFamily, InterfaceId};
use crate::packet::acn::{Pdu as _, PduBlock};
use crate::packet::data::{DataFraming, Dmp};
use crate::packet::{Packet, Pdu, Postamble, Preamble, RootLayer};
use crate::universe::{UniverseId, validate_universe};

use discovery::DiscoveryState;
use universe::{SourceUniverse, UniverseParams};

const DMX_START_CODE: u8 = 0x00;
const PAP_START_CODE: u8 = 0xDD;

/// Configuration fixed for a [Source]'s whole lifetime.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// The source's CID, stable across restarts (E1.31 §5.6).
    pub cid: Cid,
    /// The source's advertised name.
    pub name: SourceName,
    /// Level keep-alive interval at steady state, once the forced-packet
    /// budget after an update is spent.
    pub keepalive_level: Duration,
    /// PAP keep-alive interval at steady state.
    pub keepalive_pap: Duration,
    /// Which IP families this source is willing to transmit over when a
    /// universe has no explicit interface list wired up (spec.md §4.1
    /// `ipPolicy`).
    pub ip_policy: IpPolicy,
}

impl SourceConfig {
    /// Creates a config with the default keep-alive intervals and IP policy.
    pub fn new(cid: Cid, name: SourceName) -> Self {
        Self {
            cid,
            name,
            keepalive_level: DEFAULT_T_KEEPALIVE,
            keepalive_pap: DEFAULT_T_KEEPALIVE_PAP,
            ip_policy: IpPolicy::default(),
        }
    }
}

/// Where one [OutboundPacket] should be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// The universe's own multicast group, on one interface (spec.md §4.5:
    /// a source fans out to every interface in a universe's interface
    /// list). `interface` is `None` when the universe has no interface list
    /// wired up and the caller should pick any socket of `family`.
    Multicast { universe: UniverseId, family: IpFamily, interface: Option<InterfaceId> },
    /// A single unicast destination.
    Unicast(IpAddr),
}

/// One packet [Source::tick] needs sent, decoupled from any socket.
#[derive(Debug, Clone)]
pub struct OutboundPacket {
    /// Where to send this packet.
    pub destination: Destination,
    /// The fully encoded datagram.
    pub bytes: Vec<u8>,
}

/// Running counters for packets this [Source] failed to have sent, as
/// reported by the caller via [Source::record_send_failure].
///
/// Mirrors [crate::receiver::Receiver]'s approach to socket errors: a send
/// failure doesn't abort the tick, it's tallied and logged at a bounded
/// rate (SPEC_FULL.md §B, on [Error::System]).
#[derive(Debug, Default, Clone, Copy)]
pub struct SendStats {
    /// Total packets this source has failed to send since creation.
    pub failures: u64,
}

/// The transmit side of the protocol: owns per-universe level/PAP data,
/// sequencing, keep-alive timing, termination, and Universe Discovery
/// paging for every universe added to it.
pub struct Source {
    config: SourceConfig,
    universes: HashMap<UniverseId, SourceUniverse>,
    discovery: DiscoveryState,
    stats: SendStats,
}

impl Source {
    /// Creates a new, universe-less [Source].
    pub fn new(config: SourceConfig) -> Self {
        Self { config, universes: HashMap::new(), discovery: DiscoveryState::new(), stats: SendStats::default() }
    }

    pub fn cid(&self) -> Cid {
        self.config.cid
    }

    pub fn name(&self) -> &SourceName {
        &self.config.name
    }

    pub fn stats(&self) -> SendStats {
        self.stats
    }

    /// Whether this source has no universes left — every one it ever had
    /// has either never existed or finished its terminate sequence
    /// ([crate::lifecycle::SourceRuntime] uses this to know when it's safe
    /// to drop a shut-down source after its last terminate packets went
    /// out).
    pub fn is_idle(&self) -> bool {
        self.universes.is_empty()
    }

    /// Records one send failure reported by the caller driving this
    /// source's [OutboundPacket]s through a real socket.
    pub fn record_send_failure(&mut self) {
        self.stats.failures += 1;
    }

    /// Adds a universe to this source. Returns [Error::AlreadyExists] if
    /// `universe` is already configured, or [Error::InvalidArgument] if the
    /// universe number or priority is out of range.
    pub fn add_universe(&mut self, universe: UniverseId, params: UniverseParams) -> Result<(), Error> {
        validate_universe(universe)?;
        if params.priority > 200 {
            return Err(Error::InvalidArgument(format!("priority {} out of range 0..=200", params.priority)));
        }
        if self.universes.contains_key(&universe) {
            return Err(Error::AlreadyExists(format!("universe {universe}")));
        }
        self.universes.insert(
            universe,
            SourceUniverse::new(params, self.config.keepalive_level, self.config.keepalive_pap),
        );
        Ok(())
    }

    /// Begins the three-packet terminate sequence for `universe`; it's
    /// dropped from this source once that sequence completes (observed
    /// through successive [Source::tick] calls).
    pub fn remove_universe(&mut self, universe: UniverseId) -> Result<(), Error> {
        let u = self.universes.get_mut(&universe).ok_or_else(|| Error::NotFound(format!("universe {universe}")))?;
        u.begin_terminate(true);
        Ok(())
    }

    pub fn universe(&self, universe: UniverseId) -> Option<&SourceUniverse> {
        self.universes.get(&universe)
    }

    /// Wires `universe` up to the interfaces it should fan its multicast
    /// sends out on (spec.md §4.5 "interface list"), typically populated
    /// from a [crate::net::SocketPlane]'s interface snapshot filtered by
    /// [Self::config]'s [IpPolicy]. Passing an empty list reverts the
    /// universe to sending one packet per policy-allowed family with no
    /// interface pinned.
    pub fn set_universe_interfaces(
        &mut self,
        universe: UniverseId,
        interfaces: Vec<(InterfaceId, IpFamily)>,
    ) -> Result<(), Error> {
        self.get_universe_mut(universe)?.set_interfaces(interfaces);
        Ok(())
    }

    /// The IP families and interfaces `universe` currently multicasts on:
    /// its own interface list if wired up, else one entry per family this
    /// source's [IpPolicy] allows, with no interface pinned.
    fn multicast_destinations(&self, universe: &SourceUniverse) -> Vec<(IpFamily, Option<InterfaceId>)> {
        let explicit = universe.interfaces();
        if !explicit.is_empty() {
            return explicit.iter().map(|&(iface, family)| (family, Some(iface))).collect();
        }
        let mut fallback = Vec::new();
        if self.config.ip_policy.allows_v4() {
            fallback.push((IpFamily::V4, None));
        }
        if self.config.ip_policy.allows_v6() {
            fallback.push((IpFamily::V6, None));
        }
        fallback
    }

    /// The unique interfaces Universe Discovery pages go out on: every
    /// interface named by any universe's interface list, deduplicated
    /// (spec.md §4.5, pages sent "once ... on every unique interface"), or
    /// the [IpPolicy] fallback if no universe has an interface list wired
    /// up.
    fn discovery_destinations(&self) -> Vec<(IpFamily, Option<InterfaceId>)> {
        let mut seen: Vec<(IpFamily, Option<InterfaceId>)> = Vec::new();
        for state in self.universes.values() {
            for &(iface, family) in state.interfaces() {
                let entry = (family, Some(iface));
                if !seen.contains(&entry) {
                    seen.push(entry);
                }
            }
        }
        if seen.is_empty() {
            let mut fallback = Vec::new();
            if self.config.ip_policy.allows_v4() {
                fallback.push((IpFamily::V4, None));
            }
            if self.config.ip_policy.allows_v6() {
                fallback.push((IpFamily::V6, None));
            }
            return fallback;
        }
        seen
    }

    pub fn universe_mut(&mut self, universe: UniverseId) -> Option<&mut SourceUniverse> {
        self.universes.get_mut(&universe)
    }

    fn get_universe_mut(&mut self, universe: UniverseId) -> Result<&mut SourceUniverse, Error> {
        self.universes.get_mut(&universe).ok_or_else(|| Error::NotFound(format!("universe {universe}")))
    }

    /// Sets fresh DMX levels for `universe`, re-arming the forced-packet
    /// budget (E1.31 §6.6.1).
    pub fn update_levels(&mut self, universe: UniverseId, levels: &[u8]) -> Result<(), Error> {
        self.get_universe_mut(universe)?.update_levels(levels, false);
        Ok(())
    }

    /// Like [Self::update_levels], but the next packet sent also carries
    /// the Force_Synchronization option bit.
    pub fn update_levels_and_force_sync(&mut self, universe: UniverseId, levels: &[u8]) -> Result<(), Error> {
        self.get_universe_mut(universe)?.update_levels(levels, true);
        Ok(())
    }

    /// Sets fresh per-address priority data for `universe`.
    pub fn update_pap(&mut self, universe: UniverseId, priorities: &[u8]) -> Result<(), Error> {
        self.get_universe_mut(universe)?.update_pap(priorities, false);
        Ok(())
    }

    /// Updates a universe's overall priority (E1.31 §6.2.3), taking effect
    /// on the next packet sent.
    pub fn update_universe_priority(&mut self, universe: UniverseId, priority: u8) -> Result<(), Error> {
        if priority > 200 {
            return Err(Error::InvalidArgument(format!("priority {priority} out of range 0..=200")));
        }
        self.get_universe_mut(universe)?.set_priority(priority);
        Ok(())
    }

    /// Adds a unicast destination to `universe`'s fan-out list.
    pub fn add_unicast_destination(&mut self, universe: UniverseId, addr: IpAddr) -> Result<(), Error> {
        let u = self.get_universe_mut(universe)?;
        if !u.add_unicast(addr) {
            return Err(Error::AlreadyExists(format!("unicast destination {addr}")));
        }
        Ok(())
    }

    /// Begins the three-packet terminate sequence for one unicast
    /// destination, without affecting the universe's multicast send or its
    /// other destinations.
    pub fn remove_unicast_destination(&mut self, universe: UniverseId, addr: IpAddr) -> Result<(), Error> {
        let u = self.get_universe_mut(universe)?;
        if !u.remove_unicast(addr) {
            return Err(Error::NotFound(format!("unicast destination {addr}")));
        }
        Ok(())
    }

    /// Begins terminating every universe on this source (E1.31 §6.2.6),
    /// without removing them until their terminate sequences complete.
    pub fn shutdown(&mut self) {
        for universe in self.universes.values_mut() {
            universe.begin_terminate(true);
        }
    }

    fn encode_data(&self, framing: DataFraming) -> Vec<u8> {
        let pdu = Pdu::DataFraming(framing);
        let root = RootLayer::for_pdu(self.config.cid, pdu);
        let packet = Packet::new(Preamble, PduBlock::new(vec![root]), Postamble);
        packet.encode().into()
    }

    /// Advances every universe by one tick, returning the packets due to be
    /// sent: level packets, PAP packets, per-destination terminate packets,
    /// and (if due) Universe Discovery pages.
    ///
    /// Universes that finish their own terminate sequence this tick are
    /// dropped from the source afterward.
    pub fn tick(&mut self, now: Instant) -> Vec<OutboundPacket> {
        let mut out = Vec::new();
        let mut finished = Vec::new();

        for (&id, state) in self.universes.iter_mut() {
            let level_tick = state.tick_level(now);
            if let Some((levels, priority, seq, terminated, force_sync)) = level_tick.send {
                let dmp = Dmp::new(DMX_START_CODE, &levels);
                let framing = DataFraming::new(
                    self.config.name,
                    priority,
                    state.sync_universe(),
                    seq,
                    state.preview(),
                    terminated,
                    force_sync,
                    id,
                    dmp,
                )
                .expect("priority already validated on add_universe/update_universe_priority");
                let bytes = self.encode_data(framing);

                if !state.send_unicast_only() {
                    for (family, interface) in self.multicast_destinations(state) {
                        out.push(OutboundPacket {
                            destination: Destination::Multicast { universe: id, family, interface },
                            bytes: bytes.clone(),
                        });
                    }
                }
                for addr in &level_tick.to_unicast {
                    out.push(OutboundPacket { destination: Destination::Unicast(*addr), bytes: bytes.clone() });
                }
            }

            for (addr, levels, priority, seq) in level_tick.terminating_unicast {
                let dmp = Dmp::new(DMX_START_CODE, &levels);
                let framing = DataFraming::new(
                    self.config.name,
                    priority,
                    state.sync_universe(),
                    seq,
                    state.preview(),
                    true,
                    false,
                    id,
                    dmp,
                )
                .expect("priority already validated");
                out.push(OutboundPacket { destination: Destination::Unicast(addr), bytes: self.encode_data(framing) });
            }

            if level_tick.universe_terminated {
                match state.termination() {
                    universe::TerminationState::TerminatingAndRemoving => finished.push(id),
                    universe::TerminationState::TerminatingWithoutRemoving => state.finish_terminate_without_removing(),
                    universe::TerminationState::NotTerminating => {}
                }
                continue;
            }

            let pap_tick = state.tick_pap(now);
            if let Some((priorities, seq, force_sync)) = pap_tick.send {
                let dmp = Dmp::new(PAP_START_CODE, &priorities);
                let framing = DataFraming::new(
                    self.config.name,
                    state.priority(),
                    state.sync_universe(),
                    seq,
                    state.preview(),
                    false,
                    force_sync,
                    id,
                    dmp,
                )
                .expect("priority already validated");
                let bytes = self.encode_data(framing);

                if !state.send_unicast_only() {
                    for (family, interface) in self.multicast_destinations(state) {
                        out.push(OutboundPacket {
                            destination: Destination::Multicast { universe: id, family, interface },
                            bytes: bytes.clone(),
                        });
                    }
                }
                for addr in pap_tick.to_unicast {
                    out.push(OutboundPacket { destination: Destination::Unicast(addr), bytes: bytes.clone() });
                }
            }
        }

        for id in finished {
            self.universes.remove(&id);
        }

        if self.discovery.due(now) {
            let active: Vec<UniverseId> =
                self.universes.iter().filter(|(_, u)| u.is_discoverable()).map(|(&id, _)| id).collect();
            let discovery_targets = self.discovery_destinations();
            for bytes in self.discovery.build_pages(self.config.cid, &self.config.name, active) {
                for &(family, interface) in &discovery_targets {
                    out.push(OutboundPacket {
                        destination: Destination::Multicast { universe: crate::universe::DISCOVERY_UNIVERSE, family, interface },
                        bytes: bytes.clone(),
                    });
                }
            }
            self.discovery.mark_sent(now);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SourceConfig {
        SourceConfig::new(Cid::from_bytes([1; 16]), SourceName::new("test source").unwrap())
    }

    #[test]
    fn ticking_with_no_data_sends_nothing_but_may_discover() {
        let mut source = Source::new(config());
        source.add_universe(1, UniverseParams::default()).unwrap();
        let now = Instant::now();
        let packets = source.tick(now);
        // No level/PAP data was ever set, so only a discovery page (with no
        // universes listed, since the universe was never sent on) goes out.
        assert!(packets.iter().all(|p| matches!(
            p.destination,
            Destination::Multicast { universe, .. } if universe == crate::universe::DISCOVERY_UNIVERSE
        )));
    }

    #[test]
    fn update_levels_then_tick_sends_multicast_data() {
        let mut source = Source::new(config());
        source.add_universe(1, UniverseParams::default()).unwrap();
        source.update_levels(1, &[10, 20, 30]).unwrap();

        let now = Instant::now();
        let packets = source.tick(now);
        let data_packets: Vec<_> = packets
            .iter()
            .filter(|p| matches!(p.destination, Destination::Multicast { universe: 1, .. }))
            .collect();
        assert_eq!(data_packets.len(), 1);
    }

    #[test]
    fn unicast_only_universe_skips_multicast() {
        let mut source = Source::new(config());
        source.add_universe(1, UniverseParams { send_unicast_only: true, ..Default::default() }).unwrap();
        let addr: IpAddr = "192.168.1.50".parse().unwrap();
        source.add_unicast_destination(1, addr).unwrap();
        source.update_levels(1, &[1]).unwrap();

        let now = Instant::now();
        let packets = source.tick(now);
        assert!(packets.iter().all(|p| !matches!(p.destination, Destination::Multicast { universe: 1, .. })));
        assert!(packets.iter().any(|p| matches!(p.destination, Destination::Unicast(a) if a == addr)));
    }

    #[test]
    fn remove_universe_terminates_then_drops_it() {
        let mut source = Source::new(config());
        source.add_universe(1, UniverseParams::default()).unwrap();
        source.update_levels(1, &[1]).unwrap();
        let now = Instant::now();
        source.tick(now);

        source.remove_universe(1).unwrap();
        for _ in 0..crate::config::TERMINATE_PACKET_COUNT {
            source.tick(now);
        }
        assert!(source.universe(1).is_none());
    }

    #[test]
    fn invalid_priority_is_rejected() {
        let mut source = Source::new(config());
        let result = source.add_universe(1, UniverseParams { priority: 201, ..Default::default() });
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
