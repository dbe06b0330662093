//! One universe's worth of source state (spec.md §4.5 "Source universe"):
//! level/PAP suppression counters, keep-alive timers, termination state,
//! and the unicast destination list.

use std::time::{Duration, Instant};

use crate::config::FORCED_PACKET_COUNT;
use crate::net::{IpFamily, InterfaceId};
use crate::slot::SlotBuffer;

use super::unicast::UnicastDestination;

/// Tunables for one universe on a source (spec.md §4.5).
#[derive(Debug, Clone, Copy)]
pub struct UniverseParams {
    /// Universe priority, `0..=200` (E1.31 §6.2.3).
    pub priority: u8,
    /// Synchronization universe, `0` for unsynchronized.
    pub sync_universe: u16,
    /// Whether outgoing packets set the Preview_Data option bit.
    pub preview: bool,
    /// If `true`, this universe never sends to its multicast group — only
    /// to explicitly added unicast destinations.
    pub send_unicast_only: bool,
}

impl Default for UniverseParams {
    fn default() -> Self {
        Self { priority: 100, sync_universe: 0, preview: false, send_unicast_only: false }
    }
}

/// A universe's termination lifecycle (spec.md §4.5 data model).
///
/// [TerminationState::TerminatingWithoutRemoving] has no operation that
/// distinctly produces it in this core (see DESIGN.md, Open Question: the
/// reference model reserves it for a "stop output without destroying the
/// universe" call this crate doesn't expose); it's kept for data-model
/// fidelity and is reachable only by constructing a [SourceUniverse]
/// through a future such API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationState {
    NotTerminating,
    TerminatingWithoutRemoving,
    TerminatingAndRemoving,
}

/// One universe's worth of transmit state.
pub struct SourceUniverse {
    priority: u8,
    sync_universe: u16,
    preview: bool,
    send_unicast_only: bool,

    sequence: u8,
    levels: SlotBuffer,
    has_level_data: bool,
    level_suppress_count: u32,
    level_last_sent: Option<Instant>,
    level_force_sync_next: bool,

    pap: SlotBuffer,
    has_pap_data: bool,
    pap_suppress_count: u32,
    pap_last_sent: Option<Instant>,
    pap_force_sync_next: bool,

    keepalive_level: Duration,
    keepalive_pap: Duration,

    termination: TerminationState,
    terminations_sent: u32,

    unicast: Vec<UnicastDestination>,

    ever_sent_level: bool,

    /// This universe's interfaces, each tagged with the IP family it's
    /// reachable over (spec.md §3 "per-universe interface list"). Empty
    /// until [Self::set_interfaces] is called — e.g. before a caller has
    /// wired the source up to a [crate::net::SocketPlane]'s interface
    /// snapshot — in which case the tick loop falls back to one send per
    /// family the source's [crate::config::IpPolicy] allows, with no
    /// specific interface pinned.
    interfaces: Vec<(InterfaceId, IpFamily)>,
}

impl SourceUniverse {
    pub(crate) fn new(params: UniverseParams, keepalive_level: Duration, keepalive_pap: Duration) -> Self {
        Self {
            priority: params.priority,
            sync_universe: params.sync_universe,
            preview: params.preview,
            send_unicast_only: params.send_unicast_only,
            sequence: 0,
            levels: SlotBuffer::new(),
            has_level_data: false,
            level_suppress_count: 0,
            level_last_sent: None,
            level_force_sync_next: false,
            pap: SlotBuffer::new(),
            has_pap_data: false,
            pap_suppress_count: 0,
            pap_last_sent: None,
            pap_force_sync_next: false,
            keepalive_level,
            keepalive_pap,
            termination: TerminationState::NotTerminating,
            terminations_sent: 0,
            unicast: Vec::new(),
            ever_sent_level: false,
            interfaces: Vec::new(),
        }
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    pub fn sync_universe(&self) -> u16 {
        self.sync_universe
    }

    pub fn preview(&self) -> bool {
        self.preview
    }

    pub fn send_unicast_only(&self) -> bool {
        self.send_unicast_only
    }

    pub fn set_send_unicast_only(&mut self, value: bool) {
        self.send_unicast_only = value;
    }

    pub fn termination(&self) -> TerminationState {
        self.termination
    }

    pub fn is_terminating(&self) -> bool {
        !matches!(self.termination, TerminationState::NotTerminating)
    }

    /// This universe's interface list, as last set by
    /// [Self::set_interfaces]. Empty if never wired to a socket plane.
    pub fn interfaces(&self) -> &[(InterfaceId, IpFamily)] {
        &self.interfaces
    }

    /// Replaces this universe's interface list (spec.md §4.5 "interface
    /// list"), driving how many multicast datagrams a tick emits and to
    /// which family/interface each is tagged.
    pub(crate) fn set_interfaces(&mut self, interfaces: Vec<(InterfaceId, IpFamily)>) {
        self.interfaces = interfaces;
    }

    pub fn unicast_destinations(&self) -> &[UnicastDestination] {
        &self.unicast
    }

    pub(crate) fn add_unicast(&mut self, addr: std::net::IpAddr) -> bool {
        if self.unicast.iter().any(|d| d.addr() == addr) {
            return false;
        }
        self.unicast.push(UnicastDestination::new(addr));
        true
    }

    pub(crate) fn remove_unicast(&mut self, addr: std::net::IpAddr) -> bool {
        match self.unicast.iter_mut().find(|d| d.addr() == addr) {
            Some(dest) => {
                dest.begin_terminate();
                true
            }
            None => false,
        }
    }

    /// Sets fresh level data, resetting the suppression counter so the next
    /// [FORCED_PACKET_COUNT] ticks force a send (E1.31 §6.6.1).
    pub(crate) fn update_levels(&mut self, levels: &[u8], force_sync: bool) {
        self.levels.clear();
        let _ = self.levels.try_extend_from_slice(levels);
        self.has_level_data = true;
        self.level_suppress_count = 0;
        self.level_force_sync_next = force_sync;
    }

    pub(crate) fn update_pap(&mut self, pap: &[u8], force_sync: bool) {
        self.pap.clear();
        let _ = self.pap.try_extend_from_slice(pap);
        self.has_pap_data = true;
        self.pap_suppress_count = 0;
        self.pap_force_sync_next = force_sync;
    }

    fn level_due(&self, now: Instant) -> bool {
        if !self.has_level_data {
            return false;
        }
        if self.level_suppress_count < FORCED_PACKET_COUNT {
            return true;
        }
        match self.level_last_sent {
            Some(t) => now.saturating_duration_since(t) >= self.keepalive_level,
            None => true,
        }
    }

    fn pap_due(&self, now: Instant) -> bool {
        if !self.has_pap_data {
            return false;
        }
        if self.pap_suppress_count < FORCED_PACKET_COUNT {
            return true;
        }
        match self.pap_last_sent {
            Some(t) => now.saturating_duration_since(t) >= self.keepalive_pap,
            None => true,
        }
    }

    fn next_sequence(&mut self) -> u8 {
        let seq = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        seq
    }

    pub(crate) fn begin_terminate(&mut self, removing: bool) {
        self.termination = if removing {
            TerminationState::TerminatingAndRemoving
        } else {
            TerminationState::TerminatingWithoutRemoving
        };
        self.terminations_sent = 0;
    }

    /// One level-phase attempt for this tick. Returns the data to send and
    /// who to (besides the universe's own multicast group), plus whether
    /// the universe's own termination sequence just finished.
    pub(crate) fn tick_level(&mut self, now: Instant) -> LevelTick {
        if self.is_terminating() {
            if self.terminations_sent >= crate::config::TERMINATE_PACKET_COUNT {
                return LevelTick::default();
            }
            let seq = self.next_sequence();
            self.terminations_sent += 1;
            let done = self.terminations_sent >= crate::config::TERMINATE_PACKET_COUNT;
            return LevelTick {
                send: Some((self.levels.clone(), self.priority, seq, true, false)),
                to_unicast: self.unicast.iter().map(|d| d.addr()).collect(),
                universe_terminated: done,
                ..Default::default()
            };
        }

        let mut tick = LevelTick::default();

        if self.level_due(now) {
            let seq = self.next_sequence();
            let force_sync = std::mem::take(&mut self.level_force_sync_next);
            self.level_last_sent = Some(now);
            if self.level_suppress_count < FORCED_PACKET_COUNT {
                self.level_suppress_count += 1;
            }
            self.ever_sent_level = true;
            tick.send = Some((self.levels.clone(), self.priority, seq, false, force_sync));
            tick.to_unicast =
                self.unicast.iter().filter(|d| !d.is_terminating()).map(|d| d.addr()).collect();
        }

        for dest in self.unicast.iter_mut().filter(|d| d.terminate_pending()) {
            let seq_for_dest = self.sequence;
            self.sequence = self.sequence.wrapping_add(1);
            dest.note_terminate_sent();
            tick.terminating_unicast.push((dest.addr(), self.levels.clone(), self.priority, seq_for_dest));
        }
        self.unicast.retain(|d| !d.is_done_terminating());

        tick
    }

    /// One PAP-phase attempt for this tick, mirroring [Self::tick_level]'s
    /// shape but over the 0xDD stream.
    pub(crate) fn tick_pap(&mut self, now: Instant) -> PapTick {
        if self.is_terminating() {
            // PAP stops outright once a universe starts terminating; the
            // level phase's terminate packets are sufficient per E1.31
            // §6.2.6 and there's no "terminated" PAP packet.
            return PapTick::default();
        }
        if !self.pap_due(now) {
            return PapTick::default();
        }

        let seq = self.next_sequence();
        let force_sync = std::mem::take(&mut self.pap_force_sync_next);
        self.pap_last_sent = Some(now);
        if self.pap_suppress_count < FORCED_PACKET_COUNT {
            self.pap_suppress_count += 1;
        }
        PapTick {
            send: Some((self.pap.clone(), seq, force_sync)),
            to_unicast: self.unicast.iter().filter(|d| !d.is_terminating()).map(|d| d.addr()).collect(),
        }
    }

    /// Clears a [TerminationState::TerminatingWithoutRemoving] universe
    /// back to idle once its terminate sequence completes.
    pub(crate) fn finish_terminate_without_removing(&mut self) {
        self.termination = TerminationState::NotTerminating;
        self.has_level_data = false;
        self.has_pap_data = false;
        self.terminations_sent = 0;
    }

    /// Whether this universe should be included in Universe Discovery.
    pub(crate) fn is_discoverable(&self) -> bool {
        self.ever_sent_level && !self.is_terminating()
    }
}

/// The result of one [SourceUniverse::tick_level] call.
#[derive(Default)]
pub(crate) struct LevelTick {
    /// `(levels, priority, sequence, stream_terminated, force_sync)` for the
    /// universe's normal send (multicast, if not unicast-only, plus every
    /// non-individually-terminating unicast destination).
    pub send: Option<(SlotBuffer, u8, u8, bool, bool)>,
    pub to_unicast: Vec<std::net::IpAddr>,
    /// `(addr, levels, priority, sequence)` for destinations running their
    /// own independent terminate sequence while the universe stays active.
    pub terminating_unicast: Vec<(std::net::IpAddr, SlotBuffer, u8, u8)>,
    /// Set once this universe's own [TerminationState::TerminatingAndRemoving]
    /// or [TerminationState::TerminatingWithoutRemoving] sequence has sent
    /// its final packet.
    pub universe_terminated: bool,
}

/// The result of one [SourceUniverse::tick_pap] call.
#[derive(Default)]
pub(crate) struct PapTick {
    /// `(priorities, sequence, force_sync)`.
    pub send: Option<(SlotBuffer, u8, bool)>,
    pub to_unicast: Vec<std::net::IpAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_packets_ignore_keepalive_then_settle() {
        let now = Instant::now();
        let mut universe =
            SourceUniverse::new(UniverseParams::default(), Duration::from_millis(1000), Duration::from_millis(1000));
        universe.update_levels(&[1, 2, 3], false);

        for _ in 0..FORCED_PACKET_COUNT {
            let tick = universe.tick_level(now);
            assert!(tick.send.is_some(), "forced packets must send regardless of timer");
        }

        let tick = universe.tick_level(now);
        assert!(tick.send.is_none(), "once forced budget is spent, keepalive timer applies");

        let later = now + Duration::from_millis(1001);
        let tick = universe.tick_level(later);
        assert!(tick.send.is_some(), "keepalive interval elapsed");
    }

    #[test]
    fn update_resets_suppression_counter() {
        let now = Instant::now();
        let mut universe =
            SourceUniverse::new(UniverseParams::default(), Duration::from_millis(1000), Duration::from_millis(1000));
        universe.update_levels(&[1], false);
        for _ in 0..FORCED_PACKET_COUNT {
            universe.tick_level(now);
        }
        assert!(universe.tick_level(now).send.is_none());

        universe.update_levels(&[2], false);
        assert!(universe.tick_level(now).send.is_some(), "fresh update re-arms the forced budget");
    }

    #[test]
    fn termination_sends_three_packets_then_reports_done() {
        let now = Instant::now();
        let mut universe =
            SourceUniverse::new(UniverseParams::default(), Duration::from_millis(1000), Duration::from_millis(1000));
        universe.update_levels(&[1], false);
        universe.tick_level(now);
        universe.begin_terminate(true);

        for i in 0..crate::config::TERMINATE_PACKET_COUNT {
            let tick = universe.tick_level(now);
            let (_, _, _, terminated, _) = tick.send.expect("terminate packet expected");
            assert!(terminated);
            assert_eq!(tick.universe_terminated, i + 1 == crate::config::TERMINATE_PACKET_COUNT);
        }
    }

    #[test]
    fn per_destination_termination_does_not_affect_universe() {
        let now = Instant::now();
        let mut universe =
            SourceUniverse::new(UniverseParams::default(), Duration::from_millis(1000), Duration::from_millis(1000));
        universe.update_levels(&[1], false);
        let addr: std::net::IpAddr = "10.0.0.9".parse().unwrap();
        universe.add_unicast(addr);
        universe.remove_unicast(addr);

        let tick = universe.tick_level(now);
        assert!(tick.send.is_some(), "universe keeps sending normally");
        assert_eq!(tick.terminating_unicast.len(), 1, "destination gets its own terminate packet");
        assert!(!universe.is_terminating());
    }
}
