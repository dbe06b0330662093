//! A single tracked source within a receiver, and its PAP sub-state
//! machine (spec.md §4.4).

use std::time::{Duration, Instant};

use crate::cid::SourceName;
use crate::config::T_SAMPLE;
use crate::net::InterfaceId;
use crate::registry::RemoteSourceHandle;
use crate::slot::SlotBuffer;

/// The per-address-priority sub-state machine (spec.md §4.4 table).
///
/// Resolution of the table's self-referential `HavePapOnly` row (marked
/// "treated as lost when PAP timer expires"): since a source in this state
/// has never delivered DMX, its PAP timer expiring is modeled as returning
/// to [PapState::WaitingForPap] rather than looping — the source restarts
/// its PAP-wait grace window exactly as a brand-new DMX-first source would
/// (see DESIGN.md, Open Question: PAP timer in HavePapOnly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PapState {
    /// Seen via DMX, no PAP yet; buffering DMX until the grace period
    /// elapses or PAP arrives.
    WaitingForPap,
    /// DMX-only; PAP extension not in use by this source (or timed out).
    HaveDmxOnly,
    /// Seen via PAP only, no DMX yet.
    HavePapOnly,
    /// Both DMX and PAP are fresh.
    HaveDmxAndPap,
}

/// What a PAP sub-state transition tells the caller to do.
#[derive(Debug, Clone, Default)]
pub struct PapOutcome {
    /// DMX data (levels, priority) to deliver as a `universe-data`
    /// notification, if any.
    pub deliver_dmx: Option<(SlotBuffer, u8)>,
    /// Whether a `source-pap-lost` notification should fire.
    pub pap_lost: bool,
}

/// One source tracked by a receiver on one universe.
pub struct TrackedSource {
    handle: RemoteSourceHandle,
    name: SourceName,
    first_seen_interface: Option<InterfaceId>,
    dmx_timer_deadline: Instant,
    last_sequence: Option<u8>,
    last_pap_sequence: Option<u8>,
    terminated: bool,
    dmx_received_this_tick: bool,
    pap_enabled: bool,
    pap_state: PapState,
    pap_timer_deadline: Option<Instant>,
    pending_dmx: Option<(SlotBuffer, u8)>,
    sampling: bool,
}

impl TrackedSource {
    /// Creates a tracked source first observed via a DMX (0x00) packet.
    pub fn from_dmx(
        handle: RemoteSourceHandle,
        name: SourceName,
        interface: Option<InterfaceId>,
        now: Instant,
        pap_enabled: bool,
        sampling: bool,
    ) -> Self {
        Self {
            handle,
            name,
            first_seen_interface: interface,
            dmx_timer_deadline: now + crate::config::T_LOSS,
            last_sequence: None,
            last_pap_sequence: None,
            terminated: false,
            dmx_received_this_tick: true,
            pap_enabled,
            pap_state: if pap_enabled { PapState::WaitingForPap } else { PapState::HaveDmxOnly },
            pap_timer_deadline: pap_enabled.then(|| now + T_SAMPLE),
            pending_dmx: None,
            sampling,
        }
    }

    /// Creates a tracked source first observed via a PAP (0xDD) packet.
    pub fn from_pap(
        handle: RemoteSourceHandle,
        name: SourceName,
        interface: Option<InterfaceId>,
        now: Instant,
        sampling: bool,
    ) -> Self {
        Self {
            handle,
            name,
            first_seen_interface: interface,
            dmx_timer_deadline: now + crate::config::T_LOSS,
            last_sequence: None,
            last_pap_sequence: None,
            terminated: false,
            dmx_received_this_tick: false,
            pap_enabled: true,
            pap_state: PapState::HavePapOnly,
            pap_timer_deadline: Some(now + T_SAMPLE),
            pending_dmx: None,
            sampling,
        }
    }

    pub fn handle(&self) -> RemoteSourceHandle {
        self.handle
    }

    pub fn name(&self) -> &SourceName {
        &self.name
    }

    pub fn first_seen_interface(&self) -> Option<InterfaceId> {
        self.first_seen_interface
    }

    pub fn is_sampling(&self) -> bool {
        self.sampling
    }

    pub fn clear_sampling(&mut self) {
        self.sampling = false;
    }

    pub fn terminated(&self) -> bool {
        self.terminated
    }

    pub fn mark_terminated(&mut self) {
        self.terminated = true;
    }

    /// Whether DMX arrived for this source since the last tick. Reset by
    /// [Self::begin_tick].
    pub fn dmx_received_this_tick(&self) -> bool {
        self.dmx_received_this_tick
    }

    /// Called once per receiver tick before scanning for online/offline.
    pub fn begin_tick(&mut self) {
        self.dmx_received_this_tick = false;
    }

    /// Whether the packet timer (T_loss) has expired as of `now`.
    pub fn is_packet_timer_expired(&self, now: Instant) -> bool {
        now >= self.dmx_timer_deadline
    }

    /// Accepts a sequence number, applying the E1.31 §6.7.2 rejection
    /// window: accepted iff `(received - last) mod 256 ∈ 1..=236`.
    /// Returns `false` (and doesn't update `last_sequence`) for a rejected
    /// packet, per spec.md §8 invariant 8.
    pub fn accept_sequence(&mut self, sequence: u8) -> bool {
        let Some(last) = self.last_sequence else {
            self.last_sequence = Some(sequence);
            return true;
        };

        let delta = sequence.wrapping_sub(last);
        if (1..=236).contains(&delta) {
            self.last_sequence = Some(sequence);
            true
        } else {
            false
        }
    }

    /// Same rejection-window check, applied to the PAP packet stream's own
    /// sequence counter (E1.31 combines sequence space per-universe across
    /// DMX and PAP, but a tracked source still validates PAP freshness the
    /// same way).
    pub fn accept_pap_sequence(&mut self, sequence: u8) -> bool {
        let Some(last) = self.last_pap_sequence else {
            self.last_pap_sequence = Some(sequence);
            return true;
        };

        let delta = sequence.wrapping_sub(last);
        if (1..=236).contains(&delta) {
            self.last_pap_sequence = Some(sequence);
            true
        } else {
            false
        }
    }

    /// Restarts the T_loss packet timer; call after accepting any packet.
    pub fn restart_packet_timer(&mut self, now: Instant) {
        self.dmx_timer_deadline = now + crate::config::T_LOSS;
        self.dmx_received_this_tick = true;
    }

    /// Drives the PAP sub-state machine on a DMX (0x00) packet. `priority`
    /// is the packet's per-universe priority field, carried alongside the
    /// levels so the merge layer sees the priority that travelled with the
    /// data it eventually delivers, even if delivery was buffered.
    pub fn on_dmx(&mut self, now: Instant, levels: SlotBuffer, priority: u8) -> PapOutcome {
        if !self.pap_enabled {
            return PapOutcome { deliver_dmx: Some((levels, priority)), pap_lost: false };
        }

        match self.pap_state {
            PapState::WaitingForPap => {
                if self.pap_timer_deadline.is_none() {
                    self.pap_timer_deadline = Some(now + T_SAMPLE);
                }
                self.pending_dmx = Some((levels, priority));
                PapOutcome::default()
            }
            PapState::HaveDmxOnly => PapOutcome { deliver_dmx: Some((levels, priority)), pap_lost: false },
            PapState::HavePapOnly => {
                self.pap_state = PapState::HaveDmxAndPap;
                PapOutcome { deliver_dmx: Some((levels, priority)), pap_lost: false }
            }
            PapState::HaveDmxAndPap => {
                PapOutcome { deliver_dmx: Some((levels, priority)), pap_lost: false }
            }
        }
    }

    /// Drives the PAP sub-state machine on a PAP (0xDD) packet. Returns
    /// the buffered DMX (levels, priority) to deliver, if this transition
    /// unblocks it.
    pub fn on_pap(&mut self, now: Instant) -> Option<(SlotBuffer, u8)> {
        self.pap_timer_deadline = Some(now + T_SAMPLE);

        match self.pap_state {
            PapState::WaitingForPap => {
                self.pap_state = PapState::HaveDmxAndPap;
                self.pending_dmx.take()
            }
            PapState::HaveDmxOnly => {
                self.pap_state = PapState::HaveDmxAndPap;
                None
            }
            PapState::HavePapOnly | PapState::HaveDmxAndPap => None,
        }
    }

    /// Advances the PAP timer if it has expired as of `now`, returning the
    /// resulting [PapOutcome].
    pub fn tick_pap_timer(&mut self, now: Instant) -> PapOutcome {
        let Some(deadline) = self.pap_timer_deadline else {
            return PapOutcome::default();
        };
        if now < deadline {
            return PapOutcome::default();
        }

        match self.pap_state {
            PapState::WaitingForPap => {
                self.pap_state = PapState::HaveDmxOnly;
                self.pap_timer_deadline = None;
                PapOutcome { deliver_dmx: self.pending_dmx.take(), pap_lost: false }
            }
            PapState::HaveDmxAndPap => {
                self.pap_state = PapState::HaveDmxOnly;
                self.pap_timer_deadline = None;
                PapOutcome { deliver_dmx: None, pap_lost: true }
            }
            PapState::HavePapOnly => {
                // See the DESIGN.md Open Question resolution on this
                // state's table entry: treated as a fresh PAP-less source.
                self.pap_state = PapState::WaitingForPap;
                self.pap_timer_deadline = Some(now + T_SAMPLE);
                PapOutcome { deliver_dmx: None, pap_lost: true }
            }
            PapState::HaveDmxOnly => PapOutcome::default(),
        }
    }

    pub fn pap_state(&self) -> PapState {
        self.pap_state
    }
}

/// The `1..=236` E1.31 §6.7.2 rejection window as a standalone helper, for
/// callers (and tests) that want to check acceptance without mutating
/// state.
pub fn sequence_accepted(last: u8, received: u8) -> bool {
    let delta = received.wrapping_sub(last);
    (1..=236).contains(&delta)
}

/// A convenience constant documenting the PAP/packet loss timers this
/// module uses, re-exported for readability at call sites.
pub const PACKET_LOSS_TIMER: Duration = crate::config::T_LOSS;

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> SourceName {
        SourceName::new("test").unwrap()
    }

    #[test]
    fn dmx_first_waits_for_pap_then_delivers() {
        let now = Instant::now();
        let mut src = TrackedSource::from_dmx(1, name(), None, now, true, false);
        assert_eq!(src.pap_state(), PapState::WaitingForPap);

        let outcome = src.on_dmx(now, SlotBuffer::new(), 100);
        assert!(outcome.deliver_dmx.is_none(), "buffered while waiting for PAP");

        let delivered = src.on_pap(now);
        assert!(delivered.is_some());
        assert_eq!(src.pap_state(), PapState::HaveDmxAndPap);
    }

    #[test]
    fn waiting_for_pap_times_out_to_dmx_only_and_delivers_pending() {
        let now = Instant::now();
        let mut src = TrackedSource::from_dmx(1, name(), None, now, true, false);
        src.on_dmx(now, SlotBuffer::new(), 100);

        let later = now + T_SAMPLE + Duration::from_millis(1);
        let outcome = src.tick_pap_timer(later);
        assert_eq!(src.pap_state(), PapState::HaveDmxOnly);
        assert!(outcome.deliver_dmx.is_some());
        assert!(!outcome.pap_lost);
    }

    #[test]
    fn have_dmx_and_pap_loses_pap_on_timeout() {
        let now = Instant::now();
        let mut src = TrackedSource::from_pap(1, name(), None, now, false);
        src.on_dmx(now, SlotBuffer::new(), 100);
        assert_eq!(src.pap_state(), PapState::HaveDmxAndPap);

        let later = now + T_SAMPLE + Duration::from_millis(1);
        let outcome = src.tick_pap_timer(later);
        assert_eq!(src.pap_state(), PapState::HaveDmxOnly);
        assert!(outcome.pap_lost);
    }

    #[test]
    fn pap_only_timeout_restarts_waiting_for_pap() {
        let now = Instant::now();
        let mut src = TrackedSource::from_pap(1, name(), None, now, false);
        assert_eq!(src.pap_state(), PapState::HavePapOnly);

        let later = now + T_SAMPLE + Duration::from_millis(1);
        let outcome = src.tick_pap_timer(later);
        assert_eq!(src.pap_state(), PapState::WaitingForPap);
        assert!(outcome.pap_lost);
    }

    #[test]
    fn sequence_rejection_window() {
        assert!(sequence_accepted(10, 11));
        assert!(sequence_accepted(10, 246)); // 10 + 236
        assert!(!sequence_accepted(10, 10)); // delta 0
        assert!(!sequence_accepted(10, 8)); // delta -2 -> 254, rejected
    }

    #[test]
    fn accept_sequence_rejects_replay_without_updating_last() {
        let now = Instant::now();
        let mut src = TrackedSource::from_dmx(1, name(), None, now, false, false);
        assert!(src.accept_sequence(10));
        assert!(src.accept_sequence(11));
        assert!(!src.accept_sequence(8), "delta -3 must be rejected");
        assert!(src.accept_sequence(13), "last_sequence should still be 11 after rejected 8");
    }
}
