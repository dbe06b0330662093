//! Arbitrary-N-source HTP DMX merge at per-slot granularity (spec.md §4.6
//! "DMX Merger").
//!
//! Grounded on [crate::receiver::source_loss]'s preference for owning plain
//! collections over raw back-references: rather than the reference
//! implementation's `dmx_merger_t` holding caller-supplied output buffer
//! pointers (SPEC_FULL.md §1 Out of scope: C-style public API shape), this
//! [DmxMerger] owns its three output arrays directly and exposes them
//! through getters.
//!
//! Every mutating call does a full `O(slots × sources)` recompute rather
//! than maintaining per-slot running state incrementally. At up to 512
//! slots and a source count bounded by what a single universe can carry on
//! the wire, this is fast enough in practice and is far simpler to get
//! right than incremental bookkeeping (see DESIGN.md).

use std::collections::HashMap;

use crate::error::Error;
use crate::registry::RemoteSourceHandle;
use crate::slot::{MAX_SLOTS, SlotBuffer, zeroed_slots};

struct SourceState {
    levels: Option<SlotBuffer>,
    /// Number of slots actually carried by the most recent [Self::levels]
    /// update (spec.md §3's per-source "valid-level count") — the slice
    /// length the source last sent, not padded out to 512. A slot at or
    /// beyond this count has no level data at all, regardless of priority.
    valid_len: usize,
    pap: Option<SlotBuffer>,
    /// Same concept as [Self::valid_len], for the per-address-priority
    /// buffer: slots at or beyond this count carry no priority data and
    /// are excluded exactly as if the source had sent an explicit `0`
    /// there (E1.31 §4.6 "`i < len(pap_s)` else 0"), tracked explicitly
    /// rather than relied on as an artifact of zero-padding the buffer.
    pap_valid_len: usize,
    universe_priority: u8,
}

impl SourceState {
    fn new() -> Self {
        Self { levels: None, valid_len: 0, pap: None, pap_valid_len: 0, universe_priority: 100 }
    }

    /// The priority this source contributes at `slot`, or `None` if it
    /// doesn't contribute there at all.
    ///
    /// Per-address priority `0` means "this source doesn't want this slot
    /// considered" (E1.31 Annex B) and excludes it outright, as does a
    /// slot at or beyond [Self::pap_valid_len]. A universe priority of `0`
    /// has no such meaning — it's promoted to `1` so an otherwise-valid
    /// source is never silently dropped from arbitration.
    ///
    /// This does not by itself decide whether the source is "sourcing"
    /// `slot` — the caller (`DmxMerger::recompute`) additionally gates on
    /// `slot < valid_len`, spec.md §4.6's "i < len(levels_s)" clause, since
    /// that bound applies regardless of which priority source is in play.
    fn effective_priority(&self, slot: usize) -> Option<u8> {
        match &self.pap {
            Some(pap) if slot < self.pap_valid_len => {
                let p = pap[slot];
                if p == 0 { None } else { Some(p) }
            }
            Some(_) => None,
            None => Some(if self.universe_priority == 0 { 1 } else { self.universe_priority }),
        }
    }
}

/// Merges DMX levels from an arbitrary number of sources into one winning
/// output per slot, using Highest-Takes-Precedence arbitration: highest
/// per-address (or universe) priority wins, ties broken by highest level,
/// remaining ties broken in favor of whichever source already owned the
/// slot.
pub struct DmxMerger {
    sources: HashMap<RemoteSourceHandle, SourceState>,
    levels: SlotBuffer,
    priorities: SlotBuffer,
    owners: Vec<Option<RemoteSourceHandle>>,
}

impl DmxMerger {
    /// Creates an empty merger with every slot defaulted to level 0,
    /// priority 0, and no owner.
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            levels: zeroed_slots(),
            priorities: zeroed_slots(),
            owners: vec![None; MAX_SLOTS],
        }
    }

    /// Registers a source with the merger. It contributes nothing to the
    /// merge until its first [Self::update_levels] call.
    pub fn add_source(&mut self, handle: RemoteSourceHandle) {
        self.sources.entry(handle).or_insert_with(SourceState::new);
    }

    /// Removes a source and recomputes every slot it could have won.
    pub fn remove_source(&mut self, handle: RemoteSourceHandle) {
        if self.sources.remove(&handle).is_some() {
            self.recompute();
        }
    }

    /// Whether `handle` is currently registered with this merger.
    pub fn has_source(&self, handle: RemoteSourceHandle) -> bool {
        self.sources.contains_key(&handle)
    }

    /// The sources currently contributing level data (as opposed to merely
    /// registered but still pending their first packet).
    pub fn active_sources(&self) -> Vec<RemoteSourceHandle> {
        self.sources.iter().filter(|(_, s)| s.levels.is_some()).map(|(&h, _)| h).collect()
    }

    fn get_mut(&mut self, handle: RemoteSourceHandle) -> Result<&mut SourceState, Error> {
        self.sources.get_mut(&handle).ok_or_else(|| Error::NotFound(format!("merge source {handle}")))
    }

    /// Sets fresh DMX levels for `handle` and recomputes. `levels` is kept
    /// at its actual length (truncated to [MAX_SLOTS], never zero-padded)
    /// — slots beyond it are not sourced by this source at all, per
    /// spec.md §4.6's "i < len(levels_s)" clause.
    pub fn update_levels(&mut self, handle: RemoteSourceHandle, levels: &[u8]) -> Result<(), Error> {
        let source = self.get_mut(handle)?;
        let truncated = &levels[..levels.len().min(MAX_SLOTS)];
        let mut buf = SlotBuffer::new();
        let _ = buf.try_extend_from_slice(truncated);
        source.valid_len = buf.len();
        source.levels = Some(buf);
        self.recompute();
        Ok(())
    }

    /// Sets fresh per-address priority data for `handle`, switching it from
    /// universe-priority to per-address arbitration, and recomputes.
    /// `priorities` is kept at its actual length (truncated to
    /// [MAX_SLOTS], never zero-padded) — slots beyond it carry no priority
    /// data, tracked via [SourceState::pap_valid_len] rather than relying
    /// on a padded buffer's trailing zeros to mean the same thing.
    pub fn update_pap(&mut self, handle: RemoteSourceHandle, priorities: &[u8]) -> Result<(), Error> {
        let source = self.get_mut(handle)?;
        let truncated = &priorities[..priorities.len().min(MAX_SLOTS)];
        let mut buf = SlotBuffer::new();
        let _ = buf.try_extend_from_slice(truncated);
        source.pap_valid_len = buf.len();
        source.pap = Some(buf);
        self.recompute();
        Ok(())
    }

    /// Clears `handle`'s per-address priority data, reverting it to
    /// universe-priority arbitration, and recomputes.
    pub fn remove_pap(&mut self, handle: RemoteSourceHandle) -> Result<(), Error> {
        let source = self.get_mut(handle)?;
        source.pap = None;
        source.pap_valid_len = 0;
        self.recompute();
        Ok(())
    }

    /// Updates `handle`'s universe priority (used while it has no active
    /// per-address priority data) and recomputes.
    ///
    /// Rejects `priority > 200` per the wire-format cap (E1.31 §6.2.3); see
    /// DESIGN.md for the one scenario seed this puts out of reach.
    pub fn update_universe_priority(&mut self, handle: RemoteSourceHandle, priority: u8) -> Result<(), Error> {
        if priority > 200 {
            return Err(Error::InvalidArgument(format!("priority {priority} out of range 0..=200")));
        }
        let source = self.get_mut(handle)?;
        source.universe_priority = priority;
        self.recompute();
        Ok(())
    }

    /// Whether `handle` currently has per-address priority data active.
    pub fn pap_active(&self, handle: RemoteSourceHandle) -> bool {
        self.sources.get(&handle).is_some_and(|s| s.pap.is_some())
    }

    /// Whether any registered source currently has per-address priority
    /// data active.
    pub fn any_pap_active(&self) -> bool {
        self.sources.values().any(|s| s.pap.is_some())
    }

    /// The highest universe priority among all registered sources, or `0`
    /// if none are registered.
    pub fn max_universe_priority(&self) -> u8 {
        self.sources.values().map(|s| s.universe_priority).max().unwrap_or(0)
    }

    /// The merged output levels, 512 slots.
    pub fn levels(&self) -> &[u8] {
        &self.levels
    }

    /// The merged output per-slot winning priorities, 512 slots.
    pub fn priorities(&self) -> &[u8] {
        &self.priorities
    }

    /// The winning source handle per slot, `None` where no source
    /// contributes.
    pub fn owners(&self) -> &[Option<RemoteSourceHandle>] {
        &self.owners
    }

    fn recompute(&mut self) {
        for slot in 0..MAX_SLOTS {
            let mut best: Option<(u8, u8, RemoteSourceHandle)> = None;

            for (&handle, source) in &self.sources {
                let Some(levels) = &source.levels else { continue };
                if slot >= source.valid_len {
                    // Beyond what this source actually sent — spec.md
                    // §4.6's "i < len(levels_s)" bound. Not sourcing this
                    // slot regardless of priority.
                    continue;
                }
                let Some(priority) = source.effective_priority(slot) else { continue };
                let level = levels[slot];
                let candidate = (priority, level, handle);

                best = Some(match best {
                    None => candidate,
                    Some(current) => pick_winner(current, candidate, self.owners[slot]),
                });
            }

            match best {
                Some((priority, level, handle)) => {
                    self.levels[slot] = level;
                    self.priorities[slot] = priority;
                    self.owners[slot] = Some(handle);
                }
                None => {
                    self.levels[slot] = 0;
                    self.priorities[slot] = 0;
                    self.owners[slot] = None;
                }
            }
        }
    }
}

impl Default for DmxMerger {
    fn default() -> Self {
        Self::new()
    }
}

/// Picks the winner between two `(priority, level, handle)` candidates.
/// Higher priority wins; ties go to the higher level; remaining ties go to
/// whichever candidate is the slot's current owner, falling back to the
/// lower handle for determinism if neither (or both, which can't happen) is.
fn pick_winner(
    a: (u8, u8, RemoteSourceHandle),
    b: (u8, u8, RemoteSourceHandle),
    current_owner: Option<RemoteSourceHandle>,
) -> (u8, u8, RemoteSourceHandle) {
    if a.0 != b.0 {
        return if a.0 > b.0 { a } else { b };
    }
    if a.1 != b.1 {
        return if a.1 > b.1 { a } else { b };
    }
    if Some(a.2) == current_owner {
        return a;
    }
    if Some(b.2) == current_owner {
        return b;
    }
    if a.2 < b.2 { a } else { b }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(value: u8) -> Vec<u8> {
        let mut v = vec![0; MAX_SLOTS];
        v[0] = value;
        v
    }

    #[test]
    fn single_source_wins_uncontested() {
        let mut merger = DmxMerger::new();
        merger.add_source(1);
        merger.update_levels(1, &levels(50)).unwrap();
        assert_eq!(merger.levels()[0], 50);
        assert_eq!(merger.owners()[0], Some(1));
    }

    #[test]
    fn higher_universe_priority_wins() {
        let mut merger = DmxMerger::new();
        merger.add_source(1);
        merger.add_source(2);
        merger.update_levels(1, &levels(200)).unwrap();
        merger.update_levels(2, &levels(10)).unwrap();
        merger.update_universe_priority(2, 150).unwrap();

        assert_eq!(merger.levels()[0], 10);
        assert_eq!(merger.owners()[0], Some(2));
    }

    #[test]
    fn equal_priority_htp_picks_higher_level() {
        let mut merger = DmxMerger::new();
        merger.add_source(1);
        merger.add_source(2);
        merger.update_levels(1, &levels(100)).unwrap();
        merger.update_levels(2, &levels(200)).unwrap();

        assert_eq!(merger.levels()[0], 200);
        assert_eq!(merger.owners()[0], Some(2));
    }

    #[test]
    fn equal_priority_and_level_tie_sticks_with_incumbent() {
        let mut merger = DmxMerger::new();
        merger.add_source(1);
        merger.add_source(2);
        merger.update_levels(1, &levels(100)).unwrap();
        merger.update_levels(2, &levels(100)).unwrap();
        let incumbent = merger.owners()[0];

        // Nudge source 1's levels without changing the tie outcome; the
        // incumbent should still hold the slot.
        merger.update_levels(1, &levels(100)).unwrap();
        assert_eq!(merger.owners()[0], incumbent);
    }

    #[test]
    fn pap_zero_excludes_source_from_slot() {
        let mut merger = DmxMerger::new();
        merger.add_source(1);
        merger.add_source(2);
        merger.update_levels(1, &levels(255)).unwrap();
        merger.update_levels(2, &levels(1)).unwrap();

        let mut pap = vec![100; MAX_SLOTS];
        pap[0] = 0;
        merger.update_pap(1, &pap).unwrap();

        assert_eq!(merger.owners()[0], Some(2), "source 1 excluded itself from slot 0 via PAP 0");
        assert!(merger.any_pap_active());
    }

    #[test]
    fn scalar_outputs_track_registered_sources() {
        let mut merger = DmxMerger::new();
        merger.add_source(1);
        merger.add_source(2);
        merger.update_levels(1, &levels(50)).unwrap();
        merger.update_universe_priority(1, 128).unwrap();
        merger.update_levels(2, &levels(70)).unwrap();
        merger.update_universe_priority(2, 200).unwrap();
        assert!(!merger.any_pap_active());
        assert_eq!(merger.max_universe_priority(), 200);

        merger.update_pap(2, &vec![200; MAX_SLOTS]).unwrap();
        assert!(merger.any_pap_active());
    }

    #[test]
    fn universe_priority_zero_is_promoted_to_one() {
        let mut merger = DmxMerger::new();
        merger.add_source(1);
        merger.update_levels(1, &levels(10)).unwrap();
        merger.update_universe_priority(1, 0).unwrap();
        assert_eq!(merger.priorities()[0], 1);
        assert_eq!(merger.owners()[0], Some(1));
    }

    #[test]
    fn removing_a_source_frees_its_slots() {
        let mut merger = DmxMerger::new();
        merger.add_source(1);
        merger.add_source(2);
        merger.update_levels(1, &levels(200)).unwrap();
        merger.update_universe_priority(1, 150).unwrap();
        merger.update_levels(2, &levels(50)).unwrap();

        assert_eq!(merger.owners()[0], Some(1));
        merger.remove_source(1);
        assert_eq!(merger.owners()[0], Some(2));
        assert_eq!(merger.levels()[0], 50);
    }

    #[test]
    fn pending_source_with_no_levels_never_wins() {
        let mut merger = DmxMerger::new();
        merger.add_source(1);
        assert!(merger.active_sources().is_empty());
        assert_eq!(merger.owners()[0], None);
    }
}
