//! Termination-set tracking implementing the E1.31 §6.7.1 network-data-loss
//! rule (spec.md §4.3).
//!
//! Grounded on `original_source/src/sacn/source_loss.c`: the reference
//! implementation keeps one process-wide rbtree keyed by `(handle,
//! universe)` so a source can never sit in two termination sets at once.
//! [SourceLossEngine] reproduces that with a per-universe `Vec` of
//! [TerminationSet] plus a `HashSet` index over `(RemoteSourceHandle,
//! UniverseId)` doing the same job without a raw pointer back-reference
//! (see DESIGN.md's note on cyclic containers, spec.md §9).

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::registry::RemoteSourceHandle;
use crate::universe::UniverseId;

/// One source tracked within a [TerminationSet].
#[derive(Debug, Clone)]
pub struct TerminationSetSource {
    /// The source's process-wide handle.
    pub handle: RemoteSourceHandle,
    /// The universe the source was lost on.
    pub universe: UniverseId,
    /// The source's last-known name, carried through to the lost
    /// notification.
    pub name: crate::cid::SourceName,
    /// Whether the source is currently believed offline.
    pub offline: bool,
    /// Whether the source was removed via an explicit Stream_Terminated
    /// packet rather than a timeout.
    pub terminated: bool,
}

/// A group of sources observed offline together within one T_wait window
/// (spec.md §4.3, glossary "Termination set").
#[derive(Debug)]
pub struct TerminationSet {
    wait_timer_started: Instant,
    wait: Duration,
    sources: Vec<TerminationSetSource>,
}

impl TerminationSet {
    /// The sources currently held in this termination set.
    pub fn sources(&self) -> &[TerminationSetSource] {
        &self.sources
    }

    fn has_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.wait_timer_started) >= self.wait
    }

    fn all_offline(&self) -> bool {
        self.sources.iter().all(|s| s.offline)
    }
}

/// A source reported lost by [SourceLossEngine::get_expired_sources].
#[derive(Debug, Clone)]
pub struct LostSource {
    /// The lost source's handle.
    pub handle: RemoteSourceHandle,
    /// The universe it was lost on.
    pub universe: UniverseId,
    /// Its last-known name.
    pub name: crate::cid::SourceName,
    /// Whether it was lost via explicit termination rather than timeout.
    pub terminated: bool,
}

/// Per-universe termination-set bookkeeping, owned by a single receiver.
///
/// The `(handle, universe)` global-uniqueness invariant (spec.md §4.3, §8
/// invariant 2) only needs to hold *within* a universe in practice — two
/// different receivers never track the same universe's sources
/// independently, since the spec keys tracked sources by `(receiver,
/// universe)` — so one [SourceLossEngine] instance per receiver, scoped to
/// its own universes, is sufficient and keeps the index un-shared.
#[derive(Default)]
pub struct SourceLossEngine {
    by_universe: HashMap<UniverseId, Vec<TerminationSet>>,
    index: HashSet<(RemoteSourceHandle, UniverseId)>,
}

impl SourceLossEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks every handle in `online` as no longer offline for `universe`,
    /// removing it from whatever termination set holds it. Emptied sets are
    /// dropped.
    pub fn mark_sources_online(&mut self, universe: UniverseId, online: &[RemoteSourceHandle]) {
        let Some(sets) = self.by_universe.get_mut(&universe) else { return };

        for &handle in online {
            for set in sets.iter_mut() {
                if let Some(pos) = set.sources.iter().position(|s| s.handle == handle) {
                    set.sources.remove(pos);
                    self.index.remove(&(handle, universe));
                }
            }
        }

        sets.retain(|set| !set.sources.is_empty());
        if sets.is_empty() {
            self.by_universe.remove(&universe);
        }
    }

    /// Marks every source in `offline` as offline for `universe`. Sources
    /// already in a termination set just have their `offline` bit set;
    /// otherwise a new termination set is created holding the offline
    /// source plus every member of `unknown` not already claimed by another
    /// set.
    pub fn mark_sources_offline(
        &mut self,
        universe: UniverseId,
        offline: &[(RemoteSourceHandle, crate::cid::SourceName, bool)],
        unknown: &[(RemoteSourceHandle, crate::cid::SourceName)],
        wait: Duration,
        now: Instant,
    ) {
        for &(handle, ref name, terminated) in offline {
            if self.index.contains(&(handle, universe)) {
                let sets = self.by_universe.get_mut(&universe).expect("index/map desync");
                for set in sets.iter_mut() {
                    if let Some(source) = set.sources.iter_mut().find(|s| s.handle == handle) {
                        source.offline = true;
                        source.terminated |= terminated;
                    }
                }
                continue;
            }

            let mut sources = vec![TerminationSetSource {
                handle,
                universe,
                name: *name,
                offline: true,
                terminated,
            }];
            self.index.insert((handle, universe));

            for &(uhandle, uname) in unknown {
                if uhandle == handle || self.index.contains(&(uhandle, universe)) {
                    continue;
                }
                sources.push(TerminationSetSource {
                    handle: uhandle,
                    universe,
                    name: uname,
                    offline: false,
                    terminated: false,
                });
                self.index.insert((uhandle, universe));
            }

            self.by_universe.entry(universe).or_default().push(TerminationSet {
                wait_timer_started: now,
                wait,
                sources,
            });
        }
    }

    /// Scans every universe's termination sets, removing and returning
    /// every member of a set whose wait timer fired with all members still
    /// offline. Each expired set becomes one `Vec<LostSource>` entry, so
    /// callers can emit one `sources-lost` notification per set rather than
    /// per source (spec.md §4.3, SPEC_FULL.md §E.1).
    pub fn get_expired_sources(&mut self, now: Instant) -> Vec<Vec<LostSource>> {
        let mut groups = Vec::new();

        for (&universe, sets) in self.by_universe.iter_mut() {
            let mut remaining = Vec::with_capacity(sets.len());
            for set in sets.drain(..) {
                if set.has_expired(now) && set.all_offline() {
                    let lost = set
                        .sources
                        .iter()
                        .map(|s| LostSource {
                            handle: s.handle,
                            universe,
                            name: s.name,
                            terminated: s.terminated,
                        })
                        .collect::<Vec<_>>();
                    for s in &set.sources {
                        self.index.remove(&(s.handle, universe));
                    }
                    groups.push(lost);
                } else {
                    remaining.push(set);
                }
            }
            *sets = remaining;
        }

        self.by_universe.retain(|_, sets| !sets.is_empty());
        groups
    }

    /// Drops every termination set for `universe` without notifying,
    /// releasing index entries. Used when a receiver (or one of its
    /// universes) is destroyed (spec.md §4.3: "destruction of a receiver
    /// frees any dangling termination sets without notifying").
    pub fn clear_universe(&mut self, universe: UniverseId) {
        if let Some(sets) = self.by_universe.remove(&universe) {
            for set in sets {
                for s in set.sources {
                    self.index.remove(&(s.handle, universe));
                }
            }
        }
    }

    /// Whether `(handle, universe)` is currently claimed by any
    /// termination set.
    pub fn contains(&self, handle: RemoteSourceHandle, universe: UniverseId) -> bool {
        self.index.contains(&(handle, universe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> crate::cid::SourceName {
        crate::cid::SourceName::new(s).unwrap()
    }

    #[test]
    fn offline_source_creates_termination_set_and_expires_alone() {
        let mut engine = SourceLossEngine::new();
        let now = Instant::now();
        engine.mark_sources_offline(1, &[(1, name("A"), false)], &[], Duration::from_millis(100), now);
        assert!(engine.contains(1, 1));

        let expired = engine.get_expired_sources(now);
        assert!(expired.is_empty(), "wait timer hasn't fired yet");

        let later = now + Duration::from_millis(200);
        let expired = engine.get_expired_sources(later);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].len(), 1);
        assert_eq!(expired[0][0].handle, 1);
        assert!(!engine.contains(1, 1));
    }

    #[test]
    fn online_removes_source_before_expiry_and_empties_set() {
        let mut engine = SourceLossEngine::new();
        let now = Instant::now();
        engine.mark_sources_offline(1, &[(1, name("A"), false)], &[], Duration::from_millis(100), now);
        engine.mark_sources_online(1, &[1]);
        assert!(!engine.contains(1, 1));

        let later = now + Duration::from_millis(200);
        let expired = engine.get_expired_sources(later);
        assert!(expired.is_empty());
    }

    #[test]
    fn a_source_is_held_until_unknown_members_resolve() {
        let mut engine = SourceLossEngine::new();
        let now = Instant::now();
        // A offline, B unknown → both enter the same termination set.
        engine.mark_sources_offline(
            1,
            &[(1, name("A"), false)],
            &[(2, name("B"))],
            Duration::from_millis(100),
            now,
        );
        assert!(engine.contains(1, 1));
        assert!(engine.contains(2, 1));

        let later = now + Duration::from_millis(200);
        // B resolves online before expiry scan.
        engine.mark_sources_online(1, &[2]);
        let expired = engine.get_expired_sources(later);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].len(), 1);
        assert_eq!(expired[0][0].handle, 1);
    }

    #[test]
    fn set_with_unresolved_unknown_member_never_expires() {
        let mut engine = SourceLossEngine::new();
        let now = Instant::now();
        engine.mark_sources_offline(
            1,
            &[(1, name("A"), false)],
            &[(2, name("B"))],
            Duration::from_millis(100),
            now,
        );
        let later = now + Duration::from_millis(200);
        let expired = engine.get_expired_sources(later);
        assert!(expired.is_empty(), "B is still unresolved (not offline), set must be held");
        assert!(engine.contains(1, 1));
        assert!(engine.contains(2, 1));
    }

    #[test]
    fn already_offline_source_gets_terminated_flag_merged() {
        let mut engine = SourceLossEngine::new();
        let now = Instant::now();
        engine.mark_sources_offline(1, &[(1, name("A"), false)], &[], Duration::from_millis(100), now);
        engine.mark_sources_offline(1, &[(1, name("A"), true)], &[], Duration::from_millis(100), now);

        let later = now + Duration::from_millis(200);
        let expired = engine.get_expired_sources(later);
        assert_eq!(expired.len(), 1);
        assert!(expired[0][0].terminated);
    }

    #[test]
    fn clear_universe_drops_without_notifying() {
        let mut engine = SourceLossEngine::new();
        let now = Instant::now();
        engine.mark_sources_offline(1, &[(1, name("A"), false)], &[], Duration::from_millis(100), now);
        engine.clear_universe(1);
        assert!(!engine.contains(1, 1));

        let later = now + Duration::from_millis(200);
        assert!(engine.get_expired_sources(later).is_empty());
    }
}
