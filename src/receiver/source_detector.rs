//! Universe Discovery aggregation (spec.md §4.4 "Source detector").
//!
//! A singleton variant of a receiver that only joins the Universe Discovery
//! group (universe [crate::universe::DISCOVERY_UNIVERSE]). Grounded on
//! `original_source/src/sacn/source_detector.c`: pages from one source are
//! accumulated until a full `0..=last` run arrives, compared against the
//! previously-committed universe list, and only then does a
//! `source-updated` notification fire — a source mid-page-cycle never
//! produces a torn partial list.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::cid::{Cid, SourceName};
use crate::config::SOURCE_DETECTOR_EXPIRY;
use crate::packet::discovery::UniverseDiscovery;
use crate::rate_limit::RateLimitedFlag;
use crate::registry::RemoteSourceHandle;
use crate::universe::UniverseId;

/// What a tick or page delivery tells the caller to notify.
#[derive(Debug, Clone, Default)]
pub struct DetectorOutcome {
    /// Sources whose committed universe set changed this call.
    pub updated: Vec<UpdatedSource>,
    /// Sources that went [SOURCE_DETECTOR_EXPIRY] without a page.
    pub expired: Vec<RemoteSourceHandle>,
    /// Whether the tracked-source or universes-per-source cap was newly
    /// exceeded this call.
    pub limit_exceeded: bool,
}

/// One source's committed universe set, as reported to the application.
#[derive(Debug, Clone)]
pub struct UpdatedSource {
    /// The source's handle.
    pub handle: RemoteSourceHandle,
    /// The source's CID.
    pub cid: Cid,
    /// The source's advertised name.
    pub name: SourceName,
    /// The committed, sorted-ascending universe list.
    pub universes: Vec<UniverseId>,
}

struct PageAccumulator {
    expected_last: u8,
    pages: BTreeMap<u8, Vec<UniverseId>>,
}

impl PageAccumulator {
    fn is_complete(&self) -> bool {
        (0..=self.expected_last).all(|p| self.pages.contains_key(&p))
    }

    fn assemble(&self) -> Vec<UniverseId> {
        let mut universes = Vec::new();
        for page in 0..=self.expected_last {
            if let Some(list) = self.pages.get(&page) {
                universes.extend_from_slice(list);
            }
        }
        universes
    }
}

struct DetectedSource {
    cid: Cid,
    name: SourceName,
    universes: Vec<UniverseId>,
    accumulator: PageAccumulator,
    last_seen: Instant,
    universe_limit: RateLimitedFlag,
}

/// Aggregates Universe Discovery pages into per-source universe sets.
pub struct SourceDetector {
    sources: std::collections::HashMap<RemoteSourceHandle, DetectedSource>,
    /// `None` means unlimited (`SACN_RECEIVER_INFINITE_SOURCES` in the
    /// reference implementation's terms), the default.
    max_sources: Option<usize>,
    /// `None` means unlimited, the default.
    max_universes_per_source: Option<usize>,
    source_limit: RateLimitedFlag,
}

impl SourceDetector {
    /// Creates a detector enforcing the given caps. `None` means unlimited.
    pub fn new(max_sources: Option<usize>, max_universes_per_source: Option<usize>) -> Self {
        Self {
            sources: std::collections::HashMap::new(),
            max_sources,
            max_universes_per_source,
            source_limit: RateLimitedFlag::new(),
        }
    }

    /// Processes one received Universe Discovery page from `handle`.
    ///
    /// If the cap on tracked sources is already hit and `handle` isn't
    /// already known, the page is dropped and a rate-limited
    /// `limit-exceeded` is reported.
    pub fn receive_page(
        &mut self,
        handle: RemoteSourceHandle,
        cid: Cid,
        name: SourceName,
        page: &UniverseDiscovery,
        now: Instant,
    ) -> DetectorOutcome {
        let mut outcome = DetectorOutcome::default();

        let at_cap = self.max_sources.is_some_and(|max| self.sources.len() >= max);
        if !self.sources.contains_key(&handle) && at_cap {
            outcome.limit_exceeded = self.source_limit.should_notify(true);
            return outcome;
        }
        if !at_cap {
            // The episode is over once we're back under the cap.
            self.source_limit.should_notify(false);
        }

        let entry = self.sources.entry(handle).or_insert_with(|| DetectedSource {
            cid,
            name,
            universes: Vec::new(),
            accumulator: PageAccumulator { expected_last: page.last(), pages: BTreeMap::new() },
            last_seen: now,
            universe_limit: RateLimitedFlag::new(),
        });

        entry.cid = cid;
        entry.name = name;
        entry.last_seen = now;

        // A page cycle with a different `last` than the one in progress
        // starts a fresh accumulation (the source's page count changed
        // between cycles).
        if entry.accumulator.expected_last != page.last() {
            entry.accumulator = PageAccumulator { expected_last: page.last(), pages: BTreeMap::new() };
        }
        entry.accumulator.pages.insert(page.page(), page.list_of_universes().to_vec());

        if entry.accumulator.is_complete() {
            let mut assembled = entry.accumulator.assemble();
            assembled.sort_unstable();
            assembled.dedup();

            let over_limit =
                self.max_universes_per_source.is_some_and(|max| assembled.len() > max);
            if entry.universe_limit.should_notify(over_limit) {
                outcome.limit_exceeded = true;
            }
            if let Some(max) = self.max_universes_per_source {
                assembled.truncate(max);
            }

            if assembled != entry.universes {
                entry.universes = assembled.clone();
                outcome.updated.push(UpdatedSource {
                    handle,
                    cid: entry.cid,
                    name: entry.name,
                    universes: assembled,
                });
            }

            // Ready to accumulate the next cycle.
            entry.accumulator.pages.clear();
        }

        outcome
    }

    /// Removes every source silent for [SOURCE_DETECTOR_EXPIRY], returning
    /// their handles. Call once per receive-thread tick.
    pub fn expire_stale(&mut self, now: Instant) -> Vec<RemoteSourceHandle> {
        let expired: Vec<_> = self
            .sources
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.last_seen) >= SOURCE_DETECTOR_EXPIRY)
            .map(|(&h, _)| h)
            .collect();

        for handle in &expired {
            self.sources.remove(handle);
        }
        expired
    }

    /// The number of sources currently tracked.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether no sources are currently tracked.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// The committed universe list for `handle`, if known and complete.
    pub fn universes_for(&self, handle: RemoteSourceHandle) -> Option<&[UniverseId]> {
        self.sources.get(&handle).map(|s| s.universes.as_slice())
    }
}

/// The silence window after which a source is dropped without a full page
/// cycle ever completing.
pub const EXPIRY: Duration = SOURCE_DETECTOR_EXPIRY;
