//! Composes a [Receiver] with one or two [DmxMerger]s into the merged-data
//! pipeline spec.md §4.7 describes as "Merge Receiver".
//!
//! Two mergers exist so sources admitted mid-sampling-period can be kept
//! out of the live merge until the period ends (spec.md §8 scenario 6): the
//! primary merger always feeds [MergeReceiverNotification::MergedData], and
//! a second sampling merger holds sources whose very first packet arrived
//! with [crate::notification::ReceiverNotification::UniverseData]'s
//! `sampling` flag set. Once [crate::notification::ReceiverNotification::SamplingPeriodEnded]
//! fires, every source still homed in the sampling merger migrates into the
//! primary one in a single step.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::Error;
use crate::net::{Datagram, InterfaceId};
use crate::notification::{MergeReceiverNotification, ReceiverNotification};
use crate::receiver::{Receiver, ReceiverConfig};
use crate::registry::{RemoteSourceHandle, RemoteSourceRegistry};
use crate::universe::UniverseId;

use super::merger::DmxMerger;

/// Which merger a tracked source's data currently feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Home {
    Primary,
    Sampling,
}

/// A [Receiver] paired with a primary [DmxMerger] (and, while sources are
/// still arriving during a sampling period, a secondary sampling merger) for
/// one universe.
pub struct MergeReceiver {
    receiver: Receiver,
    primary: DmxMerger,
    sampling: DmxMerger,
    homes: HashMap<RemoteSourceHandle, Home>,
    addrs: HashMap<RemoteSourceHandle, SocketAddr>,
}

impl MergeReceiver {
    /// Creates a merge receiver for `universe`.
    pub fn new(
        universe: UniverseId,
        config: ReceiverConfig,
        registry: Arc<Mutex<RemoteSourceRegistry>>,
        on_interfaces: &[InterfaceId],
        now: Instant,
    ) -> Result<Self, Error> {
        Ok(Self {
            receiver: Receiver::new(universe, config, registry, on_interfaces, now)?,
            primary: DmxMerger::new(),
            sampling: DmxMerger::new(),
            homes: HashMap::new(),
            addrs: HashMap::new(),
        })
    }

    pub fn universe(&self) -> UniverseId {
        self.receiver.universe()
    }

    /// The primary merger's output, what's actually driving output hardware.
    pub fn primary(&self) -> &DmxMerger {
        &self.primary
    }

    /// Restarts the inner receiver's sampling period on `on_interfaces`
    /// (a networking reset, spec.md §4.4), forwarded from
    /// [Receiver::enter_sampling]. Sources already contributing to
    /// [Self::primary] stay there; only sources admitted after this call
    /// land in the sampling merger until the period ends.
    pub fn enter_sampling(&mut self, on_interfaces: &[InterfaceId], now: Instant) {
        self.receiver.enter_sampling(on_interfaces, now);
    }

    fn merger_for(&mut self, home: Home) -> &mut DmxMerger {
        match home {
            Home::Primary => &mut self.primary,
            Home::Sampling => &mut self.sampling,
        }
    }

    fn home_of(&mut self, handle: RemoteSourceHandle, sampling: bool) -> Home {
        *self.homes.entry(handle).or_insert_with(|| {
            let home = if sampling { Home::Sampling } else { Home::Primary };
            if home == Home::Primary {
                self.primary.add_source(handle);
            } else {
                self.sampling.add_source(handle);
            }
            home
        })
    }

    /// Feeds one received datagram through the inner receiver and the
    /// appropriate merger(s), returning the resulting
    /// [MergeReceiverNotification]s.
    pub fn handle_datagram(&mut self, datagram: &Datagram, now: Instant) -> Vec<MergeReceiverNotification> {
        let notifications = self.receiver.handle_datagram(datagram, now);
        self.apply(notifications)
    }

    /// Advances the inner receiver by one tick and applies any resulting
    /// notifications to the mergers.
    pub fn tick(&mut self, now: Instant) -> Vec<MergeReceiverNotification> {
        let notifications = self.receiver.tick(now);
        self.apply(notifications)
    }

    fn apply(&mut self, notifications: Vec<ReceiverNotification>) -> Vec<MergeReceiverNotification> {
        let mut out = Vec::new();
        let mut dirty = false;

        for notification in notifications {
            match notification {
                ReceiverNotification::UniverseData { source, levels, priority, sampling, .. } => {
                    self.addrs.insert(source.handle, source.addr);
                    let home = self.home_of(source.handle, sampling);
                    let merger = self.merger_for(home);
                    if !merger.pap_active(source.handle) {
                        let _ = merger.update_universe_priority(source.handle, priority);
                    }
                    let _ = merger.update_levels(source.handle, &levels);
                    dirty = true;
                }
                ReceiverNotification::PapData { source, priorities, sampling, .. } => {
                    self.addrs.insert(source.handle, source.addr);
                    let home = self.home_of(source.handle, sampling);
                    let _ = self.merger_for(home).update_pap(source.handle, &priorities);
                    dirty = true;
                }
                ReceiverNotification::SourcePapLost { handle, .. } => {
                    if let Some(&home) = self.homes.get(&handle) {
                        let _ = self.merger_for(home).remove_pap(handle);
                        dirty = true;
                    }
                }
                ReceiverNotification::NonDmx { universe, source, start_code, data } => {
                    out.push(MergeReceiverNotification::NonDmx { universe, source, start_code, data });
                }
                ReceiverNotification::SourcesLost { universe, sources } => {
                    for lost in &sources {
                        if let Some(home) = self.homes.remove(&lost.handle) {
                            self.merger_for(home).remove_source(lost.handle);
                        }
                        self.addrs.remove(&lost.handle);
                    }
                    dirty = true;
                    out.push(MergeReceiverNotification::SourcesLost { universe, sources });
                }
                ReceiverNotification::SamplingPeriodEnded { universe } => {
                    self.migrate_sampling_sources();
                    dirty = true;
                    out.push(MergeReceiverNotification::SamplingPeriodEnded { universe });
                }
                ReceiverNotification::SourceLimitExceeded { .. } => {}
            }
        }

        // Merged data is only meaningful once at least one non-pending
        // source exists (spec.md §4.7): a source held in the sampling
        // merger alone must not surface an empty primary merge.
        if dirty && !self.primary.active_sources().is_empty() {
            out.push(self.merged_data_notification());
        }
        out
    }

    /// Moves every source still homed in the sampling merger into the
    /// primary one, carrying over its current levels and priority state,
    /// then clears the sampling merger.
    fn migrate_sampling_sources(&mut self) {
        let migrating: Vec<RemoteSourceHandle> =
            self.homes.iter().filter(|(_, &h)| h == Home::Sampling).map(|(&h, _)| h).collect();

        for handle in migrating {
            self.primary.add_source(handle);
            if self.sampling.pap_active(handle) {
                // Sampling merger only ever stores full 512-slot buffers
                // internally; re-derive them through its own accessors
                // rather than keeping a second copy here.
                let priorities: Vec<u8> = (0..crate::slot::MAX_SLOTS)
                    .map(|slot| if self.sampling.owners()[slot] == Some(handle) { self.sampling.priorities()[slot] } else { 0 })
                    .collect();
                let _ = self.primary.update_pap(handle, &priorities);
            }
            let _ = self.primary.update_levels(handle, self.sampling.levels());
            self.homes.insert(handle, Home::Primary);
        }

        self.sampling = DmxMerger::new();
    }

    fn merged_data_notification(&self) -> MergeReceiverNotification {
        MergeReceiverNotification::MergedData {
            universe: self.receiver.universe(),
            levels: self.primary.levels().iter().copied().collect(),
            priorities: self.primary.priorities().iter().copied().collect(),
            owners: self.primary.owners().to_vec(),
            active_sources: self.primary.active_sources(),
        }
    }

    /// Sources currently held back in the sampling merger, not yet visible
    /// in [Self::primary]'s output.
    pub fn sampling_sources(&self) -> HashSet<RemoteSourceHandle> {
        self.homes.iter().filter(|(_, &h)| h == Home::Sampling).map(|(&h, _)| h).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::{Cid, SourceName};
    use crate::packet::acn::{Pdu as AcnPdu, PduBlock};
    use crate::packet::data::{DataFraming, Dmp};
    use crate::packet::{Packet, Pdu, Postamble, Preamble, RootLayer};
    use crate::universe::UniverseId;

    fn registry() -> Arc<Mutex<RemoteSourceRegistry>> {
        Arc::new(Mutex::new(RemoteSourceRegistry::new()))
    }

    fn dmx_datagram(cid: Cid, universe: UniverseId, seq: u8, priority: u8, levels: &[u8]) -> Datagram {
        let framing = DataFraming::new(
            SourceName::new("source").unwrap(),
            priority,
            0,
            seq,
            false,
            false,
            false,
            universe,
            Dmp::new(0x00, levels),
        )
        .unwrap();
        let root = RootLayer::for_pdu(cid, Pdu::DataFraming(framing));
        let bytes = Packet::new(Preamble, PduBlock::new(vec![root]), Postamble).encode().into();
        Datagram { bytes, from: "127.0.0.1:5568".parse().unwrap(), interface: None }
    }

    #[test]
    fn two_sources_merge_htp() {
        let now = Instant::now();
        let mut mr = MergeReceiver::new(
            1,
            ReceiverConfig { pap_enabled: false, ..Default::default() },
            registry(),
            &[],
            now,
        )
        .unwrap();
        // Clear the initial sampling period so both sources land directly
        // in the primary merger.
        mr.tick(now + crate::config::T_SAMPLE + std::time::Duration::from_millis(1));
        let now = now + crate::config::T_SAMPLE + std::time::Duration::from_millis(1);

        let mut levels_a = vec![0u8; 512];
        levels_a[0] = 100;
        let mut levels_b = vec![0u8; 512];
        levels_b[0] = 200;

        mr.handle_datagram(&dmx_datagram(Cid::from_bytes([1; 16]), 1, 1, 100, &levels_a), now);
        let notifications =
            mr.handle_datagram(&dmx_datagram(Cid::from_bytes([2; 16]), 1, 1, 100, &levels_b), now);

        let merged = notifications
            .into_iter()
            .find_map(|n| match n {
                MergeReceiverNotification::MergedData { levels, .. } => Some(levels),
                _ => None,
            })
            .unwrap();
        assert_eq!(merged[0], 200, "HTP picks the higher level at equal priority");
    }

    #[test]
    fn sampling_source_is_isolated_until_period_ends() {
        let now = Instant::now();
        let mut mr =
            MergeReceiver::new(1, ReceiverConfig { pap_enabled: false, ..Default::default() }, registry(), &[], now)
                .unwrap();

        let mut levels = vec![0u8; 512];
        levels[0] = 77;
        let notifications =
            mr.handle_datagram(&dmx_datagram(Cid::from_bytes([3; 16]), 1, 1, 100, &levels), now);
        let merged = notifications.into_iter().find_map(|n| match n {
            MergeReceiverNotification::MergedData { levels, .. } => Some(levels),
            _ => None,
        });
        assert!(
            merged.is_none(),
            "no merged-data notification until at least one non-pending source exists"
        );
        assert_eq!(mr.sampling_sources().len(), 1);
        assert!(mr.primary().active_sources().is_empty());
    }
}
