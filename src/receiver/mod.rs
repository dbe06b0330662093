//! Receiver state machine (spec.md §4.4): per-universe source tracking,
//! sampling periods, PAP handling, and network-data-loss detection.
//!
//! A [Receiver] owns one universe's worth of state; the owning application
//! (or a future `lifecycle`-managed receive thread) is responsible for
//! feeding it datagrams via [Receiver::handle_datagram] and driving
//! [Receiver::tick] once per receive-thread loop iteration, matching the
//! teacher's `server::output` tick-driven design rather than an
//! internally-spawned thread per receiver.

pub mod sampling;
pub mod source_detector;
pub mod tracked_source;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cid::{Cid, SourceName};
use crate::config::{DEFAULT_T_WAIT, T_SAMPLE};
use crate::error::Error;
use crate::net::{Datagram, InterfaceId};
use crate::notification::{LostSourceInfo, ReceiverNotification, SourceInfo};
use crate::packet::acn::Pdu as AcnPdu;
use crate::packet::{Packet, Pdu};
use crate::rate_limit::RateLimitedFlag;
use crate::registry::{RemoteSourceHandle, RemoteSourceRegistry};
use crate::slot::{MAX_SLOTS, Slot, SlotBuffer};
use crate::source_loss::SourceLossEngine;
use crate::universe::{UniverseId, validate_universe};

use sampling::SamplingTracker;
use tracked_source::TrackedSource;

const PAP_START_CODE: Slot = 0xDD;
const DMX_START_CODE: Slot = 0x00;

/// Tunables for one [Receiver].
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Caps the number of concurrently tracked sources. `None` means
    /// unlimited.
    pub source_count_max: Option<usize>,
    /// Whether the PAP sub-state machine gates `universe-data` delivery.
    pub pap_enabled: bool,
    /// Whether packets with the Preview_Data option bit set are dropped.
    pub preview_filter: bool,
    /// Termination-set notification delay (spec.md §4.3, default 1000 ms).
    pub t_wait: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            source_count_max: None,
            pap_enabled: true,
            preview_filter: false,
            t_wait: DEFAULT_T_WAIT,
        }
    }
}

/// One universe's worth of receiver state (spec.md §4.4 "Receiver entity").
pub struct Receiver {
    universe: UniverseId,
    config: ReceiverConfig,
    registry: Arc<Mutex<RemoteSourceRegistry>>,
    sources: HashMap<RemoteSourceHandle, TrackedSource>,
    addrs: HashMap<RemoteSourceHandle, SocketAddr>,
    loss: SourceLossEngine,
    sampling: SamplingTracker,
    source_limit: RateLimitedFlag,
}

impl Receiver {
    /// Creates a receiver for `universe`, entering its initial sampling
    /// period immediately (spec.md §4.4 "Lifecycle").
    pub fn new(
        universe: UniverseId,
        config: ReceiverConfig,
        registry: Arc<Mutex<RemoteSourceRegistry>>,
        on_interfaces: &[InterfaceId],
        now: Instant,
    ) -> Result<Self, Error> {
        validate_universe(universe)?;

        let mut sampling = SamplingTracker::new();
        sampling.start(on_interfaces, now);

        Ok(Self {
            universe,
            config,
            registry,
            sources: HashMap::new(),
            addrs: HashMap::new(),
            loss: SourceLossEngine::new(),
            sampling,
            source_limit: RateLimitedFlag::new(),
        })
    }

    /// The universe this receiver is bound to.
    pub fn universe(&self) -> UniverseId {
        self.universe
    }

    /// The number of sources currently tracked.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Re-enters a sampling period over `on_interfaces` — called when the
    /// universe number is changed or networking is reset (spec.md §4.4
    /// "Sampling period").
    pub fn enter_sampling(&mut self, on_interfaces: &[InterfaceId], now: Instant) {
        self.sampling.start(on_interfaces, now);
    }

    /// Marks `on_interfaces` as belonging to a future sampling period that
    /// hasn't started yet — used when a reset only touches some interfaces
    /// while the receiver's current window is still running
    /// ([sampling::SamplingTracker::queue_future]).
    pub fn queue_future_sampling(&mut self, on_interfaces: &[InterfaceId]) {
        self.sampling.queue_future(on_interfaces);
    }

    /// Processes one received datagram, returning any notifications it
    /// produced. Non-DataFraming PDUs (sync, universe discovery) and
    /// datagrams for a different universe are silently ignored — sync
    /// belongs to the source/merge-receiver layer and discovery belongs to
    /// [source_detector::SourceDetector].
    pub fn handle_datagram(&mut self, datagram: &Datagram, now: Instant) -> Vec<ReceiverNotification> {
        let mut out = Vec::new();

        let Ok(packet) = Packet::decode(&datagram.bytes) else { return out };
        let Some(root) = packet.block.pdus().first() else { return out };
        let Pdu::DataFraming(framing) = root.pdu() else { return out };

        if framing.universe() != self.universe {
            return out;
        }
        if self.config.preview_filter && framing.preview_data() {
            return out;
        }

        let cid = *root.cid();
        let start_code = framing.dmp().start_code();
        let sampling = self.sampling.is_sampling(datagram.interface);

        let already_tracked = self
            .registry
            .lock()
            .handle_for_cid(&cid)
            .is_some_and(|h| self.sources.contains_key(&h));

        if !already_tracked {
            let at_cap = self
                .config
                .source_count_max
                .is_some_and(|max| self.sources.len() >= max);
            if at_cap {
                if self.source_limit.should_notify(true) {
                    out.push(ReceiverNotification::SourceLimitExceeded { universe: self.universe });
                }
                return out;
            }
            self.source_limit.should_notify(false);
        }

        let Ok(handle) = self.registry.lock().add(cid) else { return out };
        self.addrs.insert(handle, datagram.from);

        let name = *framing.source_name();
        let interface = datagram.interface;
        let pap_enabled = self.config.pap_enabled;
        let source = self.sources.entry(handle).or_insert_with(|| match start_code {
            PAP_START_CODE => TrackedSource::from_pap(handle, name, interface, now, sampling),
            _ => TrackedSource::from_dmx(handle, name, interface, now, pap_enabled, sampling),
        });

        let seq = framing.sequence_number();
        let accepted = if start_code == PAP_START_CODE {
            source.accept_pap_sequence(seq)
        } else {
            source.accept_sequence(seq)
        };
        if !accepted {
            return out;
        }
        source.restart_packet_timer(now);

        let data = to_slot_buffer(framing.dmp().data_slots());
        let priority = framing.priority();
        let info = SourceInfo { handle, cid, name, addr: datagram.from };

        match start_code {
            DMX_START_CODE if sampling => {
                out.push(ReceiverNotification::UniverseData {
                    universe: self.universe,
                    source: info,
                    levels: data,
                    priority,
                    preview: framing.preview_data(),
                    sampling: true,
                });
            }
            DMX_START_CODE => {
                let outcome = source.on_dmx(now, data, priority);
                if let Some((levels, priority)) = outcome.deliver_dmx {
                    out.push(ReceiverNotification::UniverseData {
                        universe: self.universe,
                        source: info.clone(),
                        levels,
                        priority,
                        preview: framing.preview_data(),
                        sampling: false,
                    });
                }
                if outcome.pap_lost {
                    out.push(ReceiverNotification::SourcePapLost { universe: self.universe, handle });
                }
            }
            PAP_START_CODE if sampling => {
                // During sampling, the PAP timer still gets kept fresh, but
                // DMX delivery timing isn't gated; the raw priorities still
                // go to the merge layer.
                out.push(ReceiverNotification::PapData {
                    universe: self.universe,
                    source: info,
                    priorities: data,
                    sampling: true,
                });
            }
            PAP_START_CODE => {
                out.push(ReceiverNotification::PapData {
                    universe: self.universe,
                    source: info.clone(),
                    priorities: data,
                    sampling: false,
                });
                if let Some((levels, priority)) = source.on_pap(now) {
                    out.push(ReceiverNotification::UniverseData {
                        universe: self.universe,
                        source: info,
                        levels,
                        priority,
                        preview: false,
                        sampling: false,
                    });
                }
            }
            other => {
                out.push(ReceiverNotification::NonDmx {
                    universe: self.universe,
                    source: info,
                    start_code: other,
                    data,
                });
            }
        }

        if framing.stream_terminated() {
            self.terminate_now(handle, now);
        }

        out
    }

    /// Runs one periodic tick: builds online/offline/unknown lists, drives
    /// the source-loss engine, advances every tracked source's PAP timer,
    /// and checks for sampling-period completion (spec.md §4.4 "Periodic
    /// tick").
    pub fn tick(&mut self, now: Instant) -> Vec<ReceiverNotification> {
        let mut out = Vec::new();

        let mut online = Vec::new();
        let mut offline = Vec::new();
        let mut unknown = Vec::new();

        for (&handle, source) in self.sources.iter_mut() {
            if source.is_sampling() {
                // Loss processing is disabled for sources admitted during
                // an in-progress sampling period.
                source.begin_tick();
                continue;
            }

            if source.dmx_received_this_tick() {
                online.push(handle);
            } else if source.is_packet_timer_expired(now) {
                offline.push((handle, *source.name(), source.terminated()));
            } else {
                unknown.push((handle, *source.name()));
            }
            source.begin_tick();

            let pap_outcome = source.tick_pap_timer(now);
            if pap_outcome.pap_lost {
                out.push(ReceiverNotification::SourcePapLost { universe: self.universe, handle });
            }
            if let Some((levels, priority)) = pap_outcome.deliver_dmx {
                out.push(ReceiverNotification::UniverseData {
                    universe: self.universe,
                    source: self.source_info(handle),
                    levels,
                    priority,
                    preview: false,
                    sampling: false,
                });
            }
        }

        self.loss.mark_sources_online(self.universe, &online);
        self.loss.mark_sources_offline(self.universe, &offline, &unknown, self.config.t_wait, now);

        for group in self.loss.get_expired_sources(now) {
            let mut lost = Vec::with_capacity(group.len());
            for item in group {
                self.sources.remove(&item.handle);
                self.addrs.remove(&item.handle);
                self.registry.lock().release(item.handle);
                lost.push(LostSourceInfo {
                    handle: item.handle,
                    name: item.name,
                    terminated: item.terminated,
                });
            }
            out.push(ReceiverNotification::SourcesLost { universe: self.universe, sources: lost });
        }

        if self.sampling.try_end(now) {
            for source in self.sources.values_mut() {
                source.clear_sampling();
            }
            out.push(ReceiverNotification::SamplingPeriodEnded { universe: self.universe });
        }

        out
    }

    /// Destroys this receiver, dropping every dangling termination set
    /// without notifying (spec.md §4.3: destruction frees pending
    /// termination sets silently) and releasing every tracked source's
    /// registry reference.
    pub fn destroy(mut self) {
        self.loss.clear_universe(self.universe);
        let mut registry = self.registry.lock();
        for handle in self.sources.keys() {
            registry.release(*handle);
        }
    }

    fn terminate_now(&mut self, handle: RemoteSourceHandle, now: Instant) {
        let Some(source) = self.sources.remove(&handle) else { return };
        self.addrs.remove(&handle);
        let name = *source.name();
        self.loss.mark_sources_offline(self.universe, &[(handle, name, true)], &[], Duration::ZERO, now);
    }

    fn source_info(&self, handle: RemoteSourceHandle) -> SourceInfo {
        SourceInfo {
            handle,
            cid: self.registry.lock().cid_for_handle(handle).unwrap_or_default(),
            name: self.sources.get(&handle).map(|s| *s.name()).unwrap_or_default(),
            addr: self
                .addrs
                .get(&handle)
                .copied()
                .unwrap_or_else(|| SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), 0)),
        }
    }
}

fn to_slot_buffer(data: &[Slot]) -> SlotBuffer {
    let mut buf = SlotBuffer::new();
    let _ = buf.try_extend_from_slice(&data[..data.len().min(MAX_SLOTS)]);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::acn::Pdu as _;
    use crate::packet::data::{DataFraming, Dmp};
    use crate::packet::root::RootLayer;

    fn registry() -> Arc<Mutex<RemoteSourceRegistry>> {
        Arc::new(Mutex::new(RemoteSourceRegistry::new()))
    }

    fn dmx_datagram(cid: Cid, universe: UniverseId, seq: u8, levels: &[u8]) -> Datagram {
        let framing = DataFraming::new(
            SourceName::new("source").unwrap(),
            100,
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
        let bytes = crate::packet::Packet::new(
            crate::packet::Preamble,
            crate::packet::acn::PduBlock::new(vec![root]),
            crate::packet::Postamble,
        )
        .encode()
        .into();
        Datagram { bytes, from: "127.0.0.1:5568".parse().unwrap(), interface: None }
    }

    #[test]
    fn dmx_only_source_delivers_universe_data_immediately() {
        let now = Instant::now();
        let mut receiver = Receiver::new(
            1,
            ReceiverConfig { pap_enabled: false, ..Default::default() },
            registry(),
            &[],
            now,
        )
        .unwrap();

        let cid = Cid::from_bytes([7; 16]);
        let dg = dmx_datagram(cid, 1, 1, &[10, 20, 30]);
        let notifications = receiver.handle_datagram(&dg, now);
        assert_eq!(notifications.len(), 1);
        match &notifications[0] {
            ReceiverNotification::UniverseData { levels, .. } => {
                assert_eq!(levels.as_slice(), &[10, 20, 30]);
            }
            other => panic!("expected UniverseData, got {other:?}"),
        }
    }

    #[test]
    fn wrong_universe_is_ignored() {
        let now = Instant::now();
        let mut receiver =
            Receiver::new(1, ReceiverConfig::default(), registry(), &[], now).unwrap();
        let dg = dmx_datagram(Cid::from_bytes([1; 16]), 2, 1, &[1]);
        assert!(receiver.handle_datagram(&dg, now).is_empty());
    }

    #[test]
    fn source_cap_emits_rate_limited_notification() {
        let now = Instant::now();
        let mut receiver = Receiver::new(
            1,
            ReceiverConfig { source_count_max: Some(1), pap_enabled: false, ..Default::default() },
            registry(),
            &[],
            now,
        )
        .unwrap();

        receiver.handle_datagram(&dmx_datagram(Cid::from_bytes([1; 16]), 1, 1, &[1]), now);
        let notifications =
            receiver.handle_datagram(&dmx_datagram(Cid::from_bytes([2; 16]), 1, 1, &[1]), now);
        assert!(matches!(notifications[0], ReceiverNotification::SourceLimitExceeded { .. }));

        let notifications2 =
            receiver.handle_datagram(&dmx_datagram(Cid::from_bytes([2; 16]), 1, 2, &[1]), now);
        assert!(notifications2.is_empty(), "debounced until back under cap");
    }

    #[test]
    fn packet_timeout_reports_sources_lost() {
        let now = Instant::now();
        let mut receiver = Receiver::new(
            1,
            ReceiverConfig { pap_enabled: false, t_wait: Duration::from_millis(1), ..Default::default() },
            registry(),
            &[],
            now,
        )
        .unwrap();
        // End the initial sampling period immediately so loss processing runs.
        receiver.sampling.try_end(now + T_SAMPLE + Duration::from_millis(1));

        let cid = Cid::from_bytes([9; 16]);
        receiver.handle_datagram(&dmx_datagram(cid, 1, 1, &[1]), now);

        let past_loss = now + crate::config::T_LOSS + Duration::from_millis(1);
        receiver.tick(past_loss);
        let past_wait = past_loss + Duration::from_millis(2);
        let notifications = receiver.tick(past_wait);
        assert!(notifications.iter().any(|n| matches!(n, ReceiverNotification::SourcesLost { .. })));
    }
}
