//! Top-level feature init-counting, the two global locks, and the
//! receive/source thread loops (spec.md §4.8, §5).
//!
//! Grounded on the teacher's `Server::start` (`src/server/mod.rs`): a
//! dedicated OS thread builds its own Tokio runtime and `block_on`s a loop
//! rather than assuming the application already runs inside one. Here that
//! pattern is generalized into two independent cooperative threads instead
//! of one: a receive thread driving every registered [Receiver]/
//! [MergeReceiver]/[SourceDetector] through a shared [SocketPlane], and a
//! source thread driving every registered [Source].

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cid::Cid;
use crate::config::{DEFAULT_SOURCE_TICK_INTERVAL, DEFAULT_T_READ};
use crate::error::Error;
use crate::merge::MergeReceiver;
use crate::net::{Datagram, SocketPlane};
use crate::notification::{MergeReceiverNotification, ReceiverNotification, SourceDetectorNotification};
use crate::packet::acn::Pdu as AcnPdu;
use crate::packet::{Packet, Pdu};
use crate::receiver::source_detector::SourceDetector;
use crate::receiver::{Receiver, ReceiverConfig};
use crate::registry::RemoteSourceRegistry;
use crate::source::{Destination, OutboundPacket, Source};
use crate::universe::UniverseId;

/// Which feature group an [init]/[deinit] call applies to (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Receiver + source + merge-receiver + source-detector + sockets.
    AllNetworking,
    /// The standalone [crate::merge::DmxMerger]. It carries no global lock
    /// of its own (the application serializes it, or wraps it in
    /// [MergeReceiver]); the counter exists only so `deinit` mirrors `init`.
    DmxMerger,
}

struct Counters {
    all_networking: u32,
    dmx_merger: u32,
}

impl Counters {
    fn get(&self, feature: Feature) -> u32 {
        match feature {
            Feature::AllNetworking => self.all_networking,
            Feature::DmxMerger => self.dmx_merger,
        }
    }

    fn get_mut(&mut self, feature: Feature) -> &mut u32 {
        match feature {
            Feature::AllNetworking => &mut self.all_networking,
            Feature::DmxMerger => &mut self.dmx_merger,
        }
    }
}

static COUNTERS: Mutex<Counters> = Mutex::new(Counters { all_networking: 0, dmx_merger: 0 });

/// Initializes `feature`, idempotently: if its counter is already positive
/// it's simply incremented (spec.md §4.8).
pub fn init(feature: Feature) {
    *COUNTERS.lock().get_mut(feature) += 1;
}

/// Decrements `feature`'s init counter. Teardown of whatever the caller
/// built under this feature is the caller's own responsibility, triggered
/// once [is_initialized] goes false.
pub fn deinit(feature: Feature) {
    let mut counters = COUNTERS.lock();
    let count = counters.get_mut(feature);
    *count = count.saturating_sub(1);
}

/// Whether `feature` currently has at least one live initialization.
pub fn is_initialized(feature: Feature) -> bool {
    COUNTERS.lock().get(feature) > 0
}

/// Returns [Error::NotInitialized] unless `feature` is currently live.
pub fn require(feature: Feature) -> Result<(), Error> {
    if is_initialized(feature) { Ok(()) } else { Err(Error::NotInitialized) }
}

/// A notification from any entity hosted on a [ReceiveRuntime].
#[derive(Debug, Clone)]
pub enum RuntimeNotification {
    /// From a plain [Receiver] registered via [ReceiveRuntime::register_receiver].
    Receiver(ReceiverNotification),
    /// From a [MergeReceiver] registered via [ReceiveRuntime::register_merge_receiver].
    MergeReceiver(MergeReceiverNotification),
    /// From the [SourceDetector], if enabled.
    SourceDetector(SourceDetectorNotification),
}

enum Endpoint {
    Plain(Receiver),
    Merged(MergeReceiver),
}

impl Endpoint {
    fn universe(&self) -> UniverseId {
        match self {
            Endpoint::Plain(r) => r.universe(),
            Endpoint::Merged(m) => m.universe(),
        }
    }

    fn handle_datagram(&mut self, datagram: &Datagram, now: Instant) -> Vec<RuntimeNotification> {
        match self {
            Endpoint::Plain(r) => {
                r.handle_datagram(datagram, now).into_iter().map(RuntimeNotification::Receiver).collect()
            }
            Endpoint::Merged(m) => {
                m.handle_datagram(datagram, now).into_iter().map(RuntimeNotification::MergeReceiver).collect()
            }
        }
    }

    fn tick(&mut self, now: Instant) -> Vec<RuntimeNotification> {
        match self {
            Endpoint::Plain(r) => r.tick(now).into_iter().map(RuntimeNotification::Receiver).collect(),
            Endpoint::Merged(m) => m.tick(now).into_iter().map(RuntimeNotification::MergeReceiver).collect(),
        }
    }
}

/// The receiver-side state shared by one receive thread: every registered
/// [Receiver]/[MergeReceiver] keyed by universe, the process-wide remote-source
/// registry, and the (optional) [SourceDetector] — guarded by the single
/// receiver lock spec.md §4.8/§5 calls for.
///
/// Built over a [SocketPlane] the caller supplies; [ReceiveRuntime] never
/// binds sockets itself, it only reads from and routes through one.
pub struct ReceiveRuntime {
    socket_plane: Arc<SocketPlane>,
    registry: Arc<Mutex<RemoteSourceRegistry>>,
    state: Mutex<ReceiveState>,
    notifications: crossbeam_channel::Sender<RuntimeNotification>,
}

#[derive(Default)]
struct ReceiveState {
    endpoints: HashMap<UniverseId, Endpoint>,
    detector: Option<SourceDetector>,
    /// Registry handles held on behalf of the source detector, one per CID
    /// it's currently tracking — released as sources expire, so a source
    /// seen only by the detector doesn't pin a registry entry forever.
    detector_handles: HashMap<Cid, crate::registry::RemoteSourceHandle>,
}

impl ReceiveRuntime {
    /// Creates a runtime over `socket_plane`, returning it alongside the
    /// receiving end of its notification channel.
    pub fn new(socket_plane: Arc<SocketPlane>) -> (Arc<Self>, crossbeam_channel::Receiver<RuntimeNotification>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let runtime = Arc::new(Self {
            socket_plane,
            registry: Arc::new(Mutex::new(RemoteSourceRegistry::new())),
            state: Mutex::new(ReceiveState::default()),
            notifications: tx,
        });
        (runtime, rx)
    }

    /// Registers a plain [Receiver] for `universe`. Requires
    /// [Feature::AllNetworking] to already be initialized.
    pub fn register_receiver(
        &self,
        universe: UniverseId,
        config: ReceiverConfig,
        on_interfaces: &[crate::net::InterfaceId],
        now: Instant,
    ) -> Result<(), Error> {
        require(Feature::AllNetworking)?;
        let mut state = self.state.lock();
        if state.endpoints.contains_key(&universe) {
            return Err(Error::AlreadyExists(format!("receiver on universe {universe}")));
        }
        let receiver = Receiver::new(universe, config, Arc::clone(&self.registry), on_interfaces, now)?;
        state.endpoints.insert(universe, Endpoint::Plain(receiver));
        Ok(())
    }

    /// Registers a [MergeReceiver] for `universe`. Requires both
    /// [Feature::AllNetworking] and [Feature::DmxMerger].
    pub fn register_merge_receiver(
        &self,
        universe: UniverseId,
        config: ReceiverConfig,
        on_interfaces: &[crate::net::InterfaceId],
        now: Instant,
    ) -> Result<(), Error> {
        require(Feature::AllNetworking)?;
        require(Feature::DmxMerger)?;
        let mut state = self.state.lock();
        if state.endpoints.contains_key(&universe) {
            return Err(Error::AlreadyExists(format!("receiver on universe {universe}")));
        }
        let merge_receiver = MergeReceiver::new(universe, config, Arc::clone(&self.registry), on_interfaces, now)?;
        state.endpoints.insert(universe, Endpoint::Merged(merge_receiver));
        Ok(())
    }

    /// Detaches the receiver or merge receiver on `universe`. Its sockets'
    /// refcounts have already been released by the time this returns
    /// (bounded destroy, spec.md §5 "Cancellation and timeouts").
    pub fn unregister(&self, universe: UniverseId) -> Result<(), Error> {
        let mut state = self.state.lock();
        let endpoint = state
            .endpoints
            .remove(&universe)
            .ok_or_else(|| Error::NotFound(format!("receiver on universe {universe}")))?;
        if let Endpoint::Plain(receiver) = endpoint {
            receiver.destroy();
        }
        Ok(())
    }

    /// Enables the [SourceDetector], idempotently replacing any previous one.
    pub fn enable_source_detector(&self, max_sources: Option<usize>, max_universes_per_source: Option<usize>) {
        self.state.lock().detector = Some(SourceDetector::new(max_sources, max_universes_per_source));
    }

    /// Disables the source detector, dropping its tracked sources and
    /// releasing every registry handle held on their behalf.
    pub fn disable_source_detector(&self) {
        let mut state = self.state.lock();
        state.detector = None;
        let handles: Vec<_> = state.detector_handles.drain().map(|(_, h)| h).collect();
        drop(state);
        let mut registry = self.registry.lock();
        for handle in handles {
            registry.release(handle);
        }
    }

    fn emit(&self, notification: RuntimeNotification) {
        let _ = self.notifications.send(notification);
    }

    /// Routes one received datagram to the receiver/merge receiver
    /// registered for its target universe, or to the source detector if
    /// it's a Universe Discovery page.
    pub fn dispatch(&self, datagram: Datagram, now: Instant) {
        let Ok(packet) = Packet::decode(&datagram.bytes) else { return };
        let Some(root) = packet.block.pdus().first() else { return };

        match root.pdu() {
            Pdu::DataFraming(framing) => {
                let universe = framing.universe();
                let mut state = self.state.lock();
                if let Some(endpoint) = state.endpoints.get_mut(&universe) {
                    let notifications = endpoint.handle_datagram(&datagram, now);
                    drop(state);
                    for notification in notifications {
                        self.emit(notification);
                    }
                }
            }
            Pdu::DiscoveryFraming(discovery) => {
                let cid = *root.cid();
                let mut state = self.state.lock();
                if state.detector.is_none() {
                    return;
                }
                let handle = match state.detector_handles.get(&cid) {
                    Some(&handle) => handle,
                    None => {
                        let Ok(handle) = self.registry.lock().add(cid) else { return };
                        state.detector_handles.insert(cid, handle);
                        handle
                    }
                };
                let detector = state.detector.as_mut().expect("checked above");
                let outcome =
                    detector.receive_page(handle, cid, *discovery.source_name(), discovery.universe_discovery(), now);

                for &expired in &outcome.expired {
                    if let Some((&cid, _)) = state.detector_handles.iter().find(|(_, &h)| h == expired) {
                        state.detector_handles.remove(&cid);
                        self.registry.lock().release(expired);
                    }
                }
                drop(state);
                self.emit_detector_outcome(outcome);
            }
            Pdu::SyncFraming(_) => {}
        }
    }

    fn emit_detector_outcome(&self, outcome: crate::receiver::source_detector::DetectorOutcome) {
        for updated in outcome.updated {
            self.emit(RuntimeNotification::SourceDetector(SourceDetectorNotification::SourceUpdated {
                handle: updated.handle,
                cid: updated.cid,
                name: updated.name,
                universes: updated.universes,
            }));
        }
        for handle in outcome.expired {
            self.emit(RuntimeNotification::SourceDetector(SourceDetectorNotification::SourceExpired { handle }));
        }
        if outcome.limit_exceeded {
            self.emit(RuntimeNotification::SourceDetector(SourceDetectorNotification::LimitExceeded));
        }
    }

    /// Advances every registered endpoint and the source detector by one
    /// tick. Called once per receive-thread loop iteration.
    pub fn tick(&self, now: Instant) {
        let mut state = self.state.lock();
        let mut notifications = Vec::new();
        for endpoint in state.endpoints.values_mut() {
            notifications.extend(endpoint.tick(now));
        }

        let expired = state.detector.as_mut().map(|d| d.expire_stale(now)).unwrap_or_default();
        for &handle in &expired {
            if let Some((&cid, _)) = state.detector_handles.iter().find(|(_, &h)| h == handle) {
                state.detector_handles.remove(&cid);
                self.registry.lock().release(handle);
            }
        }
        drop(state);

        for notification in notifications {
            self.emit(notification);
        }
        for handle in expired {
            self.emit(RuntimeNotification::SourceDetector(SourceDetectorNotification::SourceExpired { handle }));
        }
    }

    /// Polls every live socket for up to `timeout`, returning the first
    /// datagram to arrive.
    ///
    /// A true single-call poll across an arbitrary socket set isn't
    /// exposed by [tokio::net::UdpSocket] directly; this sweeps each live
    /// socket with an even slice of `timeout`, which only costs tail
    /// latency (bounded by `timeout`) relative to a real poll when more
    /// than one socket is open — never correctness.
    pub async fn poll_once(&self, timeout: Duration) -> Option<Datagram> {
        let sockets = self.socket_plane.socket_snapshot();
        if sockets.is_empty() {
            tokio::time::sleep(timeout).await;
            return None;
        }

        let slice = (timeout / sockets.len() as u32).max(Duration::from_millis(1));
        for (_, socket) in &sockets {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            if let Ok(Ok((len, from))) = tokio::time::timeout(slice, socket.recv_from(&mut buf)).await {
                buf.truncate(len);
                return Some(Datagram { bytes: buf, from, interface: None });
            }
        }
        None
    }
}

/// Largest sACN datagram this crate ever sends or expects to receive: a
/// full 512-slot DMP PDU plus the root/framing layers, rounded up.
const MAX_DATAGRAM_SIZE: usize = 1144;

/// The source-side state shared by one source thread: every registered
/// [Source], keyed by its CID, guarded by the single source lock spec.md
/// §4.8/§5 calls for.
pub struct SourceRuntime {
    socket_plane: Arc<SocketPlane>,
    sources: Mutex<HashMap<Cid, Source>>,
}

impl SourceRuntime {
    /// Creates a runtime over `socket_plane`.
    pub fn new(socket_plane: Arc<SocketPlane>) -> Arc<Self> {
        Arc::new(Self { socket_plane, sources: Mutex::new(HashMap::new()) })
    }

    /// Registers `source`. Requires [Feature::AllNetworking].
    pub fn register_source(&self, source: Source) -> Result<(), Error> {
        require(Feature::AllNetworking)?;
        let mut sources = self.sources.lock();
        if sources.contains_key(&source.cid()) {
            return Err(Error::AlreadyExists(format!("source {}", source.cid())));
        }
        sources.insert(source.cid(), source);
        Ok(())
    }

    /// Begins terminating every universe on the source identified by `cid`,
    /// without removing it from this runtime until its terminate sequences
    /// complete (observed through subsequent [Self::tick_and_send] calls
    /// via [Self::is_quiescent]).
    pub fn begin_shutdown(&self, cid: Cid) -> Result<(), Error> {
        let mut sources = self.sources.lock();
        let source = sources.get_mut(&cid).ok_or_else(|| Error::NotFound(format!("source {cid}")))?;
        source.shutdown();
        Ok(())
    }

    /// Immediately drops `cid`'s source, skipping any in-progress terminate
    /// sequence (spec.md §6's "immediate destroy" override).
    pub fn remove_source(&self, cid: Cid) -> Option<Source> {
        self.sources.lock().remove(&cid)
    }

    /// Whether `cid` has no universes left (its terminate sequences, if
    /// any, have all completed and it's safe to [Self::remove_source]).
    pub fn is_quiescent(&self, cid: Cid) -> bool {
        self.sources.lock().get(&cid).is_none_or(|s| s.is_idle())
    }

    /// Advances every registered source by one tick and sends the packets
    /// it produces, with the source lock released for the actual I/O
    /// (spec.md §5 lock discipline). Send failures are tallied back onto
    /// their owning source afterward rather than propagated.
    pub async fn tick_and_send(&self, now: Instant) {
        let batches: Vec<(Cid, Vec<OutboundPacket>)> = {
            let mut sources = self.sources.lock();
            sources.iter_mut().map(|(&cid, source)| (cid, source.tick(now))).collect()
        };

        let mut failures: HashMap<Cid, u64> = HashMap::new();
        for (cid, packets) in &batches {
            for packet in packets {
                let result = match packet.destination {
                    Destination::Multicast { universe, family, interface } => {
                        self.socket_plane.send_multicast(family, universe, &packet.bytes, interface).await
                    }
                    Destination::Unicast(addr) => self.send_unicast(addr, &packet.bytes).await,
                };
                if result.is_err() {
                    *failures.entry(*cid).or_insert(0) += 1;
                }
            }
        }

        if failures.is_empty() {
            return;
        }
        let mut sources = self.sources.lock();
        for (cid, count) in failures {
            if let Some(source) = sources.get_mut(&cid) {
                for _ in 0..count {
                    source.record_send_failure();
                }
            }
        }
    }

    async fn send_unicast(&self, addr: IpAddr, bytes: &[u8]) -> Result<(), crate::net::NetError> {
        self.socket_plane.send_unicast(addr, bytes).await
    }
}

/// A spawned cooperative thread (receive or source), joinable and cleanly
/// stoppable (spec.md §5: "Both threads are joinable; shutdown sets a
/// `running=false` flag and waits for them to exit").
pub struct ThreadHandle {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ThreadHandle {
    /// Signals the thread to stop at its next loop boundary and waits for
    /// it to exit. Bounded by the loop's own timeout/sleep, so this returns
    /// promptly.
    pub fn shutdown(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawns the receive thread: drain → poll(≤ `T_read`) → dispatch → tick,
/// looped until [ThreadHandle::shutdown] (spec.md §5 "Receive thread(s)").
///
/// Each receive thread owns its own single-threaded Tokio runtime, mirroring
/// the teacher's `Server::start` (`src/server/mod.rs`) rather than assuming
/// one is already running on the calling thread.
pub fn spawn_receive_thread(runtime: Arc<ReceiveRuntime>) -> ThreadHandle {
    spawn_receive_thread_with_timeout(runtime, DEFAULT_T_READ)
}

/// Like [spawn_receive_thread], with an explicit poll timeout (tests use a
/// short one so a shutdown isn't left waiting on a near-empty socket set).
pub fn spawn_receive_thread_with_timeout(runtime: Arc<ReceiveRuntime>, poll_timeout: Duration) -> ThreadHandle {
    let running = Arc::new(AtomicBool::new(true));
    let thread_running = Arc::clone(&running);

    let handle = thread::spawn(move || {
        let tokio_rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(err) => {
                log::error!("receive thread failed to start its runtime: {err}");
                return;
            }
        };

        tokio_rt.block_on(async move {
            while thread_running.load(Ordering::SeqCst) {
                if let Some(datagram) = runtime.poll_once(poll_timeout).await {
                    runtime.dispatch(datagram, Instant::now());
                }
                runtime.tick(Instant::now());
            }
        });
    });

    ThreadHandle { running, handle: Some(handle) }
}

/// Spawns the source thread: tick level phase → sleep → tick PAP phase →
/// sleep, looped until [ThreadHandle::shutdown] (spec.md §5 "Source
/// thread").
///
/// [Source::tick] ticks both phases per call (see `src/source/mod.rs`), so
/// this loop sleeps once per `tick_interval` rather than twice; the wire
/// behavior (level-first, PAP-second, same tick) is unchanged.
pub fn spawn_source_thread(runtime: Arc<SourceRuntime>) -> ThreadHandle {
    spawn_source_thread_with_interval(runtime, DEFAULT_SOURCE_TICK_INTERVAL)
}

/// Like [spawn_source_thread], with an explicit tick cadence.
pub fn spawn_source_thread_with_interval(runtime: Arc<SourceRuntime>, tick_interval: Duration) -> ThreadHandle {
    let running = Arc::new(AtomicBool::new(true));
    let thread_running = Arc::clone(&running);

    let handle = thread::spawn(move || {
        let tokio_rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(err) => {
                log::error!("source thread failed to start its runtime: {err}");
                return;
            }
        };

        tokio_rt.block_on(async move {
            while thread_running.load(Ordering::SeqCst) {
                runtime.tick_and_send(Instant::now()).await;
                tokio::time::sleep(tick_interval).await;
            }
        });
    });

    ThreadHandle { running, handle: Some(handle) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent_and_symmetric() {
        // Other tests in this process may also touch these counters; only
        // assert the relative before/after delta, not an absolute value.
        let before = is_initialized(Feature::DmxMerger);
        init(Feature::DmxMerger);
        init(Feature::DmxMerger);
        assert!(is_initialized(Feature::DmxMerger));
        deinit(Feature::DmxMerger);
        assert!(is_initialized(Feature::DmxMerger));
        deinit(Feature::DmxMerger);
        assert_eq!(is_initialized(Feature::DmxMerger), before);
    }

    #[test]
    fn require_fails_until_initialized() {
        // Use a feature no other test mutates to avoid cross-test races.
        deinit(Feature::AllNetworking);
        while is_initialized(Feature::AllNetworking) {
            deinit(Feature::AllNetworking);
        }
        assert!(matches!(require(Feature::AllNetworking), Err(Error::NotInitialized)));
        init(Feature::AllNetworking);
        assert!(require(Feature::AllNetworking).is_ok());
        deinit(Feature::AllNetworking);
    }
}
