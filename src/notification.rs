//! Notification payloads delivered to the application.
//!
//! Spec.md names these as callback contracts (§2, §4.4, §4.7, §9
//! "Callbacks"); this core models them as plain enums pushed through a
//! `crossbeam_channel` rather than function-pointer callbacks, since
//! there's no C ABI to preserve (spec.md §1 Out of scope). Callbacks are
//! never invoked with an internal lock held (spec.md §7) — here that's
//! automatic, since a channel send never blocks on receiver-internal state.

use crate::cid::{Cid, SourceName};
use crate::registry::RemoteSourceHandle;
use crate::slot::SlotBuffer;
use crate::universe::UniverseId;
use std::net::SocketAddr;

/// One source named in a `universe-data`/`merged-data` notification.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Process-wide handle for this source.
    pub handle: RemoteSourceHandle,
    /// The source's CID.
    pub cid: Cid,
    /// The source's advertised name.
    pub name: SourceName,
    /// The address the packet arrived from.
    pub addr: SocketAddr,
}

/// A source named in a `sources-lost` notification.
#[derive(Debug, Clone)]
pub struct LostSourceInfo {
    /// Process-wide handle for the lost source.
    pub handle: RemoteSourceHandle,
    /// The lost source's last-known name.
    pub name: SourceName,
    /// Whether the source was explicitly terminated rather than timed out.
    pub terminated: bool,
}

/// A notification fired by a [crate::receiver::Receiver].
#[derive(Debug, Clone)]
pub enum ReceiverNotification {
    /// New DMX (start code 0x00) data arrived and the PAP sub-state machine
    /// permits delivery.
    UniverseData {
        /// The universe the data was received on.
        universe: UniverseId,
        /// The sending source.
        source: SourceInfo,
        /// The slot data, start code excluded.
        levels: SlotBuffer,
        /// The per-universe priority carried by the delivered packet.
        priority: u8,
        /// Whether the packet carried the preview-data option bit.
        preview: bool,
        /// Whether this source was admitted during an in-progress sampling
        /// period (consumers isolating sampling sources, e.g. a
        /// [crate::merge::merge_receiver::MergeReceiver], key off this).
        sampling: bool,
    },
    /// A per-address-priority (start code 0xDD) packet arrived. The
    /// receiver's PAP sub-state machine already used it to gate/unblock
    /// `UniverseData`; this carries the raw priority slots up for a
    /// consumer (the DMX merger) that needs per-address priorities
    /// directly.
    PapData {
        /// The universe the data was received on.
        universe: UniverseId,
        /// The sending source.
        source: SourceInfo,
        /// The per-slot priority data, start code excluded.
        priorities: SlotBuffer,
        /// Whether this source was admitted during an in-progress sampling
        /// period.
        sampling: bool,
    },
    /// A datagram with a non-0x00/0xDD start code arrived; forwarded
    /// verbatim rather than interpreted.
    NonDmx {
        /// The universe the data was received on.
        universe: UniverseId,
        /// The sending source.
        source: SourceInfo,
        /// The start code that was present.
        start_code: u8,
        /// The slot data following the start code.
        data: SlotBuffer,
    },
    /// One termination set expired; every member is reported together
    /// (SPEC_FULL.md §E.1).
    SourcesLost {
        /// The universe the sources were lost on.
        universe: UniverseId,
        /// The lost sources.
        sources: Vec<LostSourceInfo>,
    },
    /// A tracked source's PAP sub-state machine timed out waiting for a
    /// fresh PAP packet.
    SourcePapLost {
        /// The universe the source is tracked on.
        universe: UniverseId,
        /// The source whose PAP expired.
        handle: RemoteSourceHandle,
    },
    /// The receiver's initial or post-reset sampling period ended.
    SamplingPeriodEnded {
        /// The universe that finished sampling.
        universe: UniverseId,
    },
    /// The configured source-count cap was exceeded; rate-limited until the
    /// count falls and rises again (SPEC_FULL.md §E.2).
    SourceLimitExceeded {
        /// The universe the cap was hit on.
        universe: UniverseId,
    },
}

/// A notification fired by the [crate::receiver::source_detector::SourceDetector].
#[derive(Debug, Clone)]
pub enum SourceDetectorNotification {
    /// A remote source's advertised universe set changed.
    SourceUpdated {
        /// The source's handle.
        handle: RemoteSourceHandle,
        /// The source's CID.
        cid: Cid,
        /// The source's name.
        name: SourceName,
        /// The source's current universe list, sorted ascending.
        universes: Vec<UniverseId>,
    },
    /// A remote source went 20 s without sending a discovery page.
    SourceExpired {
        /// The expired source's handle.
        handle: RemoteSourceHandle,
    },
    /// The source-detector's cap on tracked sources or per-source universes
    /// was exceeded.
    LimitExceeded,
}

/// A notification fired by a [crate::merge::merge_receiver::MergeReceiver].
#[derive(Debug, Clone)]
pub enum MergeReceiverNotification {
    /// The merged output changed after at least one non-pending source
    /// contributed.
    MergedData {
        /// The universe this merge output is for.
        universe: UniverseId,
        /// Merged DMX levels, 512 slots.
        levels: SlotBuffer,
        /// Merged per-address priorities, 512 slots.
        priorities: SlotBuffer,
        /// Owning source handle per slot, `None` where unsourced.
        owners: Vec<Option<RemoteSourceHandle>>,
        /// The sources currently contributing to the merge (non-pending).
        active_sources: Vec<RemoteSourceHandle>,
    },
    /// A non-DMX/PAP start code packet, forwarded from the inner receiver.
    NonDmx {
        /// The universe the data was received on.
        universe: UniverseId,
        /// The sending source.
        source: SourceInfo,
        /// The start code that was present.
        start_code: u8,
        /// The slot data following the start code.
        data: SlotBuffer,
    },
    /// Forwarded from the inner receiver unchanged.
    SourcesLost {
        /// The universe the sources were lost on.
        universe: UniverseId,
        /// The lost sources.
        sources: Vec<LostSourceInfo>,
    },
    /// Forwarded from the inner receiver unchanged.
    SamplingPeriodEnded {
        /// The universe that finished sampling.
        universe: UniverseId,
    },
}
