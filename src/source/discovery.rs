//! Universe Discovery paging for a [super::Source] (E1.31 §4.3, §8).

use std::time::{Duration, Instant};

use crate::cid::{Cid, SourceName};
use crate::config::T_DISCOVERY;
use crate::packet::acn::{Pdu as _, PduBlock};
use crate::packet::discovery::{DiscoveryFraming, UniverseDiscovery};
use crate::packet::{Packet, Pdu, Postamble, Preamble, RootLayer};
use crate::universe::UniverseId;

/// Tracks when a source last sent its discovery pages and builds the next
/// batch when due.
pub(crate) struct DiscoveryState {
    last_sent: Option<Instant>,
    interval: Duration,
}

impl DiscoveryState {
    pub(crate) fn new() -> Self {
        Self { last_sent: None, interval: T_DISCOVERY }
    }

    pub(crate) fn due(&self, now: Instant) -> bool {
        match self.last_sent {
            None => true,
            Some(t) => now.saturating_duration_since(t) >= self.interval,
        }
    }

    pub(crate) fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    /// Encodes one packet per discovery page covering `active_universes`.
    pub(crate) fn build_pages(
        &self,
        cid: Cid,
        source_name: &SourceName,
        active_universes: Vec<UniverseId>,
    ) -> Vec<Vec<u8>> {
        UniverseDiscovery::paginate(active_universes)
            .into_iter()
            .map(|page| {
                let framing = DiscoveryFraming::new(source_name.clone(), page);
                let pdu = Pdu::DiscoveryFraming(framing);
                let root = RootLayer::for_pdu(cid, pdu);
                let packet = Packet::new(Preamble, PduBlock::new(vec![root]), Postamble);
                packet.encode().into()
            })
            .collect()
    }
}
