use super::acn;
use super::{PacketError, flags_and_length};
use crate::cid::SourceName;
use crate::universe::UniverseId;

/// An E1.31 Universe Discovery Packet Framing Layer (E1.31 §6.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFraming {
    source_name: SourceName,
    universe_discovery: UniverseDiscovery,
}

impl DiscoveryFraming {
    pub(crate) const VECTOR: [u8; 4] = [0x00, 0x00, 0x00, 0x02];

    /// Creates a new [DiscoveryFraming] layer.
    pub fn new(source_name: SourceName, universe_discovery: UniverseDiscovery) -> Self {
        Self { source_name, universe_discovery }
    }

    /// The source name in this layer.
    pub fn source_name(&self) -> &SourceName {
        &self.source_name
    }

    /// The universe discovery page carried in this packet.
    pub fn universe_discovery(&self) -> &UniverseDiscovery {
        &self.universe_discovery
    }
}

impl acn::Pdu for DiscoveryFraming {
    type DecodeError = PacketError;

    fn encode(&self) -> impl Into<Vec<u8>> {
        let flags_and_length = flags_and_length(self.size()).to_be_bytes();

        let mut bytes = Vec::with_capacity(self.size());
        bytes.extend(flags_and_length);
        bytes.extend(Self::VECTOR);
        bytes.extend(self.source_name.as_bytes());
        bytes.extend([0x00, 0x00, 0x00, 0x00]);
        bytes.extend(self.universe_discovery.encode().into());
        bytes
    }

    fn decode(bytes: &[u8]) -> Result<Self, Self::DecodeError> {
        if bytes.len() < 74 {
            return Err(PacketError::InvalidLength(bytes.len()));
        }

        // E1.31 6.4.1 Universe Discovery Packet: Vector
        let vector = [bytes[2], bytes[3], bytes[4], bytes[5]];
        if vector != Self::VECTOR {
            return Err(PacketError::InvalidFramingLayerVector(vector.to_vec()));
        }

        // E1.31 6.4.2 Universe Discovery Packet: Source Name
        let source_name = SourceName::from_wire(bytes[6..70].try_into().unwrap());

        let universe_discovery = UniverseDiscovery::decode(&bytes[74..])?;

        Ok(Self { source_name, universe_discovery })
    }

    fn size(&self) -> usize {
        74 + self.universe_discovery.size()
    }
}

/// An E1.31 Universe Discovery Layer: one page of a source's advertised
/// universe list (E1.31 §8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniverseDiscovery {
    page: u8,
    last: u8,
    list_of_universes: Vec<UniverseId>,
}

impl UniverseDiscovery {
    const VECTOR: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

    /// The maximum number of universes that fit in a single discovery page
    /// (E1.31 §8, bounded by UDP payload size).
    pub const MAX_UNIVERSES_PER_PAGE: usize = 512;

    /// Creates a new [UniverseDiscovery] page. `list_of_universes` is
    /// sorted and truncated to [Self::MAX_UNIVERSES_PER_PAGE].
    pub fn new(page: u8, last: u8, mut list_of_universes: Vec<UniverseId>) -> Self {
        list_of_universes.sort_unstable();
        list_of_universes.truncate(Self::MAX_UNIVERSES_PER_PAGE);
        Self { page, last, list_of_universes }
    }

    /// This page's number, `0`-indexed.
    pub fn page(&self) -> u8 {
        self.page
    }

    /// The final page number of the full discovery message this page
    /// belongs to.
    pub fn last(&self) -> u8 {
        self.last
    }

    /// The universes advertised on this page, in ascending order.
    pub fn list_of_universes(&self) -> &[UniverseId] {
        &self.list_of_universes
    }

    /// Splits a full, sorted universe list into the discovery pages that
    /// would be sent for it (E1.31 §4.3: at most
    /// [Self::MAX_UNIVERSES_PER_PAGE] universes per page).
    pub fn paginate(mut universes: Vec<UniverseId>) -> Vec<UniverseDiscovery> {
        universes.sort_unstable();
        universes.dedup();

        if universes.is_empty() {
            return vec![UniverseDiscovery::new(0, 0, Vec::new())];
        }

        let chunks: Vec<&[UniverseId]> = universes.chunks(Self::MAX_UNIVERSES_PER_PAGE).collect();
        let last = (chunks.len() - 1) as u8;
        chunks
            .into_iter()
            .enumerate()
            .map(|(page, chunk)| UniverseDiscovery::new(page as u8, last, chunk.to_vec()))
            .collect()
    }
}

impl acn::Pdu for UniverseDiscovery {
    type DecodeError = PacketError;

    fn encode(&self) -> impl Into<Vec<u8>> {
        let flags_and_length = flags_and_length(self.size()).to_be_bytes();

        let mut bytes = Vec::with_capacity(self.size());
        bytes.extend(flags_and_length);
        bytes.extend(Self::VECTOR);
        bytes.push(self.page);
        bytes.push(self.last);
        bytes.extend(self.list_of_universes.iter().flat_map(|u| u.to_be_bytes()));
        bytes
    }

    fn decode(bytes: &[u8]) -> Result<Self, Self::DecodeError> {
        if bytes.len() < 8 {
            return Err(PacketError::InvalidLength(bytes.len()));
        }

        // E1.31 8.2 Universe Discovery Layer: Vector
        let vector = [bytes[2], bytes[3], bytes[4], bytes[5]];
        if vector != Self::VECTOR {
            return Err(PacketError::InvalidUniverseDiscoveryLayerVector(vector.to_vec()));
        }

        let page = bytes[6];
        let last = bytes[7];
        let list_of_universes = bytes[8..]
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes(chunk.try_into().unwrap()))
            .collect();

        Ok(Self { page, last, list_of_universes })
    }

    fn size(&self) -> usize {
        8 + self.list_of_universes.len() * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::acn::Pdu as _;

    #[test]
    fn universe_discovery_round_trips() {
        let page = UniverseDiscovery::new(0, 1, vec![5, 3, 1]);
        assert_eq!(page.list_of_universes(), &[1, 3, 5]);
        let encoded = page.encode().into();
        let decoded = UniverseDiscovery::decode(&encoded).unwrap();
        assert_eq!(page, decoded);
    }

    #[test]
    fn paginate_splits_large_lists() {
        let universes: Vec<u16> = (1..=1100).collect();
        let pages = UniverseDiscovery::paginate(universes);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].list_of_universes().len(), 512);
        assert_eq!(pages[2].last(), 2);
        assert_eq!(pages[2].list_of_universes().len(), 1100 - 1024);
    }

    #[test]
    fn paginate_empty_yields_single_empty_page() {
        let pages = UniverseDiscovery::paginate(Vec::new());
        assert_eq!(pages.len(), 1);
        assert!(pages[0].list_of_universes().is_empty());
        assert_eq!(pages[0].last(), 0);
    }

    #[test]
    fn discovery_framing_round_trips() {
        let name = SourceName::new("discoverer").unwrap();
        let framing = DiscoveryFraming::new(name, UniverseDiscovery::new(0, 0, vec![1, 2, 3]));
        let encoded = framing.encode().into();
        let decoded = DiscoveryFraming::decode(&encoded).unwrap();
        assert_eq!(framing, decoded);
    }
}
