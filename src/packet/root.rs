use super::acn;
use super::{PacketError, Pdu, Postamble, Preamble, flags_and_length};
use crate::cid::Cid;

/// An E1.31 Root Layer.
///
/// Carries the sender's CID and either a normal data PDU (`extended =
/// false`, root vector `0x00000004`) or an extended PDU — synchronization or
/// universe discovery (`extended = true`, root vector `0x00000008`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootLayer {
    cid: Cid,
    extended: bool,
    pdu: Pdu,
}

impl RootLayer {
    const VECTOR: [u8; 4] = [0x00, 0x00, 0x00, 0x04];
    const VECTOR_EXTENDED: [u8; 4] = [0x00, 0x00, 0x00, 0x08];
    const MIN_ROOT_LAYER_SIZE: usize = 38;

    /// Creates a new [RootLayer] wrapping `pdu`.
    ///
    /// `extended` must be `true` for [Pdu::SyncFraming]/[Pdu::DiscoveryFraming]
    /// and `false` for [Pdu::DataFraming]; [Self::new] doesn't enforce this —
    /// use [RootLayer::for_pdu] to derive it automatically.
    pub fn new(cid: Cid, extended: bool, pdu: Pdu) -> Self {
        Self { cid, extended, pdu }
    }

    /// Creates a [RootLayer] for `pdu`, deriving the `extended` bit from its
    /// kind.
    pub fn for_pdu(cid: Cid, pdu: Pdu) -> Self {
        let extended = matches!(pdu, Pdu::SyncFraming(_) | Pdu::DiscoveryFraming(_));
        Self::new(cid, extended, pdu)
    }

    /// The sender's CID.
    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    /// The PDU carried in this layer.
    pub fn pdu(&self) -> &Pdu {
        &self.pdu
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let flags_and_length = flags_and_length(self.size()).to_be_bytes();
        let vector = if self.extended { Self::VECTOR_EXTENDED } else { Self::VECTOR };

        let mut bytes = Vec::with_capacity(self.size());
        bytes.extend_from_slice(&flags_and_length);
        bytes.extend_from_slice(&vector);
        bytes.extend_from_slice(self.cid.as_bytes());
        bytes.extend(self.pdu.encode());
        bytes
    }

    pub(crate) fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::MIN_ROOT_LAYER_SIZE {
            return Err(PacketError::InvalidRootLayerSize(data.len()));
        }

        // E1.31 Root Layer: Vector
        let vector = [data[18], data[19], data[20], data[21]];
        let extended = match vector {
            Self::VECTOR => false,
            Self::VECTOR_EXTENDED => true,
            _ => return Err(PacketError::InvalidRootLayerVector(vector.to_vec())),
        };

        // E1.31 Root Layer: CID
        let cid = Cid::from_bytes(data[22..38].try_into().unwrap());

        // The framing layer vector alone can't disambiguate Data from
        // Discovery (both use 0x00000002); the root layer's extended bit
        // is what the decoder must dispatch on.
        let pdu = Pdu::decode(&data[38..], extended)?;

        Ok(Self::new(cid, extended, pdu))
    }

    pub(crate) fn size(&self) -> usize {
        Self::MIN_ROOT_LAYER_SIZE + self.pdu.size() - Preamble::SIZE - Postamble.size()
    }
}

impl acn::Pdu for RootLayer {
    type DecodeError = PacketError;

    fn encode(&self) -> impl Into<Vec<u8>> {
        RootLayer::encode(self)
    }

    fn decode(data: &[u8]) -> Result<Self, Self::DecodeError> {
        RootLayer::decode(data)
    }

    fn size(&self) -> usize {
        RootLayer::size(self)
    }
}
