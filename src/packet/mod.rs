//! E1.31 wire format: root layer, framing layers, and DMP/discovery payloads.
//!
//! Every sACN datagram shares the same skeleton (see [acn]): a fixed
//! preamble, a [RootLayer] PDU carrying the sender's CID, and an empty
//! postamble. What varies is the PDU the root layer wraps — [data::DataFraming]
//! for levels/priorities, [sync::SyncFraming] for synchronization, or
//! [discovery::DiscoveryFraming] for universe discovery.

pub mod acn;
pub mod data;
pub mod discovery;
pub mod error;
pub mod root;
pub mod sync;

pub use acn::flags_and_length;
pub use error::PacketError;
pub use root::RootLayer;

use data::DataFraming;
use discovery::DiscoveryFraming;
use sync::SyncFraming;

/// The fixed ACN preamble preceding every root layer PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Preamble;

impl Preamble {
    const PREAMBLE_SIZE: u16 = 0x0010;
    const POSTAMBLE_SIZE: u16 = 0x0000;
    const ACN_PACKET_IDENTIFIER: [u8; 12] = *b"ASC-E1.17\0\0\0";

    pub(crate) const SIZE: usize = 16;

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SIZE);
        bytes.extend_from_slice(&Self::PREAMBLE_SIZE.to_be_bytes());
        bytes.extend_from_slice(&Self::POSTAMBLE_SIZE.to_be_bytes());
        bytes.extend_from_slice(&Self::ACN_PACKET_IDENTIFIER);
        bytes
    }

    pub(crate) fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::SIZE {
            return Err(PacketError::InvalidLength(data.len()));
        }

        let preamble_size = u16::from_be_bytes([data[0], data[1]]);
        if preamble_size != Self::PREAMBLE_SIZE {
            return Err(PacketError::InvalidPreamblePreambleSize(preamble_size));
        }

        let postamble_size = u16::from_be_bytes([data[2], data[3]]);
        if postamble_size != Self::POSTAMBLE_SIZE {
            return Err(PacketError::InvalidPreamblePostambleSize(postamble_size));
        }

        if data[4..16] != Self::ACN_PACKET_IDENTIFIER {
            return Err(PacketError::InvalidPreambleAcnPacketIdentifier(data[4..16].to_vec()));
        }

        Ok(Self)
    }
}

impl acn::Preamble for Preamble {
    type DecodeError = PacketError;

    const SIZE: usize = Preamble::SIZE;

    fn encode(&self) -> impl Into<Vec<u8>> {
        Preamble::encode(self)
    }

    fn decode(data: &[u8]) -> Result<Self, Self::DecodeError> {
        Preamble::decode(data)
    }
}

/// The (always empty) postamble following the root layer PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Postamble;

impl Postamble {
    pub(crate) fn encode(&self) -> Vec<u8> {
        Vec::new()
    }

    pub(crate) fn decode(_data: &[u8]) -> Result<Self, PacketError> {
        Ok(Self)
    }

    pub(crate) fn size(&self) -> usize {
        0
    }
}

impl acn::Postamble for Postamble {
    type DecodeError = PacketError;

    fn encode(&self) -> impl Into<Vec<u8>> {
        Postamble::encode(self)
    }

    fn decode(data: &[u8]) -> Result<Self, Self::DecodeError> {
        Postamble::decode(data)
    }

    fn size(&self) -> usize {
        Postamble::size(self)
    }
}

/// A complete sACN datagram: preamble, root layer, (empty) postamble.
pub type Packet = acn::Packet<Preamble, RootLayer, Postamble>;

/// The PDU a [RootLayer] wraps.
///
/// The framing layer vector alone can't tell [Pdu::DataFraming] apart from
/// [Pdu::DiscoveryFraming] — both use `0x00000002` — so decoding takes the
/// root layer's `extended` bit as context rather than guessing from shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    /// Per-universe levels and/or per-address priorities.
    DataFraming(DataFraming),
    /// Synchronization trigger (E1.31 §6.3).
    SyncFraming(SyncFraming),
    /// Universe discovery page (E1.31 §4.3).
    DiscoveryFraming(DiscoveryFraming),
}

impl Pdu {
    pub(crate) fn encode(&self) -> Vec<u8> {
        match self {
            Pdu::DataFraming(pdu) => pdu.encode(),
            Pdu::SyncFraming(pdu) => pdu.encode(),
            Pdu::DiscoveryFraming(pdu) => pdu.encode(),
        }
    }

    pub(crate) fn decode(data: &[u8], extended: bool) -> Result<Self, PacketError> {
        if data.len() < 6 {
            return Err(PacketError::InvalidLength(data.len()));
        }
        let vector = [data[2], data[3], data[4], data[5]];

        if !extended {
            return match vector {
                DataFraming::VECTOR => Ok(Pdu::DataFraming(DataFraming::decode(data)?)),
                _ => Err(PacketError::InvalidFramingLayerVector(vector.to_vec())),
            };
        }

        match vector {
            SyncFraming::VECTOR => Ok(Pdu::SyncFraming(SyncFraming::decode(data)?)),
            DiscoveryFraming::VECTOR => Ok(Pdu::DiscoveryFraming(DiscoveryFraming::decode(data)?)),
            _ => Err(PacketError::InvalidFramingLayerVector(vector.to_vec())),
        }
    }

    pub(crate) fn size(&self) -> usize {
        match self {
            Pdu::DataFraming(pdu) => pdu.size(),
            Pdu::SyncFraming(pdu) => pdu.size(),
            Pdu::DiscoveryFraming(pdu) => pdu.size(),
        }
    }
}
