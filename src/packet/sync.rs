use super::acn;
use super::{PacketError, flags_and_length};

/// An E1.31 Synchronization Packet Framing Layer (E1.31 §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncFraming {
    sequence_number: u8,
    synchronization_address: u16,
}

impl SyncFraming {
    pub(crate) const VECTOR: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

    /// Creates a new [SyncFraming] layer.
    pub fn new(sequence_number: u8, synchronization_address: u16) -> Self {
        Self { sequence_number, synchronization_address }
    }

    /// The sequence number in this layer.
    pub fn sequence_number(&self) -> u8 {
        self.sequence_number
    }

    /// The universe on which synchronized data packets will arrive.
    pub fn synchronization_address(&self) -> u16 {
        self.synchronization_address
    }
}

impl acn::Pdu for SyncFraming {
    type DecodeError = PacketError;

    fn encode(&self) -> impl Into<Vec<u8>> {
        let flags_and_length = flags_and_length(self.size()).to_be_bytes();

        let mut bytes = Vec::with_capacity(self.size());
        bytes.extend(flags_and_length);
        bytes.extend(Self::VECTOR);
        bytes.push(self.sequence_number);
        bytes.extend(self.synchronization_address.to_be_bytes());
        bytes.extend([0x00, 0x00]);
        bytes
    }

    fn decode(bytes: &[u8]) -> Result<Self, Self::DecodeError> {
        if bytes.len() < 11 {
            return Err(PacketError::InvalidLength(bytes.len()));
        }

        // E1.31 6.3.1 Synchronization Packet: Vector
        let vector = [bytes[2], bytes[3], bytes[4], bytes[5]];
        if vector != Self::VECTOR {
            return Err(PacketError::InvalidFramingLayerVector(vector.to_vec()));
        }

        // E1.31 6.3.2 Synchronization Packet: Sequence Number
        let sequence_number = bytes[6];

        // E1.31 6.3.3 Synchronization Packet: Synchronization Address
        let synchronization_address = u16::from_be_bytes([bytes[7], bytes[8]]);

        Ok(Self { sequence_number, synchronization_address })
    }

    fn size(&self) -> usize {
        11
    }
}
