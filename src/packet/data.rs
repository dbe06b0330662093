use arrayvec::ArrayVec;

use super::acn;
use super::{PacketError, flags_and_length};
use crate::cid::SourceName;
use crate::slot::{MAX_SLOTS, Slot};

const PREVIEW_DATA_BIT: u8 = 0x80;
const STREAM_TERMINATED_BIT: u8 = 0x40;
const FORCE_SYNCHRONIZATION_BIT: u8 = 0x20;

/// An E1.31 Data Packet Framing Layer (E1.31 §6.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFraming {
    source_name: SourceName,
    priority: u8,
    synchronization_address: u16,
    sequence_number: u8,
    options: u8,
    universe: u16,
    dmp: Dmp,
}

impl DataFraming {
    pub(crate) const VECTOR: [u8; 4] = [0x00, 0x00, 0x00, 0x02];

    /// Creates a new [DataFraming] layer.
    ///
    /// `priority` must be in `0..=200` (E1.31 §6.2.3).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_name: SourceName,
        priority: u8,
        synchronization_address: u16,
        sequence_number: u8,
        preview_data: bool,
        stream_terminated: bool,
        force_synchronization: bool,
        universe: u16,
        dmp: Dmp,
    ) -> Result<Self, PacketError> {
        if priority > 200 {
            return Err(PacketError::InvalidPriority(priority));
        }

        let mut options = 0;
        options |= (preview_data as u8) * PREVIEW_DATA_BIT;
        options |= (stream_terminated as u8) * STREAM_TERMINATED_BIT;
        options |= (force_synchronization as u8) * FORCE_SYNCHRONIZATION_BIT;

        Ok(DataFraming {
            source_name,
            priority,
            synchronization_address,
            sequence_number,
            options,
            universe,
            dmp,
        })
    }

    /// The source name in this layer.
    pub fn source_name(&self) -> &SourceName {
        &self.source_name
    }

    /// The data priority in this layer, `0..=200`.
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// The universe synchronized data packets following this one will wait
    /// for, or `0` if this packet isn't synchronized.
    pub fn synchronization_address(&self) -> u16 {
        self.synchronization_address
    }

    /// The sequence number in this layer.
    pub fn sequence_number(&self) -> u8 {
        self.sequence_number
    }

    /// Whether the Preview_Data option bit is set.
    pub fn preview_data(&self) -> bool {
        self.options & PREVIEW_DATA_BIT == PREVIEW_DATA_BIT
    }

    /// Whether the Stream_Terminated option bit is set.
    pub fn stream_terminated(&self) -> bool {
        self.options & STREAM_TERMINATED_BIT == STREAM_TERMINATED_BIT
    }

    /// Whether the Force_Synchronization option bit is set.
    pub fn force_synchronization(&self) -> bool {
        self.options & FORCE_SYNCHRONIZATION_BIT == FORCE_SYNCHRONIZATION_BIT
    }

    /// The universe number in this layer.
    pub fn universe(&self) -> u16 {
        self.universe
    }

    /// The DMP layer carried in this packet.
    pub fn dmp(&self) -> &Dmp {
        &self.dmp
    }
}

impl acn::Pdu for DataFraming {
    type DecodeError = PacketError;

    fn encode(&self) -> impl Into<Vec<u8>> {
        let flags_and_length = flags_and_length(self.size()).to_be_bytes();

        let mut bytes = Vec::with_capacity(self.size());
        bytes.extend(flags_and_length);
        bytes.extend(Self::VECTOR);
        bytes.extend(self.source_name.as_bytes());
        bytes.push(self.priority);
        bytes.extend(self.synchronization_address.to_be_bytes());
        bytes.push(self.sequence_number);
        bytes.push(self.options);
        bytes.extend(self.universe.to_be_bytes());
        bytes.extend(self.dmp.encode().into());
        bytes
    }

    fn decode(bytes: &[u8]) -> Result<Self, Self::DecodeError> {
        if bytes.len() < 77 {
            return Err(PacketError::InvalidLength(bytes.len()));
        }

        // E1.31 6.2.1 Data Packet: Vector
        let vector = [bytes[2], bytes[3], bytes[4], bytes[5]];
        if vector != Self::VECTOR {
            return Err(PacketError::InvalidFramingLayerVector(vector.to_vec()));
        }

        // E1.31 6.2.2 Data Packet: Source Name
        let source_name = SourceName::from_wire(bytes[6..70].try_into().unwrap());

        // E1.31 6.2.3 Data Packet: Priority
        let priority = bytes[70];
        if priority > 200 {
            return Err(PacketError::InvalidPriority(priority));
        }

        // E1.31 6.2.4 Data Packet: Synchronization Address
        let synchronization_address = u16::from_be_bytes([bytes[71], bytes[72]]);

        // E1.31 6.2.5 Data Packet: Sequence Number
        let sequence_number = bytes[73];

        // E1.31 6.2.6 Data Packet: Options
        let options = bytes[74];

        // E1.31 6.2.7 Data Packet: Universe
        let universe = u16::from_be_bytes([bytes[75], bytes[76]]);

        let dmp = Dmp::decode(&bytes[77..])?;

        Ok(DataFraming {
            source_name,
            priority,
            synchronization_address,
            sequence_number,
            options,
            universe,
            dmp,
        })
    }

    fn size(&self) -> usize {
        77 + self.dmp.size()
    }
}

/// The DMP (Device Management Protocol) Layer of an E1.31 Data Packet
/// (E1.13 §7), carrying the start code in slot 0 followed by up to 512 DMX
/// data slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dmp {
    property_values: ArrayVec<Slot, { 1 + MAX_SLOTS }>,
}

impl Dmp {
    const VECTOR: u8 = 0x02;
    const ADDRESS_INCREMENT: [u8; 2] = [0x00, 0x01];
    const FIRST_PROPERTY_ADDRESS: [u8; 2] = [0x00, 0x00];
    const ADDRESS_TYPE_AND_DATA_TYPE: u8 = 0xa1;

    /// Creates a new [Dmp] layer from a start code and its data slots.
    pub fn new(start_code: Slot, data_slots: &[Slot]) -> Self {
        let mut property_values = ArrayVec::new();
        property_values.push(start_code);
        property_values.try_extend_from_slice(data_slots).expect("data exceeds 512 slots");
        Dmp { property_values }
    }

    /// The start code: `0x00` for DMX levels, `0xDD` for per-address
    /// priority (ANSI E1.31 §6.2.8/Annex B).
    pub fn start_code(&self) -> Slot {
        self.property_values[0]
    }

    /// The data slots, not including the start code.
    pub fn data_slots(&self) -> &[Slot] {
        &self.property_values[1..]
    }

    /// All property values, start code included.
    pub fn slots(&self) -> &[Slot] {
        &self.property_values
    }
}

impl acn::Pdu for Dmp {
    type DecodeError = PacketError;

    fn encode(&self) -> impl Into<Vec<u8>> {
        let flags_and_length = flags_and_length(self.size()).to_be_bytes();
        let property_value_count = self.property_values.len();

        let mut bytes = Vec::with_capacity(10 + property_value_count);
        bytes.extend(flags_and_length);
        bytes.push(Self::VECTOR);
        bytes.push(Self::ADDRESS_TYPE_AND_DATA_TYPE);
        bytes.extend(Self::FIRST_PROPERTY_ADDRESS);
        bytes.extend(Self::ADDRESS_INCREMENT);
        bytes.extend((property_value_count as u16).to_be_bytes());
        bytes.extend_from_slice(&self.property_values);
        bytes
    }

    fn decode(bytes: &[u8]) -> Result<Self, Self::DecodeError> {
        if bytes.len() < 10 {
            return Err(PacketError::InvalidLength(bytes.len()));
        }

        // E1.13 7.2 DMP Layer: Vector
        let vector = bytes[2];
        if vector != Self::VECTOR {
            return Err(PacketError::InvalidDmpLayerVector(vec![vector]));
        }

        // E1.13 7.3 Address Type and Data Type
        let address_type_and_data_type = bytes[3];
        if address_type_and_data_type != Self::ADDRESS_TYPE_AND_DATA_TYPE {
            return Err(PacketError::InvalidDmpAddressType(address_type_and_data_type));
        }

        // E1.13 7.4 First Property Address
        let first_property_address = [bytes[4], bytes[5]];
        if first_property_address != Self::FIRST_PROPERTY_ADDRESS {
            return Err(PacketError::InvalidDmpFirstPropertyAddress(u16::from_be_bytes(
                first_property_address,
            )));
        }

        // E1.13 7.5 Address Increment
        let address_increment = [bytes[6], bytes[7]];
        if address_increment != Self::ADDRESS_INCREMENT {
            return Err(PacketError::InvalidDmpAddressIncrement(u16::from_be_bytes(
                address_increment,
            )));
        }

        // E1.13 7.6 Property Value Count
        let property_value_count = u16::from_be_bytes([bytes[8], bytes[9]]) as usize;
        if bytes.len() < 10 + property_value_count || property_value_count > 1 + MAX_SLOTS {
            return Err(PacketError::InvalidLength(bytes.len()));
        }

        let mut property_values = ArrayVec::new();
        property_values
            .try_extend_from_slice(&bytes[10..10 + property_value_count])
            .map_err(|_| PacketError::InvalidLength(property_value_count))?;

        Ok(Dmp { property_values })
    }

    fn size(&self) -> usize {
        10 + self.property_values.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::acn::Pdu as _;

    #[test]
    fn dmp_round_trips() {
        let dmp = Dmp::new(0x00, &[1, 2, 3, 255]);
        let encoded = dmp.encode().into();
        let decoded = Dmp::decode(&encoded).unwrap();
        assert_eq!(dmp, decoded);
        assert_eq!(decoded.start_code(), 0x00);
        assert_eq!(decoded.data_slots(), &[1, 2, 3, 255]);
    }

    #[test]
    fn data_framing_round_trips() {
        let dmp = Dmp::new(0x00, &[10, 20, 30]);
        let name = SourceName::new("test source").unwrap();
        let framing = DataFraming::new(name, 100, 0, 1, false, false, false, 1, dmp).unwrap();
        let encoded = framing.encode().into();
        let decoded = DataFraming::decode(&encoded).unwrap();
        assert_eq!(framing, decoded);
    }

    #[test]
    fn rejects_priority_above_200() {
        let dmp = Dmp::new(0x00, &[]);
        let name = SourceName::new("test").unwrap();
        let result = DataFraming::new(name, 201, 0, 1, false, false, false, 1, dmp);
        assert!(matches!(result, Err(PacketError::InvalidPriority(201))));
    }

    #[test]
    fn options_bits_roundtrip() {
        let dmp = Dmp::new(0x00, &[]);
        let name = SourceName::new("test").unwrap();
        let framing = DataFraming::new(name, 100, 0, 1, true, true, true, 1, dmp).unwrap();
        assert!(framing.preview_data());
        assert!(framing.stream_terminated());
        assert!(framing.force_synchronization());
    }
}
