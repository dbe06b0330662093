/// Errors raised while encoding or decoding an E1.31 packet.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PacketError {
    /// The datagram didn't match any known PDU shape.
    #[error("invalid packet")]
    InvalidPacket,

    /// Too few bytes to contain even a minimal PDU of this kind.
    #[error("invalid length: {0}")]
    InvalidLength(usize),

    /// E1.31 §5.1 preamble size field didn't match the fixed constant.
    #[error("invalid preamble size: {0:#06x}")]
    InvalidPreamblePreambleSize(u16),
    /// E1.31 §5.2 postamble size field didn't match the fixed constant.
    #[error("invalid postamble size: {0:#06x}")]
    InvalidPreamblePostambleSize(u16),
    /// E1.31 §5.3 ACN packet identifier didn't match.
    #[error("invalid ACN packet identifier: {0:?}")]
    InvalidPreambleAcnPacketIdentifier(Vec<u8>),

    /// Root layer was shorter than the minimum possible size.
    #[error("invalid root layer size: {0}")]
    InvalidRootLayerSize(usize),
    /// Root layer vector didn't match a known (possibly extended) value.
    #[error("invalid root layer vector: {0:?}")]
    InvalidRootLayerVector(Vec<u8>),

    /// Framing layer vector didn't match the PDU kind being decoded.
    #[error("invalid framing layer vector: {0:?}")]
    InvalidFramingLayerVector(Vec<u8>),

    /// DMP layer vector wasn't `0x02` (set property).
    #[error("invalid DMP layer vector: {0:?}")]
    InvalidDmpLayerVector(Vec<u8>),
    /// DMP address type and data type byte wasn't `0xa1`.
    #[error("invalid DMP address type: {0:#04x}")]
    InvalidDmpAddressType(u8),
    /// DMP first property address wasn't `0x0000`.
    #[error("invalid DMP first property address: {0:#06x}")]
    InvalidDmpFirstPropertyAddress(u16),
    /// DMP address increment wasn't `0x0001`.
    #[error("invalid DMP address increment: {0:#06x}")]
    InvalidDmpAddressIncrement(u16),

    /// Universe Discovery layer vector didn't match.
    #[error("invalid universe discovery layer vector: {0:?}")]
    InvalidUniverseDiscoveryLayerVector(Vec<u8>),

    /// Priority outside the valid `0..=200` range.
    #[error("invalid priority: {0}, must be 0..=200")]
    InvalidPriority(u8),
    /// Source name didn't fit in the 64-byte (incl. NUL) field.
    #[error("invalid source name length: {0}, must be < 64")]
    InvalidSourceNameLength(usize),
    /// Universe number outside `1..=63999`.
    #[error("invalid universe: {0}")]
    InvalidUniverse(u16),
}
