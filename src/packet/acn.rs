//! Generic ACN root-layer framing: preamble, PDU block, postamble.
//!
//! Every ACN-family packet (E1.31 data/sync/discovery included) shares this
//! shape; the `Preamble`/`Pdu`/`Postamble` traits let the E1.31 layers below
//! plug their concrete wire formats into one encode/decode skeleton instead
//! of repeating the preamble and PDU-block walking logic per packet kind.

/// A complete ACN packet: preamble, one or more PDUs, postamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<Pre: Preamble, P: Pdu, Post: Postamble> {
    /// The packet's preamble.
    pub preamble: Pre,
    /// The block of PDUs the preamble/postamble wrap.
    pub block: PduBlock<P>,
    /// The packet's postamble.
    pub postamble: Post,
}

impl<
    Pre: Preamble<DecodeError = Root::DecodeError>,
    Root: Pdu,
    Post: Postamble<DecodeError = Root::DecodeError>,
> Pdu for Packet<Pre, Root, Post>
{
    type DecodeError = Root::DecodeError;

    fn encode(&self) -> impl Into<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer.extend(self.preamble.encode().into());
        buffer.extend(self.block.encode());
        buffer.extend(self.postamble.encode().into());
        buffer
    }

    fn decode(data: &[u8]) -> Result<Self, Self::DecodeError> {
        let preamble = Pre::decode(&data[..Pre::SIZE])?;
        let block = PduBlock::decode(&data[Pre::SIZE..])?;
        let postamble = Post::decode(&data[Pre::SIZE + block.size()..])?;
        Ok(Packet { preamble, block, postamble })
    }

    fn size(&self) -> usize {
        Pre::SIZE + self.block.size() + self.postamble.size()
    }
}

impl<Pre: Preamble, P: Pdu, Post: Postamble> Packet<Pre, P, Post> {
    /// Assembles a packet from its three parts.
    pub fn new(preamble: Pre, block: PduBlock<P>, postamble: Post) -> Self {
        Packet { preamble, block, postamble }
    }
}

/// A sequence of PDUs making up one ACN root-layer block.
///
/// A well-formed sACN datagram only ever carries a single root-layer PDU,
/// but the block shape is kept general to match the ACN root layer's own
/// definition (and to leave room for bundled PDUs if a future extension
/// needs them).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduBlock<P: Pdu>(Vec<P>);

impl<P: Pdu> PduBlock<P> {
    /// Wraps an already-built list of PDUs.
    pub fn new(pdus: Vec<P>) -> Self {
        Self(pdus)
    }

    /// The PDUs in this block.
    pub fn pdus(&self) -> &[P] {
        &self.0
    }

    /// Encodes every PDU in order.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        for pdu in &self.0 {
            buffer.extend(pdu.encode().into());
        }
        buffer
    }

    /// Decodes PDUs back-to-back until `data` is exhausted.
    pub fn decode(data: &[u8]) -> Result<Self, P::DecodeError> {
        let mut pdus = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let pdu = P::decode(&data[offset..])?;
            offset += pdu.size();
            pdus.push(pdu);
        }
        Ok(PduBlock(pdus))
    }

    /// Total encoded size of every PDU in the block.
    pub fn size(&self) -> usize {
        self.0.iter().map(|pdu| pdu.size()).sum()
    }
}

/// A single PDU: something with a wire encoding, a decoder, and a size.
pub trait Pdu {
    /// The error raised when decoding fails.
    type DecodeError: std::error::Error;

    /// Encodes this PDU to network-ordered bytes.
    fn encode(&self) -> impl Into<Vec<u8>>;

    /// Decodes a PDU from the start of `data`. Trailing bytes beyond
    /// `self.size()` are ignored by the caller.
    fn decode(data: &[u8]) -> Result<Self, Self::DecodeError>
    where
        Self: Sized;

    /// The total encoded size of this PDU, including its own length field.
    fn size(&self) -> usize;
}

/// The fixed-size header preceding the root-layer PDU block.
pub trait Preamble {
    /// The error raised when decoding fails.
    type DecodeError: std::error::Error;

    /// The fixed encoded size of this preamble.
    const SIZE: usize;

    /// Encodes this preamble to network-ordered bytes.
    fn encode(&self) -> impl Into<Vec<u8>>;

    /// Decodes a preamble from the start of `data`.
    fn decode(data: &[u8]) -> Result<Self, Self::DecodeError>
    where
        Self: Sized;
}

/// The (possibly empty) footer following the root-layer PDU block.
pub trait Postamble {
    /// The error raised when decoding fails.
    type DecodeError: std::error::Error;

    /// Encodes this postamble to network-ordered bytes.
    fn encode(&self) -> impl Into<Vec<u8>>;

    /// Decodes a postamble from the remaining bytes after the PDU block.
    fn decode(data: &[u8]) -> Result<Self, Self::DecodeError>
    where
        Self: Sized;

    /// The encoded size of this postamble.
    fn size(&self) -> usize;
}

/// Computes the 16-bit "flags and length" field shared by every ACN PDU:
/// the low 12 bits carry the PDU length, the high 4 bits are fixed at
/// `0x7`.
pub fn flags_and_length(length: usize) -> u16 {
    let flags = 0x7_u16 << 12;
    let length = (length & 0xFFF) as u16;
    flags | length
}
