//! Component identifiers and source names.

use crate::error::Error;

/// # E1.31 5.6 CID (Component Identifier)
///
/// Each piece of equipment should maintain the same CID for its entire
/// lifetime (e.g. by storing it in read-only memory). This means that a
/// particular component on the network can be identified as the same entity
/// from day to day despite network interruptions, power down, or other
/// disruptions.
pub type Cid = uuid::Uuid;

/// Maximum length in bytes of a source name, including the terminating NUL.
pub const SOURCE_NAME_LEN: usize = 64;

/// A validated, NUL-padded 64-byte sACN source name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceName([u8; SOURCE_NAME_LEN]);

impl SourceName {
    /// Creates a [SourceName] from a UTF-8 string, padding with NUL bytes.
    ///
    /// Returns [Error::InvalidArgument] if `name` doesn't fit (including its
    /// NUL terminator) in 64 bytes.
    pub fn new(name: &str) -> Result<Self, Error> {
        let bytes = name.as_bytes();
        if bytes.len() >= SOURCE_NAME_LEN {
            return Err(Error::InvalidArgument(format!(
                "source name is {} bytes, must be < {SOURCE_NAME_LEN}",
                bytes.len()
            )));
        }

        let mut buf = [0u8; SOURCE_NAME_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Builds a [SourceName] directly from wire bytes, as read off a packet.
    pub fn from_wire(bytes: [u8; SOURCE_NAME_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw wire representation.
    pub fn as_bytes(&self) -> &[u8; SOURCE_NAME_LEN] {
        &self.0
    }

    /// Returns the name as a `&str`, trimmed of trailing NUL bytes.
    ///
    /// Invalid UTF-8 (which shouldn't occur for a packet accepted by the
    /// framing-layer decoder) is lossily replaced.
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(self.0.len());
        String::from_utf8_lossy(&self.0[..end])
    }
}

impl Default for SourceName {
    fn default() -> Self {
        Self([0u8; SOURCE_NAME_LEN])
    }
}

impl std::fmt::Display for SourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
