//! Crate-wide error kinds.
//!
//! Mirrors the module-boundary error kinds the core distinguishes (see
//! SPEC_FULL.md §B): each API call surfaces one of these synchronously,
//! except [Error::System] on a send/poll failure mid-tick, which is counted
//! into per-source/per-receiver stats instead and logged once per stats
//! interval rather than propagated (see `source::Stats`).

use crate::packet::PacketError;

/// A crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised at the boundary of the receiver, source, merger, and socket
/// APIs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A supplied argument was out of range, empty, or otherwise malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The feature this call requires hasn't been [crate::lifecycle::init]ed.
    #[error("feature not initialized")]
    NotInitialized,

    /// The entity being created already exists (duplicate universe,
    /// duplicate unicast destination, duplicate receiver on the same
    /// universe).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A lookup by handle failed to find a live entity.
    #[error("not found: {0}")]
    NotFound(String),

    /// Allocation failed. In this crate's dynamic-memory-only design this is
    /// only reachable via explicit `try_reserve` calls on preassembled send
    /// buffers.
    #[error("allocation failed")]
    NoMemory,

    /// Every interface supplied to a receiver or source failed to join its
    /// multicast group; the entity was rolled back and was never created.
    #[error("no usable network interfaces")]
    NoNetworkInterfaces,

    /// An operation on an existing socket (bind/join/send/recv) failed at
    /// the OS level. The owning receiver or source may remain otherwise
    /// functional.
    #[error("system error: {0}")]
    System(#[from] std::io::Error),

    /// A datagram failed to parse as a well-formed E1.31 packet.
    #[error("invalid packet: {0}")]
    InvalidPacket(#[from] PacketError),
}
