//! Socket-plane errors.

/// Errors raised by the socket/subscription plane (spec.md §4.1).
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Binding a socket to the sACN port failed.
    #[error("failed to bind socket: {0}")]
    Bind(#[source] std::io::Error),
    /// Joining a multicast group on an interface failed.
    #[error("failed to join multicast group: {0}")]
    Join(#[source] std::io::Error),
    /// Leaving a multicast group failed.
    #[error("failed to leave multicast group: {0}")]
    Leave(#[source] std::io::Error),
    /// A send (multicast or unicast) failed.
    #[error("failed to send datagram: {0}")]
    Send(#[source] std::io::Error),
    /// A receive-side I/O error, distinct from an ordinary would-block.
    #[error("failed to receive datagram: {0}")]
    Receive(#[source] std::io::Error),
    /// Every interface supplied to a receiver or source failed to join.
    #[error("no usable network interfaces")]
    NoUsableInterfaces,
    /// A multicast group and interface address were of mismatched IP
    /// families.
    #[error("mismatched address families between group and interface")]
    FamilyMismatch,
}
