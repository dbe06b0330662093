//! A sACN (ANSI E1.31-2018) receive/transmit/merge engine.
//!
//! Covers the wire protocol, the receiver state machine, the source
//! (transmitter) state machine, the DMX merger and merge receiver, and the
//! socket/subscription plane tying them to real interfaces — see
//! [lifecycle] for how an application wires these together and drives them
//! from the receive and source threads.
#![warn(missing_docs)]

pub mod cid;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod merge;
pub mod net;
pub mod notification;
pub mod packet;
pub mod rate_limit;
pub mod receiver;
pub mod registry;
pub mod slot;
pub mod source;
pub mod source_loss;
pub mod universe;

/// Commonly used types for driving a receiver, source, or merge receiver.
pub mod prelude {
    pub use crate::cid::{Cid, SourceName};
    pub use crate::config::{BindPolicy, IpPolicy};
    pub use crate::error::{Error, Result};
    pub use crate::lifecycle::{self, Feature};
    pub use crate::merge::{DmxMerger, MergeReceiver};
    pub use crate::net::SocketPlane;
    pub use crate::notification::{MergeReceiverNotification, ReceiverNotification};
    pub use crate::receiver::{Receiver, ReceiverConfig};
    pub use crate::source::{Source, SourceConfig};
    pub use crate::universe::UniverseId;
}
