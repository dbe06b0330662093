//! DMX merging (spec.md §4.6, §4.7): arbitrary-N-source HTP arbitration and
//! the merge receiver that composes it with a [crate::receiver::Receiver].

pub mod merge_receiver;
pub mod merger;

pub use merge_receiver::MergeReceiver;
pub use merger::DmxMerger;
