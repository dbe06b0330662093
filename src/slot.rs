//! DMX slot footprints.

use arrayvec::ArrayVec;

/// # E1.31 3.4 Slot
///
/// One byte of DMX512-A data. The core always operates on the full 512-slot
/// footprint; sub-range footprints are reserved for future extension (see
/// DESIGN.md).
pub type Slot = u8;

/// The maximum number of data slots in a universe, 1-indexed on the wire.
pub const MAX_SLOTS: usize = 512;

/// A buffer holding up to [MAX_SLOTS] data slots (start code excluded).
pub type SlotBuffer = ArrayVec<Slot, MAX_SLOTS>;

/// Builds a zero-filled, full-width [SlotBuffer].
pub fn zeroed_slots() -> SlotBuffer {
    let mut buf = SlotBuffer::new();
    buf.extend(std::iter::repeat(0u8).take(MAX_SLOTS));
    buf
}
