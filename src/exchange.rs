//! Peer-visible exchange cells.
//!
//! Each device owns one contiguous array of slot-pairs, one pair per
//! possible peer, allocated at initialization and zero-filled. Slot-pair `k`
//! belongs to the ordered link (owner, peer `k`): cell 0 is the
//! pointer-exchange cell, cell 1 the completion flag. A device writes its
//! own array to publish receive readiness; the device about to send to it
//! reads (and clears) the same cells remotely. No other framing exists.
//!
//! The pointer cell is a single-slot rendezvous, not a queue: a publisher
//! waits for the previous round's value to be consumed before overwriting
//! it. Published addresses are XOR-combined with the cell's own address so
//! that a genuinely null destination stays distinguishable from the empty
//! cell (the empty sentinel is the unobfuscated zero value, and no
//! destination buffer can alias its own exchange cell).

use crate::types::DeviceId;
use std::sync::atomic::AtomicU64;

/// Cells per ordered (device, peer) link: pointer exchange + completion.
pub const CELLS_PER_LINK: usize = 2;

/// Bytes occupied by one slot-pair.
pub const LINK_STRIDE_BYTES: usize = CELLS_PER_LINK * std::mem::size_of::<u64>();

/// Unobfuscated value of a drained pointer cell.
pub const EMPTY_SLOT: u64 = 0;

/// Completion sentinel written to the flag cell when a transfer has landed.
pub const TRANSFER_DONE: u64 = 11111;

/// Byte offset of the slot-pair for `peer` inside a device's exchange array.
pub fn link_offset(peer: DeviceId) -> usize {
    peer as usize * LINK_STRIDE_BYTES
}

/// A view of the two cells of one ordered link.
#[derive(Debug, Clone, Copy)]
pub struct SlotPair {
    base: u64,
}

impl SlotPair {
    /// Wrap the address of a slot-pair.
    ///
    /// # Safety
    /// `base` must point to `CELLS_PER_LINK` word-aligned `u64` cells that
    /// stay valid for as long as the pair is used.
    pub unsafe fn from_addr(base: u64) -> Self {
        debug_assert_eq!(base % 8, 0, "exchange cells must be word-aligned");
        Self { base }
    }

    /// The pointer-exchange cell.
    pub fn pointer_cell(&self) -> &AtomicU64 {
        unsafe { &*(self.base as *const AtomicU64) }
    }

    /// The completion-flag cell.
    pub fn done_cell(&self) -> &AtomicU64 {
        unsafe { &*((self.base + std::mem::size_of::<u64>() as u64) as *const AtomicU64) }
    }

    /// Obfuscate a destination address for publication.
    pub fn encode_ptr(&self, addr: u64) -> u64 {
        addr ^ self.base
    }

    /// Recover the destination address from a published cell value.
    pub fn decode_ptr(&self, cell_value: u64) -> u64 {
        cell_value ^ self.base
    }
}

/// A bounded spin that ran out of polls (watchdog mode only).
#[derive(Debug, Clone, Copy)]
pub struct SpinExpired {
    pub polls: u64,
}

/// Busy-poll until `poll` yields a value.
///
/// The default (`limit == None`) polls forever: a missing or mismatched
/// counterpart descriptor hangs here, by contract. With a limit the spin
/// gives up after that many failed polls, which callers turn into a
/// watchdog abort.
pub fn spin_until(
    limit: Option<u64>,
    mut poll: impl FnMut() -> Option<u64>,
) -> std::result::Result<u64, SpinExpired> {
    let mut polls = 0u64;
    loop {
        if let Some(v) = poll() {
            return Ok(v);
        }
        polls += 1;
        if let Some(max) = limit {
            if polls >= max {
                return Err(SpinExpired { polls });
            }
        }
        std::hint::spin_loop();
    }
}
