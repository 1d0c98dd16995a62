//! The wire-format record describing one directed point-to-point exchange.
//!
//! Descriptors are built on the host at submission time and consumed on the
//! device at launch time. They move between host and device memory as plain
//! machine words, with no structured marshaling step, so the layout is
//! `#[repr(C)]` and its size is pinned to a multiple of the word size at
//! compile time.

use crate::types::{DeviceId, WORD_BYTES};

/// One direction of an exchange: whom to talk to, how much, through which
/// exchange slot-pair, and where the payload lives.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSpec {
    /// Peer device for this direction.
    pub peer: DeviceId,
    /// Payload size in bytes. Bounded to 32 bits.
    pub size: u32,
    /// Address of the exchange slot-pair for this ordered link. For the
    /// receive side this points into the local device's own array; for the
    /// send side, into the recipient's array.
    pub exchange: u64,
    /// Local payload buffer address (destination or source).
    pub data: u64,
}

/// One queued send/receive exchange. `target` is resolved on-device during
/// the handshake; submitters leave it zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferDescriptor {
    pub recv: TransferSpec,
    pub send: TransferSpec,
    /// Remote destination address obtained from the receiver.
    pub target: u64,
}

/// Descriptor size in bytes.
pub const DESC_BYTES: usize = std::mem::size_of::<TransferDescriptor>();

/// Descriptor size in machine words, for word-by-word host/device traffic
/// and the cooperative on-device load.
pub const DESC_WORDS: usize = DESC_BYTES / WORD_BYTES;

// Word-by-word transfer between host and device requires exact word
// granularity and alignment.
const _: () = assert!(DESC_BYTES % WORD_BYTES == 0);
const _: () = assert!(std::mem::align_of::<TransferDescriptor>() == WORD_BYTES);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(std::mem::size_of::<TransferSpec>(), 24);
        assert_eq!(DESC_BYTES, 56);
        assert_eq!(DESC_WORDS, 7);
    }

    #[test]
    fn test_default_is_zeroed() {
        let d = TransferDescriptor::default();
        assert_eq!(d.recv.peer, 0);
        assert_eq!(d.recv.exchange, 0);
        assert_eq!(d.send.data, 0);
        assert_eq!(d.target, 0);
    }

    #[test]
    fn test_word_view_roundtrip() {
        let d = TransferDescriptor {
            recv: TransferSpec {
                peer: 1,
                size: 4096,
                exchange: 0x1000,
                data: 0x2000,
            },
            send: TransferSpec {
                peer: 2,
                size: 8192,
                exchange: 0x3000,
                data: 0x4000,
            },
            target: 0,
        };
        let words =
            unsafe { std::slice::from_raw_parts(&d as *const _ as *const u64, DESC_WORDS) };
        let mut copy = TransferDescriptor::default();
        let dst = &mut copy as *mut _ as *mut u64;
        for (i, w) in words.iter().enumerate() {
            unsafe { dst.add(i).write(*w) };
        }
        assert_eq!(copy, d);
    }
}
