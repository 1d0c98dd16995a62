/// Identifier of a participating device (0-indexed, dense).
pub type DeviceId = u32;

/// Machine word size used for host/device descriptor traffic and for the
/// wide copy pass.
pub const WORD_BYTES: usize = std::mem::size_of::<u64>();
