//! Peer-access capability probing.
//!
//! The engine requires full-mesh peer accessibility: every device must be
//! able to map and directly read/write every other device's memory. The
//! probe is the seam where a platform-specific capability check plugs in;
//! the built-in [`UnifiedProbe`] reflects the host-threaded runtime, where
//! all simulated devices share one address space.

use crate::types::DeviceId;

/// Probes whether one device can directly address another's memory.
pub trait PeerProbe: Send + Sync {
    /// True if `device` can map and directly read/write `peer`'s memory.
    fn accessible(&self, device: DeviceId, peer: DeviceId) -> bool;
}

/// Full mesh: every simulated device lives in the host address space, so
/// every pair is mutually accessible.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnifiedProbe;

impl PeerProbe for UnifiedProbe {
    fn accessible(&self, _device: DeviceId, _peer: DeviceId) -> bool {
        true
    }
}

/// Denies every pair. Exercises the fatal initialization path.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllProbe;

impl PeerProbe for DenyAllProbe {
    fn accessible(&self, _device: DeviceId, _peer: DeviceId) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unified_probe_is_full_mesh() {
        let p = UnifiedProbe;
        for a in 0..4 {
            for b in 0..4 {
                assert!(p.accessible(a, b));
            }
        }
    }

    #[test]
    fn test_deny_all_probe() {
        assert!(!DenyAllProbe.accessible(0, 1));
    }
}
