use crate::types::DeviceId;

pub type Result<T> = std::result::Result<T, LinkError>;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("engine is not initialized")]
    NotInitialized,

    #[error("invalid device id {device}: device count is {device_count}")]
    InvalidDevice {
        device: DeviceId,
        device_count: u32,
    },

    #[error("invalid device count {0}")]
    InvalidDeviceCount(u32),

    #[error("transfer of {bytes} bytes exceeds the 32-bit size field")]
    OversizedTransfer { bytes: usize },

    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },

    #[error("device {device} cannot directly access peer {peer} memory")]
    PeerAccessDenied { device: DeviceId, peer: DeviceId },

    #[error("device allocation of {bytes} bytes failed")]
    AllocFailed { bytes: usize },

    #[error("stream worker terminated unexpectedly")]
    StreamDead,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Create an `InvalidConfig` error from any displayable reason.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// True for conditions that break the engine's preconditions (full-mesh
    /// peer access, valid device allocations). No later operation can
    /// succeed after one of these; callers are expected to abort.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LinkError::PeerAccessDenied { .. } | LinkError::AllocFailed { .. }
        )
    }
}
