pub mod memory;
pub mod stream;
pub mod topology;

pub use memory::DeviceBuffer;
pub use stream::Stream;
pub use topology::{DenyAllProbe, PeerProbe, UnifiedProbe};
