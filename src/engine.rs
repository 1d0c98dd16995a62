//! The communication engine: per-device contexts, the submission API, and
//! the launch path.
//!
//! The engine is an explicit caller-owned object; multiple independent
//! engines can coexist. Fatal conditions (missing peer access, failed
//! device allocation) break the engine's preconditions and are returned as
//! errors for the caller to abort on.

use crate::config::LinkConfig;
use crate::descriptor::{TransferDescriptor, TransferSpec, DESC_WORDS};
use crate::device::memory::DeviceBuffer;
use crate::device::stream::Stream;
use crate::device::topology::{PeerProbe, UnifiedProbe};
use crate::error::{LinkError, Result};
use crate::exchange::{link_offset, LINK_STRIDE_BYTES};
use crate::kernel::{self, Tuning};
use crate::types::DeviceId;
use std::sync::Arc;

/// Per-device state: identity, the peer-visible exchange-slot array, the
/// device-resident descriptor buffer, and the pending list for the next
/// launch.
struct DeviceContext {
    device: DeviceId,
    exchange: Arc<DeviceBuffer>,
    work_buf: Arc<DeviceBuffer>,
    work_capacity: usize,
    pending: Vec<TransferDescriptor>,
}

/// Peer-to-peer communication engine over a set of mutually accessible
/// devices.
///
/// Lifecycle: construct, [`init`](CommEngine::init) once, then per round
/// enqueue any number of exchanges per device and launch once per device on
/// that device's stream. Device allocations are shared into in-flight
/// stream work, so dropping the engine never invalidates a queued round.
pub struct CommEngine<P: PeerProbe = UnifiedProbe> {
    config: LinkConfig,
    probe: P,
    devices: Vec<DeviceContext>,
    initialized: bool,
}

impl CommEngine<UnifiedProbe> {
    pub fn new(config: LinkConfig) -> Result<Self> {
        Self::with_probe(config, UnifiedProbe)
    }
}

impl<P: PeerProbe> CommEngine<P> {
    /// Construct with a custom peer-access probe.
    pub fn with_probe(config: LinkConfig, probe: P) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            probe,
            devices: Vec::new(),
            initialized: false,
        })
    }

    /// Set up contexts for `device_count` devices and verify full-mesh peer
    /// accessibility. Idempotent: a second call is a no-op.
    pub fn init(&mut self, device_count: u32) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        if device_count == 0 {
            return Err(LinkError::InvalidDeviceCount(0));
        }

        let exchange_bytes = device_count as usize * LINK_STRIDE_BYTES;
        let mut devices = Vec::with_capacity(device_count as usize);
        for device in 0..device_count {
            let exchange = Arc::new(DeviceBuffer::alloc_zeroed(exchange_bytes)?);
            let work_buf = Arc::new(DeviceBuffer::alloc_zeroed(
                self.config.initial_work_items * std::mem::size_of::<TransferDescriptor>(),
            )?);
            tracing::debug!(device, "device context ready");
            devices.push(DeviceContext {
                device,
                exchange,
                work_buf,
                work_capacity: self.config.initial_work_items,
                pending: Vec::with_capacity(self.config.initial_work_items),
            });
        }

        // full-mesh peer access is a hard precondition for every later
        // operation; refuse to come up partially
        for device in 0..device_count {
            for peer in 0..device_count {
                if device != peer && !self.probe.accessible(device, peer) {
                    return Err(LinkError::PeerAccessDenied { device, peer });
                }
            }
        }

        self.devices = devices;
        self.initialized = true;
        tracing::debug!(device_count, "engine initialized");
        Ok(())
    }

    /// Queue one directed exchange for `device`: receive `recv_size` bytes
    /// from `recv_peer` into `recv_buf`, send `send_size` bytes from
    /// `send_buf` to `send_peer`. Accumulates until [`launch`](Self::launch).
    ///
    /// Exchange cells are always owned by the receiving side: the receive
    /// spec points into `device`'s own array at `recv_peer`'s slot-pair
    /// (where the inbound sender will look), while the send spec points
    /// into `send_peer`'s array at `device`'s slot-pair (where the
    /// recipient publishes its destination for us).
    ///
    /// # Safety
    /// `recv_buf` and `send_buf` must be valid, 8-byte-aligned addresses
    /// covering their respective sizes, and must stay valid and otherwise
    /// untouched until the launching stream has been synchronized. The
    /// caller must queue at most one exchange per ordered (device, peer)
    /// pair per round, and the peer must queue the matching counterpart or
    /// the launch will spin forever.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn enqueue_send_recv(
        &mut self,
        device: DeviceId,
        recv_peer: DeviceId,
        recv_buf: u64,
        recv_size: usize,
        send_peer: DeviceId,
        send_buf: u64,
        send_size: usize,
    ) -> Result<()> {
        if !self.initialized {
            return Err(LinkError::NotInitialized);
        }
        let device_count = self.devices.len() as u32;
        for id in [device, recv_peer, send_peer] {
            if id >= device_count {
                return Err(LinkError::InvalidDevice {
                    device: id,
                    device_count,
                });
            }
        }
        let recv_size =
            u32::try_from(recv_size).map_err(|_| LinkError::OversizedTransfer { bytes: recv_size })?;
        let send_size =
            u32::try_from(send_size).map_err(|_| LinkError::OversizedTransfer { bytes: send_size })?;

        let recv_exchange = self.devices[device as usize].exchange.addr() + link_offset(recv_peer) as u64;
        let send_exchange = self.devices[send_peer as usize].exchange.addr() + link_offset(device) as u64;

        self.devices[device as usize].pending.push(TransferDescriptor {
            recv: TransferSpec {
                peer: recv_peer,
                size: recv_size,
                exchange: recv_exchange,
                data: recv_buf,
            },
            send: TransferSpec {
                peer: send_peer,
                size: send_size,
                exchange: send_exchange,
                data: send_buf,
            },
            target: 0,
        });
        tracing::trace!(device, recv_peer, send_peer, "exchange queued");
        Ok(())
    }

    /// Launch everything queued for `device` on its stream: serialize the
    /// pending descriptors into the device-resident buffer, then start one
    /// execution group per descriptor.
    ///
    /// Asynchronous: returns once the work is queued. The pending list is
    /// cleared immediately (the serialization captures it), but the
    /// transfers are still in flight until the stream is synchronized, and
    /// payload buffers must not be reused before that.
    pub fn launch(&mut self, device: DeviceId, stream: &Stream) -> Result<()> {
        if !self.initialized {
            return Err(LinkError::NotInitialized);
        }
        let device_count = self.devices.len() as u32;
        if device >= device_count {
            return Err(LinkError::InvalidDevice {
                device,
                device_count,
            });
        }

        // keep every exchange array alive while the round is in flight;
        // descriptors hold raw addresses into local and peer arrays
        let exchanges: Vec<Arc<DeviceBuffer>> = self
            .devices
            .iter()
            .map(|d| Arc::clone(&d.exchange))
            .collect();

        let ctx = &mut self.devices[device as usize];
        if ctx.pending.is_empty() {
            return Ok(());
        }

        if ctx.work_capacity < ctx.pending.len() {
            let requested = ctx.pending.len();
            let capacity = requested * 3 / 2;
            tracing::debug!(
                device = ctx.device,
                old = ctx.work_capacity,
                new = capacity,
                "descriptor buffer regrown"
            );
            ctx.work_buf = Arc::new(DeviceBuffer::alloc_zeroed(
                capacity * std::mem::size_of::<TransferDescriptor>(),
            )?);
            ctx.work_capacity = capacity;
        }

        let items = std::mem::take(&mut ctx.pending);
        let n_groups = items.len();
        let tuning = Tuning {
            width: self.config.group_width,
            block_words: self.config.block_words,
            spin_limit: self.config.spin_limit,
        };
        tracing::debug!(device = ctx.device, groups = n_groups, "launching round");

        let work = Arc::clone(&ctx.work_buf);
        stream.submit(Box::new(move || {
            let src = items.as_ptr() as *const u64;
            let dst = work.addr() as *mut u64;
            for w in 0..n_groups * DESC_WORDS {
                unsafe { dst.add(w).write(src.add(w).read()) };
            }
        }));

        let work = Arc::clone(&ctx.work_buf);
        stream.submit(Box::new(move || {
            kernel::execute_groups(work.addr(), n_groups, tuning);
            drop(exchanges);
        }));
        Ok(())
    }

    /// Engine configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Number of participating devices; zero before initialization.
    pub fn device_count(&self) -> u32 {
        self.devices.len() as u32
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::topology::DenyAllProbe;

    fn small_config() -> LinkConfig {
        LinkConfig {
            group_width: 4,
            block_words: 4,
            initial_work_items: 2,
            spin_limit: None,
        }
    }

    fn patterned(len: usize, seed: u8) -> DeviceBuffer {
        let mut buf = DeviceBuffer::alloc_zeroed(len).unwrap();
        for (i, b) in buf.as_mut_slice().iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(13).wrapping_add(seed);
        }
        buf
    }

    #[test]
    fn test_requires_init() {
        let mut engine = CommEngine::new(small_config()).unwrap();
        let err = unsafe { engine.enqueue_send_recv(0, 1, 0x1000, 8, 1, 0x2000, 8) }.unwrap_err();
        assert!(matches!(err, LinkError::NotInitialized));

        let stream = Stream::new().unwrap();
        assert!(matches!(
            engine.launch(0, &stream),
            Err(LinkError::NotInitialized)
        ));
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut engine = CommEngine::new(small_config()).unwrap();
        engine.init(2).unwrap();
        engine.init(4).unwrap();
        assert_eq!(engine.device_count(), 2);
    }

    #[test]
    fn test_init_rejects_zero_devices() {
        let mut engine = CommEngine::new(small_config()).unwrap();
        assert!(matches!(
            engine.init(0),
            Err(LinkError::InvalidDeviceCount(0))
        ));
    }

    #[test]
    fn test_init_fails_without_peer_access() {
        let mut engine = CommEngine::with_probe(small_config(), DenyAllProbe).unwrap();
        let err = engine.init(2).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, LinkError::PeerAccessDenied { device: 0, peer: 1 }));
        assert!(!engine.is_initialized());
    }

    #[test]
    fn test_rejects_out_of_range_ids() {
        let mut engine = CommEngine::new(small_config()).unwrap();
        engine.init(2).unwrap();
        let err = unsafe { engine.enqueue_send_recv(2, 0, 0x1000, 8, 0, 0x2000, 8) }.unwrap_err();
        assert!(matches!(err, LinkError::InvalidDevice { device: 2, .. }));
        let err = unsafe { engine.enqueue_send_recv(0, 5, 0x1000, 8, 1, 0x2000, 8) }.unwrap_err();
        assert!(matches!(err, LinkError::InvalidDevice { device: 5, .. }));

        let stream = Stream::new().unwrap();
        assert!(matches!(
            engine.launch(9, &stream),
            Err(LinkError::InvalidDevice { device: 9, .. })
        ));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_rejects_oversized_transfer() {
        let mut engine = CommEngine::new(small_config()).unwrap();
        engine.init(2).unwrap();
        let too_big = (u32::MAX as usize) + 1;
        let err =
            unsafe { engine.enqueue_send_recv(0, 1, 0x1000, too_big, 1, 0x2000, 8) }.unwrap_err();
        assert!(matches!(err, LinkError::OversizedTransfer { .. }));
    }

    #[test]
    fn test_slot_addressing_asymmetry() {
        let mut engine = CommEngine::new(small_config()).unwrap();
        engine.init(3).unwrap();
        unsafe { engine.enqueue_send_recv(0, 2, 0x1000, 8, 1, 0x2000, 8) }.unwrap();

        let desc = engine.devices[0].pending[0];
        // receive spec: own array, slot-pair of the sending peer
        assert_eq!(
            desc.recv.exchange,
            engine.devices[0].exchange.addr() + link_offset(2) as u64
        );
        // send spec: recipient's array, slot-pair reserved for us
        assert_eq!(
            desc.send.exchange,
            engine.devices[1].exchange.addr() + link_offset(0) as u64
        );
        assert_eq!(desc.target, 0);
    }

    #[test]
    fn test_empty_launch_is_noop() {
        let mut engine = CommEngine::new(small_config()).unwrap();
        engine.init(2).unwrap();
        let stream = Stream::new().unwrap();
        engine.launch(0, &stream).unwrap();
        stream.synchronize().unwrap();
    }

    #[test]
    fn test_round_trip_two_devices() {
        const BYTES: usize = 1 << 20;
        let mut engine = CommEngine::new(small_config()).unwrap();
        engine.init(2).unwrap();

        let srcs = [patterned(BYTES, 0x21), patterned(BYTES, 0x91)];
        let dsts = [
            DeviceBuffer::alloc_zeroed(BYTES).unwrap(),
            DeviceBuffer::alloc_zeroed(BYTES).unwrap(),
        ];
        let streams = [Stream::new().unwrap(), Stream::new().unwrap()];

        for d in 0..2u32 {
            let peer = 1 - d;
            unsafe {
                engine.enqueue_send_recv(
                    d,
                    peer,
                    dsts[d as usize].addr(),
                    BYTES,
                    peer,
                    srcs[d as usize].addr(),
                    BYTES,
                )
            }
            .unwrap();
        }
        for d in 0..2u32 {
            engine.launch(d, &streams[d as usize]).unwrap();
        }
        for s in &streams {
            s.synchronize().unwrap();
        }

        assert_eq!(dsts[0].as_slice(), srcs[1].as_slice());
        assert_eq!(dsts[1].as_slice(), srcs[0].as_slice());
    }

    #[test]
    fn test_capacity_growth_on_oversubscribed_round() {
        // initial capacity 2; queue 3 descriptors per device in a 4-device
        // all-pairs round and make sure the single regrow covers them all
        const BYTES: usize = 4096 + 5;
        let mut engine = CommEngine::new(small_config()).unwrap();
        engine.init(4).unwrap();
        assert_eq!(engine.devices[0].work_capacity, 2);

        let srcs: Vec<Vec<DeviceBuffer>> = (0..4)
            .map(|d| (0..4).map(|p| patterned(BYTES, (d * 4 + p) as u8)).collect())
            .collect();
        let dsts: Vec<Vec<DeviceBuffer>> = (0..4)
            .map(|_| {
                (0..4)
                    .map(|_| DeviceBuffer::alloc_zeroed(BYTES).unwrap())
                    .collect()
            })
            .collect();
        let streams: Vec<Stream> = (0..4).map(|_| Stream::new().unwrap()).collect();

        for d in 0..4u32 {
            for p in 0..4u32 {
                if d == p {
                    continue;
                }
                unsafe {
                    engine.enqueue_send_recv(
                        d,
                        p,
                        dsts[d as usize][p as usize].addr(),
                        BYTES,
                        p,
                        srcs[d as usize][p as usize].addr(),
                        BYTES,
                    )
                }
                .unwrap();
            }
            assert_eq!(engine.devices[d as usize].pending.len(), 3);
        }
        for d in 0..4u32 {
            engine.launch(d, &streams[d as usize]).unwrap();
            // one reallocation, at least 1.5x the previous capacity
            assert_eq!(engine.devices[d as usize].work_capacity, 4);
            assert!(engine.devices[d as usize].pending.is_empty());
        }
        for s in &streams {
            s.synchronize().unwrap();
        }

        for d in 0..4usize {
            for p in 0..4usize {
                if d == p {
                    continue;
                }
                assert_eq!(
                    dsts[d][p].as_slice(),
                    srcs[p][d].as_slice(),
                    "device {d} receiving from {p}"
                );
            }
        }
    }
}
