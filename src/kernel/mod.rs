//! The device-resident handshake-and-copy procedure.
//!
//! One execution group of `group_width` lane threads runs per queued
//! descriptor. Each group, independently of every other group:
//!
//! 1. cooperatively loads its descriptor from the device buffer into
//!    group-shared storage, word-by-word, and synchronizes;
//! 2. Phase A: lane 0 publishes the local destination address into the
//!    local exchange array while lane 1 discovers the remote destination
//!    from the peer's array; the group synchronizes again;
//! 3. Phase B: every lane copies a disjoint strided slice of the send
//!    buffer straight into the peer's destination (a one-sided remote
//!    write), then fences;
//! 4. Phase C: after a final synchronization, lane 0 raises the peer's
//!    completion flag and waits for the symmetric signal.
//!
//! There is no error channel on the device side: a missing or mismatched
//! counterpart descriptor leaves the group spinning in Phase A or C, and
//! with it the whole launch. The synchronization before Phase C is what
//! lets a single lane raise the flag on every lane's behalf: the group
//! barrier orders all copy writes before the flag store.

mod copy;
mod handshake;

use crate::descriptor::{TransferDescriptor, DESC_BYTES, DESC_WORDS};
use crate::exchange::SpinExpired;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;

/// Per-launch tuning, resolved from the engine config.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tuning {
    pub width: usize,
    pub block_words: usize,
    pub spin_limit: Option<u64>,
}

/// Group-wide rendezvous in the style of a device barrier: lanes busy-wait
/// on a generation counter. Abort-aware so that a watchdog-expired lane
/// does not strand the rest of its group at the barrier.
struct SpinBarrier {
    arrived: AtomicUsize,
    generation: AtomicUsize,
    width: usize,
}

impl SpinBarrier {
    fn new(width: usize) -> Self {
        Self {
            arrived: AtomicUsize::new(0),
            generation: AtomicUsize::new(0),
            width,
        }
    }

    fn wait(&self, aborted: &AtomicBool) {
        let generation = self.generation.load(Ordering::Acquire);
        if self.arrived.fetch_add(1, Ordering::AcqRel) + 1 == self.width {
            self.arrived.store(0, Ordering::Relaxed);
            self.generation.fetch_add(1, Ordering::Release);
        } else {
            while self.generation.load(Ordering::Acquire) == generation {
                if aborted.load(Ordering::Relaxed) {
                    panic!("execution group aborted");
                }
                std::hint::spin_loop();
            }
        }
    }
}

/// Group-shared storage: the loaded descriptor, the handshake-resolved
/// target address, the abort flag, and the group barrier.
struct GroupShared {
    desc: UnsafeCell<TransferDescriptor>,
    target: AtomicU64,
    aborted: AtomicBool,
    barrier: SpinBarrier,
}

// Lanes write disjoint descriptor words before the first barrier and only
// read the descriptor afterwards; the barrier provides the ordering.
unsafe impl Sync for GroupShared {}

impl GroupShared {
    fn new(width: usize) -> Self {
        Self {
            desc: UnsafeCell::new(TransferDescriptor::default()),
            target: AtomicU64::new(0),
            aborted: AtomicBool::new(false),
            barrier: SpinBarrier::new(width),
        }
    }

    /// Watchdog expiry: release the rest of the group, then unwind.
    fn abort(&self, stage: &str, peer: u32, e: SpinExpired) -> ! {
        self.aborted.store(true, Ordering::Relaxed);
        panic!("handshake watchdog: {stage} for peer {peer} gave up after {} polls", e.polls);
    }
}

/// Run one group per descriptor in `work_buf[0..n_groups]`, returning once
/// every group has terminated. Executes on the stream worker, so stream
/// synchronization implies transfer completion on both ends.
pub(crate) fn execute_groups(work_buf: u64, n_groups: usize, tuning: Tuning) {
    tracing::trace!(groups = n_groups, width = tuning.width, "executing groups");
    let groups: Vec<GroupShared> = (0..n_groups)
        .map(|_| GroupShared::new(tuning.width))
        .collect();
    thread::scope(|s| {
        for (group, shared) in groups.iter().enumerate() {
            for lane in 0..tuning.width {
                s.spawn(move || lane_main(lane, group, shared, work_buf, tuning));
            }
        }
    });
}

fn lane_main(lane: usize, group: usize, shared: &GroupShared, work_buf: u64, t: Tuning) {
    let gdesc = (work_buf as usize + group * DESC_BYTES) as *const u64;
    let local = shared.desc.get() as *mut u64;
    let mut w = lane;
    while w < DESC_WORDS {
        unsafe { local.add(w).write(gdesc.add(w).read()) };
        w += t.width;
    }
    shared.barrier.wait(&shared.aborted);

    let desc_ptr = shared.desc.get();
    if lane == 0 {
        let recv = unsafe { (*desc_ptr).recv };
        if let Err(e) = handshake::publish_recv_buffer(&recv, t.spin_limit) {
            shared.abort("receive publication", recv.peer, e);
        }
    } else if lane == 1 {
        let send = unsafe { (*desc_ptr).send };
        match handshake::resolve_target_buffer(&send, t.spin_limit) {
            Ok(target) => shared.target.store(target, Ordering::Relaxed),
            Err(e) => shared.abort("target discovery", send.peer, e),
        }
    }
    shared.barrier.wait(&shared.aborted);

    let desc = unsafe { *desc_ptr };
    let target = shared.target.load(Ordering::Relaxed);
    debug_assert_eq!(desc.send.data % 8, 0, "send buffer must be word-aligned");
    debug_assert_eq!(target % 8, 0, "target buffer must be word-aligned");
    unsafe {
        copy::copy_payload(
            desc.send.data,
            target,
            desc.send.size as usize,
            lane,
            t.width,
            t.block_words,
        )
    };
    copy::system_fence();

    shared.barrier.wait(&shared.aborted);
    if lane == 0 {
        if let Err(e) = handshake::signal_and_await_completion(&desc.recv, &desc.send, t.spin_limit)
        {
            shared.abort("completion acknowledgement", desc.recv.peer, e);
        }
    }
}
