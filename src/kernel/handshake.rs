//! Phases A and C of the device-resident procedure: readiness publication,
//! target discovery, and completion signaling over the exchange cells.
//!
//! All waits are busy-polls. By contract there is no timeout: a descriptor
//! with no matching counterpart on the peer leaves its group spinning
//! forever. The opt-in watchdog (`spin_limit`) bounds every poll instead;
//! an expired spin surfaces as `Err` and the group runner turns it into an
//! abort of the launch.

use crate::descriptor::TransferSpec;
use crate::exchange::{spin_until, SlotPair, SpinExpired, EMPTY_SLOT, TRANSFER_DONE};
use std::sync::atomic::Ordering;

/// Receive-side publication (Phase A, designated lane).
///
/// Resets the completion flag for the upcoming round, waits for the
/// previous round's published address to be consumed, then publishes this
/// round's destination address into the pointer cell, obfuscated against
/// the cell's own address.
pub(crate) fn publish_recv_buffer(
    recv: &TransferSpec,
    spin_limit: Option<u64>,
) -> Result<(), SpinExpired> {
    let pair = unsafe { SlotPair::from_addr(recv.exchange) };
    pair.done_cell().store(0, Ordering::Release);

    spin_until(spin_limit, || {
        (pair.pointer_cell().load(Ordering::Acquire) == EMPTY_SLOT).then_some(EMPTY_SLOT)
    })?;
    pair.pointer_cell()
        .store(pair.encode_ptr(recv.data), Ordering::Release);
    tracing::trace!(peer = recv.peer, addr = recv.data, "published receive buffer");
    Ok(())
}

/// Send-side discovery (Phase A, designated lane).
///
/// Spins on the pointer cell reserved for this device inside the *peer's*
/// exchange array until an address appears, decodes it, and resets the cell
/// to empty to signal consumption.
pub(crate) fn resolve_target_buffer(
    send: &TransferSpec,
    spin_limit: Option<u64>,
) -> Result<u64, SpinExpired> {
    let pair = unsafe { SlotPair::from_addr(send.exchange) };
    let raw = spin_until(spin_limit, || {
        let v = pair.pointer_cell().load(Ordering::Acquire);
        (v != EMPTY_SLOT).then_some(v)
    })?;
    let target = pair.decode_ptr(raw);
    pair.pointer_cell().store(EMPTY_SLOT, Ordering::Release);
    tracing::trace!(peer = send.peer, target, "resolved send target");
    Ok(target)
}

/// Completion signal and acknowledgement (Phase C, designated lane).
///
/// Raises the send-side flag in the peer's array ("your inbound data has
/// arrived"), then waits for the symmetric signal in the local array before
/// letting the group terminate. Both ends therefore know the payload landed
/// by the time the launch drains from the stream.
pub(crate) fn signal_and_await_completion(
    recv: &TransferSpec,
    send: &TransferSpec,
    spin_limit: Option<u64>,
) -> Result<(), SpinExpired> {
    let send_pair = unsafe { SlotPair::from_addr(send.exchange) };
    let recv_pair = unsafe { SlotPair::from_addr(recv.exchange) };

    send_pair.done_cell().store(TRANSFER_DONE, Ordering::Release);

    spin_until(spin_limit, || {
        (recv_pair.done_cell().load(Ordering::Acquire) == TRANSFER_DONE).then_some(TRANSFER_DONE)
    })?;
    tracing::trace!(peer = recv.peer, "transfer round complete");
    Ok(())
}
