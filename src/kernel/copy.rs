//! Bulk copy loops for Phase B.
//!
//! The main pass moves 64-bit words in a register block per lane, lanes
//! interleaved pairwise across the group. Loads go through the cache;
//! stores use a streaming (non-temporal) hint where the target supports
//! one, since the written data belongs to the peer and will not be re-read
//! locally. A bounds-checked 32-bit pass picks up the remainder below one
//! full wide iteration, and a single lane finishes any sub-word tail.

use crate::config::MAX_BLOCK_WORDS;
use std::sync::atomic::{fence, Ordering};

/// Local register block capacity: the narrow pass doubles the block count.
const REG_CAPACITY: usize = MAX_BLOCK_WORDS * 2;

pub(crate) trait CopyWord: Copy {
    const ZERO: Self;
    unsafe fn load(src: *const Self) -> Self;
    unsafe fn store_streaming(dst: *mut Self, v: Self);
}

impl CopyWord for u64 {
    const ZERO: Self = 0;

    #[inline(always)]
    unsafe fn load(src: *const Self) -> Self {
        unsafe { src.read() }
    }

    #[inline(always)]
    unsafe fn store_streaming(dst: *mut Self, v: Self) {
        #[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
        unsafe {
            core::arch::x86_64::_mm_stream_si64(dst as *mut i64, v as i64)
        };
        #[cfg(not(all(target_arch = "x86_64", target_feature = "sse2")))]
        unsafe {
            dst.write_volatile(v)
        };
    }
}

impl CopyWord for u32 {
    const ZERO: Self = 0;

    #[inline(always)]
    unsafe fn load(src: *const Self) -> Self {
        unsafe { src.read() }
    }

    #[inline(always)]
    unsafe fn store_streaming(dst: *mut Self, v: Self) {
        #[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
        unsafe {
            core::arch::x86_64::_mm_stream_si32(dst as *mut i32, v as i32)
        };
        #[cfg(not(all(target_arch = "x86_64", target_feature = "sse2")))]
        unsafe {
            dst.write_volatile(v)
        };
    }
}

/// Register-blocked strided copy for one lane.
///
/// Element offsets start at `base + lane * 2` and advance by `width * 2`
/// per register pair, so the lanes of a group cover disjoint interleaved
/// slices. With `bound` set, every element access is checked against it
/// (the remainder pass); unchecked otherwise.
///
/// # Safety
/// `src` and `dst` must be valid for all in-bounds element offsets reached
/// by this lane, and properly aligned for `W`.
pub(crate) unsafe fn copy_blocked<W: CopyWord>(
    src: *const W,
    dst: *mut W,
    lane: usize,
    width: usize,
    block: usize,
    base: usize,
    iters: usize,
    bound: Option<usize>,
) {
    debug_assert!(block % 2 == 0 && block <= REG_CAPACITY);
    let within = |i: usize| bound.map_or(true, |n| i < n);

    let mut regs = [W::ZERO; REG_CAPACITY];
    let mut ofs = base + lane * 2;
    for _ in 0..iters {
        let mut src_ofs = ofs;
        for i in 0..block / 2 {
            if within(src_ofs) {
                regs[2 * i] = unsafe { W::load(src.add(src_ofs)) };
            }
            if within(src_ofs + 1) {
                regs[2 * i + 1] = unsafe { W::load(src.add(src_ofs + 1)) };
            }
            src_ofs += width * 2;
        }
        for i in 0..block / 2 {
            if within(ofs) {
                unsafe { W::store_streaming(dst.add(ofs), regs[2 * i]) };
            }
            if within(ofs + 1) {
                unsafe { W::store_streaming(dst.add(ofs + 1), regs[2 * i + 1]) };
            }
            ofs += width * 2;
        }
    }
}

/// Copy `bytes` from `src` to `dst` as lane `lane` of a `width`-lane group.
///
/// Wide unchecked pass over whole group iterations, 32-bit bounds-checked
/// pass for the remainder, byte tail below 4-byte granularity on lane 0.
///
/// # Safety
/// `src` and `dst` must be valid for `bytes` bytes and 8-byte aligned.
pub(crate) unsafe fn copy_payload(
    src: u64,
    dst: u64,
    bytes: usize,
    lane: usize,
    width: usize,
    block_words: usize,
) {
    let words = bytes / 8;
    let per_iter = width * block_words;
    let iters = words / per_iter;
    unsafe {
        copy_blocked::<u64>(
            src as *const u64,
            dst as *mut u64,
            lane,
            width,
            block_words,
            0,
            iters,
            None,
        );
    }

    let nwords32 = bytes / 4;
    let done32 = iters * per_iter * 2;
    if done32 < nwords32 {
        // at most one wide iteration's worth left: a single doubled-block
        // checked iteration always covers it
        unsafe {
            copy_blocked::<u32>(
                src as *const u32,
                dst as *mut u32,
                lane,
                width,
                block_words * 2,
                done32,
                1,
                Some(nwords32),
            );
        }
    }

    let tail = bytes % 4;
    if tail != 0 && lane == 0 {
        for b in (bytes - tail)..bytes {
            unsafe { (dst as *mut u8).add(b).write((src as *const u8).add(b).read()) };
        }
    }
}

/// Make this lane's remote writes visible system-wide before any completion
/// flag is raised. Streaming stores bypass normal store ordering, so drain
/// the write-combining buffers first, then fence the surrounding atomics.
pub(crate) fn system_fence() {
    #[cfg(all(target_arch = "x86_64", target_feature = "sse"))]
    unsafe {
        core::arch::x86_64::_mm_sfence()
    };
    fence(Ordering::SeqCst);
}
