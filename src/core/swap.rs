//! Buffer-swap gating (spec.md §4.9, §6 `swapbufferCMD`).
//!
//! `swapbufferCMD`'s bits 1..8 carry a vsync interval. `interval == 0`
//! takes immediate effect (a "sync swap", committed by whichever thread
//! processes the command); any other interval latches a pending swap
//! that the display engine commits once it has seen that many vertical
//! retraces (spec.md §4.9).

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Mutex;

use crate::core::barrier::RenderBarrier;
use crate::core::memory::FramebufferMemory;
use crate::core::param_ring::ParameterRing;
use crate::core::raster::DirtyLines;

struct PendingSwap {
    interval: u32,
}

/// Shared between the dispatcher (producer of swap requests) and the
/// display engine (committer of non-immediate ones). `swap_count` backs
/// the `status` register's swap-count field (spec.md §6).
pub struct SwapController {
    pending: Mutex<Option<PendingSwap>>,
    swap_count: AtomicU32,
    /// Retrace counter, reset to 0 each time a swap is committed; `-1`
    /// means "no swap pending, do not advance".
    retrace_counter: AtomicI32,
}

impl Default for SwapController {
    fn default() -> Self {
        Self { pending: Mutex::new(None), swap_count: AtomicU32::new(0), retrace_counter: AtomicI32::new(-1) }
    }
}

impl SwapController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn swap_count(&self) -> u32 {
        self.swap_count.load(Ordering::Acquire)
    }

    /// Called by the dispatcher when it decodes a `swapbufferCMD`. Drains
    /// the render barrier first, since any in-flight triangle must finish
    /// drawing into the buffer that is about to become the new back
    /// buffer before it is handed to a future triangle (spec.md §4.8).
    pub fn request(&self, interval: u32, fb: &FramebufferMemory, barrier: &RenderBarrier, ring: &ParameterRing, dirty: &DirtyLines) {
        self.swap_count.fetch_add(1, Ordering::AcqRel);
        barrier.wait_until_drained(ring);
        if interval == 0 {
            fb.commit_swap();
            dirty.mark_all();
            self.swap_count.fetch_sub(1, Ordering::AcqRel);
        } else {
            *self.pending.lock().unwrap() = Some(PendingSwap { interval });
            self.retrace_counter.store(0, Ordering::Release);
        }
    }

    /// Called by the display engine once per vertical retrace (spec.md
    /// §4.9 "If the line equals the display height, increment the
    /// retrace counter..."). Returns true if a swap was committed.
    pub fn on_retrace(&self, fb: &FramebufferMemory, dirty: &DirtyLines) -> bool {
        let mut guard = self.pending.lock().unwrap();
        let Some(pending) = guard.as_ref() else { return false };
        let count = self.retrace_counter.fetch_add(1, Ordering::AcqRel) + 1;
        if count as u32 > pending.interval {
            fb.commit_swap();
            dirty.mark_all();
            self.swap_count.fetch_sub(1, Ordering::AcqRel);
            *guard = None;
            self.retrace_counter.store(-1, Ordering::Release);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_swap_commits_without_waiting_for_retrace() {
        let fb = FramebufferMemory::new(3 * 64 * 1024);
        let barrier = RenderBarrier::new();
        let ring = ParameterRing::new(4, 1);
        let dirty = DirtyLines::new(8);
        let swap = SwapController::new();
        let before = fb.current_front_offset();
        swap.request(0, &fb, &barrier, &ring, &dirty);
        assert_ne!(fb.current_front_offset(), before);
        assert_eq!(swap.swap_count(), 0);
    }

    #[test]
    fn deferred_swap_waits_for_enough_retraces() {
        let fb = FramebufferMemory::new(3 * 64 * 1024);
        let barrier = RenderBarrier::new();
        let ring = ParameterRing::new(4, 1);
        let dirty = DirtyLines::new(8);
        let swap = SwapController::new();
        let before = fb.current_front_offset();
        swap.request(2, &fb, &barrier, &ring, &dirty);

        assert!(!swap.on_retrace(&fb, &dirty));
        assert!(!swap.on_retrace(&fb, &dirty));
        assert!(swap.on_retrace(&fb, &dirty));
        assert_ne!(fb.current_front_offset(), before);
    }
}
