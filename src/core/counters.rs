//! Pixel pipeline statistics counters (spec.md §6 register table:
//! `fbiPixelsIn`, `fbiChromaFail`, `fbiZFuncFail`, `fbiAFuncFail`,
//! `fbiPixelsOut`; §7 "counters are advisory, never gate correctness").
//!
//! Each render worker increments these independently; they are read back
//! through the register window, so they live behind `AtomicU32` rather
//! than being accumulated locally and merged, matching the always-visible
//! semantics a register read needs.

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Default)]
pub struct PixelCounters {
    pub pixels_in: AtomicU32,
    pub chroma_fail: AtomicU32,
    pub zfunc_fail: AtomicU32,
    pub afunc_fail: AtomicU32,
    pub pixels_out: AtomicU32,
}

impl PixelCounters {
    #[inline]
    pub fn count_in(&self) {
        self.pixels_in.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn count_chroma_fail(&self) {
        self.chroma_fail.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn count_zfunc_fail(&self) {
        self.zfunc_fail.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn count_afunc_fail(&self) {
        self.afunc_fail.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn count_out(&self) {
        self.pixels_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> [u32; 5] {
        [
            self.pixels_in.load(Ordering::Relaxed),
            self.chroma_fail.load(Ordering::Relaxed),
            self.zfunc_fail.load(Ordering::Relaxed),
            self.afunc_fail.load(Ordering::Relaxed),
            self.pixels_out.load(Ordering::Relaxed),
        ]
    }

    pub fn reset(&self) {
        self.pixels_in.store(0, Ordering::Relaxed);
        self.chroma_fail.store(0, Ordering::Relaxed);
        self.zfunc_fail.store(0, Ordering::Relaxed);
        self.afunc_fail.store(0, Ordering::Relaxed);
        self.pixels_out.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let c = PixelCounters::default();
        c.count_in();
        c.count_in();
        c.count_out();
        assert_eq!(c.snapshot(), [2, 0, 0, 0, 1]);
    }

    #[test]
    fn reset_clears_all_counters() {
        let c = PixelCounters::default();
        c.count_in();
        c.count_chroma_fail();
        c.reset();
        assert_eq!(c.snapshot(), [0, 0, 0, 0, 0]);
    }
}
