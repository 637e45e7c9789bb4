//! The parameter ring (spec.md §3 "ParameterRing", §4.5): a bounded ring
//! of `TriangleParams` snapshots the dispatcher publishes and every
//! render worker independently drains at its own pace, filtering to the
//! scanlines its parity owns.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::params::TriangleParams;

struct Slot {
    params: UnsafeCell<Option<TriangleParams>>,
}

/// Single producer (dispatcher), multiple consumers (render workers).
/// Each worker tracks its own `read_idx`; the ring is not reclaimable
/// until every worker has passed a slot, so `min_read_idx` (spec.md §4.8
/// render barrier) determines true emptiness.
pub struct ParameterRing {
    capacity: usize,
    mask: usize,
    slots: Box<[Slot]>,
    write_idx: AtomicU64,
    worker_read_idx: Box<[AtomicU64]>,
}

impl ParameterRing {
    pub fn new(capacity: usize, worker_count: usize) -> Self {
        assert!(capacity.is_power_of_two(), "parameter ring capacity must be a power of two");
        let slots = (0..capacity).map(|_| Slot { params: UnsafeCell::new(None) }).collect::<Vec<_>>().into_boxed_slice();
        let worker_read_idx = (0..worker_count).map(|_| AtomicU64::new(0)).collect::<Vec<_>>().into_boxed_slice();
        Self { capacity, mask: capacity - 1, slots, write_idx: AtomicU64::new(0), worker_read_idx }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lowest `read_idx` across all workers: the slot before this one is
    /// safe to overwrite (spec.md §4.8).
    fn min_read_idx(&self) -> u64 {
        self.worker_read_idx.iter().map(|idx| idx.load(Ordering::Acquire)).min().unwrap_or(0)
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        let w = self.write_idx.load(Ordering::Relaxed);
        (w - self.min_read_idx()) as usize == self.capacity
    }

    /// Publish a new triangle snapshot. Caller must have checked
    /// `is_full` first (spec.md §7: the dispatcher stalls rather than
    /// overwriting an in-flight triangle).
    pub fn push(&self, params: TriangleParams) {
        let w = self.write_idx.load(Ordering::Relaxed);
        assert!((w - self.min_read_idx()) < self.capacity as u64, "parameter ring push while full");
        let idx = (w as usize) & self.mask;
        // SAFETY: single-producer invariant, and this slot has already
        // been drained by every worker (checked above), so no worker
        // holds a reference into it.
        unsafe {
            *self.slots[idx].params.get() = Some(params);
        }
        self.write_idx.store(w + 1, Ordering::Release);
    }

    /// Pop the next snapshot for worker `worker_index`. Each worker has
    /// its own monotonic cursor, so the same published triangle is
    /// visible to every worker independently (spec.md §4.6).
    pub fn pop(&self, worker_index: usize) -> Option<TriangleParams> {
        let read_idx = &self.worker_read_idx[worker_index];
        let r = read_idx.load(Ordering::Relaxed);
        let w = self.write_idx.load(Ordering::Acquire);
        if r == w {
            return None;
        }
        let idx = (r as usize) & self.mask;
        // SAFETY: the acquire load above synchronised with the
        // producer's release store publishing this slot; only this
        // worker advances its own `worker_read_idx`, so no other reader
        // races this clone.
        let params = unsafe { (*self.slots[idx].params.get()).clone() };
        read_idx.store(r + 1, Ordering::Release);
        params
    }

    pub fn write_idx(&self) -> u64 {
        self.write_idx.load(Ordering::Acquire)
    }

    pub fn worker_read_idx(&self, worker_index: usize) -> u64 {
        self.worker_read_idx[worker_index].load(Ordering::Acquire)
    }

    /// True once every worker has drained up to the current write index
    /// (spec.md §4.8 render barrier wait condition).
    pub fn drained(&self) -> bool {
        self.min_read_idx() == self.write_idx.load(Ordering::Acquire)
    }
}

unsafe impl Sync for ParameterRing {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::{AlphaMode, ClipRect, FbzColorPath, FbzMode, FogMode, LfbMode, LodLevel, TextureMode, LOD_MAX};

    fn dummy_params() -> TriangleParams {
        TriangleParams {
            vertex_ax: 0,
            vertex_ay: 0,
            vertex_bx: 0,
            vertex_by: 0,
            vertex_cx: 0,
            vertex_cy: 0,
            sign: false,
            start_r: 0,
            start_g: 0,
            start_b: 0,
            start_a: 0,
            start_z: 0,
            d_rd_x: 0,
            d_gd_x: 0,
            d_bd_x: 0,
            d_ad_x: 0,
            d_zd_x: 0,
            d_rd_y: 0,
            d_gd_y: 0,
            d_bd_y: 0,
            d_ad_y: 0,
            d_zd_y: 0,
            start_w: 0,
            d_wd_x: 0,
            d_wd_y: 0,
            start_s: 0,
            start_t: 0,
            start_tmu_w: 0,
            d_sd_x: 0,
            d_td_x: 0,
            d_wtd_x: 0,
            d_sd_y: 0,
            d_td_y: 0,
            d_wtd_y: 0,
            fbz_mode: FbzMode::default(),
            fbz_color_path: FbzColorPath::default(),
            alpha_mode: AlphaMode::default(),
            fog_mode: FogMode::default(),
            texture_mode: TextureMode::default(),
            t_lod: 0,
            lfb_mode: LfbMode::default(),
            chroma_key_rgb: (0, 0, 0),
            color0: 0,
            color1: 0,
            fog_color: (0, 0, 0),
            za_color: 0,
            fog_table: [(0, 0); 64],
            clip: ClipRect::default(),
            lod: [LodLevel::default(); LOD_MAX + 1],
            lod_min: 0,
            lod_max: 0,
            lod_bias: 0,
            palette: None,
            draw_buffer_offset: 0,
            aux_buffer_offset: 0,
        }
    }

    #[test]
    fn every_worker_sees_every_triangle() {
        let ring = ParameterRing::new(4, 2);
        ring.push(dummy_params());
        assert!(ring.pop(0).is_some());
        assert!(ring.pop(1).is_some());
        assert!(ring.pop(0).is_none());
    }

    #[test]
    fn drained_true_only_after_slowest_worker_catches_up() {
        let ring = ParameterRing::new(4, 2);
        ring.push(dummy_params());
        assert!(!ring.drained());
        ring.pop(0);
        assert!(!ring.drained());
        ring.pop(1);
        assert!(ring.drained());
    }

    #[test]
    #[should_panic(expected = "push while full")]
    fn push_while_full_panics() {
        let ring = ParameterRing::new(1, 1);
        ring.push(dummy_params());
        ring.push(dummy_params());
    }
}
