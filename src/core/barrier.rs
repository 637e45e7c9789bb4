//! The render barrier (spec.md §4.8): blocks the dispatcher thread until
//! every render worker has drained the parameter ring and gone idle, so
//! that LFB writes, texture uploads and register reads that must observe
//! a fully-settled framebuffer can proceed safely.

use std::sync::{Condvar, Mutex};

use crate::core::param_ring::ParameterRing;

/// Tracks how many workers are currently inside a triangle (as opposed
/// to blocked waiting on the ring), so the barrier can distinguish "ring
/// empty" from "ring empty and nobody is mid-triangle".
#[derive(Default)]
struct BarrierState {
    workers_busy: usize,
}

pub struct RenderBarrier {
    state: Mutex<BarrierState>,
    idle: Condvar,
}

impl Default for RenderBarrier {
    fn default() -> Self {
        Self { state: Mutex::new(BarrierState::default()), idle: Condvar::new() }
    }
}

impl RenderBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by a render worker immediately before it starts
    /// rasterizing a triangle it popped off the ring.
    pub fn enter(&self) {
        let mut state = self.state.lock().unwrap();
        state.workers_busy += 1;
    }

    /// Called by a render worker right after it finishes rasterizing,
    /// before it goes back to polling the ring.
    pub fn leave(&self) {
        let mut state = self.state.lock().unwrap();
        state.workers_busy -= 1;
        if state.workers_busy == 0 {
            self.idle.notify_all();
        }
    }

    /// Block the calling (dispatcher) thread until the parameter ring is
    /// drained by every worker *and* no worker is still mid-triangle
    /// (spec.md §4.8 "wait until both workers' read index equals the
    /// write index and neither worker is executing").
    pub fn wait_until_drained(&self, ring: &ParameterRing) {
        loop {
            let guard = self.state.lock().unwrap();
            if guard.workers_busy == 0 && ring.drained() {
                return;
            }
            // Re-check on a short period rather than only on notify,
            // since `ring.drained()` can flip true without a matching
            // `leave()` call (a worker finds the ring empty and parks).
            let _ = self.idle.wait_timeout(guard, std::time::Duration::from_micros(50)).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::{AlphaMode, ClipRect, FbzColorPath, FbzMode, FogMode, LfbMode, LodLevel, TextureMode, TriangleParams, LOD_MAX};

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
    fn drains_immediately_when_ring_is_empty_and_idle() {
        let ring = crate::core::param_ring::ParameterRing::new(4, 1);
        let barrier = RenderBarrier::new();
        barrier.wait_until_drained(&ring);
    }

    #[test]
    fn waits_while_a_worker_is_marked_busy() {
        let ring = crate::core::param_ring::ParameterRing::new(4, 1);
        ring.push(dummy_params());
        let barrier = RenderBarrier::new();
        barrier.enter();
        ring.pop(0);
        barrier.leave();
        barrier.wait_until_drained(&ring);
    }
}
