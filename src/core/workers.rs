//! Render workers (spec.md §4.6): one or two long-lived threads, each
//! draining the parameter ring at its own pace and rasterizing triangles
//! into framebuffer RAM, splitting each triangle's scanlines by parity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::dispatcher::DeviceShared;
use crate::core::raster;

/// One render worker's view of the shared device state plus its own
/// identity within the parity split.
pub struct RenderWorker {
    shared: Arc<DeviceShared>,
    index: u32,
}

impl RenderWorker {
    pub fn new(shared: Arc<DeviceShared>, index: u32) -> Self {
        Self { shared, index }
    }

    /// Drain everything currently on the ring for this worker's parity,
    /// returning the number of triangles processed. Used both by the
    /// spawned thread's loop body and directly by tests / a
    /// single-threaded harness.
    pub fn drain_once(&self) -> usize {
        let mut processed = 0;
        while let Some(params) = self.shared.ring.pop(self.index as usize) {
            self.shared.barrier.enter();
            raster::rasterize_triangle(
                &params,
                &self.shared.fb,
                &self.shared.tex,
                &self.shared.tables,
                &self.shared.counters,
                self.index,
                self.shared.worker_count,
                self.shared.fb_width,
                &self.shared.dirty,
            );
            self.shared.barrier.leave();
            processed += 1;
        }
        processed
    }

    /// Run forever until `stop` is set, parking briefly between empty
    /// polls rather than busy-spinning: a short sleep stands in for the
    /// wake event described in spec.md §4.5/§4.6, since the ring is
    /// polled rather than interrupt-driven here.
    pub fn run(&self, stop: &AtomicBool) {
        loop {
            if stop.load(Ordering::Acquire) {
                return;
            }
            if self.drain_once() == 0 {
                std::thread::sleep(std::time::Duration::from_micros(200));
            }
        }
    }
}

/// Spawn `worker_count` render-worker threads sharing `shared`, returning
/// their join handles and a stop flag the caller can set to shut them
/// down cleanly (spec.md §5 "Close-time shutdown must kill the
/// dispatcher and workers cleanly").
pub fn spawn_workers(shared: Arc<DeviceShared>) -> (Vec<std::thread::JoinHandle<()>>, Arc<AtomicBool>) {
    let stop = Arc::new(AtomicBool::new(false));
    let worker_count = shared.worker_count;
    let handles = (0..worker_count)
        .map(|index| {
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name(format!("render-worker-{index}"))
                .spawn(move || {
                    tracing::info!(index, "render worker started");
                    RenderWorker::new(shared, index).run(&stop);
                    tracing::info!(index, "render worker stopped");
                })
                .expect("failed to spawn render worker thread")
        })
        .collect();
    (handles, stop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::barrier::RenderBarrier;
    use crate::core::counters::PixelCounters;
    use crate::core::fifo::CommandFifo;
    use crate::core::memory::{FramebufferMemory, TextureMemory};
    use crate::core::param_ring::ParameterRing;
    use crate::core::params::{AlphaMode, ClipRect, FbzColorPath, FbzMode, FogMode, LfbMode, LodLevel, TextureMode, TriangleParams, LOD_MAX};
    use crate::core::pixel::tables::Tables;
    use crate::core::raster::DirtyLines;

    fn flat_red_triangle() -> TriangleParams {
        TriangleParams {
            vertex_ax: 0 << 4,
            vertex_ay: 0 << 4,
            vertex_bx: 8 << 4,
            vertex_by: 0 << 4,
            vertex_cx: 0 << 4,
            vertex_cy: 8 << 4,
            sign: false,
            start_r: 0xff << 12,
            start_g: 0,
            start_b: 0,
            start_a: 0xff << 12,
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
            fbz_mode: FbzMode { raw: FbzMode::RGB_WRITE_MASK },
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
            clip: ClipRect { left: 0, right: 64, low_y: 0, high_y: 64 },
            lod: [LodLevel::default(); LOD_MAX + 1],
            lod_min: 0,
            lod_max: 0,
            lod_bias: 0,
            palette: None,
            draw_buffer_offset: 0,
            aux_buffer_offset: 64 * 1024,
        }
    }

    fn test_shared(worker_count: u32) -> Arc<DeviceShared> {
        Arc::new(DeviceShared {
            fifo: CommandFifo::new(16),
            ring: ParameterRing::new(8, worker_count as usize),
            barrier: RenderBarrier::new(),
            fb: FramebufferMemory::new(3 * 64 * 1024),
            tex: TextureMemory::new(1 << 16),
            tables: Tables::build(),
            counters: PixelCounters::default(),
            dirty: DirtyLines::new(64),
            swap: crate::core::swap::SwapController::new(),
            clut: std::sync::Mutex::new(crate::core::pixel::tables::ClutTable::default()),
            fb_width: 64,
            fb_height: 64,
            worker_count,
        })
    }

    #[test]
    fn single_worker_drains_and_rasterizes() {
        let shared = test_shared(1);
        shared.ring.push(flat_red_triangle());
        let worker = RenderWorker::new(Arc::clone(&shared), 0);
        assert_eq!(worker.drain_once(), 1);
        assert!(shared.counters.snapshot()[4] > 0);
    }

    #[test]
    fn two_workers_each_see_the_same_triangle() {
        let shared = test_shared(2);
        shared.ring.push(flat_red_triangle());
        let w0 = RenderWorker::new(Arc::clone(&shared), 0);
        let w1 = RenderWorker::new(Arc::clone(&shared), 1);
        assert_eq!(w0.drain_once(), 1);
        assert_eq!(w1.drain_once(), 1);
        assert!(shared.ring.drained());
    }
}
