//! Display scan-out (spec.md §4.9): a scanline-paced timer that advances
//! the current line, commits gated buffer swaps at vertical retrace, and
//! copies dirty front-buffer lines through the CLUT and an optional
//! screen filter into an output scan-out buffer.

use crate::core::memory::FramebufferMemory;
use crate::core::pixel::formats::{decode_16bit_direct, TexelFormat};
use crate::core::pixel::tables::ClutTable;
use crate::core::raster::DirtyLines;
use crate::core::swap::SwapController;

/// Geometry the display engine paces itself against (spec.md §3
/// "DisplayState"), derived from `videoDimensions`/`backPorch`/
/// `hSync`/`vSync` register writes.
#[derive(Debug, Clone, Copy)]
pub struct DisplayGeometry {
    pub width: u32,
    pub height: u32,
    pub total_lines: u32,
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        Self { width: 640, height: 480, total_lines: 525 }
    }
}

/// A "purple tint every odd line" 3x3 FIR-like filter (spec.md §4.9), a
/// per-scanline transform the display engine owns and applies before
/// hand-off to the windowing layer.
fn apply_screen_filter(line: &mut [[u8; 4]], y: u32) {
    if y % 2 == 0 {
        return;
    }
    for px in line.iter_mut() {
        px[0] = px[0].saturating_add((px[0] / 8).max(4));
        px[2] = px[2].saturating_add((px[2] / 8).max(4));
    }
}

pub struct DisplayEngine {
    geometry: DisplayGeometry,
    line: u32,
    /// One RGBA8 scanline per display line, the host-visible scan-out
    /// surface (spec.md §4.9 "output scanline buffer").
    output: Vec<[u8; 4]>,
    pub screen_filter_enabled: bool,
}

impl DisplayEngine {
    pub fn new(geometry: DisplayGeometry) -> Self {
        let output = vec![[0u8; 4]; (geometry.width as usize) * (geometry.height as usize)];
        Self { geometry, line: 0, output, screen_filter_enabled: false }
    }

    pub fn geometry(&self) -> DisplayGeometry {
        self.geometry
    }

    pub fn current_line(&self) -> u32 {
        self.line
    }

    pub fn in_vblank(&self) -> bool {
        self.line >= self.geometry.height
    }

    pub fn output_frame(&self) -> &[[u8; 4]] {
        &self.output
    }

    /// One HSYNC tick (spec.md §4.9). `fb_width` is the draw-buffer's
    /// pixel stride in the framebuffer, which may differ from the
    /// display's own `width` (e.g. a 320-wide draw buffer scanned out at
    /// 640 would need upscaling; this core does not resample and simply
    /// clamps to the narrower of the two).
    pub fn tick(&mut self, fb: &FramebufferMemory, dirty: &DirtyLines, clut: &ClutTable, swap: &SwapController, fb_width: usize) {
        if self.line < self.geometry.height {
            self.refresh_line_if_dirty(fb, dirty, clut, fb_width, self.line);
        }

        if self.line == self.geometry.height {
            swap.on_retrace(fb, dirty);
        }

        self.line += 1;
        if self.line >= self.geometry.total_lines {
            self.line = 0;
        }
    }

    fn refresh_line_if_dirty(&mut self, fb: &FramebufferMemory, dirty: &DirtyLines, clut: &ClutTable, fb_width: usize, y: u32) {
        if !dirty.take_one(y as usize) {
            return;
        }
        let front_offset = fb.current_front_offset();
        let width = self.geometry.width as usize;
        let row_width = fb_width.min(width);
        let row_start = front_offset + (y as usize) * fb_width * 2;

        let out_row_start = (y as usize) * width;
        let gamma = clut.rgba_table();
        let mut row = vec![[0u8; 4]; width];
        for x in 0..row_width {
            let raw = fb.mem.read_u16(row_start + x * 2);
            let rgba = decode_16bit_direct(TexelFormat::R5g6b5, raw);
            row[x] = [
                gamma[rgba[0] as usize][0],
                gamma[rgba[1] as usize][1],
                gamma[rgba[2] as usize][2],
                rgba[3],
            ];
        }
        if self.screen_filter_enabled {
            apply_screen_filter(&mut row, y);
        }
        self.output[out_row_start..out_row_start + width].copy_from_slice(&row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::param_ring::ParameterRing;
    use crate::core::barrier::RenderBarrier;

    #[test]
    fn tick_advances_and_wraps_line_counter() {
        let fb = FramebufferMemory::new(3 * 64 * 1024);
        let dirty = DirtyLines::new(4);
        let clut = ClutTable::default();
        let swap = SwapController::new();
        let mut engine = DisplayEngine::new(DisplayGeometry { width: 4, height: 2, total_lines: 3 });
        engine.tick(&fb, &dirty, &clut, &swap, 4);
        engine.tick(&fb, &dirty, &clut, &swap, 4);
        engine.tick(&fb, &dirty, &clut, &swap, 4);
        assert_eq!(engine.current_line(), 0);
    }

    #[test]
    fn vblank_retrace_commits_a_deferred_swap() {
        let fb = FramebufferMemory::new(3 * 64 * 1024);
        let dirty = DirtyLines::new(4);
        let clut = ClutTable::default();
        let swap = SwapController::new();
        let barrier = RenderBarrier::new();
        let ring = ParameterRing::new(4, 1);
        swap.request(0, &fb, &barrier, &ring, &dirty);
        let before = fb.current_front_offset();
        swap.request(1, &fb, &barrier, &ring, &dirty);

        let mut engine = DisplayEngine::new(DisplayGeometry { width: 4, height: 2, total_lines: 4 });
        engine.tick(&fb, &dirty, &clut, &swap, 4); // line 0
        engine.tick(&fb, &dirty, &clut, &swap, 4); // line 1 == height -> retrace 1
        assert_eq!(fb.current_front_offset(), before);
        engine.tick(&fb, &dirty, &clut, &swap, 4); // line 2
        engine.tick(&fb, &dirty, &clut, &swap, 4); // line 3
        // line wraps to 0 then back to height on the following lap
        engine.tick(&fb, &dirty, &clut, &swap, 4);
        engine.tick(&fb, &dirty, &clut, &swap, 4); // second retrace -> commits
        assert_ne!(fb.current_front_offset(), before);
    }
}
