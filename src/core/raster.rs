//! The triangle rasterizer (spec.md §4.4): edge-slope setup, half-pixel
//! vertex snapping, per-scanline interpolator stepping with worker-parity
//! scanline skipping, scissor clipping, and the `fastfillCMD` rectangle
//! fill.

use crate::core::counters::PixelCounters;
use crate::core::memory::{FramebufferMemory, TextureMemory};
use crate::core::params::{LOD_MAX, TriangleParams};
use crate::core::pixel::pipeline::{self, FragmentIterators};
use crate::core::pixel::tables::Tables;
use crate::core::pixel::texmap::{self, TexCoord};

/// Per-line dirty bitmap the display engine consumes to know which scan
/// lines changed since the last swap (spec.md §4.9).
///
/// Backed by `AtomicBool` rather than a plain `Vec<bool>`: render workers
/// mark lines concurrently from their own threads (disjoint indices,
/// thanks to the scanline-parity split in §4.4/§4.6) while the display
/// engine drains the set from a third thread, so every access needs a
/// shared, not exclusive, reference.
pub struct DirtyLines {
    flags: Vec<std::sync::atomic::AtomicBool>,
}

impl DirtyLines {
    pub fn new(height: usize) -> Self {
        Self { flags: (0..height).map(|_| std::sync::atomic::AtomicBool::new(false)).collect() }
    }

    #[inline]
    pub fn mark(&self, y: usize) {
        if let Some(slot) = self.flags.get(y) {
            slot.store(true, std::sync::atomic::Ordering::Release);
        }
    }

    pub fn mark_all(&self) {
        self.flags.iter().for_each(|f| f.store(true, std::sync::atomic::Ordering::Release));
    }

    /// Test-and-clear a single line, for callers (the display engine)
    /// that want to poll one line at a time rather than draining the
    /// whole set.
    #[inline]
    pub fn take_one(&self, y: usize) -> bool {
        self.flags.get(y).is_some_and(|f| f.swap(false, std::sync::atomic::Ordering::AcqRel))
    }

    /// Drain every currently-set flag, clearing each as it is read. Not
    /// atomic as a whole (a `mark` racing a `take_dirty` may be missed
    /// until the next tick), which is fine: a missed-this-tick dirty line
    /// is caught on the following scan-out tick instead.
    pub fn take_dirty(&self) -> Vec<usize> {
        self.flags
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.swap(false, std::sync::atomic::Ordering::AcqRel).then_some(i))
            .collect()
    }
}

/// 16.16 fixed-point edge slope, `dx` per unit `dy`, matching the
/// original's `(delta << 4) / dy` convention adapted to our 28.4 vertex
/// representation.
fn edge_slope(x0: i32, y0: i32, x1: i32, y1: i32) -> i64 {
    let dy = (y1 - y0) as i64;
    if dy == 0 {
        0
    } else {
        (((x1 - x0) as i64) << 16) / dy
    }
}

struct ScanlineBounds {
    y: i32,
    x_left: i32,
    x_right: i32,
}

/// Walk the triangle's three edges and yield, for each scanline in
/// `[y_top, y_bottom)`, the covered `[x_left, x_right)` span in pixel
/// coordinates (spec.md §4.4 "edge walking").
fn scanlines(params: &TriangleParams) -> Vec<ScanlineBounds> {
    let (ax, ay) = (params.vertex_ax, params.vertex_ay);
    let (bx, by) = (params.vertex_bx, params.vertex_by);
    let (cx, cy) = (params.vertex_cx, params.vertex_cy);

    let dx_ac = edge_slope(ax, ay, cx, cy);
    let dx_ab = edge_slope(ax, ay, bx, by);
    let dx_bc = edge_slope(bx, by, cx, cy);

    let y_top = crate::core::fixed::screen_fixed_to_pixel(ay + 8);
    let y_mid = crate::core::fixed::screen_fixed_to_pixel(by + 8);
    let y_bottom = crate::core::fixed::screen_fixed_to_pixel(cy + 8);

    let mut out = Vec::with_capacity((y_bottom - y_top).max(0) as usize);
    for y in y_top..y_bottom {
        let real_y_fixed = (y << 4) + 8;
        let x_ac = ax + (((dx_ac * (real_y_fixed - ay) as i64) >> 4) as i32);
        let x_ab_bc = if y < y_mid {
            ax + (((dx_ab * (real_y_fixed - ay) as i64) >> 4) as i32)
        } else {
            bx + (((dx_bc * (real_y_fixed - by) as i64) >> 4) as i32)
        };

        let (left, right) = if params.sign { (x_ac, x_ab_bc) } else { (x_ab_bc, x_ac) };
        let x_left = crate::core::fixed::screen_fixed_to_pixel(left + 8);
        let x_right = crate::core::fixed::screen_fixed_to_pixel(right + 8);
        if x_right > x_left {
            out.push(ScanlineBounds { y, x_left, x_right });
        }
    }
    out
}

/// The screen coordinate of the first pixel the edge walk would cover,
/// i.e. `(x_left, y)` of the topmost non-empty scanline, before scissor
/// clipping. Used to re-base the starting parameters when
/// `FBZ_PARAM_ADJUST` is set.
pub(crate) fn first_covered_pixel(params: &TriangleParams) -> Option<(i32, i32)> {
    scanlines(params).into_iter().next().map(|s| (s.x_left, s.y))
}

/// Clip a scanline span against the scissor rectangle (spec.md §4.4
/// "Non-goals does not exclude clipping").
fn clip_span(params: &TriangleParams, span: &ScanlineBounds) -> Option<(i32, i32, i32)> {
    if params.fbz_mode.raw & crate::core::params::FbzMode::ENABLE_CLIPPING == 0 {
        return Some((span.y, span.x_left, span.x_right));
    }
    if span.y < params.clip.low_y || span.y >= params.clip.high_y {
        return None;
    }
    let left = span.x_left.max(params.clip.left);
    let right = span.x_right.min(params.clip.right);
    if right <= left {
        None
    } else {
        Some((span.y, left, right))
    }
}

/// Rasterize one triangle. `worker_index`/`worker_count` implement the
/// scanline-parity split across render workers (spec.md §4.6): worker
/// `k` of `n` only processes lines where `y % n == k`.
#[allow(clippy::too_many_arguments)]
pub fn rasterize_triangle(
    params: &TriangleParams,
    fb: &FramebufferMemory,
    tex: &TextureMemory,
    tables: &Tables,
    counters: &PixelCounters,
    worker_index: u32,
    worker_count: u32,
    fb_width: usize,
    dirty: &DirtyLines,
) {
    for span in scanlines(params) {
        if worker_count > 1 && (span.y as u32) % worker_count != worker_index {
            continue;
        }
        let Some((y, x_left, x_right)) = clip_span(params, &span) else { continue };
        if y < 0 || x_left < 0 {
            continue;
        }

        let dy = y - crate::core::fixed::screen_fixed_to_pixel(params.vertex_ay);
        let dx = x_left - crate::core::fixed::screen_fixed_to_pixel(params.vertex_ax);

        let mut r = params.start_r + dy * params.d_rd_y + dx * params.d_rd_x;
        let mut g = params.start_g + dy * params.d_gd_y + dx * params.d_gd_x;
        let mut b = params.start_b + dy * params.d_bd_y + dx * params.d_bd_x;
        let mut a = params.start_a + dy * params.d_ad_y + dx * params.d_ad_x;
        let mut z = params.start_z + dy * params.d_zd_y + dx * params.d_zd_x;
        let mut w = params.start_w + dy as i64 * params.d_wd_y + dx as i64 * params.d_wd_x;
        let mut s = params.start_s + dy as i64 * params.d_sd_y + dx as i64 * params.d_sd_x;
        let mut t = params.start_t + dy as i64 * params.d_td_y + dx as i64 * params.d_td_x;
        let mut tmu_w = params.start_tmu_w + dy as i64 * params.d_wtd_y + dx as i64 * params.d_wtd_x;

        let texture_enabled = params.fbz_color_path.texture_enabled();

        for x in x_left..x_right {
            let iter = FragmentIterators { r, g, b, a, z, w };

            let texel = if texture_enabled {
                let pos = texmap::resolve_sample_position(
                    TexCoord { s, t, w: tmu_w },
                    params.texture_mode,
                    params.lod_bias,
                    params.lod_min.min(LOD_MAX as i32),
                    params.lod_max.min(LOD_MAX as i32),
                    &tables.log2,
                );
                let taps = texmap::compute_bilinear_taps(params, &pos, params.texture_mode, params.texture_mode.format());
                let decoded: [[u8; 4]; 4] = std::array::from_fn(|i| {
                    decode_texel(params, tex, tables, taps.addrs[i], params.texture_mode.format())
                });
                Some(texmap::blend_bilinear(&decoded, &taps.weights))
            } else {
                None
            };

            let pixel_offset = (y as usize * fb_width + x as usize) * 2;
            // The draw/aux offsets are the ones snapshotted onto this
            // triangle at launch time (spec.md §4.5), not whatever the
            // framebuffer's live front/back assignment is now — a swap
            // committed by the display engine mid-render must not shift
            // where an in-flight triangle writes.
            let dest_addr = params.draw_buffer_offset + pixel_offset;
            let dest_raw = fb.mem.read_u16(dest_addr);
            let dest_rgb = crate::core::pixel::formats::decode_16bit_direct(
                crate::core::pixel::formats::TexelFormat::R5g6b5,
                dest_raw,
            );
            let aux_addr = params.aux_buffer_offset + pixel_offset;
            let dest_depth = fb.mem.read_u16(aux_addr);

            let outcome = pipeline::shade_pixel(
                params,
                iter,
                texel,
                [dest_rgb[0], dest_rgb[1], dest_rgb[2]],
                dest_depth,
                x as u32,
                y as u32,
                counters,
            );

            if let Some([nr, ng, nb]) = outcome.rgb {
                let packed = pack_rgb565(nr, ng, nb);
                // SAFETY: this worker owns every scanline `y` it reaches
                // here exclusively, via the caller's parity filter above.
                unsafe { fb.mem.write_u16_shared(dest_addr, packed) };
                dirty.mark(y as usize);
            }
            if let Some(depth) = outcome.depth {
                // SAFETY: see above.
                unsafe { fb.mem.write_u16_shared(aux_addr, depth) };
            }

            r += params.d_rd_x;
            g += params.d_gd_x;
            b += params.d_bd_x;
            a += params.d_ad_x;
            z += params.d_zd_x;
            w += params.d_wd_x;
            s += params.d_sd_x;
            t += params.d_td_x;
            tmu_w += params.d_wtd_x;
        }
    }
}

fn decode_texel(params: &TriangleParams, tex: &TextureMemory, tables: &Tables, addr: u32, format: crate::core::pixel::formats::TexelFormat) -> [u8; 4] {
    use crate::core::pixel::formats::TexelFormat::*;
    let raw = texmap::read_raw_texel(tex, addr, format);
    match format {
        Rgb332 | A8 | I8 | Ai8 => crate::core::pixel::formats::decode_8bit_direct(format, raw as u8),
        Pal8 | Apal88 | Y4I2Q2 => {
            let palette = params.palette.as_deref();
            match palette {
                Some(p) => crate::core::pixel::formats::decode_indexed(raw as u8, p),
                None => [0, 0, 0, 0xFF],
            }
        }
        R5g6b5 | Argb1555 | Argb4444 | A8i8 => tables.decode16.decode(format, raw as u16),
    }
}

#[inline]
fn pack_rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3)
}

/// `FASTFILL` command (spec.md §4.4): clear the scissor rectangle of the
/// draw buffer to `color1` and, if depth write is enabled, the aux
/// buffer to `zaColor`.
pub fn fastfill(params: &TriangleParams, fb: &FramebufferMemory, fb_width: usize, fb_height: usize, dirty: &DirtyLines) {
    let (left, right, top, bottom) = if params.fbz_mode.raw & crate::core::params::FbzMode::ENABLE_CLIPPING != 0 {
        (params.clip.left.max(0), params.clip.right.min(fb_width as i32), params.clip.low_y.max(0), params.clip.high_y.min(fb_height as i32))
    } else {
        (0, fb_width as i32, 0, fb_height as i32)
    };

    let color1 = params.color1;
    let packed = pack_rgb565((color1 >> 16) as u8, (color1 >> 8) as u8, color1 as u8);
    let za = params.za_color as u16;
    let write_depth = params.fbz_mode.depth_write_enabled();
    // Fastfill always runs synchronously on the dispatcher thread right
    // after a drained render barrier (§4.7), so no in-flight triangle's
    // stale snapshot applies here — the live draw offset is correct.
    let draw_offset = fb.current_draw_offset();

    for y in top..bottom {
        for x in left..right {
            let offset = (y as usize * fb_width + x as usize) * 2;
            // SAFETY: the dispatcher only calls `fastfill` after draining
            // the render barrier, so no worker is touching this memory.
            unsafe {
                fb.mem.write_u16_shared(draw_offset + offset, packed);
                if write_depth {
                    fb.mem.write_u16_shared(fb.aux_offset + offset, za);
                }
            }
        }
        dirty.mark(y as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_lines_report_marked_rows_then_clear() {
        let dirty = DirtyLines::new(8);
        dirty.mark(2);
        dirty.mark(5);
        assert_eq!(dirty.take_dirty(), vec![2, 5]);
        assert!(dirty.take_dirty().is_empty());
    }

    #[test]
    fn pack_rgb565_roundtrips_through_decode() {
        let packed = pack_rgb565(0xFF, 0x80, 0x10);
        let decoded = crate::core::pixel::formats::decode_16bit_direct(crate::core::pixel::formats::TexelFormat::R5g6b5, packed);
        assert!(decoded[0] > 0xF0);
    }
}
