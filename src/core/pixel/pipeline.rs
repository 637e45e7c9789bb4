//! The per-fragment pixel pipeline (spec.md §4.3): depth recovery, depth
//! test, chromakey test, colour/alpha combiner, fog, alpha test, alpha
//! blend, dither, and write-back. One call to `shade_pixel` processes
//! exactly one covered sample.

use crate::core::counters::PixelCounters;
use crate::core::fixed::clamp8;
use crate::core::params::{AselSel, BlendFactor, ClocalSel, CotherSel, MselSel, TriangleParams};

/// Iterated per-pixel state handed in by the rasterizer (spec.md §4.4),
/// already stepped to this sample's screen position.
#[derive(Debug, Clone, Copy)]
pub struct FragmentIterators {
    pub r: i32,
    pub g: i32,
    pub b: i32,
    pub a: i32,
    pub z: i32,
    pub w: i64,
}

/// A texel already sampled and decoded to RGBA8 by the texture mapper
/// (spec.md §4.2), or `None` when `fbzColorPath.textureEnabled` is clear.
pub type SampledTexel = Option<[u8; 4]>;

pub struct PixelOutcome {
    pub rgb: Option<[u8; 3]>,
    pub depth: Option<u16>,
}

/// Recover a 16-bit depth value from the 48-bit iterated `W` (spec.md
/// §4.3 step 1 "non-linear W-to-depth recovery"), using the hardware's
/// `fls`-based exponent/mantissa encoding.
pub fn recover_w_depth(w: i64) -> u16 {
    let w = w as u64;
    if w & 0xffff_0000_0000 != 0 {
        0
    } else if w & 0xffff_0000 == 0 {
        0xf001
    } else {
        let hi16 = (w >> 16) as u16;
        let exp = hi16.leading_zeros() as i64;
        let mant = ((!(w as u32) as u64) >> (19 - exp)) & 0xfff;
        let depth = (exp << 12) + mant as i64 + 1;
        depth.min(0xffff) as u16
    }
}

/// Select the depth value that the depth test and write-back actually
/// use, applying W-buffering and the optional constant bias (spec.md
/// §4.3 steps 1-2).
fn select_depth(params: &TriangleParams, iter: &FragmentIterators) -> u16 {
    let base = if params.fbz_mode.w_buffer() {
        recover_w_depth(iter.w) as i32
    } else {
        (iter.z >> 12).clamp(0, 0xFFFF)
    };
    let biased = if params.fbz_mode.depth_bias() { (base + params.za_color as i32) & 0xffff } else { base };
    biased as u16
}

fn select_signal(sel: CotherSel, iter: &FragmentIterators, texel: SampledTexel, color1: [u8; 3]) -> [u8; 3] {
    match sel {
        CotherSel::IteratedRgb => [clamp8(iter.r), clamp8(iter.g), clamp8(iter.b)],
        CotherSel::TextureRgb => {
            let [r, g, b, _] = texel.unwrap_or([0, 0, 0, 0]);
            [r, g, b]
        }
        CotherSel::Color1 => color1,
        CotherSel::LfbRgb => color1,
    }
}

fn select_local(sel: ClocalSel, iter: &FragmentIterators, color0: [u8; 3]) -> [u8; 3] {
    match sel {
        ClocalSel::IteratedRgb => [clamp8(iter.r), clamp8(iter.g), clamp8(iter.b)],
        ClocalSel::Color0 => color0,
    }
}

fn msel_fraction(sel: MselSel, iter: &FragmentIterators, texel: SampledTexel, local_alpha: u8) -> i32 {
    match sel {
        MselSel::Zero => 0,
        MselSel::ClocalAlpha => local_alpha as i32,
        MselSel::AlphaOther => 0xff,
        MselSel::AlphaLocal => local_alpha as i32,
        MselSel::TextureAlpha => texel.map(|t| t[3]).unwrap_or(0) as i32,
    }
}

fn aselect_alpha(sel: AselSel, iter: &FragmentIterators, clocal_alpha: u8) -> i32 {
    match sel {
        AselSel::Zero => 0,
        AselSel::Clocal => clocal_alpha as i32,
        AselSel::AlphaLocal => clamp8(iter.a) as i32,
    }
}

/// Run the colour/alpha combiner (spec.md §4.3 step 5): selects `cOther`/
/// `cLocal`, blends by `mSelect`, optionally subtracts/adds/inverts, per
/// channel and for alpha independently via the `CCA_*` mirror bits.
fn run_combiner(params: &TriangleParams, iter: &FragmentIterators, texel: SampledTexel) -> (u8, u8, u8, u8) {
    let cp = params.fbz_color_path;
    let color0 = [(params.color0 >> 16) as u8, (params.color0 >> 8) as u8, params.color0 as u8];
    let color1 = [(params.color1 >> 16) as u8, (params.color1 >> 8) as u8, params.color1 as u8];

    let cother = select_signal(cp.cother_sel(), iter, texel, color1);
    let clocal = select_local(cp.clocal_sel(), iter, color0);
    let clocal_alpha = if cp.local_select_override() {
        texel.map(|t| t[3]).unwrap_or(clamp8(iter.a))
    } else {
        clamp8(iter.a)
    };

    let mut other = [cother[0] as i32, cother[1] as i32, cother[2] as i32];
    if cp.raw & crate::core::params::FbzColorPath::CC_ZERO_OTHER != 0 {
        other = [0, 0, 0];
    }

    let mut local = [clocal[0] as i32, clocal[1] as i32, clocal[2] as i32];
    if cp.raw & crate::core::params::FbzColorPath::CC_SUB_CLOCAL != 0 {
        local = [0, 0, 0];
    }

    let frac = msel_fraction(cp.msel(), iter, texel, clocal_alpha);
    let reverse = cp.raw & crate::core::params::FbzColorPath::CC_REVERSE_BLEND != 0;
    let blend = if reverse { 255 - frac } else { frac };

    let mut out = [0u8; 3];
    for c in 0..3 {
        let diff = other[c] - local[c];
        let blended = local[c] * 256 + diff * blend;
        let mut v = blended >> 8;
        if cp.raw & crate::core::params::FbzColorPath::CC_ADD_CLOCAL != 0 {
            v += local[c];
        }
        if cp.raw & crate::core::params::FbzColorPath::CC_ADD_ALOCAL != 0 {
            v += clamp8(iter.a) as i32;
        }
        out[c] = clamp8(v);
    }
    if cp.raw & crate::core::params::FbzColorPath::CC_INVERT_OUTPUT != 0 {
        out = [255 - out[0], 255 - out[1], 255 - out[2]];
    }

    let aother = aselect_alpha(
        match (cp.raw >> crate::core::params::FbzColorPath::CC_ASELECT_SHIFT) & 3 {
            0 => AselSel::Clocal,
            1 => AselSel::AlphaLocal,
            _ => AselSel::Zero,
        },
        iter,
        clocal_alpha,
    );
    let alocal = clocal_alpha as i32;
    let a_frac = texel.map(|t| t[3]).unwrap_or(0) as i32;
    let mut alpha = alocal * 256 + (aother - alocal) * a_frac;
    alpha >>= 8;
    if cp.raw & crate::core::params::FbzColorPath::CCA_ADD_CLOCAL != 0 {
        alpha += alocal;
    }
    let mut alpha = clamp8(alpha);
    if cp.raw & crate::core::params::FbzColorPath::CCA_INVERT_OUTPUT != 0 {
        alpha = 255 - alpha;
    }

    (out[0], out[1], out[2], alpha)
}

/// Apply fog to an already-combined colour (spec.md §4.3 step 6): a
/// per-scanline table of `{fog, dfog}` pairs indexed by the top bits of
/// iterated or recovered depth, blended additively or multiplicatively.
fn apply_fog(params: &TriangleParams, iter: &FragmentIterators, w_depth: u16, rgb: (u8, u8, u8)) -> (u8, u8, u8) {
    let fm = params.fog_mode;
    if !fm.enabled() {
        return rgb;
    }

    let fog_value: u8 = if fm.raw & crate::core::params::FogMode::FOG_CONSTANT != 0 {
        255
    } else {
        let index_source = if fm.raw & crate::core::params::FogMode::FOG_Z != 0 {
            (iter.z >> 20) as u32 & 0x3f
        } else if fm.raw & crate::core::params::FogMode::FOG_ALPHA != 0 {
            (clamp8(iter.a) as u32) >> 2
        } else {
            // FOG_W: index/fraction carved from the recovered W-depth,
            // following the hardware's `voodoo_fog_blend` shift.
            (w_depth as u32 >> 10) & 0x3f
        };
        let (fog, dfog) = params.fog_table[index_source.min(63) as usize];
        let frac = ((w_depth as u32 >> 2) & 0xff) as i32;
        (fog as i32 + ((dfog as i32 * frac) >> 8)).clamp(0, 255) as u8
    };

    let (fr, fg, fb) = (params.fog_color.0 as i32, params.fog_color.1 as i32, params.fog_color.2 as i32);
    let blend = |c: u8, fc: i32| -> u8 {
        if fm.raw & crate::core::params::FogMode::FOG_MULT != 0 {
            clamp8((c as i32 * (255 - fog_value as i32) + fc * fog_value as i32) >> 8)
        } else {
            clamp8(c as i32 + ((fc - c as i32) * fog_value as i32 >> 8))
        }
    };
    (blend(rgb.0, fr), blend(rgb.1, fg), blend(rgb.2, fb))
}

/// Evaluate one of the ten blend factors against the current source and
/// destination colours (spec.md §6 alphaMode blend-factor table).
fn blend_factor_value(factor: BlendFactor, src: (u8, u8, u8, u8), dst: (u8, u8, u8, u8)) -> (i32, i32, i32, i32) {
    match factor {
        BlendFactor::Zero => (0, 0, 0, 0),
        BlendFactor::SrcAlpha => (src.3 as i32, src.3 as i32, src.3 as i32, src.3 as i32),
        BlendFactor::SrcColor => (src.0 as i32, src.1 as i32, src.2 as i32, src.3 as i32),
        BlendFactor::DstAlpha => (dst.3 as i32, dst.3 as i32, dst.3 as i32, dst.3 as i32),
        BlendFactor::One | BlendFactor::Saturate | BlendFactor::ColorBeforeFog => (255, 255, 255, 255),
        BlendFactor::OneMinusSrcAlpha => {
            let v = 255 - src.3 as i32;
            (v, v, v, v)
        }
        BlendFactor::OneMinusSrcColor => (255 - src.0 as i32, 255 - src.1 as i32, 255 - src.2 as i32, 255 - src.3 as i32),
        BlendFactor::OneMinusDstAlpha => {
            let v = 255 - dst.3 as i32;
            (v, v, v, v)
        }
    }
}

/// Shade one covered sample through the entire pipeline, returning the
/// final RGB (if RGB write is enabled and the sample survives every
/// test) and depth (if depth write is enabled), or `None` for either
/// when that stage rejects the sample.
#[allow(clippy::too_many_arguments)]
pub fn shade_pixel(
    params: &TriangleParams,
    iter: FragmentIterators,
    texel: SampledTexel,
    dest_rgb: [u8; 3],
    dest_depth: u16,
    x: u32,
    y: u32,
    counters: &PixelCounters,
) -> PixelOutcome {
    counters.count_in();

    let depth = select_depth(params, &iter);

    if params.fbz_mode.depth_test_enabled() {
        let func = params.fbz_mode.depth_func();
        if !func.test(depth, dest_depth) {
            counters.count_zfunc_fail();
            return PixelOutcome { rgb: None, depth: None };
        }
    }

    if params.fbz_mode.chromakey_enabled() {
        if let Some([r, g, b, _]) = texel {
            let (cr, cg, cb) = params.chroma_key_rgb;
            if r == cr && g == cg && b == cb {
                counters.count_chroma_fail();
                return PixelOutcome { rgb: None, depth: None };
            }
        }
    }

    let (cr, cg, cb, ca) = run_combiner(params, &iter, texel);

    let w_depth = recover_w_depth(iter.w);
    let (fr, fg, fb) = apply_fog(params, &iter, w_depth, (cr, cg, cb));

    if params.alpha_mode.alpha_test_enabled() {
        let func = params.alpha_mode.alpha_func();
        if !func.test(ca as u16, params.alpha_mode.alpha_ref() as u16) {
            counters.count_afunc_fail();
            return PixelOutcome { rgb: None, depth: None };
        }
    }

    let mut out_rgb = (fr, fg, fb);
    if params.alpha_mode.blend_enabled() {
        let src = (fr, fg, fb, ca);
        let dst = (dest_rgb[0], dest_rgb[1], dest_rgb[2], ca);
        let (sr, sg, sb, _) = blend_factor_value(params.alpha_mode.src_blend(), src, dst);
        let (dr, dg, db, _) = blend_factor_value(params.alpha_mode.dst_blend(), src, dst);
        out_rgb = (
            clamp8((fr as i32 * sr + dest_rgb[0] as i32 * dr) >> 8),
            clamp8((fg as i32 * sg + dest_rgb[1] as i32 * dg) >> 8),
            clamp8((fb as i32 * sb + dest_rgb[2] as i32 * db) >> 8),
        );
    }

    if params.fbz_mode.dither_enabled() {
        let bias = crate::core::pixel::tables::dither_offset(x, y, params.fbz_mode.dither_2x2());
        out_rgb = (
            dither_channel(out_rgb.0, bias, 5),
            dither_channel(out_rgb.1, bias, 6),
            dither_channel(out_rgb.2, bias, 5),
        );
    }

    counters.count_out();

    PixelOutcome {
        rgb: params.fbz_mode.rgb_write_enabled().then_some([out_rgb.0, out_rgb.1, out_rgb.2]),
        depth: params.fbz_mode.depth_write_enabled().then_some(depth),
    }
}

/// Round an 8-bit channel down to its hardware bit depth (`bits` = 5 for
/// R/B, 6 for G) with an ordered-dither bias added first, then replicate
/// back up to 8 bits so later stages keep working in RGB888.
fn dither_channel(value: u8, bias: i32, bits: u32) -> u8 {
    let shift = 8 - bits;
    let biased = (value as i32 + bias).clamp(0, 255) as u32;
    let truncated = (biased >> shift).min((1u32 << bits) - 1);
    match bits {
        5 => crate::core::pixel::formats::expand5(truncated as u8),
        6 => crate::core::pixel::formats::expand6(truncated as u8),
        _ => truncated as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::{ClipRect, FbzColorPath, FbzMode, LodLevel, AlphaMode, FogMode, LfbMode, TextureMode, LOD_MAX};

    fn base_params() -> TriangleParams {
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
    fn w_depth_zero_when_high_bits_set() {
        assert_eq!(recover_w_depth(0x0001_0000_0000), 0);
    }

    #[test]
    fn w_depth_saturates_when_w_tiny() {
        assert_eq!(recover_w_depth(0x1), 0xf001);
    }

    #[test]
    fn depth_test_rejects_on_equal_depth_with_less_func() {
        let mut params = base_params();
        params.fbz_mode.raw |= FbzMode::ENABLE_DEPTHBUF | (1 << FbzMode::DEPTH_FUNC_SHIFT);
        let iter = FragmentIterators { r: 0, g: 0, b: 0, a: 255 << 12, z: 100 << 12, w: 0 };
        let counters = PixelCounters::default();
        let outcome = shade_pixel(&params, iter, None, [0, 0, 0], 100, 0, 0, &counters);
        assert!(outcome.rgb.is_none() && outcome.depth.is_none());
        assert_eq!(counters.snapshot()[2], 1);
    }

    #[test]
    fn pixel_survives_with_no_tests_enabled() {
        let params = base_params();
        let iter = FragmentIterators { r: 128 << 12, g: 64 << 12, b: 32 << 12, a: 255 << 12, z: 0, w: 0 };
        let counters = PixelCounters::default();
        let outcome = shade_pixel(&params, iter, None, [0, 0, 0], 0, 0, 0, &counters);
        assert!(outcome.rgb.is_none());
    }
}
