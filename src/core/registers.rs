//! Register offsets recognised by the FBI register window (spec.md §6).
//!
//! Offsets are relative to the base of the register window
//! (`0x000000..0x400000` of the memory map, §4.10). Doc comments mirror
//! the abridged register table in spec.md so the dispatcher's `match`
//! arms read the same way the reference table does.

pub const STATUS: u32 = 0x000;

/// `0x008..=0x01c` — vertexAx..vertexCy, 28.4 fixed vertex coordinates.
pub const VERTEX_AX: u32 = 0x008;
pub const VERTEX_AY: u32 = 0x00c;
pub const VERTEX_BX: u32 = 0x010;
pub const VERTEX_BY: u32 = 0x014;
pub const VERTEX_CX: u32 = 0x018;
pub const VERTEX_CY: u32 = 0x01c;

/// `0x020..=0x07c` — startR/G/B/Z/A/S/T/W and dRdX..dWdY interpolator setup.
pub const START_R: u32 = 0x020;
pub const START_G: u32 = 0x024;
pub const START_B: u32 = 0x028;
pub const START_Z: u32 = 0x02c;
pub const START_A: u32 = 0x030;
pub const START_S: u32 = 0x034;
pub const START_T: u32 = 0x038;
pub const START_W: u32 = 0x03c;

pub const D_RD_X: u32 = 0x040;
pub const D_GD_X: u32 = 0x044;
pub const D_BD_X: u32 = 0x048;
pub const D_ZD_X: u32 = 0x04c;
pub const D_AD_X: u32 = 0x050;
pub const D_SD_X: u32 = 0x054;
pub const D_TD_X: u32 = 0x058;
pub const D_WD_X: u32 = 0x05c;

pub const D_RD_Y: u32 = 0x060;
pub const D_GD_Y: u32 = 0x064;
pub const D_BD_Y: u32 = 0x068;
pub const D_ZD_Y: u32 = 0x06c;
pub const D_AD_Y: u32 = 0x070;
pub const D_SD_Y: u32 = 0x074;
pub const D_TD_Y: u32 = 0x078;
pub const D_WD_Y: u32 = 0x07c;

/// launch triangle (bit 31 = fill sign).
pub const TRIANGLE_CMD: u32 = 0x080;

pub const FBZ_COLOR_PATH: u32 = 0x104;
pub const FOG_MODE: u32 = 0x108;
pub const ALPHA_MODE: u32 = 0x10c;
pub const FBZ_MODE: u32 = 0x110;
pub const LFB_MODE: u32 = 0x114;
pub const CLIP_LEFT_RIGHT: u32 = 0x118;
pub const CLIP_LOW_Y_HIGH_Y: u32 = 0x11c;
/// stats reset.
pub const NOP_CMD: u32 = 0x120;
/// rectangle fill with colour1/depth.
pub const FASTFILL_CMD: u32 = 0x124;
/// swap (bit 0 = sync, bits 1..8 = interval).
pub const SWAPBUFFER_CMD: u32 = 0x128;
pub const FOG_COLOR: u32 = 0x12c;
/// constant Z/A.
pub const ZA_COLOR: u32 = 0x130;
pub const CHROMA_KEY: u32 = 0x134;
pub const COLOR0: u32 = 0x144;
pub const COLOR1: u32 = 0x148;

pub const FBI_PIXELS_IN: u32 = 0x14c;
pub const FBI_CHROMA_FAIL: u32 = 0x150;
pub const FBI_ZFUNC_FAIL: u32 = 0x154;
pub const FBI_AFUNC_FAIL: u32 = 0x158;
pub const FBI_PIXELS_OUT: u32 = 0x15c;

/// `0x160..=0x1dc` — fogTable[0..31], packed `{fog, dfog}` byte pairs, two
/// entries per 32-bit register (64 total entries as per spec.md §3).
pub const FOG_TABLE_START: u32 = 0x160;
pub const FOG_TABLE_END: u32 = 0x1dc;

pub const FBI_INIT4: u32 = 0x200;
pub const BACK_PORCH: u32 = 0x208;
pub const VIDEO_DIMENSIONS: u32 = 0x20c;
pub const FBI_INIT0: u32 = 0x210;
pub const FBI_INIT1: u32 = 0x214;
pub const FBI_INIT2: u32 = 0x218;
pub const FBI_INIT3: u32 = 0x21c;
pub const H_SYNC: u32 = 0x220;
pub const V_SYNC: u32 = 0x224;
/// indexed 33-entry CLUT.
pub const CLUT_DATA: u32 = 0x228;
/// opaque hook into the external DAC model (spec.md §9 open question).
pub const DAC_DATA: u32 = 0x22c;

pub const TEXTURE_MODE: u32 = 0x300;
pub const T_LOD: u32 = 0x304;
pub const TEX_BASE_ADDR_START: u32 = 0x308;

/// `0x324..=0x380` — nccTable[0..1], Y/I/Q quadrants.
pub const NCC_TABLE_START: u32 = 0x324;
pub const NCC_TABLE_END: u32 = 0x380;

/// remap bit in fbiInit3 exposes an alias window at this offset, splitting
/// each 32-bit register into two 4-byte-aligned fields (spec.md §6).
pub const REMAP_ALIAS_OFFSET: u32 = 0x400;

/// Decode a register window address into `(register_offset, remapped)`,
/// honouring the `+0x400` alias window when `remap` is enabled.
#[inline]
pub fn decode_register_address(addr: u32, remap_enabled: bool) -> (u32, bool) {
    let local = addr & 0x3ff;
    if remap_enabled && (addr & REMAP_ALIAS_OFFSET) != 0 && local >= 0x100 {
        (local, true)
    } else {
        (local, false)
    }
}
