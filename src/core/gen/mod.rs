// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-generation command emission
//!
//! The builder is generic; everything that differs between hardware
//! generations lives behind [`EmitOps`]. [`GenOps`] is the tagged variant
//! selected once per device:
//!
//! | Variant | Generations | Address words | Fast copy | Surface state |
//! |---------|-------------|---------------|-----------|---------------|
//! | Gen6    | 6           | 1             | no        | 6 dwords      |
//! | Gen7    | 7           | 1             | no        | 8 dwords      |
//! | Gen8    | 8           | 2             | no        | 16 dwords     |
//! | Gen9    | 9           | 2             | yes       | 16 dwords     |

use crate::core::bo::Tiling;

mod surface;
#[cfg(test)]
mod tests;

pub use surface::{SurfaceDesc, SURFACEFORMAT_B8G8R8A8_UNORM, SURFACEFORMAT_R8_UNORM, SURFACE_2D};

// Command clients (bits 31:29)
pub const CLIENT_MI: u32 = 0;
pub const CLIENT_2D: u32 = 2;
pub const CLIENT_3D: u32 = 3;

pub const MI_NOOP: u32 = 0;
pub const MI_BATCH_BUFFER_END: u32 = 0x0A << 23;
pub const MI_STORE_DWORD_IMM: u32 = 0x20 << 23;
pub const MI_FLUSH_DW: u32 = 0x26 << 23;

pub const XY_SRC_COPY_BLT_CMD: u32 = (CLIENT_2D << 29) | (0x53 << 22);
pub const XY_COLOR_BLT_CMD: u32 = (CLIENT_2D << 29) | (0x50 << 22);
pub const XY_FAST_COPY_BLT: u32 = (CLIENT_2D << 29) | (0x42 << 22) | 8;

pub const XY_BLT_WRITE_ALPHA: u32 = 1 << 21;
pub const XY_BLT_WRITE_RGB: u32 = 1 << 20;
pub const XY_SRC_COPY_BLT_SRC_TILED: u32 = 1 << 15;
pub const XY_SRC_COPY_BLT_DST_TILED: u32 = 1 << 11;

pub const XY_FAST_COPY_SRC_TILING_X: u32 = 1 << 20;
pub const XY_FAST_COPY_SRC_TILING_Y: u32 = 2 << 20;
pub const XY_FAST_COPY_DST_TILING_X: u32 = 1 << 13;
pub const XY_FAST_COPY_DST_TILING_Y: u32 = 2 << 13;
pub const XY_FAST_COPY_COLOR_DEPTH_32: u32 = 3 << 24;

pub const BLT_ROP_SRC_COPY: u32 = 0xCC << 16;
pub const BLT_ROP_PAT_COPY: u32 = 0xF0 << 16;

/// BR13 colour depth field for a bytes-per-pixel value
pub fn blt_depth(bpp: u32) -> Option<u32> {
    match bpp {
        8 => Some(0),
        16 => Some(1 << 24),
        32 => Some(3 << 24),
        _ => None,
    }
}

/// Command length in dwords, decoded from a header
///
/// Returns `None` for clients the engine cannot parse.
pub fn command_length(header: u32) -> Option<usize> {
    match header >> 29 {
        CLIENT_MI => {
            let opcode = (header >> 23) & 0x3f;
            if opcode < 0x10 {
                Some(1)
            } else {
                Some((header & 0x3f) as usize + 2)
            }
        }
        CLIENT_2D => Some((header & 0xff) as usize + 2),
        CLIENT_3D => {
            let pipeline = (header >> 27) & 0x3;
            let opcode = (header >> 24) & 0x7;
            // PIPELINE_SELECT and the other single-dword non-pipelined states
            if pipeline == 1 && opcode == 1 {
                Some(1)
            } else {
                Some((header & 0xff) as usize + 2)
            }
        }
        _ => None,
    }
}

/// Generation-specific emission capabilities
pub trait EmitOps {
    fn gen(&self) -> u8;

    /// Dwords per relocated address
    fn address_words(&self) -> usize;

    /// XY_SRC_COPY_BLT header including the length field
    fn src_copy_header(&self) -> u32 {
        XY_SRC_COPY_BLT_CMD | (4 + 2 * self.address_words() as u32)
    }

    /// XY_COLOR_BLT header including the length field
    fn color_blt_header(&self) -> u32 {
        XY_COLOR_BLT_CMD | (3 + self.address_words() as u32)
    }

    /// MI_STORE_DWORD_IMM header (4 dwords on every supported generation)
    fn store_dword_header(&self) -> u32 {
        MI_STORE_DWORD_IMM | 2
    }

    /// MI_FLUSH_DW header
    fn flush_dw_header(&self) -> u32 {
        MI_FLUSH_DW | self.address_words() as u32
    }

    fn has_fast_copy(&self) -> bool {
        false
    }

    /// Surface state size in bytes
    fn surface_state_size(&self) -> usize;

    fn surface_state_alignment(&self) -> usize {
        32
    }

    /// Dword index of the surface base address
    fn surface_base_dword(&self) -> usize {
        1
    }

    /// Pack a surface description into state dwords
    fn encode_surface_state(&self, desc: &SurfaceDesc) -> Vec<u32>;

    /// Unpack state dwords written by [`EmitOps::encode_surface_state`]
    fn decode_surface_state(&self, words: &[u32]) -> SurfaceDesc;
}

/// Sandybridge
#[derive(Debug, Clone, Copy, Default)]
pub struct Gen6Ops;

/// Ivybridge, Haswell, Valleyview
#[derive(Debug, Clone, Copy, Default)]
pub struct Gen7Ops;

/// Broadwell, Cherryview
#[derive(Debug, Clone, Copy, Default)]
pub struct Gen8Ops;

/// Skylake, Broxton, Kabylake
#[derive(Debug, Clone, Copy, Default)]
pub struct Gen9Ops;

impl EmitOps for Gen6Ops {
    fn gen(&self) -> u8 {
        6
    }

    fn address_words(&self) -> usize {
        1
    }

    fn surface_state_size(&self) -> usize {
        surface::GEN6_SURFACE_STATE_DWORDS * 4
    }

    fn encode_surface_state(&self, desc: &SurfaceDesc) -> Vec<u32> {
        surface::encode_gen6(desc)
    }

    fn decode_surface_state(&self, words: &[u32]) -> SurfaceDesc {
        surface::decode_gen6(words)
    }
}

impl EmitOps for Gen7Ops {
    fn gen(&self) -> u8 {
        7
    }

    fn address_words(&self) -> usize {
        1
    }

    fn surface_state_size(&self) -> usize {
        surface::GEN7_SURFACE_STATE_DWORDS * 4
    }

    fn encode_surface_state(&self, desc: &SurfaceDesc) -> Vec<u32> {
        surface::encode_gen7(desc)
    }

    fn decode_surface_state(&self, words: &[u32]) -> SurfaceDesc {
        surface::decode_gen7(words)
    }
}

impl EmitOps for Gen8Ops {
    fn gen(&self) -> u8 {
        8
    }

    fn address_words(&self) -> usize {
        2
    }

    fn surface_state_size(&self) -> usize {
        surface::GEN8_SURFACE_STATE_DWORDS * 4
    }

    fn surface_state_alignment(&self) -> usize {
        64
    }

    fn surface_base_dword(&self) -> usize {
        8
    }

    fn encode_surface_state(&self, desc: &SurfaceDesc) -> Vec<u32> {
        surface::encode_gen8(desc)
    }

    fn decode_surface_state(&self, words: &[u32]) -> SurfaceDesc {
        surface::decode_gen8(words)
    }
}

impl EmitOps for Gen9Ops {
    fn gen(&self) -> u8 {
        9
    }

    fn address_words(&self) -> usize {
        2
    }

    fn has_fast_copy(&self) -> bool {
        true
    }

    fn surface_state_size(&self) -> usize {
        surface::GEN8_SURFACE_STATE_DWORDS * 4
    }

    fn surface_state_alignment(&self) -> usize {
        64
    }

    fn surface_base_dword(&self) -> usize {
        8
    }

    fn encode_surface_state(&self, desc: &SurfaceDesc) -> Vec<u32> {
        surface::encode_gen8(desc)
    }

    fn decode_surface_state(&self, words: &[u32]) -> SurfaceDesc {
        surface::decode_gen8(words)
    }
}

/// Emission capabilities of one device
#[derive(Debug, Clone, Copy)]
pub enum GenOps {
    Gen6(Gen6Ops),
    Gen7(Gen7Ops),
    Gen8(Gen8Ops),
    Gen9(Gen9Ops),
}

impl GenOps {
    /// Select the emission variant for a generation
    ///
    /// Returns `None` outside gen6..=gen9.
    pub fn for_gen(gen: u8) -> Option<Self> {
        match gen {
            6 => Some(GenOps::Gen6(Gen6Ops)),
            7 => Some(GenOps::Gen7(Gen7Ops)),
            8 => Some(GenOps::Gen8(Gen8Ops)),
            9 => Some(GenOps::Gen9(Gen9Ops)),
            _ => None,
        }
    }

    fn ops(&self) -> &dyn EmitOps {
        match self {
            GenOps::Gen6(ops) => ops,
            GenOps::Gen7(ops) => ops,
            GenOps::Gen8(ops) => ops,
            GenOps::Gen9(ops) => ops,
        }
    }

    /// Fast copy tiling bits for the XY_FAST_COPY_BLT header
    pub fn fast_copy_tiling(src: Tiling, dst: Tiling) -> u32 {
        let src_bits = match src {
            Tiling::None => 0,
            Tiling::X => XY_FAST_COPY_SRC_TILING_X,
            Tiling::Y => XY_FAST_COPY_SRC_TILING_Y,
        };
        let dst_bits = match dst {
            Tiling::None => 0,
            Tiling::X => XY_FAST_COPY_DST_TILING_X,
            Tiling::Y => XY_FAST_COPY_DST_TILING_Y,
        };
        src_bits | dst_bits
    }
}

impl EmitOps for GenOps {
    fn gen(&self) -> u8 {
        self.ops().gen()
    }

    fn address_words(&self) -> usize {
        self.ops().address_words()
    }

    fn src_copy_header(&self) -> u32 {
        self.ops().src_copy_header()
    }

    fn color_blt_header(&self) -> u32 {
        self.ops().color_blt_header()
    }

    fn store_dword_header(&self) -> u32 {
        self.ops().store_dword_header()
    }

    fn flush_dw_header(&self) -> u32 {
        self.ops().flush_dw_header()
    }

    fn has_fast_copy(&self) -> bool {
        self.ops().has_fast_copy()
    }

    fn surface_state_size(&self) -> usize {
        self.ops().surface_state_size()
    }

    fn surface_state_alignment(&self) -> usize {
        self.ops().surface_state_alignment()
    }

    fn surface_base_dword(&self) -> usize {
        self.ops().surface_base_dword()
    }

    fn encode_surface_state(&self, desc: &SurfaceDesc) -> Vec<u32> {
        self.ops().encode_surface_state(desc)
    }

    fn decode_surface_state(&self, words: &[u32]) -> SurfaceDesc {
        self.ops().decode_surface_state(words)
    }
}
