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

//! Surface state packing
//!
//! Surface state lives in the stream's state region as plain dwords. Each
//! generation packs the same description with its own shifts and masks.
//! Only the fields the blit and fill paths need are modelled; all other bits
//! are written as zero and ignored on decode.

use crate::core::bo::Tiling;

pub const SURFACE_2D: u32 = 1;
pub const SURFACEFORMAT_B8G8R8A8_UNORM: u32 = 0x0C0;
pub const SURFACEFORMAT_R8_UNORM: u32 = 0x140;

pub(super) const GEN6_SURFACE_STATE_DWORDS: usize = 6;
pub(super) const GEN7_SURFACE_STATE_DWORDS: usize = 8;
pub(super) const GEN8_SURFACE_STATE_DWORDS: usize = 16;

const GEN8_TILING_X: u32 = 2;
const GEN8_TILING_Y: u32 = 3;
const GEN8_HALIGN_4: u32 = 1;
const GEN8_VALIGN_4: u32 = 1;

const SCS_RED: u32 = 4;
const SCS_GREEN: u32 = 5;
const SCS_BLUE: u32 = 6;
const SCS_ALPHA: u32 = 7;

/// Generation-independent description of a 2D surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub surface_type: u32,
    pub format: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in rows
    pub height: u32,
    /// Row pitch in bytes
    pub pitch: u32,
    pub tiling: Tiling,
    /// GPU address of the first pixel
    pub base_address: u64,
}

impl SurfaceDesc {
    /// A 2D surface with the base address left for relocation
    pub fn new_2d(format: u32, width: u32, height: u32, pitch: u32, tiling: Tiling) -> Self {
        Self {
            surface_type: SURFACE_2D,
            format,
            width,
            height,
            pitch,
            tiling,
            base_address: 0,
        }
    }
}

#[inline(always)]
fn pack(value: u32, shift: u32, bits: u32) -> u32 {
    (value & ((1 << bits) - 1)) << shift
}

#[inline(always)]
fn unpack(word: u32, shift: u32, bits: u32) -> u32 {
    (word >> shift) & ((1 << bits) - 1)
}

#[inline(always)]
fn bit(word: u32, shift: u32) -> bool {
    word & (1 << shift) != 0
}

pub(super) fn encode_gen6(desc: &SurfaceDesc) -> Vec<u32> {
    let mut ss = vec![0u32; GEN6_SURFACE_STATE_DWORDS];

    ss[0] = pack(desc.surface_type, 29, 3) | pack(desc.format, 18, 9);
    ss[1] = desc.base_address as u32;
    ss[2] = pack(desc.width.saturating_sub(1), 6, 13)
        | pack(desc.height.saturating_sub(1), 19, 13);
    ss[3] = pack(desc.pitch.saturating_sub(1), 3, 17)
        | pack(desc.tiling.is_tiled() as u32, 1, 1)
        | pack((desc.tiling == Tiling::Y) as u32, 0, 1);

    ss
}

pub(super) fn decode_gen6(ss: &[u32]) -> SurfaceDesc {
    let tiling = match (bit(ss[3], 1), bit(ss[3], 0)) {
        (false, _) => Tiling::None,
        (true, false) => Tiling::X,
        (true, true) => Tiling::Y,
    };

    SurfaceDesc {
        surface_type: unpack(ss[0], 29, 3),
        format: unpack(ss[0], 18, 9),
        width: unpack(ss[2], 6, 13) + 1,
        height: unpack(ss[2], 19, 13) + 1,
        pitch: unpack(ss[3], 3, 17) + 1,
        tiling,
        base_address: ss[1] as u64,
    }
}

pub(super) fn encode_gen7(desc: &SurfaceDesc) -> Vec<u32> {
    let mut ss = vec![0u32; GEN7_SURFACE_STATE_DWORDS];

    ss[0] = pack(desc.surface_type, 29, 3)
        | pack(desc.format, 18, 9)
        | pack(desc.tiling.is_tiled() as u32, 14, 1)
        | pack((desc.tiling == Tiling::Y) as u32, 13, 1);
    ss[1] = desc.base_address as u32;
    ss[2] = pack(desc.width.saturating_sub(1), 0, 14)
        | pack(desc.height.saturating_sub(1), 16, 14);
    ss[3] = pack(desc.pitch.saturating_sub(1), 0, 18);

    ss
}

pub(super) fn decode_gen7(ss: &[u32]) -> SurfaceDesc {
    let tiling = match (bit(ss[0], 14), bit(ss[0], 13)) {
        (false, _) => Tiling::None,
        (true, false) => Tiling::X,
        (true, true) => Tiling::Y,
    };

    SurfaceDesc {
        surface_type: unpack(ss[0], 29, 3),
        format: unpack(ss[0], 18, 9),
        width: unpack(ss[2], 0, 14) + 1,
        height: unpack(ss[2], 16, 14) + 1,
        pitch: unpack(ss[3], 0, 18) + 1,
        tiling,
        base_address: ss[1] as u64,
    }
}

pub(super) fn encode_gen8(desc: &SurfaceDesc) -> Vec<u32> {
    let mut ss = vec![0u32; GEN8_SURFACE_STATE_DWORDS];

    let tiled_mode = match desc.tiling {
        Tiling::None => 0,
        Tiling::X => GEN8_TILING_X,
        Tiling::Y => GEN8_TILING_Y,
    };

    ss[0] = pack(desc.surface_type, 29, 3)
        | pack(desc.format, 18, 9)
        | pack(GEN8_VALIGN_4, 16, 2)
        | pack(GEN8_HALIGN_4, 14, 2)
        | pack(tiled_mode, 12, 2);
    ss[2] = pack(desc.width.saturating_sub(1), 0, 14)
        | pack(desc.height.saturating_sub(1), 16, 14);
    ss[3] = pack(desc.pitch.saturating_sub(1), 0, 18);
    ss[7] = pack(SCS_RED, 25, 3)
        | pack(SCS_GREEN, 22, 3)
        | pack(SCS_BLUE, 19, 3)
        | pack(SCS_ALPHA, 16, 3);
    ss[8] = desc.base_address as u32;
    ss[9] = (desc.base_address >> 32) as u32;

    ss
}

pub(super) fn decode_gen8(ss: &[u32]) -> SurfaceDesc {
    let tiling = match unpack(ss[0], 12, 2) {
        GEN8_TILING_X => Tiling::X,
        GEN8_TILING_Y => Tiling::Y,
        _ => Tiling::None,
    };

    SurfaceDesc {
        surface_type: unpack(ss[0], 29, 3),
        format: unpack(ss[0], 18, 9),
        width: unpack(ss[2], 0, 14) + 1,
        height: unpack(ss[2], 16, 14) + 1,
        pitch: unpack(ss[3], 0, 18) + 1,
        tiling,
        base_address: ss[8] as u64 | ((ss[9] as u64) << 32),
    }
}
