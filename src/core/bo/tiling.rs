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

//! Tiling and caching modes
//!
//! Tiled surfaces are laid out in fixed-size tiles instead of linear rows.
//! The stride of a tiled surface must be a whole number of tile widths and
//! may not exceed the generation's fence pitch limit.
//!
//! | Mode | Tile width | Tile height |
//! |------|------------|-------------|
//! | X    | 512 bytes  | 8 rows      |
//! | Y    | 128 bytes  | 32 rows     |

use serde::{Deserialize, Serialize};

/// Memory layout of a buffer object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tiling {
    /// Linear layout
    #[default]
    None,
    /// X-major tiles
    X,
    /// Y-major tiles
    Y,
}

impl Tiling {
    /// Kernel ABI value
    pub fn as_raw(self) -> u32 {
        match self {
            Tiling::None => 0,
            Tiling::X => 1,
            Tiling::Y => 2,
        }
    }

    /// Parse a kernel ABI value
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Tiling::None),
            1 => Some(Tiling::X),
            2 => Some(Tiling::Y),
            _ => None,
        }
    }

    /// Width of one tile row in bytes
    pub fn tile_width(self) -> u32 {
        match self {
            Tiling::None => 4,
            Tiling::X => 512,
            Tiling::Y => 128,
        }
    }

    /// Rows per tile
    pub fn tile_height(self) -> u32 {
        match self {
            Tiling::None => 1,
            Tiling::X => 8,
            Tiling::Y => 32,
        }
    }

    pub fn is_tiled(self) -> bool {
        self != Tiling::None
    }
}

/// Largest fence pitch supported by a generation, in bytes
pub fn max_stride(gen: u8) -> u32 {
    if gen >= 7 {
        256 * 1024
    } else if gen >= 4 {
        128 * 1024
    } else {
        8 * 1024
    }
}

/// Check a stride against the generation's tiling granularity
///
/// Linear objects accept any stride. Tiled objects need a non-zero stride
/// that is a multiple of the tile width (a power of two before gen4) and
/// within [`max_stride`].
pub fn stride_is_valid(gen: u8, tiling: Tiling, stride: u32) -> bool {
    if !tiling.is_tiled() {
        return true;
    }

    if stride == 0 || stride > max_stride(gen) {
        return false;
    }

    if gen < 4 {
        return stride.is_power_of_two() && stride >= tiling.tile_width();
    }

    stride % tiling.tile_width() == 0
}

/// CPU caching mode of a buffer object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Caching {
    /// Uncached, write-combined
    #[default]
    None,
    /// Snooped by the CPU caches
    Cached,
    /// Display-coherent (write-through on LLC parts)
    Display,
}

impl Caching {
    pub fn as_raw(self) -> u32 {
        match self {
            Caching::None => 0,
            Caching::Cached => 1,
            Caching::Display => 2,
        }
    }
}
