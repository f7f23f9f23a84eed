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

//! Blitter helpers
//!
//! Thin command builders on top of [`BatchBuffer`] for the 2D engine:
//! rectangle copies, rectangle fills and single-dword stores. The `emit_*`
//! functions only append commands (a window that does not fit flushes the
//! batch on its current engine); the other helpers append one command and
//! submit the batch to the blit engine.
//!
//! Parameters out of the engine's range are programmer errors and abort
//! through [`build_fault`].

use crate::core::batch::BatchBuffer;
use crate::core::bo::{BufferObject, Domain};
use crate::core::error::{build_fault, BuildError, Result};
use crate::core::exec::{Completion, Engine};
use crate::core::gen::{
    blt_depth, EmitOps, GenOps, BLT_ROP_PAT_COPY, BLT_ROP_SRC_COPY, XY_BLT_WRITE_ALPHA,
    XY_BLT_WRITE_RGB, XY_FAST_COPY_BLT, XY_FAST_COPY_COLOR_DEPTH_32,
    XY_SRC_COPY_BLT_DST_TILED, XY_SRC_COPY_BLT_SRC_TILED,
};

/// Largest coordinate or pitch the blitter accepts
const BLT_LIMIT: u32 = 1 << 15;

/// Pitch used by [`copy_bo`]
const COPY_PITCH: u32 = 4096;

/// One side of a blit: an object plus the rectangle origin and row pitch
#[derive(Debug, Clone, Copy)]
pub struct Surface<'a> {
    pub bo: &'a BufferObject,
    pub x: u32,
    pub y: u32,
    /// Row pitch in bytes
    pub pitch: u32,
}

impl<'a> Surface<'a> {
    pub fn new(bo: &'a BufferObject, x: u32, y: u32, pitch: u32) -> Self {
        Self { bo, x, y, pitch }
    }

    /// Pitch as encoded in a command, in dwords for tiled objects
    fn encoded_pitch(&self) -> u32 {
        if self.bo.tiling().is_tiled() {
            self.pitch / 4
        } else {
            self.pitch
        }
    }

    fn check(&self, what: &str, width: u32, height: u32, cpp: u32) {
        if self.x >= BLT_LIMIT || self.y >= BLT_LIMIT || self.pitch >= BLT_LIMIT {
            build_fault(BuildError::InvalidBlit(format!(
                "{} origin ({}, {}) or pitch {} out of range",
                what, self.x, self.y, self.pitch
            )));
        }
        if self.x + width >= BLT_LIMIT || self.y + height >= BLT_LIMIT {
            build_fault(BuildError::InvalidBlit(format!(
                "{} rectangle {}x{} at ({}, {}) out of range",
                what, width, height, self.x, self.y
            )));
        }
        if self.bo.tiling().is_tiled() && self.pitch % 4 != 0 {
            build_fault(BuildError::InvalidBlit(format!(
                "{} tiled pitch {} is not a dword multiple",
                what, self.pitch
            )));
        }

        let last_row = (self.y + height - 1) as u64 * self.pitch as u64;
        let end = last_row + (self.x + width) as u64 * cpp as u64;
        if end > self.bo.size() {
            build_fault(BuildError::InvalidBlit(format!(
                "{} rectangle ends at byte {} of a {}-byte object",
                what,
                end,
                self.bo.size()
            )));
        }
    }
}

fn check_extent(width: u32, height: u32) {
    if width == 0 || height == 0 {
        build_fault(BuildError::InvalidBlit(format!(
            "empty rectangle {}x{}",
            width, height
        )));
    }
}

fn depth_bits(bpp: u32) -> u32 {
    match blt_depth(bpp) {
        Some(bits) => bits,
        None => build_fault(BuildError::InvalidBlit(format!("unsupported bpp {}", bpp))),
    }
}

fn write_mask(bpp: u32) -> u32 {
    if bpp == 32 {
        XY_BLT_WRITE_ALPHA | XY_BLT_WRITE_RGB
    } else {
        0
    }
}

fn ops(batch: &BatchBuffer<'_>) -> GenOps {
    *batch.context().ops()
}

/// Append an XY_SRC_COPY_BLT
pub fn emit_blt_copy(
    batch: &mut BatchBuffer<'_>,
    src: Surface<'_>,
    dst: Surface<'_>,
    width: u32,
    height: u32,
    bpp: u32,
) -> Result<()> {
    check_extent(width, height);
    let depth = depth_bits(bpp);
    src.check("source", width, height, bpp / 8);
    dst.check("destination", width, height, bpp / 8);

    let ops = ops(batch);
    let mut cmd = ops.src_copy_header() | write_mask(bpp);
    if src.bo.tiling().is_tiled() {
        cmd |= XY_SRC_COPY_BLT_SRC_TILED;
    }
    if dst.bo.tiling().is_tiled() {
        cmd |= XY_SRC_COPY_BLT_DST_TILED;
    }

    batch.begin(6 + 2 * ops.address_words(), 2)?;
    batch.emit_word(cmd);
    batch.emit_word(depth | BLT_ROP_SRC_COPY | dst.encoded_pitch());
    batch.emit_word((dst.y << 16) | dst.x);
    batch.emit_word(((dst.y + height) << 16) | (dst.x + width));
    batch.emit_relocation(dst.bo, 0, Domain::RENDER, Domain::RENDER, true);
    batch.emit_word((src.y << 16) | src.x);
    batch.emit_word(src.encoded_pitch());
    batch.emit_relocation(src.bo, 0, Domain::RENDER, Domain::empty(), true);
    batch.end();

    Ok(())
}

/// Copy a rectangle on the blit engine
pub fn blt_copy(
    batch: &mut BatchBuffer<'_>,
    src: Surface<'_>,
    dst: Surface<'_>,
    width: u32,
    height: u32,
    bpp: u32,
) -> Result<Completion> {
    emit_blt_copy(batch, src, dst, width, height, bpp)?;
    batch.finish(Engine::Blt)
}

/// Copy `size` bytes between linear objects
///
/// The copy is expressed as a 32 bpp blit with a 4096-byte pitch, so
/// `size` must be a whole number of pages.
pub fn copy_bo(
    batch: &mut BatchBuffer<'_>,
    dst: &BufferObject,
    src: &BufferObject,
    size: u64,
) -> Result<Completion> {
    if size == 0 || size % COPY_PITCH as u64 != 0 {
        build_fault(BuildError::InvalidBlit(format!(
            "copy size {} is not a page multiple",
            size
        )));
    }

    blt_copy(
        batch,
        Surface::new(src, 0, 0, COPY_PITCH),
        Surface::new(dst, 0, 0, COPY_PITCH),
        COPY_PITCH / 4,
        (size / COPY_PITCH as u64) as u32,
        32,
    )
}

/// Append an XY_FAST_COPY_BLT (32 bpp)
pub fn emit_fast_copy(
    batch: &mut BatchBuffer<'_>,
    src: Surface<'_>,
    dst: Surface<'_>,
    width: u32,
    height: u32,
) -> Result<()> {
    let ops = ops(batch);
    if !ops.has_fast_copy() {
        build_fault(BuildError::InvalidBlit(format!(
            "fast copy is not available on gen{}",
            ops.gen()
        )));
    }
    check_extent(width, height);
    src.check("source", width, height, 4);
    dst.check("destination", width, height, 4);

    batch.begin(10, 2)?;
    batch.emit_word(XY_FAST_COPY_BLT | GenOps::fast_copy_tiling(src.bo.tiling(), dst.bo.tiling()));
    batch.emit_word(XY_FAST_COPY_COLOR_DEPTH_32 | dst.encoded_pitch());
    batch.emit_word((dst.y << 16) | dst.x);
    batch.emit_word(((dst.y + height) << 16) | (dst.x + width));
    batch.emit_relocation(dst.bo, 0, Domain::RENDER, Domain::RENDER, false);
    batch.emit_word((src.y << 16) | src.x);
    batch.emit_word(src.encoded_pitch());
    batch.emit_relocation(src.bo, 0, Domain::RENDER, Domain::empty(), false);
    batch.end();

    Ok(())
}

/// Copy a 32 bpp rectangle with the fast copy blitter
pub fn fast_copy(
    batch: &mut BatchBuffer<'_>,
    src: Surface<'_>,
    dst: Surface<'_>,
    width: u32,
    height: u32,
) -> Result<Completion> {
    emit_fast_copy(batch, src, dst, width, height)?;
    batch.finish(Engine::Blt)
}

/// Append an XY_COLOR_BLT
pub fn emit_fill(
    batch: &mut BatchBuffer<'_>,
    dst: Surface<'_>,
    width: u32,
    height: u32,
    bpp: u32,
    color: u32,
) -> Result<()> {
    check_extent(width, height);
    let depth = depth_bits(bpp);
    dst.check("destination", width, height, bpp / 8);

    let ops = ops(batch);
    let mut cmd = ops.color_blt_header() | write_mask(bpp);
    if dst.bo.tiling().is_tiled() {
        cmd |= XY_SRC_COPY_BLT_DST_TILED;
    }

    batch.begin(5 + ops.address_words(), 1)?;
    batch.emit_word(cmd);
    batch.emit_word(depth | BLT_ROP_PAT_COPY | dst.encoded_pitch());
    batch.emit_word((dst.y << 16) | dst.x);
    batch.emit_word(((dst.y + height) << 16) | (dst.x + width));
    batch.emit_relocation(dst.bo, 0, Domain::RENDER, Domain::RENDER, true);
    batch.emit_word(color);
    batch.end();

    Ok(())
}

/// Fill a rectangle with a solid colour on the blit engine
pub fn fill(
    batch: &mut BatchBuffer<'_>,
    dst: Surface<'_>,
    width: u32,
    height: u32,
    bpp: u32,
    color: u32,
) -> Result<Completion> {
    emit_fill(batch, dst, width, height, bpp, color)?;
    batch.finish(Engine::Blt)
}

/// Append an MI_STORE_DWORD_IMM writing `value` at byte `offset` of `dst`
pub fn emit_store_dword(
    batch: &mut BatchBuffer<'_>,
    dst: &BufferObject,
    offset: u32,
    value: u32,
) -> Result<()> {
    if offset % 4 != 0 || offset as u64 + 4 > dst.size() {
        build_fault(BuildError::InvalidBlit(format!(
            "store offset {} outside a {}-byte object",
            offset,
            dst.size()
        )));
    }

    let ops = ops(batch);
    batch.begin(4, 1)?;
    batch.emit_word(ops.store_dword_header());
    if ops.address_words() == 1 {
        batch.emit_word(0);
    }
    batch.emit_relocation(
        dst,
        offset,
        Domain::INSTRUCTION,
        Domain::INSTRUCTION,
        false,
    );
    batch.emit_word(value);
    batch.end();

    Ok(())
}

/// Store one dword from the GPU, on the blit engine
pub fn store_dword(
    batch: &mut BatchBuffer<'_>,
    dst: &BufferObject,
    offset: u32,
    value: u32,
) -> Result<Completion> {
    emit_store_dword(batch, dst, offset, value)?;
    batch.finish(Engine::Blt)
}
