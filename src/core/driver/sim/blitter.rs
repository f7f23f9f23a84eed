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

//! Command interpreter for simulated engines
//!
//! Executes the memory-visible subset of the command set:
//!
//! | Command             | Effect                          |
//! |---------------------|---------------------------------|
//! | MI_NOOP             | none                            |
//! | MI_BATCH_BUFFER_END | stop                            |
//! | MI_STORE_DWORD_IMM  | write one dword                 |
//! | MI_FLUSH_DW         | none (execution is coherent)    |
//! | XY_SRC_COPY_BLT     | rectangle copy                  |
//! | XY_COLOR_BLT        | rectangle fill                  |
//! | XY_FAST_COPY_BLT    | rectangle copy (gen9)           |
//!
//! Other 2D and 3D packets are skipped by their length field. A header
//! from an unknown client, a fault on an unbound address or running off
//! the end of the batch is reported as a hang.
//!
//! Tiled surfaces are stored linearly; tiling only changes how the pitch
//! field is interpreted.

use std::collections::HashMap;

use super::aperture::Aperture;
use super::Object;
use crate::core::gen::{
    command_length, CLIENT_2D, CLIENT_MI, MI_BATCH_BUFFER_END, XY_SRC_COPY_BLT_DST_TILED,
    XY_SRC_COPY_BLT_SRC_TILED,
};

const MI_OPCODE_BATCH_BUFFER_END: u32 = MI_BATCH_BUFFER_END >> 23;
const MI_OPCODE_STORE_DWORD_IMM: u32 = 0x20;

const BLT_OPCODE_COLOR: u32 = 0x50;
const BLT_OPCODE_SRC_COPY: u32 = 0x53;
const BLT_OPCODE_FAST_COPY: u32 = 0x42;

const FAST_COPY_SRC_TILING_MASK: u32 = 3 << 20;
const FAST_COPY_DST_TILING_MASK: u32 = 3 << 13;

/// GPU memory as seen by one engine
pub(super) struct GpuMemory<'a> {
    pub(super) objects: &'a mut HashMap<u32, Object>,
    pub(super) aperture: &'a Aperture,
}

impl GpuMemory<'_> {
    fn resolve(&self, address: u64, len: usize) -> Result<(u32, usize), String> {
        let (handle, offset) = self
            .aperture
            .translate(address)
            .ok_or_else(|| format!("fault: unbound address {:#x}", address))?;
        let object = self
            .objects
            .get(&handle)
            .ok_or_else(|| format!("fault: address {:#x} maps to a freed object", address))?;
        let offset = offset as usize;
        if offset + len > object.data.len() {
            return Err(format!(
                "fault: {} bytes at {:#x} overrun BO {}",
                len, address, handle
            ));
        }
        Ok((handle, offset))
    }

    fn read(&self, address: u64, len: usize) -> Result<Vec<u8>, String> {
        let (handle, offset) = self.resolve(address, len)?;
        Ok(self.objects[&handle].data[offset..offset + len].to_vec())
    }

    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<(), String> {
        let (handle, offset) = self.resolve(address, bytes.len())?;
        if let Some(object) = self.objects.get_mut(&handle) {
            object.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        Ok(())
    }
}

/// Rectangle "y << 16 | x" pair
fn point(word: u32) -> (u64, u64) {
    ((word & 0xffff) as u64, (word >> 16) as u64)
}

/// Bytes per pixel from the BR13 colour depth field
fn br13_cpp(br13: u32) -> usize {
    match (br13 >> 24) & 0x3 {
        0 => 1,
        1 | 2 => 2,
        _ => 4,
    }
}

fn fast_copy_cpp(dw1: u32) -> usize {
    match (dw1 >> 24) & 0x7 {
        0 => 1,
        1 => 2,
        3 => 4,
        4 => 8,
        _ => 16,
    }
}

fn address(words: &[u32], at: usize, address_words: usize) -> u64 {
    if address_words > 1 {
        words[at] as u64 | ((words[at + 1] as u64) << 32)
    } else {
        words[at] as u64
    }
}

struct Rect {
    x1: u64,
    y1: u64,
    x2: u64,
    y2: u64,
}

impl Rect {
    fn from_words(top_left: u32, bottom_right: u32) -> Self {
        let (x1, y1) = point(top_left);
        let (x2, y2) = point(bottom_right);
        Self { x1, y1, x2, y2 }
    }

    fn width(&self) -> u64 {
        self.x2.saturating_sub(self.x1)
    }

    fn height(&self) -> u64 {
        self.y2.saturating_sub(self.y1)
    }
}

#[allow(clippy::too_many_arguments)]
fn copy_rect(
    memory: &mut GpuMemory<'_>,
    dst: u64,
    dst_pitch: u64,
    rect: &Rect,
    src: u64,
    src_pitch: u64,
    src_x: u64,
    src_y: u64,
    cpp: usize,
) -> Result<(), String> {
    let row_bytes = rect.width() as usize * cpp;
    for row in 0..rect.height() {
        let from = src + (src_y + row) * src_pitch + src_x * cpp as u64;
        let to = dst + (rect.y1 + row) * dst_pitch + rect.x1 * cpp as u64;
        let bytes = memory.read(from, row_bytes)?;
        memory.write(to, &bytes)?;
    }
    Ok(())
}

fn src_copy(memory: &mut GpuMemory<'_>, cmd: &[u32], address_words: usize) -> Result<(), String> {
    let header = cmd[0];
    let br13 = cmd[1];
    let rect = Rect::from_words(cmd[2], cmd[3]);
    let dst = address(cmd, 4, address_words);
    let (src_x, src_y) = point(cmd[4 + address_words]);
    let src_pitch_field = cmd[5 + address_words];
    let src = address(cmd, 6 + address_words, address_words);

    let mut dst_pitch = (br13 & 0xffff) as u64;
    if header & XY_SRC_COPY_BLT_DST_TILED != 0 {
        dst_pitch *= 4;
    }
    let mut src_pitch = (src_pitch_field & 0xffff) as u64;
    if header & XY_SRC_COPY_BLT_SRC_TILED != 0 {
        src_pitch *= 4;
    }

    copy_rect(
        memory,
        dst,
        dst_pitch,
        &rect,
        src,
        src_pitch,
        src_x,
        src_y,
        br13_cpp(br13),
    )
}

fn fast_copy(memory: &mut GpuMemory<'_>, cmd: &[u32]) -> Result<(), String> {
    let header = cmd[0];
    let dw1 = cmd[1];
    let rect = Rect::from_words(cmd[2], cmd[3]);
    let dst = address(cmd, 4, 2);
    let (src_x, src_y) = point(cmd[6]);
    let src = address(cmd, 8, 2);

    let mut dst_pitch = (dw1 & 0xffff) as u64;
    if header & FAST_COPY_DST_TILING_MASK != 0 {
        dst_pitch *= 4;
    }
    let mut src_pitch = (cmd[7] & 0xffff) as u64;
    if header & FAST_COPY_SRC_TILING_MASK != 0 {
        src_pitch *= 4;
    }

    copy_rect(
        memory,
        dst,
        dst_pitch,
        &rect,
        src,
        src_pitch,
        src_x,
        src_y,
        fast_copy_cpp(dw1),
    )
}

fn color_fill(
    memory: &mut GpuMemory<'_>,
    cmd: &[u32],
    address_words: usize,
) -> Result<(), String> {
    let header = cmd[0];
    let br13 = cmd[1];
    let rect = Rect::from_words(cmd[2], cmd[3]);
    let dst = address(cmd, 4, address_words);
    let color = cmd[4 + address_words];

    let cpp = br13_cpp(br13);
    let mut pitch = (br13 & 0xffff) as u64;
    if header & XY_SRC_COPY_BLT_DST_TILED != 0 {
        pitch *= 4;
    }

    let pixel = &color.to_le_bytes()[..cpp];
    let row: Vec<u8> = pixel
        .iter()
        .copied()
        .cycle()
        .take(rect.width() as usize * cpp)
        .collect();

    for y in rect.y1..rect.y2 {
        memory.write(dst + y * pitch + rect.x1 * cpp as u64, &row)?;
    }
    Ok(())
}

fn store_dword(memory: &mut GpuMemory<'_>, cmd: &[u32], gen: u8) -> Result<(), String> {
    let (target, value) = if gen >= 8 {
        (address(cmd, 1, 2), cmd[3])
    } else {
        (cmd[2] as u64, cmd[3])
    };
    memory.write(target, &value.to_le_bytes())
}

/// Run a batch to completion
///
/// # Returns
///
/// Number of commands executed, or the reason the engine hung
pub(super) fn execute(memory: &mut GpuMemory<'_>, gen: u8, batch: &[u32]) -> Result<usize, String> {
    let address_words = if gen >= 8 { 2 } else { 1 };
    let mut at = 0;
    let mut executed = 0;

    while at < batch.len() {
        let header = batch[at];
        let len = command_length(header)
            .ok_or_else(|| format!("unknown command {:#010x} at dword {}", header, at))?;
        if at + len > batch.len() {
            return Err(format!(
                "command {:#010x} at dword {} runs past the batch",
                header, at
            ));
        }
        let cmd = &batch[at..at + len];
        executed += 1;

        match header >> 29 {
            CLIENT_MI => match (header >> 23) & 0x3f {
                MI_OPCODE_BATCH_BUFFER_END => {
                    log::trace!("MI_BATCH_BUFFER_END after {} commands", executed);
                    return Ok(executed);
                }
                MI_OPCODE_STORE_DWORD_IMM if len >= 4 => {
                    log::trace!("MI_STORE_DWORD_IMM");
                    store_dword(memory, cmd, gen)?;
                }
                _ => {}
            },
            CLIENT_2D => match (header >> 22) & 0x7f {
                BLT_OPCODE_SRC_COPY if len >= 6 + 2 * address_words => {
                    log::trace!("XY_SRC_COPY_BLT");
                    src_copy(memory, cmd, address_words)?;
                }
                BLT_OPCODE_COLOR if len >= 5 + address_words => {
                    log::trace!("XY_COLOR_BLT");
                    color_fill(memory, cmd, address_words)?;
                }
                BLT_OPCODE_FAST_COPY if len >= 10 => {
                    log::trace!("XY_FAST_COPY_BLT");
                    fast_copy(memory, cmd)?;
                }
                opcode => log::trace!("2D opcode {:#x} skipped", opcode),
            },
            _ => log::trace!("packet {:#010x} skipped", header),
        }

        at += len;
    }

    Err("ran off the end of the batch without MI_BATCH_BUFFER_END".to_string())
}
