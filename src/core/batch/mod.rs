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

//! Batch stream builder
//!
//! A batch stream is a fixed-capacity byte buffer holding two regions:
//!
//! ```text
//! 0                cursor          state_cursor         capacity
//! |-- commands --> |     free      | <-- state ----------|
//! ```
//!
//! Commands grow from the start; indirect state (surface state, descriptor
//! tables, kernels) is carved from the end. The command cursor never passes
//! the state cursor.
//!
//! Commands are written in windows: [`BatchBuffer::begin`] reserves an exact
//! number of dwords (and relocations), the caller emits them, and
//! [`BatchBuffer::end`] checks that exactly that many were written. If a
//! window does not fit, `begin` submits what has been built so far and
//! starts an empty stream, so an arbitrarily long sequence of commands turns
//! into several independent submissions.
//!
//! Misuse of the window contract is a programmer error and aborts through
//! [`build_fault`]. Only kernel-facing failures are returned as errors.
//!
//! # Example
//!
//! ```
//! use gemkit::core::gen::{MI_NOOP, MI_FLUSH_DW};
//! use gemkit::core::{Config, Context, DeviceInfo};
//!
//! let ctx = Context::simulated(DeviceInfo::for_gen(7), Config::default()).unwrap();
//! let mut batch = ctx.batch().unwrap();
//!
//! batch.begin(2, 0).unwrap();
//! batch.emit_word(MI_NOOP);
//! batch.emit_word(MI_NOOP);
//! batch.end();
//!
//! let done = batch.flush().unwrap().unwrap();
//! ctx.bridge().wait(&done).unwrap();
//! ```

use crate::core::bo::{BufferObject, Domain};
use crate::core::device::Context;
use crate::core::error::{build_fault, BuildError, Result};
use crate::core::exec::{Completion, Engine, Submission};
use crate::core::gen::{EmitOps, SurfaceDesc, MI_BATCH_BUFFER_END, MI_NOOP};
use crate::core::reloc::{write_address, RelocationEntry, RelocationRecorder};

#[cfg(test)]
mod tests;

/// Open `begin()` window
#[derive(Debug, Clone, Copy)]
struct Window {
    /// Byte offset the cursor must reach at `end()`
    end: usize,
    relocations: usize,
    relocations_used: usize,
}

/// Command stream under construction
pub struct BatchBuffer<'a> {
    ctx: &'a Context,
    buffer: Vec<u8>,
    cursor: usize,
    state_cursor: usize,
    window: Option<Window>,
    recorder: RelocationRecorder,
    bo: BufferObject,
    engine: Engine,
    submissions: usize,
}

impl<'a> BatchBuffer<'a> {
    /// Create an empty stream on the context's device
    ///
    /// # Errors
    ///
    /// `GemError::Allocation` if the stream's buffer object cannot be
    /// created.
    pub fn new(ctx: &'a Context) -> Result<Self> {
        let capacity = ctx.config().batch_size;
        let bo = ctx.bufmgr().allocate("batch", capacity as u64, 4096)?;

        Ok(Self {
            ctx,
            buffer: vec![0; capacity],
            cursor: 0,
            state_cursor: capacity,
            window: None,
            recorder: RelocationRecorder::new(ctx.bufmgr().id(), ctx.address_words()),
            bo,
            engine: ctx.config().default_engine,
            submissions: 0,
        })
    }

    /// Device context the stream is built for
    pub fn context(&self) -> &'a Context {
        self.ctx
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes of commands emitted so far
    pub fn used(&self) -> usize {
        self.cursor
    }

    /// Bytes of state allocated so far
    pub fn state_used(&self) -> usize {
        self.capacity() - self.state_cursor
    }

    /// Command cursor position
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// State cursor position
    pub fn state_cursor(&self) -> usize {
        self.state_cursor
    }

    /// Bytes still available to a new `begin()` window
    pub fn space(&self) -> usize {
        self.state_cursor
            .saturating_sub(self.cursor + self.ctx.config().batch_reserved)
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0 && self.state_cursor == self.capacity() && self.recorder.is_empty()
    }

    /// Streams submitted by this builder so far
    pub fn submissions(&self) -> usize {
        self.submissions
    }

    pub fn relocations(&self) -> &[RelocationEntry] {
        self.recorder.entries()
    }

    /// Buffer object the current stream will be uploaded to
    pub fn bo(&self) -> &BufferObject {
        &self.bo
    }

    /// Raw stream contents
    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    /// Engine used by [`BatchBuffer::flush`] and auto-flushes
    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn set_engine(&mut self, engine: Engine) {
        self.engine = engine;
    }

    fn address_words(&self) -> usize {
        self.recorder.address_words()
    }

    /// Lowest offset state may be carved at
    fn command_limit(&self) -> usize {
        let end = self.window.map_or(self.cursor, |w| w.end.max(self.cursor));
        end + self.ctx.config().batch_reserved
    }

    fn fits(&self, bytes: usize, relocations: usize) -> bool {
        bytes <= self.space()
            && self.recorder.len() + relocations <= self.ctx.config().max_relocations
    }

    /// Open a window of exactly `word_count` dwords
    ///
    /// If the window or its relocations do not fit, the current stream is
    /// submitted first and the window opens on a fresh stream. This blocks
    /// until the kernel accepts the flushed stream.
    ///
    /// # Arguments
    ///
    /// * `word_count` - Dwords that will be emitted before `end()`
    /// * `max_relocations` - Relocations that will be emitted in the window
    ///
    /// # Errors
    ///
    /// Kernel errors from the implicit flush
    pub fn begin(&mut self, word_count: usize, max_relocations: usize) -> Result<()> {
        if self.window.is_some() {
            build_fault(BuildError::WindowAlreadyOpen);
        }

        let bytes = word_count * 4;
        let max_total = self.ctx.config().max_relocations;

        if max_relocations > max_total {
            build_fault(BuildError::RelocationOverrun {
                reserved: max_total,
            });
        }

        if !self.fits(bytes, max_relocations) {
            if !self.is_empty() {
                log::debug!(
                    "auto-flush: {} bytes requested, {} available, {} relocs pending",
                    bytes,
                    self.space(),
                    self.recorder.len()
                );
                self.flush_on_engine(self.engine)?;
            }

            if !self.fits(bytes, max_relocations) {
                build_fault(BuildError::RequestTooLarge {
                    requested: bytes,
                    capacity: self.space(),
                });
            }
        }

        self.window = Some(Window {
            end: self.cursor + bytes,
            relocations: max_relocations,
            relocations_used: 0,
        });
        Ok(())
    }

    fn reserve(&mut self, bytes: usize) -> Window {
        let Some(window) = self.window else {
            build_fault(BuildError::WindowNotOpen);
        };
        if self.cursor + bytes > window.end {
            build_fault(BuildError::WindowOverrun {
                window_end: window.end,
            });
        }
        window
    }

    /// Append one dword inside the open window
    pub fn emit_word(&mut self, value: u32) {
        self.reserve(4);
        self.buffer[self.cursor..self.cursor + 4].copy_from_slice(&value.to_le_bytes());
        self.cursor += 4;
    }

    pub fn emit_words(&mut self, values: &[u32]) {
        self.reserve(values.len() * 4);
        for &value in values {
            self.emit_word(value);
        }
    }

    /// Append a reference to another object's address
    ///
    /// Writes the target's presumed address plus `delta` (two dwords on
    /// gen8+) and records the slot for relocation. `fenced` requests a fence
    /// register for tiled access.
    pub fn emit_relocation(
        &mut self,
        target: &BufferObject,
        delta: u32,
        read_domains: Domain,
        write_domain: Domain,
        fenced: bool,
    ) {
        let words = self.address_words();
        let window = self.reserve(words * 4);

        if window.relocations_used >= window.relocations {
            build_fault(BuildError::RelocationOverrun {
                reserved: window.relocations,
            });
        }

        let offset = self.cursor;
        let address = self.recorder.record(
            offset,
            window.end,
            target,
            delta,
            read_domains,
            write_domain,
            fenced,
        );
        write_address(&mut self.buffer, offset, address, words);
        self.cursor += words * 4;

        if let Some(window) = self.window.as_mut() {
            window.relocations_used += 1;
        }
    }

    /// Close the window, checking every reserved dword was emitted
    pub fn end(&mut self) {
        let Some(window) = self.window.take() else {
            build_fault(BuildError::WindowNotOpen);
        };
        if self.cursor != window.end {
            build_fault(BuildError::CursorMismatch {
                expected: window.end,
                actual: self.cursor,
            });
        }
    }

    /// Carve `size` bytes from the state region
    ///
    /// # Returns
    ///
    /// Byte offset of the allocation in the stream
    pub fn allocate_state(&mut self, size: usize, alignment: usize) -> usize {
        let alignment = alignment.max(1);
        if !alignment.is_power_of_two() {
            build_fault(BuildError::InvalidAlignment { alignment });
        }

        let limit = self.command_limit();
        let start = self
            .state_cursor
            .checked_sub(size)
            .map(|start| start & !(alignment - 1));

        match start {
            Some(start) if start >= limit => {
                self.state_cursor = start;
                start
            }
            _ => build_fault(BuildError::CursorCollision {
                command: limit,
                state: start.unwrap_or(0),
            }),
        }
    }

    /// Copy `data` into a fresh state allocation
    pub fn copy_state(&mut self, data: &[u8], alignment: usize) -> usize {
        let offset = self.allocate_state(data.len(), alignment);
        self.buffer[offset..offset + data.len()].copy_from_slice(data);
        offset
    }

    /// Mutable view of allocated state
    pub fn state_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        if offset < self.state_cursor || offset + len > self.capacity() {
            build_fault(BuildError::StateOutOfBounds { offset, len });
        }
        &mut self.buffer[offset..offset + len]
    }

    pub fn write_state_words(&mut self, offset: usize, words: &[u32]) {
        let state = self.state_mut(offset, words.len() * 4);
        for (chunk, word) in state.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
    }

    /// Record a relocation for an address slot inside the state region
    pub fn relocate_state(
        &mut self,
        offset: usize,
        target: &BufferObject,
        delta: u32,
        read_domains: Domain,
        write_domain: Domain,
    ) {
        let words = self.address_words();
        self.state_mut(offset, words * 4);

        let max_total = self.ctx.config().max_relocations;
        let reserved = self.window.map_or(0, |w| w.relocations - w.relocations_used);
        if self.recorder.len() + reserved >= max_total {
            build_fault(BuildError::RelocationOverrun {
                reserved: max_total,
            });
        }

        let capacity = self.capacity();
        let address = self.recorder.record(
            offset,
            capacity,
            target,
            delta,
            read_domains,
            write_domain,
            false,
        );
        write_address(&mut self.buffer, offset, address, words);
    }

    /// Write surface state for `target` and relocate its base address
    ///
    /// # Returns
    ///
    /// Offset of the surface state in the stream
    pub fn bind_surface(
        &mut self,
        target: &BufferObject,
        desc: &SurfaceDesc,
        read_domains: Domain,
        write_domain: Domain,
    ) -> usize {
        let ops = *self.ctx.ops();
        let offset = self.allocate_state(ops.surface_state_size(), ops.surface_state_alignment());

        let desc = SurfaceDesc {
            base_address: 0,
            ..*desc
        };
        self.write_state_words(offset, &ops.encode_surface_state(&desc));
        self.relocate_state(
            offset + ops.surface_base_dword() * 4,
            target,
            0,
            read_domains,
            write_domain,
        );

        offset
    }

    /// Submit the stream on the default engine if it holds anything
    pub fn flush(&mut self) -> Result<Option<Completion>> {
        self.flush_on_engine(self.engine)
    }

    /// Submit the stream on `engine` if it holds anything
    pub fn flush_on_engine(&mut self, engine: Engine) -> Result<Option<Completion>> {
        if self.is_empty() {
            return Ok(None);
        }
        self.finish(engine).map(Some)
    }

    /// Terminate the stream, submit it on `engine` and start a new one
    ///
    /// An empty stream is submitted as a bare end-of-batch marker. The
    /// buffer object for the next stream is allocated before anything is
    /// sent; if that fails the current stream is left untouched.
    ///
    /// # Errors
    ///
    /// `GemError::Allocation` before submission, or the kernel's rejection.
    /// A rejected stream is discarded.
    pub fn finish(&mut self, engine: Engine) -> Result<Completion> {
        if self.window.is_some() {
            build_fault(BuildError::FlushInsideWindow);
        }

        let ctx = self.ctx;
        ctx.bridge().retire();
        let next = ctx
            .bufmgr()
            .allocate("batch", self.capacity() as u64, 4096)?;

        if self.cursor & 4 == 0 {
            self.put_tail_word(MI_NOOP);
        }
        self.put_tail_word(MI_BATCH_BUFFER_END);

        if ctx.config().optimistic_relocations {
            self.recorder
                .resolve_locally(ctx.bufmgr().addresses(), &mut self.buffer);
        }

        let used = self.cursor;
        let result = self.bo.write(0, &self.buffer).and_then(|()| {
            let submission = Submission::new(self.bo.clone(), used, self.recorder.take(), engine);
            ctx.bridge().submit(submission)
        });

        self.reset(next);
        let completion = result?;
        self.submissions += 1;
        Ok(completion)
    }

    fn put_tail_word(&mut self, value: u32) {
        if self.cursor + 4 > self.state_cursor {
            build_fault(BuildError::CursorCollision {
                command: self.cursor + 4,
                state: self.state_cursor,
            });
        }
        self.buffer[self.cursor..self.cursor + 4].copy_from_slice(&value.to_le_bytes());
        self.cursor += 4;
    }

    fn reset(&mut self, bo: BufferObject) {
        self.buffer.fill(0);
        self.cursor = 0;
        self.state_cursor = self.capacity();
        self.recorder.take();
        self.bo = bo;
    }
}

impl Drop for BatchBuffer<'_> {
    fn drop(&mut self) {
        if self.cursor > 0 {
            log::debug!("discarding {} unsubmitted command bytes", self.cursor);
        }
    }
}
