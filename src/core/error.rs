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

/// Error types for buffer management, batch construction and submission
use thiserror::Error;

use crate::core::bo::Tiling;
use crate::core::driver::Errno;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, GemError>;

/// Main error type for externally observable failures
///
/// Every failure that crosses the kernel boundary ends up here, carrying the
/// kernel's status code untranslated.
#[derive(Error, Debug)]
pub enum GemError {
    #[error("Buffer allocation of {size} bytes refused (errno {code})")]
    Allocation { size: u64, code: Errno },

    #[error("Command submission rejected by kernel (errno {0})")]
    CommandRejected(Errno),

    #[error("Wait on handle {handle} exceeded {timeout_ms} ms")]
    SynchronizationTimeout { handle: u32, timeout_ms: u64 },

    #[error("Invalid tiling {tiling:?} with stride {stride} on gen{gen}")]
    InvalidTiling { tiling: Tiling, stride: u32, gen: u8 },

    #[error("Kernel call {op} failed on handle {handle} (errno {code})")]
    Driver {
        op: &'static str,
        handle: u32,
        code: Errno,
    },

    #[error("Unsupported device id: {0:#06x}")]
    UnsupportedDevice(u16),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Trace error: {0}")]
    Trace(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Programmer defects detected while building a command stream
///
/// These are never returned to the caller. Continuing after one of them
/// would silently corrupt the stream, so they go through [`build_fault`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Cursor mismatch at end(): expected offset {expected}, got {actual}")]
    CursorMismatch { expected: usize, actual: usize },

    #[error("Cursor collision: command cursor {command} passed state cursor {state}")]
    CursorCollision { command: usize, state: usize },

    #[error("Emit past the window opened by begin() (window end {window_end})")]
    WindowOverrun { window_end: usize },

    #[error("Emit without an open begin() window")]
    WindowNotOpen,

    #[error("begin() while a window is already open")]
    WindowAlreadyOpen,

    #[error("More relocations than reserved by begin() ({reserved})")]
    RelocationOverrun { reserved: usize },

    #[error("Relocation offset {offset} is not 4-byte aligned")]
    UnalignedRelocation { offset: usize },

    #[error("Relocation offset {offset} outside the stream ({len} bytes)")]
    RelocationOutOfBounds { offset: usize, len: usize },

    #[error("Relocation target handle {handle} belongs to another buffer manager")]
    ForeignTarget { handle: u32 },

    #[error("State range {offset}+{len} outside the allocated state region")]
    StateOutOfBounds { offset: usize, len: usize },

    #[error("Alignment {alignment} is not a power of two")]
    InvalidAlignment { alignment: usize },

    #[error("Flush while a begin() window is open")]
    FlushInsideWindow,

    #[error("Request of {requested} bytes can never fit a {capacity}-byte batch")]
    RequestTooLarge { requested: usize, capacity: usize },

    #[error("Invalid blit parameters: {0}")]
    InvalidBlit(String),
}

/// Abort on a build-time invariant violation
///
/// Logs the fault and panics. Used for every [`BuildError`].
#[track_caller]
pub fn build_fault(error: BuildError) -> ! {
    log::error!("batch build fault: {}", error);
    panic!("{}", error);
}
