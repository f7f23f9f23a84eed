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

//! Core engine components
//!
//! Leaves first:
//! - Buffer objects and their domain tracker ([`bo`])
//! - Batch stream builder ([`batch`])
//! - Relocation recorder ([`reloc`])
//! - Submission / execution bridge ([`exec`])
//!
//! Supporting modules cover the kernel interface ([`driver`]), the
//! per-generation emission tables ([`gen`]), device description and the
//! shared [`Context`] ([`device`]), configuration ([`config`]), blitter
//! helpers ([`blit`]) and submission traces ([`trace`]).

use std::sync::{Mutex, MutexGuard};

pub mod batch;
pub mod blit;
pub mod bo;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod exec;
pub mod gen;
pub mod reloc;
pub mod trace;

// Re-export commonly used types
pub use batch::BatchBuffer;
pub use bo::{BufferManager, BufferObject, Caching, Domain, Tiling};
pub use config::Config;
pub use device::{Context, DeviceInfo};
pub use driver::{Errno, GemDriver};
pub use error::{BuildError, GemError, Result};
pub use exec::{Completion, Engine, ExecBridge};
pub use gen::GenOps;

/// Lock a mutex, recovering the guard if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
