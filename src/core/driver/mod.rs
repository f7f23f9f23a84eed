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

//! Kernel collaborator interface
//!
//! Everything the engine asks of the kernel graphics driver goes through the
//! [`GemDriver`] trait. Each call takes a buffer handle plus parameters and
//! returns either a result or a raw errno, exactly as the ioctl layer would.
//!
//! # Calls
//!
//! | Call          | Purpose                                          |
//! |---------------|--------------------------------------------------|
//! | `create`      | Allocate a buffer object, returns its handle     |
//! | `close`       | Drop the caller's reference to a handle          |
//! | `pwrite`      | Copy bytes into an object                        |
//! | `pread`       | Copy bytes out of an object                      |
//! | `with_mapping`| Scoped CPU mapping of an object                  |
//! | `set_tiling`  | Change the tiling layout                         |
//! | `set_caching` | Change the CPU caching mode                      |
//! | `set_domain`  | Move an object into a CPU-visible domain         |
//! | `execbuffer`  | Submit a batch for execution                     |
//! | `wait`        | Block until an object is idle                    |
//! | `busy`        | Poll whether an object is referenced by the GPU  |
//!
//! The [`sim`] module provides a software implementation with asynchronous
//! engines.

use std::fmt;
use std::time::Duration;

use crate::core::bo::{Caching, Domain, Tiling};
use crate::core::exec::ExecBuffer;

pub mod sim;

pub use sim::{ObjectInfo, SimConfig, SimDriver, SubmissionRecord};

/// Raw kernel status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

impl Errno {
    pub const ENOENT: Errno = Errno(2);
    pub const EIO: Errno = Errno(5);
    pub const ENOMEM: Errno = Errno(12);
    pub const EFAULT: Errno = Errno(14);
    pub const EBUSY: Errno = Errno(16);
    pub const EINVAL: Errno = Errno(22);
    pub const ENOSPC: Errno = Errno(28);
    pub const EDEADLK: Errno = Errno(35);
    pub const ETIME: Errno = Errno(62);

    /// Symbolic name, if known
    pub fn name(&self) -> Option<&'static str> {
        match *self {
            Self::ENOENT => Some("ENOENT"),
            Self::EIO => Some("EIO"),
            Self::ENOMEM => Some("ENOMEM"),
            Self::EFAULT => Some("EFAULT"),
            Self::EBUSY => Some("EBUSY"),
            Self::EINVAL => Some("EINVAL"),
            Self::ENOSPC => Some("ENOSPC"),
            Self::EDEADLK => Some("EDEADLK"),
            Self::ETIME => Some("ETIME"),
            _ => None,
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", self.0, name),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Result of a kernel call
pub type DriverResult<T> = std::result::Result<T, Errno>;

/// Kernel graphics driver interface
///
/// Implementations must be shareable across threads: several submitters may
/// drive the same device concurrently, and the kernel serializes admission
/// per engine.
pub trait GemDriver: Send + Sync {
    /// Allocate a new buffer object of `size` bytes
    fn create(&self, size: u64) -> DriverResult<u32>;

    /// Release a handle
    fn close(&self, handle: u32) -> DriverResult<()>;

    /// Write `data` into the object at byte `offset`
    fn pwrite(&self, handle: u32, offset: u64, data: &[u8]) -> DriverResult<()>;

    /// Read `data.len()` bytes from the object at byte `offset`
    fn pread(&self, handle: u32, offset: u64, data: &mut [u8]) -> DriverResult<()>;

    /// Run `f` with a CPU mapping of the whole object
    ///
    /// `f` may call back into the driver. Writes to the same object made
    /// that way while the mapping is open are lost when it closes.
    fn with_mapping(&self, handle: u32, f: &mut dyn FnMut(&mut [u8])) -> DriverResult<()>;

    /// Change the tiling mode and stride
    fn set_tiling(&self, handle: u32, tiling: Tiling, stride: u32) -> DriverResult<()>;

    /// Query the tiling mode and stride
    fn get_tiling(&self, handle: u32) -> DriverResult<(Tiling, u32)>;

    /// Change the CPU caching mode
    fn set_caching(&self, handle: u32, caching: Caching) -> DriverResult<()>;

    /// Move the object into the given domains for CPU access
    fn set_domain(&self, handle: u32, read: Domain, write: Domain) -> DriverResult<()>;

    /// Submit a batch
    ///
    /// On success the kernel writes back the final object offsets and the
    /// presumed address of every relocation it resolved.
    fn execbuffer(&self, request: &mut ExecBuffer) -> DriverResult<()>;

    /// Block until no pending submission references `handle`
    ///
    /// Fails with `ETIME` if `timeout` elapses first.
    fn wait(&self, handle: u32, timeout: Option<Duration>) -> DriverResult<()>;

    /// Whether any pending submission references `handle`
    fn busy(&self, handle: u32) -> DriverResult<bool>;
}
