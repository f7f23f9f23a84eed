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

//! Buffer objects and their allocator
//!
//! A buffer object (BO) is a block of GPU-addressable memory named by an
//! opaque kernel handle. This module owns their lifecycle:
//!
//! - [`BufferManager`] allocates objects through the kernel collaborator.
//! - [`BufferObject`] is a cheap, clonable reference. Every pending
//!   submission that references an object holds a clone, so the kernel
//!   handle is closed only once the last referencing submission retires and
//!   the caller has dropped its own copies.
//! - Tiling, caching and domain state are tracked per object.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use gemkit::core::bo::BufferManager;
//! use gemkit::core::driver::{SimConfig, SimDriver};
//! use gemkit::core::reloc::AddressTable;
//!
//! let driver = Arc::new(SimDriver::new(SimConfig::for_gen(8)));
//! let bufmgr = BufferManager::new(driver, 8, Arc::new(AddressTable::new()));
//!
//! let bo = bufmgr.allocate("scratch", 4096, 4096).unwrap();
//! bo.write(0, &[1, 2, 3, 4]).unwrap();
//!
//! let mut data = [0u8; 4];
//! bo.read(0, &mut data).unwrap();
//! assert_eq!(data, [1, 2, 3, 4]);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::driver::{Errno, GemDriver};
use crate::core::error::{GemError, Result};
use crate::core::lock;
use crate::core::reloc::AddressTable;

mod domain;
#[cfg(test)]
mod tests;
mod tiling;

pub use domain::{Domain, DomainState, DomainTransition};
pub use tiling::{max_stride, stride_is_valid, Caching, Tiling};

/// Default object alignment when the caller passes 0
pub const DEFAULT_ALIGNMENT: u64 = 4096;

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Allocator for buffer objects on one device
pub struct BufferManager {
    id: u64,
    gen: u8,
    driver: Arc<dyn GemDriver>,
    addresses: Arc<AddressTable>,
}

impl BufferManager {
    /// Create a buffer manager on top of a kernel collaborator
    ///
    /// # Arguments
    ///
    /// * `driver` - Kernel collaborator
    /// * `gen` - Hardware generation, used for tiling validation
    /// * `addresses` - Table of last known GPU addresses shared with the
    ///   execution bridge
    pub fn new(driver: Arc<dyn GemDriver>, gen: u8, addresses: Arc<AddressTable>) -> Self {
        Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            gen,
            driver,
            addresses,
        }
    }

    /// Unique id of this manager
    ///
    /// Relocations may only target objects from the same manager.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn gen(&self) -> u8 {
        self.gen
    }

    pub fn addresses(&self) -> &Arc<AddressTable> {
        &self.addresses
    }

    pub fn driver(&self) -> &Arc<dyn GemDriver> {
        &self.driver
    }

    /// Allocate a new buffer object
    ///
    /// # Arguments
    ///
    /// * `name` - Debug name
    /// * `size` - Size in bytes
    /// * `alignment` - Required GPU address alignment (0 selects 4096)
    ///
    /// # Errors
    ///
    /// `GemError::Allocation` if the size or alignment is unusable or the
    /// kernel refuses the request. Allocation failures are not retried.
    pub fn allocate(&self, name: &str, size: u64, alignment: u64) -> Result<BufferObject> {
        let alignment = if alignment == 0 {
            DEFAULT_ALIGNMENT
        } else {
            alignment
        };

        if size == 0 || !alignment.is_power_of_two() {
            return Err(GemError::Allocation {
                size,
                code: Errno::EINVAL,
            });
        }

        let handle = self
            .driver
            .create(size)
            .map_err(|code| GemError::Allocation { size, code })?;

        log::trace!(
            "BO {} '{}' created: {} bytes, align {:#x}",
            handle,
            name,
            size,
            alignment
        );

        Ok(BufferObject {
            inner: Arc::new(BoInner {
                handle,
                size,
                alignment,
                name: name.to_string(),
                manager_id: self.id,
                gen: self.gen,
                layout: Mutex::new((Tiling::None, 0)),
                caching: Mutex::new(Caching::default()),
                domains: Mutex::new(DomainState::default()),
                driver: Arc::clone(&self.driver),
                addresses: Arc::clone(&self.addresses),
            }),
        })
    }

    /// Change an object's tiling, see [`BufferObject::set_tiling`]
    pub fn set_tiling(&self, bo: &BufferObject, tiling: Tiling, stride: u32) -> Result<()> {
        bo.set_tiling(tiling, stride)
    }

    /// Record an access, see [`BufferObject::transition_domain`]
    pub fn transition_domain(
        &self,
        bo: &BufferObject,
        read: Domain,
        write: Domain,
    ) -> DomainTransition {
        bo.transition_domain(read, write)
    }
}

struct BoInner {
    handle: u32,
    size: u64,
    alignment: u64,
    name: String,
    manager_id: u64,
    gen: u8,

    /// (tiling, stride)
    layout: Mutex<(Tiling, u32)>,
    caching: Mutex<Caching>,
    domains: Mutex<DomainState>,

    driver: Arc<dyn GemDriver>,
    addresses: Arc<AddressTable>,
}

impl Drop for BoInner {
    fn drop(&mut self) {
        self.addresses.forget(self.handle);
        match self.driver.close(self.handle) {
            Ok(()) => log::trace!("BO {} '{}' destroyed", self.handle, self.name),
            Err(code) => log::warn!("close of BO {} failed: {}", self.handle, code),
        }
    }
}

/// Shared reference to a buffer object
///
/// Cloning is cheap and extends the object's lifetime.
#[derive(Clone)]
pub struct BufferObject {
    inner: Arc<BoInner>,
}

impl fmt::Debug for BufferObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (tiling, stride) = *lock(&self.inner.layout);
        f.debug_struct("BufferObject")
            .field("handle", &self.inner.handle)
            .field("name", &self.inner.name)
            .field("size", &self.inner.size)
            .field("tiling", &tiling)
            .field("stride", &stride)
            .finish()
    }
}

impl BufferObject {
    pub fn handle(&self) -> u32 {
        self.inner.handle
    }

    pub fn size(&self) -> u64 {
        self.inner.size
    }

    pub fn alignment(&self) -> u64 {
        self.inner.alignment
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Id of the manager that allocated this object
    pub fn manager_id(&self) -> u64 {
        self.inner.manager_id
    }

    pub fn tiling(&self) -> Tiling {
        lock(&self.inner.layout).0
    }

    pub fn stride(&self) -> u32 {
        lock(&self.inner.layout).1
    }

    pub fn caching(&self) -> Caching {
        *lock(&self.inner.caching)
    }

    /// Current domain bookkeeping
    pub fn domain_state(&self) -> DomainState {
        *lock(&self.inner.domains)
    }

    /// Last GPU address observed from a retired submission
    pub fn presumed_address(&self) -> Option<u64> {
        self.inner.addresses.lookup(self.inner.handle)
    }

    /// Number of live references, including pending submissions
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether both references name the same object
    pub fn same_object(&self, other: &BufferObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Record an access in the domain tracker
    ///
    /// Pure bookkeeping. Returns the flushes the access implies; nothing
    /// reaches the kernel until submission.
    pub fn transition_domain(&self, read: Domain, write: Domain) -> DomainTransition {
        lock(&self.inner.domains).transition(read, write)
    }

    /// Write bytes into the object
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.transition_domain(Domain::CPU, Domain::CPU);
        self.inner
            .driver
            .pwrite(self.inner.handle, offset, data)
            .map_err(|code| self.driver_error("pwrite", code))
    }

    /// Read bytes from the object
    ///
    /// Synchronizes with any pending GPU write.
    pub fn read(&self, offset: u64, data: &mut [u8]) -> Result<()> {
        self.transition_domain(Domain::CPU, Domain::empty());
        self.inner
            .driver
            .pread(self.inner.handle, offset, data)
            .map_err(|code| self.driver_error("pread", code))
    }

    /// Write native-endian words starting at byte 0
    pub fn write_words(&self, words: &[u32]) -> Result<()> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.write(0, &bytes)
    }

    /// Read the whole object as little-endian words
    pub fn read_words(&self) -> Result<Vec<u32>> {
        let mut bytes = vec![0u8; self.inner.size as usize];
        self.read(0, &mut bytes)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Fill the whole object with one repeated word
    pub fn fill_words(&self, value: u32) -> Result<()> {
        let words = vec![value; (self.inner.size / 4) as usize];
        self.write_words(&words)
    }

    /// Run `f` with a CPU mapping of the whole object
    pub fn map<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut [u8]),
    {
        self.inner
            .driver
            .set_domain(self.inner.handle, Domain::CPU, Domain::CPU)
            .map_err(|code| self.driver_error("set_domain", code))?;
        self.transition_domain(Domain::CPU, Domain::CPU);
        self.inner
            .driver
            .with_mapping(self.inner.handle, &mut f)
            .map_err(|code| self.driver_error("mmap", code))
    }

    /// Whether a pending submission still references the object
    pub fn is_busy(&self) -> Result<bool> {
        self.inner
            .driver
            .busy(self.inner.handle)
            .map_err(|code| self.driver_error("busy", code))
    }

    /// Block until no pending submission references the object
    pub fn wait_idle(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner
            .driver
            .wait(self.inner.handle, timeout)
            .map_err(|code| match code {
                Errno::ETIME => GemError::SynchronizationTimeout {
                    handle: self.inner.handle,
                    timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
                },
                code => self.driver_error("wait", code),
            })
    }

    /// Change the tiling layout
    ///
    /// This is a synchronization barrier: it blocks until every pending
    /// submission referencing the object has retired, then applies the
    /// change. The object's last known address is dropped since a tiling
    /// change may rebind it.
    ///
    /// # Errors
    ///
    /// `GemError::InvalidTiling` if the stride violates the generation's
    /// granularity. Nothing is waited on in that case.
    pub fn set_tiling(&self, tiling: Tiling, stride: u32) -> Result<()> {
        let stride = if tiling.is_tiled() { stride } else { 0 };

        if !stride_is_valid(self.inner.gen, tiling, stride) {
            return Err(GemError::InvalidTiling {
                tiling,
                stride,
                gen: self.inner.gen,
            });
        }

        if *lock(&self.inner.layout) == (tiling, stride) {
            return Ok(());
        }

        loop {
            if self.is_busy()? {
                log::debug!(
                    "BO {}: waiting for GPU before tiling change to {:?}",
                    self.inner.handle,
                    tiling
                );
            }
            self.wait_idle(None)?;

            match self.inner.driver.set_tiling(self.inner.handle, tiling, stride) {
                Ok(()) => break,
                // Someone queued new work between the wait and the change.
                Err(Errno::EBUSY) => continue,
                Err(code) => return Err(self.driver_error("set_tiling", code)),
            }
        }

        *lock(&self.inner.layout) = (tiling, stride);
        self.inner.addresses.invalidate(self.inner.handle);
        log::debug!(
            "BO {}: tiling {:?}, stride {}",
            self.inner.handle,
            tiling,
            stride
        );
        Ok(())
    }

    /// Change the CPU caching mode
    pub fn set_caching(&self, caching: Caching) -> Result<()> {
        self.inner
            .driver
            .set_caching(self.inner.handle, caching)
            .map_err(|code| self.driver_error("set_caching", code))?;
        *lock(&self.inner.caching) = caching;
        Ok(())
    }

    fn driver_error(&self, op: &'static str, code: Errno) -> GemError {
        GemError::Driver {
            op,
            handle: self.inner.handle,
            code,
        }
    }
}
