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

//! Simulated GEM driver
//!
//! A software kernel collaborator with the same observable contract as the
//! real driver: opaque handles, a GPU address space, kernel-side validation
//! and relocation of submissions, and engines that execute asynchronously
//! on their own threads.
//!
//! # Test hooks
//!
//! | Hook                  | Purpose                                           |
//! |-----------------------|---------------------------------------------------|
//! | `stall` / `resume`    | Hold an engine's queue to keep work pending       |
//! | `migrate`             | Move an idle object so presumed addresses go stale|
//! | `submissions`         | Every execbuffer call with its verdict            |
//! | `exec_count`          | Batches executed                                  |
//! | `hang_count`          | Batches that hung the engine                      |
//! | `object_offset`       | Current binding of an object                      |

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{DriverResult, Errno, GemDriver};
use crate::core::bo::{stride_is_valid, Caching, Domain, Tiling};
use crate::core::device::DeviceInfo;
use crate::core::exec::{Engine, ExecBuffer, ExecFlags, ExecObjectFlags};
use crate::core::lock;
use crate::core::reloc::write_address;

mod aperture;
mod blitter;
mod engine;
#[cfg(test)]
mod tests;

use aperture::Aperture;

/// Simulator parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    pub gen: u8,
    /// Physical engines to run
    pub engines: Vec<Engine>,
    /// Total bytes of object storage
    pub memory_budget: u64,
    /// Size of the GPU address space
    pub aperture_size: u64,
    pub fence_slots: usize,
    /// Reject `NO_RELOC` submissions naming an object that moved
    pub strict_no_reloc: bool,
}

impl SimConfig {
    pub fn for_gen(gen: u8) -> Self {
        Self::for_device(&DeviceInfo::for_gen(gen))
    }

    pub fn for_device(info: &DeviceInfo) -> Self {
        let engines = [Engine::Render, Engine::Bsd, Engine::Blt, Engine::Vebox]
            .into_iter()
            .filter(|&engine| info.has_engine(engine))
            .collect();

        Self {
            gen: info.gen,
            engines,
            memory_budget: 512 << 20,
            aperture_size: 256 << 20,
            fence_slots: info.fence_slots(),
            strict_no_reloc: true,
        }
    }
}

/// One execbuffer call as seen by the simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub engine: Option<Engine>,
    pub flags: u64,
    pub batch_len: u32,
    pub handles: Vec<u32>,
    pub relocation_count: usize,
    pub result: DriverResult<()>,
}

/// Snapshot of an object's kernel-side state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
    pub tiling: Tiling,
    pub stride: u32,
    pub caching: Caching,
    pub read_domains: Domain,
    pub write_domain: Domain,
    pub offset: Option<u64>,
    pub busy: bool,
}

pub(super) struct Object {
    data: Vec<u8>,
    tiling: Tiling,
    stride: u32,
    caching: Caching,
    read_domains: Domain,
    write_domain: Domain,
    /// Queued or executing batches referencing the object
    active: usize,
    /// Handle released while still active
    closed: bool,
}

struct Job {
    seqno: u64,
    batch: u32,
    start: usize,
    len: usize,
    handles: Vec<u32>,
}

struct SimState {
    objects: HashMap<u32, Object>,
    next_handle: u32,
    allocated: u64,
    aperture: Aperture,
    queues: HashMap<Engine, VecDeque<Job>>,
    stalled: HashSet<Engine>,
    submissions: Vec<SubmissionRecord>,
    next_seqno: u64,
    exec_count: u64,
    hang_count: u64,
    shutdown: bool,
}

impl SimState {
    fn object(&self, handle: u32) -> DriverResult<&Object> {
        match self.objects.get(&handle) {
            Some(object) if !object.closed => Ok(object),
            _ => Err(Errno::ENOENT),
        }
    }

    fn object_mut(&mut self, handle: u32) -> DriverResult<&mut Object> {
        match self.objects.get_mut(&handle) {
            Some(object) if !object.closed => Ok(object),
            _ => Err(Errno::ENOENT),
        }
    }

    fn free(&mut self, handle: u32) {
        if let Some(object) = self.objects.remove(&handle) {
            self.allocated -= object.data.len() as u64;
            self.aperture.unbind(handle);
        }
    }

    fn batch_words(&self, job: &Job) -> Vec<u32> {
        let Some(object) = self.objects.get(&job.batch) else {
            return Vec::new();
        };
        let end = (job.start + job.len).min(object.data.len());
        object.data[job.start.min(end)..end]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn retire_job(&mut self, job: &Job) {
        for &handle in &job.handles {
            let release = match self.objects.get_mut(&handle) {
                Some(object) => {
                    object.active = object.active.saturating_sub(1);
                    object.active == 0 && object.closed
                }
                None => false,
            };
            if release {
                self.free(handle);
            }
        }
    }

    /// Bind an object for a submission, evicting idle objects if needed
    fn bind(
        &mut self,
        handle: u32,
        presumed: u64,
        alignment: u64,
        pinned: &HashSet<u32>,
    ) -> DriverResult<u64> {
        let size = self.object(handle)?.data.len() as u64;
        let alignment = alignment.max(1);

        if let Some(offset) = self.aperture.offset_of(handle) {
            if offset % alignment == 0 {
                return Ok(offset);
            }
        }

        if presumed != 0 && presumed % alignment == 0 && self.aperture.is_free(presumed, size) {
            self.aperture.bind(handle, presumed, size);
            return Ok(presumed);
        }

        loop {
            if let Some(offset) = self.aperture.find_free(size, alignment) {
                self.aperture.bind(handle, offset, size);
                return Ok(offset);
            }

            let victim = self.aperture.bound().into_iter().find(|h| {
                !pinned.contains(h) && self.objects.get(h).is_some_and(|o| o.active == 0)
            });
            match victim {
                Some(victim) => {
                    log::debug!("sim: evicting BO {} to bind BO {}", victim, handle);
                    self.aperture.unbind(victim);
                }
                None => return Err(Errno::ENOSPC),
            }
        }
    }
}

struct Shared {
    state: Mutex<SimState>,
    cond: Condvar,
    config: SimConfig,
}

impl Shared {
    fn wait_idle<'a>(
        &'a self,
        mut state: MutexGuard<'a, SimState>,
        handle: u32,
        timeout: Option<Duration>,
    ) -> DriverResult<MutexGuard<'a, SimState>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        while state.object(handle)?.active > 0 {
            state = match deadline {
                None => self
                    .cond
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Errno::ETIME);
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
        Ok(state)
    }
}

/// Software GEM driver with asynchronous engines
pub struct SimDriver {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl SimDriver {
    pub fn new(config: SimConfig) -> Self {
        let queues = config
            .engines
            .iter()
            .map(|&engine| (engine, VecDeque::new()))
            .collect();

        let shared = Arc::new(Shared {
            state: Mutex::new(SimState {
                objects: HashMap::new(),
                next_handle: 1,
                allocated: 0,
                aperture: Aperture::new(config.aperture_size),
                queues,
                stalled: HashSet::new(),
                submissions: Vec::new(),
                next_seqno: 1,
                exec_count: 0,
                hang_count: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
            config,
        });

        let workers = shared
            .config
            .engines
            .iter()
            .filter_map(|&engine| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("sim-{}", engine))
                    .spawn(move || engine::run(shared, engine))
                    .map_err(|e| log::error!("sim: cannot start {} engine: {}", engine, e))
                    .ok()
            })
            .collect();

        Self { shared, workers }
    }

    pub fn config(&self) -> &SimConfig {
        &self.shared.config
    }

    /// Hold `engine`'s queue; queued batches stay pending until resumed
    pub fn stall(&self, engine: Engine) {
        lock(&self.shared.state).stalled.insert(engine.resolve());
    }

    pub fn resume(&self, engine: Engine) {
        lock(&self.shared.state).stalled.remove(&engine.resolve());
        self.shared.cond.notify_all();
    }

    /// Move an idle object to a new GPU address
    ///
    /// # Errors
    ///
    /// `EBUSY` if the object is referenced by pending work, `ENOSPC` if the
    /// address space has no other place for it.
    pub fn migrate(&self, handle: u32) -> DriverResult<u64> {
        let mut state = lock(&self.shared.state);
        let object = state.object(handle)?;
        if object.active > 0 {
            return Err(Errno::EBUSY);
        }
        let size = object.data.len() as u64;

        let offset = state
            .aperture
            .find_free(size, aperture::PAGE_SIZE)
            .ok_or(Errno::ENOSPC)?;
        let old = state.aperture.offset_of(handle);
        state.aperture.bind(handle, offset, size);

        log::debug!("sim: BO {} migrated {:#x?} -> {:#x}", handle, old, offset);
        Ok(offset)
    }

    /// Every execbuffer call so far, accepted or not
    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        lock(&self.shared.state).submissions.clone()
    }

    pub fn exec_count(&self) -> u64 {
        lock(&self.shared.state).exec_count
    }

    pub fn hang_count(&self) -> u64 {
        lock(&self.shared.state).hang_count
    }

    pub fn object_offset(&self, handle: u32) -> Option<u64> {
        lock(&self.shared.state).aperture.offset_of(handle)
    }

    /// Kernel-side view of one object
    pub fn object_info(&self, handle: u32) -> Option<ObjectInfo> {
        let state = lock(&self.shared.state);
        let object = state.object(handle).ok()?;
        Some(ObjectInfo {
            size: object.data.len() as u64,
            tiling: object.tiling,
            stride: object.stride,
            caching: object.caching,
            read_domains: object.read_domains,
            write_domain: object.write_domain,
            offset: state.aperture.offset_of(handle),
            busy: object.active > 0,
        })
    }

    /// Live objects, including closed ones still referenced by the GPU
    pub fn object_count(&self) -> usize {
        lock(&self.shared.state).objects.len()
    }

    /// Bytes of object storage in use
    pub fn allocated(&self) -> u64 {
        lock(&self.shared.state).allocated
    }

    fn validate_and_queue(
        &self,
        state: &mut SimState,
        request: &mut ExecBuffer,
    ) -> DriverResult<()> {
        let config = &self.shared.config;
        let address_bytes = if config.gen >= 8 { 8 } else { 4 };

        let engine = request.engine().ok_or(Errno::EINVAL)?.resolve();
        if !config.engines.contains(&engine) {
            return Err(Errno::EINVAL);
        }

        let batch = request.batch_object().ok_or(Errno::EINVAL)?;
        let batch_size = state.object(batch.handle)?.data.len();
        let start = request.batch_start_offset as usize;
        let len = request.batch_len as usize;
        if len == 0 || len % 8 != 0 || start % 8 != 0 || start + len > batch_size {
            return Err(Errno::EINVAL);
        }

        let mut handles = HashSet::new();
        let mut fences = 0;
        for object in &request.objects {
            let bo = state.object(object.handle)?;
            if !handles.insert(object.handle) {
                return Err(Errno::EINVAL);
            }
            if object.alignment != 0 && !object.alignment.is_power_of_two() {
                return Err(Errno::EINVAL);
            }
            let relocs = object.relocation_offset as usize + object.relocation_count as usize;
            if relocs > request.relocations.len() {
                return Err(Errno::EINVAL);
            }
            if object.flags.contains(ExecObjectFlags::NEEDS_FENCE) && bo.tiling.is_tiled() {
                fences += 1;
            }
        }
        if fences > config.fence_slots {
            return Err(Errno::EDEADLK);
        }

        for object in &request.objects {
            let size = state.object(object.handle)?.data.len() as u64;
            let first = object.relocation_offset as usize;
            for reloc in &request.relocations[first..first + object.relocation_count as usize] {
                if reloc.target_index as usize >= request.objects.len() {
                    return Err(Errno::ENOENT);
                }
                if reloc.offset % 4 != 0 || reloc.offset + address_bytes > size {
                    return Err(Errno::EINVAL);
                }
                let domains = reloc.read_domains | reloc.write_domain;
                if domains.intersects(Domain::CPU | Domain::GTT) {
                    return Err(Errno::EINVAL);
                }
                if reloc.write_domain.bits().count_ones() > 1 {
                    return Err(Errno::EINVAL);
                }
            }
        }

        // Presumed offsets must hold, or the skipped relocations would be wrong
        if request.exec_flags().contains(ExecFlags::NO_RELOC) {
            for object in &request.objects {
                if object.offset == 0 {
                    continue;
                }
                let current = state.aperture.offset_of(object.handle);
                if current == Some(object.offset) {
                    continue;
                }
                if current.is_some() && config.strict_no_reloc {
                    log::debug!(
                        "sim: NO_RELOC with stale offset for BO {} ({:#x} != {:#x?})",
                        object.handle,
                        object.offset,
                        current
                    );
                    return Err(Errno::EINVAL);
                }

                let size = state.object(object.handle)?.data.len() as u64;
                state.aperture.unbind(object.handle);
                if state.aperture.is_free(object.offset, size) {
                    state.aperture.bind(object.handle, object.offset, size);
                } else {
                    if let Some(current) = current {
                        state.aperture.bind(object.handle, current, size);
                    }
                    return Err(Errno::EINVAL);
                }
            }
        }

        let mut offsets = Vec::with_capacity(request.objects.len());
        for object in &request.objects {
            offsets.push(state.bind(object.handle, object.offset, object.alignment, &handles)?);
        }

        for object in &request.objects {
            let first = object.relocation_offset as usize;
            let count = object.relocation_count as usize;
            for reloc in &mut request.relocations[first..first + count] {
                let target = offsets[reloc.target_index as usize];
                if reloc.presumed_address == target {
                    continue;
                }
                let data = &mut state.object_mut(object.handle)?.data;
                write_address(
                    data,
                    reloc.offset as usize,
                    target.wrapping_add(reloc.delta as u64),
                    address_bytes as usize / 4,
                );
                reloc.presumed_address = target;
            }
        }

        for (object, offset) in request.objects.iter_mut().zip(&offsets) {
            object.offset = *offset;
        }

        let handles: Vec<u32> = request.objects.iter().map(|o| o.handle).collect();
        for &handle in &handles {
            let object = state.object_mut(handle)?;
            object.active += 1;
            object.read_domains = Domain::empty();
            object.write_domain = Domain::empty();
        }

        let seqno = state.next_seqno;
        state.next_seqno += 1;
        let job = Job {
            seqno,
            batch: request.objects[request.objects.len() - 1].handle,
            start,
            len,
            handles,
        };

        log::trace!("sim: seqno {} queued on {}", seqno, engine);
        state.queues.entry(engine).or_default().push_back(job);
        Ok(())
    }
}

impl Drop for SimDriver {
    fn drop(&mut self) {
        {
            let mut state = lock(&self.shared.state);
            state.shutdown = true;
            state.stalled.clear();
        }
        self.shared.cond.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("sim: engine thread panicked");
            }
        }
    }
}

impl GemDriver for SimDriver {
    fn create(&self, size: u64) -> DriverResult<u32> {
        if size == 0 {
            return Err(Errno::EINVAL);
        }

        let mut state = lock(&self.shared.state);
        if state.allocated + size > self.shared.config.memory_budget {
            return Err(Errno::ENOMEM);
        }

        let handle = state.next_handle;
        state.next_handle += 1;
        state.allocated += size;
        state.objects.insert(
            handle,
            Object {
                data: vec![0; size as usize],
                tiling: Tiling::None,
                stride: 0,
                caching: Caching::None,
                read_domains: Domain::CPU,
                write_domain: Domain::CPU,
                active: 0,
                closed: false,
            },
        );
        Ok(handle)
    }

    fn close(&self, handle: u32) -> DriverResult<()> {
        let mut state = lock(&self.shared.state);
        let object = state.object_mut(handle)?;
        if object.active > 0 {
            object.closed = true;
        } else {
            state.free(handle);
        }
        Ok(())
    }

    fn pwrite(&self, handle: u32, offset: u64, data: &[u8]) -> DriverResult<()> {
        let state = lock(&self.shared.state);
        let mut state = self.shared.wait_idle(state, handle, None)?;
        let object = state.object_mut(handle)?;
        let start = offset as usize;
        let end = start.checked_add(data.len()).ok_or(Errno::EINVAL)?;
        if end > object.data.len() {
            return Err(Errno::EINVAL);
        }
        object.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn pread(&self, handle: u32, offset: u64, data: &mut [u8]) -> DriverResult<()> {
        let state = lock(&self.shared.state);
        let state = self.shared.wait_idle(state, handle, None)?;
        let object = state.object(handle)?;
        let start = offset as usize;
        let end = start.checked_add(data.len()).ok_or(Errno::EINVAL)?;
        if end > object.data.len() {
            return Err(Errno::EINVAL);
        }
        data.copy_from_slice(&object.data[start..end]);
        Ok(())
    }

    fn with_mapping(&self, handle: u32, f: &mut dyn FnMut(&mut [u8])) -> DriverResult<()> {
        let mut data = {
            let state = lock(&self.shared.state);
            let state = self.shared.wait_idle(state, handle, None)?;
            state.object(handle)?.data.clone()
        };

        // The closure runs unlocked and may call back into the driver.
        f(&mut data);

        let mut state = lock(&self.shared.state);
        state.object_mut(handle)?.data = data;
        Ok(())
    }

    fn set_tiling(&self, handle: u32, tiling: Tiling, stride: u32) -> DriverResult<()> {
        let mut state = lock(&self.shared.state);
        let object = state.object_mut(handle)?;
        if object.active > 0 {
            return Err(Errno::EBUSY);
        }
        if !stride_is_valid(self.shared.config.gen, tiling, stride) {
            return Err(Errno::EINVAL);
        }
        object.tiling = tiling;
        object.stride = if tiling.is_tiled() { stride } else { 0 };
        Ok(())
    }

    fn get_tiling(&self, handle: u32) -> DriverResult<(Tiling, u32)> {
        let state = lock(&self.shared.state);
        let object = state.object(handle)?;
        Ok((object.tiling, object.stride))
    }

    fn set_caching(&self, handle: u32, caching: Caching) -> DriverResult<()> {
        let mut state = lock(&self.shared.state);
        state.object_mut(handle)?.caching = caching;
        Ok(())
    }

    fn set_domain(&self, handle: u32, read: Domain, write: Domain) -> DriverResult<()> {
        if !write.is_empty() && !read.contains(write) {
            return Err(Errno::EINVAL);
        }
        let state = lock(&self.shared.state);
        let mut state = self.shared.wait_idle(state, handle, None)?;
        let object = state.object_mut(handle)?;
        object.read_domains = read;
        object.write_domain = write;
        Ok(())
    }

    fn execbuffer(&self, request: &mut ExecBuffer) -> DriverResult<()> {
        let mut state = lock(&self.shared.state);
        let result = self.validate_and_queue(&mut state, request);

        state.submissions.push(SubmissionRecord {
            engine: request.engine(),
            flags: request.flags,
            batch_len: request.batch_len,
            handles: request.objects.iter().map(|o| o.handle).collect(),
            relocation_count: request.relocations.len(),
            result,
        });
        drop(state);

        if result.is_ok() {
            self.shared.cond.notify_all();
        }
        result
    }

    fn wait(&self, handle: u32, timeout: Option<Duration>) -> DriverResult<()> {
        let state = lock(&self.shared.state);
        self.shared.wait_idle(state, handle, timeout).map(|_| ())
    }

    fn busy(&self, handle: u32) -> DriverResult<bool> {
        let state = lock(&self.shared.state);
        Ok(state.object(handle)?.active > 0)
    }
}
