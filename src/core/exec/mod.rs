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

//! Submission and execution bridge
//!
//! The bridge packages a finished stream, its relocations and the derived
//! object list into one [`ExecBuffer`] request, hands it to the kernel and
//! tracks the resulting GPU work until it retires.
//!
//! # Optimistic relocations
//!
//! With optimistic relocations enabled, entries already patched from the
//! address table are left out of the request and the kernel is told to
//! trust the presumed offsets (`NO_RELOC`). If the kernel rejects such a
//! request, typically because an object moved since it was last observed,
//! the bridge rebuilds the full relocation list and resubmits exactly once.
//! Every other rejection reaches the caller as `CommandRejected` with the
//! kernel's errno.
//!
//! # Lifecycle
//!
//! Building → Submitted → Completed | Rejected. A submitted request keeps a
//! reference to every object it names until [`ExecBridge::retire`] observes
//! it idle; retiring feeds the final object offsets back into the address
//! table so they become the next presumed addresses.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::bo::BufferObject;
use crate::core::config::Config;
use crate::core::driver::{Errno, GemDriver};
use crate::core::error::{GemError, Result};
use crate::core::lock;
use crate::core::reloc::{distinct_targets, AddressTable, RelocState, RelocationEntry};
use crate::core::trace::{SubmissionTrace, TraceOutcome, TraceRecord};

mod request;
#[cfg(test)]
mod tests;

pub use request::{
    ExecBuffer, ExecFlags, ExecObject, ExecObjectFlags, ExecRelocation, EXEC_RING_MASK,
};

/// Hardware engine a batch runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Kernel's choice, the render engine
    #[default]
    Default,
    Render,
    /// Video decode
    Bsd,
    /// Blitter
    Blt,
    /// Video enhancement
    Vebox,
}

impl Engine {
    pub const ALL: [Engine; 5] = [
        Engine::Default,
        Engine::Render,
        Engine::Bsd,
        Engine::Blt,
        Engine::Vebox,
    ];

    /// Engine selector bits of the flags word
    pub fn ring(self) -> u64 {
        match self {
            Engine::Default => 0,
            Engine::Render => 1,
            Engine::Bsd => 2,
            Engine::Blt => 3,
            Engine::Vebox => 4,
        }
    }

    pub fn from_ring(ring: u64) -> Option<Self> {
        match ring {
            0 => Some(Engine::Default),
            1 => Some(Engine::Render),
            2 => Some(Engine::Bsd),
            3 => Some(Engine::Blt),
            4 => Some(Engine::Vebox),
            _ => None,
        }
    }

    /// Physical engine that executes work submitted here
    pub fn resolve(self) -> Engine {
        match self {
            Engine::Default => Engine::Render,
            engine => engine,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Engine::Default => "default",
            Engine::Render => "render",
            Engine::Bsd => "bsd",
            Engine::Blt => "blt",
            Engine::Vebox => "vebox",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Engine::ALL
            .into_iter()
            .find(|engine| engine.name() == s)
            .ok_or_else(|| format!("unknown engine '{}'", s))
    }
}

/// One finished stream ready for the kernel
///
/// Built once per flush, submitted once, then discarded. The objects it
/// references live on in the pending list until the work retires.
#[derive(Debug)]
pub struct Submission {
    pub batch: BufferObject,
    /// Bytes of commands, including the end-of-batch tail
    pub batch_len: usize,
    pub batch_start: usize,
    pub relocations: Vec<RelocationEntry>,
    pub engine: Engine,
    /// Extra flags requested by the caller
    pub flags: ExecFlags,
}

impl Submission {
    pub fn new(
        batch: BufferObject,
        batch_len: usize,
        relocations: Vec<RelocationEntry>,
        engine: Engine,
    ) -> Self {
        Self {
            batch,
            batch_len,
            batch_start: 0,
            relocations,
            engine,
            flags: ExecFlags::empty(),
        }
    }

    /// Object list: relocation targets in first-reference order, then the
    /// batch itself
    pub fn objects(&self) -> Vec<BufferObject> {
        let mut objects = distinct_targets(&self.relocations);
        objects.retain(|bo| !bo.same_object(&self.batch));
        objects.push(self.batch.clone());
        objects
    }

    /// Address the stream's slots were written with for `bo`
    ///
    /// Falls back to the address table for objects no entry targets.
    fn written_address(&self, bo: &BufferObject) -> u64 {
        self.relocations
            .iter()
            .find(|e| e.target.same_object(bo))
            .map(|e| e.presumed_address)
            .or_else(|| bo.presumed_address())
            .unwrap_or(0)
    }

    /// Number of entries already resolved from the address table
    pub fn locally_patched(&self) -> usize {
        self.relocations
            .iter()
            .filter(|e| e.state() == RelocState::LocallyPatched)
            .count()
    }

    /// Assemble the kernel request
    ///
    /// With `optimistic` set, locally patched entries are omitted and, if
    /// any were, `NO_RELOC` is requested. Otherwise every recorded entry is
    /// sent.
    pub fn build_request(&self, optimistic: bool) -> ExecBuffer {
        let objects = self.objects();
        let index_of = |bo: &BufferObject| {
            objects
                .iter()
                .position(|o| o.same_object(bo))
                .unwrap_or(objects.len() - 1) as u32
        };

        let mut exec_objects: Vec<ExecObject> = objects
            .iter()
            .map(|bo| ExecObject {
                handle: bo.handle(),
                relocation_count: 0,
                relocation_offset: 0,
                alignment: bo.alignment(),
                offset: self.written_address(bo),
                flags: ExecObjectFlags::empty(),
            })
            .collect();

        let mut relocations = Vec::with_capacity(self.relocations.len());
        let mut skipped = 0;

        for entry in &self.relocations {
            let target = index_of(&entry.target) as usize;

            if !entry.write_domain.is_empty() {
                exec_objects[target].flags |= ExecObjectFlags::WRITE;
            }
            if entry.fenced && entry.target.tiling().is_tiled() {
                exec_objects[target].flags |= ExecObjectFlags::NEEDS_FENCE;
            }

            if optimistic && entry.state() == RelocState::LocallyPatched {
                skipped += 1;
                continue;
            }

            relocations.push(ExecRelocation {
                offset: entry.offset as u64,
                delta: entry.delta,
                target_index: target as u32,
                read_domains: entry.read_domains,
                write_domain: entry.write_domain,
                presumed_address: entry.presumed_address,
            });
        }

        if let Some(batch) = exec_objects.last_mut() {
            batch.relocation_count = relocations.len() as u32;
        }

        let mut flags = self.flags | ExecFlags::HANDLE_LUT;
        if skipped > 0 {
            flags |= ExecFlags::NO_RELOC;
        } else {
            flags.remove(ExecFlags::NO_RELOC);
        }

        ExecBuffer {
            objects: exec_objects,
            relocations,
            batch_start_offset: self.batch_start as u32,
            batch_len: self.batch_len as u32,
            flags: self.engine.ring() | flags.bits(),
        }
    }
}

/// Handle to submitted GPU work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Completion {
    pub seqno: u64,
    pub engine: Engine,
    /// Handle of the batch object, busy until the work retires
    pub batch_handle: u32,
}

struct Pending {
    seqno: u64,
    engine: Engine,
    batch: BufferObject,
    objects: Vec<BufferObject>,
    relocations: Vec<RelocationEntry>,
    /// Final offsets reported by the kernel, by object index
    offsets: Vec<u64>,
}

/// Submission bridge shared by every builder on a device
pub struct ExecBridge {
    driver: Arc<dyn GemDriver>,
    addresses: Arc<AddressTable>,
    optimistic: bool,
    wait_timeout: Option<Duration>,
    retries: AtomicU64,
    pending: Mutex<Vec<Pending>>,
    trace: Option<Mutex<SubmissionTrace>>,
}

impl ExecBridge {
    pub fn new(driver: Arc<dyn GemDriver>, addresses: Arc<AddressTable>, config: &Config) -> Self {
        Self {
            driver,
            addresses,
            optimistic: config.optimistic_relocations,
            wait_timeout: config.wait_timeout(),
            retries: AtomicU64::new(0),
            pending: Mutex::new(Vec::new()),
            trace: config.trace.then(|| Mutex::new(SubmissionTrace::new())),
        }
    }

    /// Submit a finished stream
    ///
    /// Blocks until the kernel accepts or rejects the request, not until
    /// the GPU finishes it. Completed work is retired first.
    ///
    /// # Errors
    ///
    /// `GemError::CommandRejected` with the kernel's errno. An optimistic
    /// request is retried once without the optimization first.
    pub fn submit(&self, mut submission: Submission) -> Result<Completion> {
        self.retire();

        let seqno = self.addresses.issue();
        let mut request = submission.build_request(self.optimistic);
        let optimistic = request.exec_flags().contains(ExecFlags::NO_RELOC);

        log::debug!(
            "submit #{} on {}: {} bytes, {} objects, {} relocs{}",
            seqno,
            submission.engine,
            request.batch_len,
            request.objects.len(),
            request.relocations.len(),
            if optimistic { " (no-reloc)" } else { "" }
        );

        let mut retried = false;
        let outcome = match self.driver.execbuffer(&mut request) {
            Ok(()) => Ok(request),
            Err(code) if optimistic => {
                log::warn!(
                    "submit #{}: optimistic request rejected ({}), retrying with full relocations",
                    seqno,
                    code
                );
                retried = true;
                self.retry_without_optimization(&submission)
            }
            Err(code) => {
                log::error!("submit #{} rejected by kernel: {}", seqno, code);
                Err(GemError::CommandRejected(code))
            }
        };

        self.record_trace(seqno, &submission, &outcome, retried);
        let request = outcome?;

        for entry in &mut submission.relocations {
            entry.set_state(RelocState::Submitted);
        }

        let objects = submission.objects();
        let offsets = request.objects.iter().map(|o| o.offset).collect();
        let completion = Completion {
            seqno,
            engine: submission.engine,
            batch_handle: submission.batch.handle(),
        };

        lock(&self.pending).push(Pending {
            seqno,
            engine: submission.engine,
            batch: submission.batch,
            objects,
            relocations: submission.relocations,
            offsets,
        });

        Ok(completion)
    }

    /// Resubmit with every relocation and without `NO_RELOC`
    ///
    /// Used once after an optimistic request is rejected. Returns the
    /// accepted request with the kernel's write-backs.
    pub fn retry_without_optimization(&self, submission: &Submission) -> Result<ExecBuffer> {
        self.retries.fetch_add(1, Ordering::Relaxed);

        let mut request = submission.build_request(false);
        self.driver.execbuffer(&mut request).map_err(|code| {
            log::error!("full-relocation retry rejected by kernel: {}", code);
            GemError::CommandRejected(code)
        })?;

        Ok(request)
    }

    /// Block until the work completes, bounded by the configured hang window
    pub fn wait(&self, completion: &Completion) -> Result<()> {
        self.wait_inner(completion, self.wait_timeout)
    }

    /// Block until the work completes or `timeout` elapses
    pub fn wait_timeout(&self, completion: &Completion, timeout: Duration) -> Result<()> {
        self.wait_inner(completion, Some(timeout))
    }

    fn wait_inner(&self, completion: &Completion, timeout: Option<Duration>) -> Result<()> {
        let batch = {
            let pending = lock(&self.pending);
            match pending.iter().find(|p| p.seqno == completion.seqno) {
                Some(p) => p.batch.clone(),
                // Already retired
                None => return Ok(()),
            }
        };

        self.driver
            .wait(batch.handle(), timeout)
            .map_err(|code| match code {
                Errno::ETIME => GemError::SynchronizationTimeout {
                    handle: batch.handle(),
                    timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
                },
                code => GemError::Driver {
                    op: "wait",
                    handle: batch.handle(),
                    code,
                },
            })?;

        drop(batch);
        self.retire();
        Ok(())
    }

    /// Whether the work is still executing
    pub fn is_busy(&self, completion: &Completion) -> Result<bool> {
        let pending = lock(&self.pending);
        let Some(p) = pending.iter().find(|p| p.seqno == completion.seqno) else {
            return Ok(false);
        };
        self.driver
            .busy(p.batch.handle())
            .map_err(|code| GemError::Driver {
                op: "busy",
                handle: p.batch.handle(),
                code,
            })
    }

    /// Retire every pending submission that has completed
    ///
    /// Does not block. Final object offsets become the next presumed
    /// addresses and the submission's object references are released.
    ///
    /// # Returns
    ///
    /// Number of submissions retired
    pub fn retire(&self) -> usize {
        let mut pending = lock(&self.pending);
        let before = pending.len();

        pending.retain_mut(|p| {
            if let Ok(true) = self.driver.busy(p.batch.handle()) {
                return true;
            }

            for (bo, &offset) in p.objects.iter().zip(&p.offsets) {
                self.addresses.update(bo.handle(), offset, p.seqno);
            }
            for entry in &mut p.relocations {
                entry.set_state(RelocState::Retired);
            }
            log::trace!("submission #{} retired", p.seqno);
            false
        });

        before - pending.len()
    }

    /// Block until every pending submission has retired
    pub fn drain(&self) -> Result<()> {
        loop {
            let next = lock(&self.pending).first().map(|p| Completion {
                seqno: p.seqno,
                engine: p.engine,
                batch_handle: p.batch.handle(),
            });
            match next {
                Some(completion) => self.wait(&completion)?,
                None => return Ok(()),
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Optimistic submissions that had to be retried
    pub fn retry_count(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn optimistic(&self) -> bool {
        self.optimistic
    }

    /// Snapshot of the submission trace, if tracing is enabled
    pub fn trace(&self) -> Option<SubmissionTrace> {
        self.trace.as_ref().map(|t| lock(t).clone())
    }

    fn record_trace(
        &self,
        seqno: u64,
        submission: &Submission,
        outcome: &Result<ExecBuffer>,
        retried: bool,
    ) {
        let Some(trace) = &self.trace else {
            return;
        };

        let (flags, relocation_count, outcome) = match outcome {
            Ok(request) => (
                request.flags,
                request.relocations.len() as u32,
                TraceOutcome::Accepted,
            ),
            Err(GemError::CommandRejected(code)) => (
                submission.engine.ring(),
                submission.relocations.len() as u32,
                TraceOutcome::Rejected(code.0),
            ),
            Err(_) => (
                submission.engine.ring(),
                submission.relocations.len() as u32,
                TraceOutcome::Rejected(Errno::EIO.0),
            ),
        };

        lock(trace).push(TraceRecord {
            timestamp: Utc::now(),
            seqno,
            engine: submission.engine,
            flags,
            batch_len: submission.batch_len as u32,
            handles: submission.objects().iter().map(|bo| bo.handle()).collect(),
            relocation_count,
            locally_patched: submission.locally_patched() as u32,
            retried,
            outcome,
        });
    }
}
