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

//! Relocation recorder
//!
//! A relocation is a deferred reference from a word in the command stream
//! to another buffer object's GPU address. The builder writes the target's
//! presumed address into the slot and records the slot here; the kernel
//! patches the slot at submission time if the target turns out to live
//! elsewhere.
//!
//! # Entry lifecycle
//!
//! | State            | Meaning                                          |
//! |------------------|--------------------------------------------------|
//! | `Recorded`       | Slot written with a guessed address              |
//! | `LocallyPatched` | Slot holds an address known from a prior retire  |
//! | `Submitted`      | Handed to the kernel                             |
//! | `Retired`        | Submission completed, addresses fed back         |

use crate::core::bo::{BufferObject, Domain};
use crate::core::error::{build_fault, BuildError};

mod address;
#[cfg(test)]
mod tests;

pub use address::AddressTable;

/// Position of a relocation entry in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocState {
    Recorded,
    LocallyPatched,
    Submitted,
    Retired,
}

/// One deferred address reference
#[derive(Debug, Clone)]
pub struct RelocationEntry {
    /// Byte offset of the address slot in the stream
    pub offset: usize,
    pub target: BufferObject,
    pub delta: u32,
    pub read_domains: Domain,
    pub write_domain: Domain,
    /// Object address the slot was written with (0 if unknown)
    pub presumed_address: u64,
    /// Access needs a fence register
    pub fenced: bool,
    state: RelocState,
}

impl RelocationEntry {
    pub fn state(&self) -> RelocState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: RelocState) {
        self.state = state;
    }
}

/// Write a GPU address of `words` dwords at `offset`
pub fn write_address(buffer: &mut [u8], offset: usize, address: u64, words: usize) {
    buffer[offset..offset + 4].copy_from_slice(&(address as u32).to_le_bytes());
    if words > 1 {
        buffer[offset + 4..offset + 8].copy_from_slice(&((address >> 32) as u32).to_le_bytes());
    }
}

/// Distinct targets of `entries` in order of first reference
pub fn distinct_targets(entries: &[RelocationEntry]) -> Vec<BufferObject> {
    let mut targets: Vec<BufferObject> = Vec::new();
    for entry in entries {
        if !targets.iter().any(|t| t.same_object(&entry.target)) {
            targets.push(entry.target.clone());
        }
    }
    targets
}

/// Collects the relocations of one stream
pub struct RelocationRecorder {
    manager_id: u64,
    address_words: usize,
    entries: Vec<RelocationEntry>,
}

impl RelocationRecorder {
    /// # Arguments
    ///
    /// * `manager_id` - Buffer manager whose objects may be targeted
    /// * `address_words` - Dwords per address slot (2 on gen8+)
    pub fn new(manager_id: u64, address_words: usize) -> Self {
        Self {
            manager_id,
            address_words,
            entries: Vec::new(),
        }
    }

    pub fn address_words(&self) -> usize {
        self.address_words
    }

    /// Record a relocation
    ///
    /// The slot must be dword aligned and lie, in full, inside the first
    /// `stream_len` bytes of the stream. The target must come from the same
    /// buffer manager as the stream, since the submission's object list is
    /// assembled from the recorded targets. Violations are build faults.
    ///
    /// # Returns
    ///
    /// The address the slot must hold: the target's presumed address plus
    /// `delta`.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        offset: usize,
        stream_len: usize,
        target: &BufferObject,
        delta: u32,
        read_domains: Domain,
        write_domain: Domain,
        fenced: bool,
    ) -> u64 {
        if offset % 4 != 0 {
            build_fault(BuildError::UnalignedRelocation { offset });
        }
        if offset + self.address_words * 4 > stream_len {
            build_fault(BuildError::RelocationOutOfBounds {
                offset,
                len: stream_len,
            });
        }
        if target.manager_id() != self.manager_id {
            build_fault(BuildError::ForeignTarget {
                handle: target.handle(),
            });
        }

        target.transition_domain(read_domains, write_domain);

        let presumed_address = target.presumed_address().unwrap_or(0);

        log::trace!(
            "reloc @{:#x} -> BO {} + {:#x} (read {:?}, write {:?}, presumed {:#x})",
            offset,
            target.handle(),
            delta,
            read_domains,
            write_domain,
            presumed_address
        );

        self.entries.push(RelocationEntry {
            offset,
            target: target.clone(),
            delta,
            read_domains,
            write_domain,
            presumed_address,
            fenced,
            state: RelocState::Recorded,
        });

        presumed_address.wrapping_add(delta as u64)
    }

    /// Patch slots whose target address is already known
    ///
    /// Rewrites each such slot with the address from `addresses` and marks
    /// the entry `LocallyPatched`. Entries whose target has never retired
    /// stay `Recorded` and are left for the kernel.
    ///
    /// # Returns
    ///
    /// Number of entries patched
    pub fn resolve_locally(&mut self, addresses: &AddressTable, buffer: &mut [u8]) -> usize {
        let mut patched = 0;
        for entry in &mut self.entries {
            let Some(address) = addresses.lookup(entry.target.handle()) else {
                continue;
            };
            if entry.presumed_address != address {
                write_address(
                    buffer,
                    entry.offset,
                    address.wrapping_add(entry.delta as u64),
                    self.address_words,
                );
                entry.presumed_address = address;
            }
            entry.state = RelocState::LocallyPatched;
            patched += 1;
        }
        patched
    }

    pub fn entries(&self) -> &[RelocationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hand over the recorded entries and start afresh
    pub fn take(&mut self) -> Vec<RelocationEntry> {
        std::mem::take(&mut self.entries)
    }
}
