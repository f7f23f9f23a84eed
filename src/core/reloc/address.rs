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

//! Last known GPU addresses of buffer objects

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::core::lock;

#[derive(Debug, Clone, Copy)]
struct Slot {
    address: Option<u64>,
    /// Newest submission this slot reflects
    seqno: u64,
}

/// Map from buffer handle to the GPU address the kernel last reported
///
/// Entries are written when a submission retires and dropped when an object
/// is destroyed or its layout changes. A missing entry means the address is
/// unknown and the kernel has to resolve every relocation to the object.
///
/// The table also issues submission sequence numbers. An observation is
/// applied only if it comes from a submission newer than the one the entry
/// already reflects, so retirement order does not matter.
#[derive(Debug, Default)]
pub struct AddressTable {
    slots: Mutex<HashMap<u32, Slot>>,
    issued: AtomicU64,
}

impl AddressTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number for the next submission, starting at 1
    pub fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Highest sequence number handed out so far
    pub fn last_issued(&self) -> u64 {
        self.issued.load(Ordering::Acquire)
    }

    pub fn lookup(&self, handle: u32) -> Option<u64> {
        lock(&self.slots).get(&handle).and_then(|slot| slot.address)
    }

    /// Record an address observed from submission `seqno`
    ///
    /// Address 0 is never a valid binding and is ignored, as is anything
    /// older than what the entry already reflects.
    pub fn update(&self, handle: u32, address: u64, seqno: u64) {
        if address == 0 {
            return;
        }

        let mut slots = lock(&self.slots);
        let previous = match slots.get(&handle) {
            Some(slot) if seqno <= slot.seqno => {
                log::trace!(
                    "BO {}: ignoring address {:#x} from #{} (entry reflects #{})",
                    handle,
                    address,
                    seqno,
                    slot.seqno
                );
                return;
            }
            Some(slot) => slot.address,
            None => None,
        };

        slots.insert(
            handle,
            Slot {
                address: Some(address),
                seqno,
            },
        );
        if let Some(old) = previous.filter(|&old| old != address) {
            log::trace!("BO {} moved: {:#x} -> {:#x}", handle, old, address);
        }
    }

    /// Drop the address after a layout change
    ///
    /// Observations from submissions issued before this call are ignored
    /// when they retire later.
    pub fn invalidate(&self, handle: u32) {
        let floor = self.last_issued();
        let mut slots = lock(&self.slots);
        if floor == 0 {
            slots.remove(&handle);
        } else {
            slots.insert(
                handle,
                Slot {
                    address: None,
                    seqno: floor,
                },
            );
        }
    }

    /// Remove every trace of a destroyed object
    pub fn forget(&self, handle: u32) {
        lock(&self.slots).remove(&handle);
    }

    /// Objects with a known address
    pub fn len(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| slot.address.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
