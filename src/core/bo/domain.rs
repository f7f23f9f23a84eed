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

//! Coherency domain bookkeeping
//!
//! A domain names a cache or access path through which an object was last
//! read or written. Moving between domains may require flushing the previous
//! writer and invalidating stale readers.
//!
//! The tracker here is advisory: it records what the last access looked like
//! and reports which flushes a new access implies. Hazard enforcement belongs
//! to the kernel, driven by the domains declared in each relocation.

use bitflags::bitflags;

bitflags! {
    /// GEM domain bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Domain: u32 {
        const CPU = 0x0000_0001;
        const RENDER = 0x0000_0002;
        const SAMPLER = 0x0000_0004;
        const COMMAND = 0x0000_0008;
        const INSTRUCTION = 0x0000_0010;
        const VERTEX = 0x0000_0020;
        const GTT = 0x0000_0040;
    }
}

/// Flushes implied by a domain transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DomainTransition {
    /// Previous write domain that must be flushed
    pub flush: Domain,
    /// Newly entered read domains that must be invalidated
    pub invalidate: Domain,
}

impl DomainTransition {
    pub fn is_empty(&self) -> bool {
        self.flush.is_empty() && self.invalidate.is_empty()
    }
}

/// Last reader/writer state of one object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainState {
    read: Domain,
    write: Domain,
}

impl Default for DomainState {
    /// Fresh objects start out CPU-owned
    fn default() -> Self {
        Self {
            read: Domain::CPU,
            write: Domain::CPU,
        }
    }
}

impl DomainState {
    pub fn read_domains(&self) -> Domain {
        self.read
    }

    pub fn write_domain(&self) -> Domain {
        self.write
    }

    /// Record a new access and report the flushes it needs
    ///
    /// A pending write is flushed unless the new access stays entirely in the
    /// writer's domain. Read domains not already valid get invalidated.
    pub fn transition(&mut self, read: Domain, write: Domain) -> DomainTransition {
        let access = read | write;

        let flush = if !self.write.is_empty() && access != self.write {
            self.write
        } else {
            Domain::empty()
        };

        // After a flush every accessed domain starts from scratch.
        let invalidate = if flush.is_empty() {
            access & !self.read
        } else {
            access
        };

        if !write.is_empty() {
            self.read = access;
            self.write = write;
        } else if !flush.is_empty() {
            self.read = read | flush;
            self.write = Domain::empty();
        } else {
            self.read |= read;
        }

        DomainTransition { flush, invalidate }
    }
}
