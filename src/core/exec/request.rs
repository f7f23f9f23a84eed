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

//! Submission request handed to the kernel
//!
//! These structures mirror the execbuffer ABI: an ordered object list, a
//! flat relocation table indexed from each object, the batch range and the
//! engine selector flags. The kernel writes final object offsets and
//! resolved presumed addresses back into the same request.

use bitflags::bitflags;

use super::Engine;
use crate::core::bo::Domain;

/// Bits of the flags word that select the engine
pub const EXEC_RING_MASK: u64 = 0x3f;

bitflags! {
    /// Submission-wide flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExecFlags: u64 {
        /// Presumed addresses are trusted, relocations may be skipped
        const NO_RELOC = 1 << 11;
        /// Relocation targets are indices into the object list
        const HANDLE_LUT = 1 << 12;
    }
}

bitflags! {
    /// Per-object flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExecObjectFlags: u64 {
        /// Access goes through a fence register
        const NEEDS_FENCE = 1 << 0;
        /// The GPU writes this object
        const WRITE = 1 << 2;
    }
}

/// One entry of the object list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecObject {
    pub handle: u32,
    /// Relocations applied to this object's contents
    pub relocation_count: u32,
    /// Index of the first of them in [`ExecBuffer::relocations`]
    pub relocation_offset: u32,
    pub alignment: u64,
    /// Presumed GPU offset in, final GPU offset out
    pub offset: u64,
    pub flags: ExecObjectFlags,
}

/// One entry of the relocation table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRelocation {
    /// Byte offset of the address slot inside the relocated object
    pub offset: u64,
    pub delta: u32,
    /// Index of the target in [`ExecBuffer::objects`]
    pub target_index: u32,
    pub read_domains: Domain,
    pub write_domain: Domain,
    /// Address the slot holds, updated by the kernel when it patches
    pub presumed_address: u64,
}

/// Complete submission request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecBuffer {
    /// Objects referenced by the batch, batch last
    pub objects: Vec<ExecObject>,
    pub relocations: Vec<ExecRelocation>,
    pub batch_start_offset: u32,
    pub batch_len: u32,
    /// Engine selector in the low bits plus [`ExecFlags`]
    pub flags: u64,
}

impl ExecBuffer {
    /// Engine selected by the flags word
    pub fn engine(&self) -> Option<Engine> {
        Engine::from_ring(self.flags & EXEC_RING_MASK)
    }

    pub fn exec_flags(&self) -> ExecFlags {
        ExecFlags::from_bits_truncate(self.flags & !EXEC_RING_MASK)
    }

    /// The batch object, which is always last
    pub fn batch_object(&self) -> Option<&ExecObject> {
        self.objects.last()
    }
}
