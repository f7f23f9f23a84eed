// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut

//! Unit tests for the simulated driver organized by category


use super::*;
use crate::core::exec::{ExecObject, ExecRelocation};
use crate::core::gen::{MI_BATCH_BUFFER_END, MI_NOOP};

/// Batch tail: end marker padded to a qword
const TAIL: [u32; 2] = [MI_BATCH_BUFFER_END, MI_NOOP];

/// Create a one-page object holding `words`
fn upload(sim: &SimDriver, words: &[u32]) -> u32 {
    let handle = sim.create(4096).unwrap();
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    sim.pwrite(handle, 0, &bytes).unwrap();
    handle
}

fn object(handle: u32) -> ExecObject {
    ExecObject {
        handle,
        relocation_count: 0,
        relocation_offset: 0,
        alignment: 4096,
        offset: 0,
        flags: ExecObjectFlags::empty(),
    }
}

/// Request naming `targets` and then `batch`, with every relocation applied
/// to the batch
fn request(
    engine: Engine,
    targets: &[u32],
    batch: u32,
    relocations: Vec<ExecRelocation>,
    batch_len: u32,
) -> ExecBuffer {
    let mut objects: Vec<ExecObject> = targets.iter().map(|&h| object(h)).collect();
    let mut batch_object = object(batch);
    batch_object.relocation_count = relocations.len() as u32;
    objects.push(batch_object);

    ExecBuffer {
        objects,
        relocations,
        batch_start_offset: 0,
        batch_len,
        flags: engine.ring() | ExecFlags::HANDLE_LUT.bits(),
    }
}

fn reloc(offset: u64, target_index: u32, delta: u32) -> ExecRelocation {
    ExecRelocation {
        offset,
        delta,
        target_index,
        read_domains: Domain::INSTRUCTION,
        write_domain: Domain::INSTRUCTION,
        presumed_address: 0,
    }
}

fn read_word(sim: &SimDriver, handle: u32, offset: u64) -> u32 {
    let mut bytes = [0u8; 4];
    sim.pread(handle, offset, &mut bytes).unwrap();
    u32::from_le_bytes(bytes)
}
