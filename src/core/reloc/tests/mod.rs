// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut

//! Unit tests for relocation recording organized by category

mod address;

use std::sync::Arc;

use crate::core::bo::BufferManager;
use crate::core::driver::{GemDriver, SimConfig, SimDriver};

use super::AddressTable;

fn setup(gen: u8) -> (BufferManager, Arc<SimDriver>) {
    let sim = Arc::new(SimDriver::new(SimConfig::for_gen(gen)));
    let bufmgr = BufferManager::new(
        Arc::clone(&sim) as Arc<dyn GemDriver>,
        gen,
        Arc::new(AddressTable::new()),
    );
    (bufmgr, sim)
}

/// Read back a GPU address of `words` dwords at `offset`
fn read_address(buffer: &[u8], offset: usize, words: usize) -> u64 {
    let word = |at: usize| u32::from_le_bytes(buffer[at..at + 4].try_into().unwrap()) as u64;
    let low = word(offset);
    if words > 1 {
        low | (word(offset + 4) << 32)
    } else {
        low
    }
}
