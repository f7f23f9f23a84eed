// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut

//! Unit tests for buffer objects organized by category

mod allocation;

use std::sync::Arc;

use super::*;
use crate::core::driver::{SimConfig, SimDriver};

/// Buffer manager on a fresh simulator of the given generation
fn setup(gen: u8) -> (BufferManager, Arc<SimDriver>) {
    setup_with(SimConfig::for_gen(gen))
}

fn setup_with(config: SimConfig) -> (BufferManager, Arc<SimDriver>) {
    let gen = config.gen;
    let sim = Arc::new(SimDriver::new(config));
    let bufmgr = BufferManager::new(
        Arc::clone(&sim) as Arc<dyn GemDriver>,
        gen,
        Arc::new(AddressTable::new()),
    );
    (bufmgr, sim)
}
