// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut

//! Unit tests for the batch builder organized by category


use std::sync::Arc;

use crate::core::config::Config;
use crate::core::device::{Context, DeviceInfo};
use crate::core::driver::{SimConfig, SimDriver};

fn setup(gen: u8) -> (Context, Arc<SimDriver>) {
    setup_with(gen, Config::default())
}

fn setup_with(gen: u8, config: Config) -> (Context, Arc<SimDriver>) {
    Context::with_simulator(DeviceInfo::for_gen(gen), config, SimConfig::for_gen(gen)).unwrap()
}

/// Little-endian dword at `offset` of a stream
fn word_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
