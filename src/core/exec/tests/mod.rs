// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut

//! Unit tests for submission organized by category

mod request;

use std::sync::Arc;

use crate::core::config::Config;
use crate::core::device::{Context, DeviceInfo};
use crate::core::driver::{SimConfig, SimDriver};

fn setup(gen: u8, config: Config) -> (Context, Arc<SimDriver>) {
    Context::with_simulator(DeviceInfo::for_gen(gen), config, SimConfig::for_gen(gen)).unwrap()
}
