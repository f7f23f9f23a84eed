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

//! Test fixtures for common test scenarios

use std::sync::Arc;

use gemkit::core::driver::{SimConfig, SimDriver};
use gemkit::core::{BufferObject, Config, Context, DeviceInfo};

/// Create a context on a simulated device of the given generation
#[allow(dead_code)]
pub fn create_context(gen: u8) -> (Context, Arc<SimDriver>) {
    create_context_with(gen, Config::default())
}

/// Create a context with a custom configuration
#[allow(dead_code)]
pub fn create_context_with(gen: u8, config: Config) -> (Context, Arc<SimDriver>) {
    Context::with_simulator(DeviceInfo::for_gen(gen), config, SimConfig::for_gen(gen))
        .expect("Failed to create simulated context")
}

/// Create a context with custom simulator settings
#[allow(dead_code)]
pub fn create_context_on(gen: u8, config: Config, sim: SimConfig) -> (Context, Arc<SimDriver>) {
    Context::with_simulator(DeviceInfo::for_gen(gen), config, sim)
        .expect("Failed to create simulated context")
}

/// Allocate an object and fill every dword with `value`
#[allow(dead_code)]
pub fn filled_bo(ctx: &Context, name: &str, size: u64, value: u32) -> BufferObject {
    let bo = ctx
        .bufmgr()
        .allocate(name, size, 0)
        .expect("Failed to allocate buffer object");
    bo.fill_words(value).expect("Failed to fill buffer object");
    bo
}

/// Allocate an object holding an ascending dword pattern starting at `seed`
#[allow(dead_code)]
pub fn pattern_bo(ctx: &Context, name: &str, size: u64, seed: u32) -> BufferObject {
    let bo = ctx
        .bufmgr()
        .allocate(name, size, 0)
        .expect("Failed to allocate buffer object");
    let words: Vec<u32> = (0..(size / 4) as u32)
        .map(|i| seed.wrapping_add(i))
        .collect();
    bo.write_words(&words).expect("Failed to write pattern");
    bo
}
