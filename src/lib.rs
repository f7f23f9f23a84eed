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

//! GEM command stream construction and submission
//!
//! This library builds binary GPU command streams that reference buffer
//! objects whose final GPU addresses are not known yet, records the deferred
//! address patches (relocations), and submits the whole package to a kernel
//! graphics driver for asynchronous execution.
//!
//! # Example
//!
//! ```
//! use gemkit::core::blit;
//! use gemkit::core::{Config, Context, DeviceInfo};
//!
//! let ctx = Context::simulated(DeviceInfo::for_gen(9), Config::default()).unwrap();
//!
//! let src = ctx.bufmgr().allocate("src", 4096, 0).unwrap();
//! let dst = ctx.bufmgr().allocate("dst", 4096, 0).unwrap();
//! src.fill_words(0xAAAA_AAAA).unwrap();
//!
//! let mut batch = ctx.batch().unwrap();
//! let done = blit::copy_bo(&mut batch, &dst, &src, 4096).unwrap();
//! ctx.bridge().wait(&done).unwrap();
//!
//! assert!(dst.read_words().unwrap().iter().all(|&w| w == 0xAAAA_AAAA));
//! ```

pub mod core;
