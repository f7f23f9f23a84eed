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

//! Engine worker threads
//!
//! Each simulated engine runs on its own thread and executes its queue in
//! order. Engines share nothing but GPU memory, so work on different
//! engines completes in no particular order relative to each other.

use std::sync::Arc;

use super::blitter::{self, GpuMemory};
use super::{Job, Shared};
use crate::core::exec::Engine;
use crate::core::lock;

/// Worker loop for one engine
pub(super) fn run(shared: Arc<Shared>, engine: Engine) {
    log::debug!("sim: {} engine started", engine);

    loop {
        let mut state = lock(&shared.state);

        let job: Job = loop {
            let runnable = !state.stalled.contains(&engine) || state.shutdown;
            if runnable {
                if let Some(job) = state.queues.get_mut(&engine).and_then(|q| q.pop_front()) {
                    break job;
                }
                if state.shutdown {
                    log::debug!("sim: {} engine stopped", engine);
                    return;
                }
            }
            state = shared
                .cond
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        };

        let batch = state.batch_words(&job);
        let result = {
            let state = &mut *state;
            let mut memory = GpuMemory {
                objects: &mut state.objects,
                aperture: &state.aperture,
            };
            blitter::execute(&mut memory, shared.config.gen, &batch)
        };

        match result {
            Ok(commands) => log::trace!(
                "sim: {} seqno {} done, {} commands",
                engine,
                job.seqno,
                commands
            ),
            Err(reason) => {
                log::warn!(
                    "sim: {} engine hung on seqno {} ({}), resetting",
                    engine,
                    job.seqno,
                    reason
                );
                state.hang_count += 1;
            }
        }

        state.exec_count += 1;
        state.retire_job(&job);
        drop(state);
        shared.cond.notify_all();
    }
}
