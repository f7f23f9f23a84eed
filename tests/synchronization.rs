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

//! Completion waits, hang windows and concurrent submitters

mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::assertions::{assert_bo_filled, assert_bo_word};
use common::fixtures::{create_context, create_context_with, filled_bo};
use gemkit::core::blit;
use gemkit::core::{Config, Engine, GemError};

#[test]
fn test_hang_window_surfaces_timeout() {
    let config = Config {
        wait_timeout_ms: Some(30),
        ..Config::default()
    };
    let (ctx, sim) = create_context_with(8, config);
    let dst = filled_bo(&ctx, "dst", 4096, 0);

    sim.stall(Engine::Blt);
    let mut batch = ctx.batch().unwrap();
    let done = blit::store_dword(&mut batch, &dst, 0, 9).unwrap();

    let start = Instant::now();
    let result = ctx.bridge().wait(&done);
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert!(matches!(
        result,
        Err(GemError::SynchronizationTimeout { timeout_ms: 30, .. })
    ));
    assert_eq!(ctx.bridge().pending_count(), 1);

    // Timeouts are not retried, the work is still there
    sim.resume(Engine::Blt);
    ctx.bridge().wait(&done).unwrap();
    assert_eq!(ctx.bridge().pending_count(), 0);
    assert_bo_word(&dst, 0, 9);
}

#[test]
fn test_object_wait_idle_timeout() {
    let (ctx, sim) = create_context(9);
    let dst = filled_bo(&ctx, "dst", 4096, 0);

    sim.stall(Engine::Blt);
    let mut batch = ctx.batch().unwrap();
    let _done = blit::store_dword(&mut batch, &dst, 0, 1).unwrap();
    assert!(dst.is_busy().unwrap());

    let result = dst.wait_idle(Some(Duration::from_millis(10)));
    assert!(matches!(
        result,
        Err(GemError::SynchronizationTimeout { timeout_ms: 10, .. })
    ));

    sim.resume(Engine::Blt);
    dst.wait_idle(None).unwrap();
    assert!(!dst.is_busy().unwrap());
}

#[test]
fn test_hang_recovery_looks_like_a_slow_wait() {
    let (ctx, sim) = create_context(7);
    let mut batch = ctx.batch().unwrap();

    // Client 7 is not a command the engine understands
    batch.begin(2, 0).unwrap();
    batch.emit_words(&[7 << 29, 0]);
    batch.end();
    let done = batch.finish(Engine::Blt).unwrap();

    ctx.bridge().wait(&done).unwrap();
    assert_eq!(sim.hang_count(), 1);
    assert!(!ctx.bridge().is_busy(&done).unwrap());
}

#[test]
fn test_engines_are_not_ordered() {
    let (ctx, sim) = create_context(8);
    let a = filled_bo(&ctx, "a", 4096, 0);
    let b = filled_bo(&ctx, "b", 4096, 0);
    let mut blt = ctx.batch().unwrap();
    let mut render = ctx.batch().unwrap();

    sim.stall(Engine::Blt);
    let slow = blit::store_dword(&mut blt, &a, 0, 1).unwrap();

    blit::emit_store_dword(&mut render, &b, 0, 2).unwrap();
    let fast = render.finish(Engine::Render).unwrap();
    ctx.bridge().wait(&fast).unwrap();

    // Render finished while the blitter still holds earlier work
    assert_bo_word(&b, 0, 2);
    assert!(ctx.bridge().is_busy(&slow).unwrap());
    assert!(a.is_busy().unwrap());

    sim.resume(Engine::Blt);
    ctx.bridge().wait(&slow).unwrap();
    assert_bo_word(&a, 0, 1);
}

#[test]
fn test_concurrent_submitters() {
    let (ctx, sim) = create_context(9);
    let targets: Vec<_> = (0..4u32)
        .map(|i| filled_bo(&ctx, &format!("t{}", i), 64 * 1024, 0))
        .collect();
    let engines = [Engine::Blt, Engine::Render, Engine::Bsd, Engine::Blt];

    thread::scope(|s| {
        for (i, (target, engine)) in targets.iter().zip(engines).enumerate() {
            let ctx = &ctx;
            s.spawn(move || {
                let mut batch = ctx.batch().unwrap();
                batch.set_engine(engine);
                for word in 0..(64 * 1024 / 4) as u32 {
                    blit::emit_store_dword(&mut batch, target, word * 4, i as u32 + 1).unwrap();
                }
                batch.flush().unwrap();
            });
        }
    });
    ctx.bridge().drain().unwrap();

    for (i, target) in targets.iter().enumerate() {
        assert_bo_filled(target, i as u32 + 1);
    }
    assert!(sim.submissions().iter().all(|r| r.result.is_ok()));
}

#[test]
fn test_drain_retires_everything() {
    let (ctx, sim) = create_context(8);
    let dst = filled_bo(&ctx, "dst", 4096, 0);
    let mut batch = ctx.batch().unwrap();

    sim.stall(Engine::Blt);
    for i in 0..5u32 {
        blit::store_dword(&mut batch, &dst, i * 4, i).unwrap();
    }
    assert_eq!(ctx.bridge().pending_count(), 5);
    assert_eq!(ctx.bridge().retire(), 0);

    sim.resume(Engine::Blt);
    ctx.bridge().drain().unwrap();
    assert_eq!(ctx.bridge().pending_count(), 0);
    assert!(dst.presumed_address().is_some());
}
