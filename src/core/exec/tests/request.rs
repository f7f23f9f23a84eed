// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut

use super::super::*;
use super::setup;
use crate::core::bo::{Domain, Tiling};
use crate::core::reloc::RelocationRecorder;

#[test]
fn test_object_list_order() {
    let (ctx, _sim) = setup(8, Config::default());
    let bufmgr = ctx.bufmgr();
    let batch = bufmgr.allocate("batch", 4096, 0).unwrap();
    let a = bufmgr.allocate("a", 4096, 0).unwrap();
    let b = bufmgr.allocate("b", 4096, 0).unwrap();

    let mut recorder = RelocationRecorder::new(bufmgr.id(), 2);
    recorder.record(4, 4096, &b, 0, Domain::RENDER, Domain::RENDER, false);
    recorder.record(16, 4096, &a, 0, Domain::RENDER, Domain::empty(), false);
    recorder.record(32, 4096, &b, 8, Domain::RENDER, Domain::RENDER, false);

    let submission = Submission::new(batch.clone(), 64, recorder.take(), Engine::Blt);
    let handles: Vec<u32> = submission.objects().iter().map(|bo| bo.handle()).collect();

    assert_eq!(handles, vec![b.handle(), a.handle(), batch.handle()]);
}

#[test]
fn test_full_request_layout() {
    let (ctx, _sim) = setup(8, Config::default());
    let bufmgr = ctx.bufmgr();
    let batch = bufmgr.allocate("batch", 4096, 0).unwrap();
    let a = bufmgr.allocate("a", 4096, 0).unwrap();
    let b = bufmgr.allocate("b", 4096, 0).unwrap();

    let mut recorder = RelocationRecorder::new(bufmgr.id(), 2);
    recorder.record(4, 4096, &b, 0, Domain::RENDER, Domain::RENDER, false);
    recorder.record(16, 4096, &a, 0, Domain::SAMPLER, Domain::empty(), false);
    recorder.record(32, 4096, &b, 8, Domain::RENDER, Domain::RENDER, false);

    let request = Submission::new(batch.clone(), 64, recorder.take(), Engine::Blt)
        .build_request(true);

    assert_eq!(request.engine(), Some(Engine::Blt));
    assert_eq!(request.batch_len, 64);
    assert_eq!(request.batch_start_offset, 0);
    assert!(request.exec_flags().contains(ExecFlags::HANDLE_LUT));
    assert!(!request.exec_flags().contains(ExecFlags::NO_RELOC));

    let targets: Vec<u32> = request.relocations.iter().map(|r| r.target_index).collect();
    assert_eq!(targets, vec![0, 1, 0]);
    assert_eq!(request.relocations[2].delta, 8);
    assert_eq!(request.relocations[1].read_domains, Domain::SAMPLER);

    assert_eq!(request.objects[0].flags, ExecObjectFlags::WRITE);
    assert_eq!(request.objects[1].flags, ExecObjectFlags::empty());

    let batch_object = request.batch_object().unwrap();
    assert_eq!(batch_object.handle, batch.handle());
    assert_eq!(batch_object.relocation_count, 3);
    assert_eq!(batch_object.relocation_offset, 0);
}

#[test]
fn test_optimistic_request_omits_patched_entries() {
    let (ctx, _sim) = setup(8, Config::default());
    let bufmgr = ctx.bufmgr();
    let batch = bufmgr.allocate("batch", 4096, 0).unwrap();
    let known = bufmgr.allocate("known", 4096, 0).unwrap();
    let fresh = bufmgr.allocate("fresh", 4096, 0).unwrap();

    let mut recorder = RelocationRecorder::new(bufmgr.id(), 2);
    recorder.record(8, 4096, &known, 0, Domain::RENDER, Domain::empty(), false);
    recorder.record(16, 4096, &fresh, 0, Domain::RENDER, Domain::RENDER, false);

    bufmgr.addresses().update(known.handle(), 0x10_0000, 0);
    let mut stream = vec![0u8; 4096];
    assert_eq!(recorder.resolve_locally(bufmgr.addresses(), &mut stream), 1);

    let submission = Submission::new(batch, 32, recorder.take(), Engine::Render);
    assert_eq!(submission.locally_patched(), 1);

    let optimistic = submission.build_request(true);
    assert!(optimistic.exec_flags().contains(ExecFlags::NO_RELOC));
    assert_eq!(optimistic.relocations.len(), 1);
    assert_eq!(optimistic.relocations[0].target_index, 1);
    assert_eq!(optimistic.objects[0].offset, 0x10_0000);

    let full = submission.build_request(false);
    assert!(!full.exec_flags().contains(ExecFlags::NO_RELOC));
    assert_eq!(full.relocations.len(), 2);
    assert_eq!(full.relocations[0].presumed_address, 0x10_0000);
}

#[test]
fn test_fence_requested_only_for_tiled_targets() {
    let (ctx, _sim) = setup(9, Config::default());
    let bufmgr = ctx.bufmgr();
    let batch = bufmgr.allocate("batch", 4096, 0).unwrap();
    let tiled = bufmgr.allocate("tiled", 16 * 4096, 0).unwrap();
    let linear = bufmgr.allocate("linear", 4096, 0).unwrap();
    tiled.set_tiling(Tiling::X, 4096).unwrap();

    let mut recorder = RelocationRecorder::new(bufmgr.id(), 2);
    recorder.record(8, 4096, &tiled, 0, Domain::RENDER, Domain::empty(), true);
    recorder.record(16, 4096, &linear, 0, Domain::RENDER, Domain::empty(), true);

    let request = Submission::new(batch, 32, recorder.take(), Engine::Blt).build_request(true);

    assert_eq!(request.objects[0].flags, ExecObjectFlags::NEEDS_FENCE);
    assert_eq!(request.objects[1].flags, ExecObjectFlags::empty());
}

#[test]
fn test_batch_relocating_itself_is_listed_once() {
    let (ctx, _sim) = setup(7, Config::default());
    let bufmgr = ctx.bufmgr();
    let batch = bufmgr.allocate("batch", 4096, 0).unwrap();

    let mut recorder = RelocationRecorder::new(bufmgr.id(), 1);
    recorder.record(4, 4096, &batch, 0x100, Domain::INSTRUCTION, Domain::empty(), false);

    let request = Submission::new(batch.clone(), 16, recorder.take(), Engine::Render)
        .build_request(true);

    assert_eq!(request.objects.len(), 1);
    assert_eq!(request.relocations[0].target_index, 0);
}
