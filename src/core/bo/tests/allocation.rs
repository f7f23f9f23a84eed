// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut

use super::super::*;
use super::{setup, setup_with};
use crate::core::driver::SimConfig;

#[test]
fn test_allocate_reports_size_and_alignment() {
    let (bufmgr, sim) = setup(8);
    let bo = bufmgr.allocate("scratch", 8192, 0).unwrap();

    assert_eq!(bo.size(), 8192);
    assert_eq!(bo.alignment(), DEFAULT_ALIGNMENT);
    assert_eq!(bo.name(), "scratch");
    assert_eq!(bo.manager_id(), bufmgr.id());
    assert_eq!(bo.tiling(), Tiling::None);
    assert_eq!(sim.object_info(bo.handle()).unwrap().size, 8192);
}

#[test]
fn test_allocate_zero_size_fails() {
    let (bufmgr, sim) = setup(7);

    let result = bufmgr.allocate("empty", 0, 4096);
    assert!(matches!(
        result,
        Err(GemError::Allocation {
            size: 0,
            code: Errno::EINVAL
        })
    ));
    assert_eq!(sim.object_count(), 0);
}

#[test]
fn test_allocate_rejects_odd_alignment() {
    let (bufmgr, _sim) = setup(7);

    let result = bufmgr.allocate("odd", 4096, 3000);
    assert!(matches!(
        result,
        Err(GemError::Allocation {
            code: Errno::EINVAL,
            ..
        })
    ));
}

#[test]
fn test_allocation_refused_by_kernel_is_surfaced() {
    let (bufmgr, _sim) = setup_with(SimConfig {
        memory_budget: 8192,
        ..SimConfig::for_gen(9)
    });

    let _first = bufmgr.allocate("first", 4096, 0).unwrap();
    let result = bufmgr.allocate("second", 8192, 0);

    assert!(matches!(
        result,
        Err(GemError::Allocation {
            size: 8192,
            code: Errno::ENOMEM
        })
    ));
}

#[test]
fn test_last_reference_closes_handle() {
    let (bufmgr, sim) = setup(9);

    let bo = bufmgr.allocate("short-lived", 4096, 0).unwrap();
    let copy = bo.clone();
    assert_eq!(bo.ref_count(), 2);
    assert!(bo.same_object(&copy));

    drop(bo);
    assert_eq!(sim.object_count(), 1);
    assert_eq!(copy.ref_count(), 1);

    drop(copy);
    assert_eq!(sim.object_count(), 0);
    assert_eq!(sim.allocated(), 0);
}

#[test]
fn test_drop_forgets_known_address() {
    let (bufmgr, _sim) = setup(9);
    let addresses = Arc::clone(bufmgr.addresses());

    let bo = bufmgr.allocate("placed", 4096, 0).unwrap();
    addresses.update(bo.handle(), 0x40_0000, 0);
    assert_eq!(bo.presumed_address(), Some(0x40_0000));

    drop(bo);
    assert!(addresses.is_empty());
}

#[test]
fn test_write_then_read_bytes() {
    let (bufmgr, _sim) = setup(6);
    let bo = bufmgr.allocate("data", 4096, 0).unwrap();

    bo.write(100, &[0xde, 0xad, 0xbe, 0xef]).unwrap();

    let mut out = [0u8; 6];
    bo.read(99, &mut out).unwrap();
    assert_eq!(out, [0, 0xde, 0xad, 0xbe, 0xef, 0]);
}

#[test]
fn test_write_past_end_is_driver_error() {
    let (bufmgr, _sim) = setup(6);
    let bo = bufmgr.allocate("small", 4096, 0).unwrap();

    let result = bo.write(4094, &[1, 2, 3, 4]);
    assert!(matches!(
        result,
        Err(GemError::Driver {
            op: "pwrite",
            code: Errno::EINVAL,
            ..
        })
    ));
}

#[test]
fn test_fill_words() {
    let (bufmgr, _sim) = setup(8);
    let bo = bufmgr.allocate("pattern", 8192, 0).unwrap();

    bo.fill_words(0x1234_5678).unwrap();

    let words = bo.read_words().unwrap();
    assert_eq!(words.len(), 2048);
    assert!(words.iter().all(|&w| w == 0x1234_5678));
}

#[test]
fn test_map_writes_through() {
    let (bufmgr, sim) = setup(8);
    let bo = bufmgr.allocate("mapped", 4096, 0).unwrap();

    bo.map(|data| {
        assert_eq!(data.len(), 4096);
        data[..4].copy_from_slice(&[9, 8, 7, 6]);
    })
    .unwrap();

    let mut out = [0u8; 4];
    bo.read(0, &mut out).unwrap();
    assert_eq!(out, [9, 8, 7, 6]);

    let info = sim.object_info(bo.handle()).unwrap();
    assert_eq!(info.read_domains, Domain::CPU);
    assert_eq!(info.write_domain, Domain::CPU);
}

#[test]
fn test_map_closure_may_use_other_objects() {
    let (bufmgr, _sim) = setup(8);
    let source = bufmgr.allocate("source", 4096, 0).unwrap();
    source.fill_words(0xcafe_f00d).unwrap();
    let bo = bufmgr.allocate("mapped", 4096, 0).unwrap();

    bo.map(|data| {
        let mut word = [0u8; 4];
        source.read(16, &mut word).unwrap();
        data[..4].copy_from_slice(&word);
        assert!(!bo.is_busy().unwrap());
    })
    .unwrap();

    assert_eq!(bo.read_words().unwrap()[0], 0xcafe_f00d);
}

#[test]
fn test_set_caching_reaches_kernel() {
    let (bufmgr, sim) = setup(7);
    let bo = bufmgr.allocate("snooped", 4096, 0).unwrap();

    bo.set_caching(Caching::Cached).unwrap();

    assert_eq!(bo.caching(), Caching::Cached);
    assert_eq!(
        sim.object_info(bo.handle()).unwrap().caching,
        Caching::Cached
    );
}

#[test]
fn test_idle_object_is_not_busy() {
    let (bufmgr, _sim) = setup(9);
    let bo = bufmgr.allocate("idle", 4096, 0).unwrap();

    assert!(!bo.is_busy().unwrap());
    bo.wait_idle(Some(std::time::Duration::from_millis(10)))
        .unwrap();
}
