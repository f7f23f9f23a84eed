// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut

use super::super::*;
use super::read_address;

#[test]
fn test_update_and_lookup() {
    let table = AddressTable::new();
    assert!(table.is_empty());
    assert_eq!(table.lookup(3), None);

    table.update(3, 0x10_0000, 1);
    table.update(4, 0x20_0000, 1);
    assert_eq!(table.lookup(3), Some(0x10_0000));
    assert_eq!(table.len(), 2);

    table.update(3, 0x30_0000, 2);
    assert_eq!(table.lookup(3), Some(0x30_0000));
    assert_eq!(table.len(), 2);
}

#[test]
fn test_zero_address_is_ignored() {
    let table = AddressTable::new();
    table.update(1, 0x1000, 1);
    table.update(1, 0, 2);
    table.update(2, 0, 2);

    assert_eq!(table.lookup(1), Some(0x1000));
    assert_eq!(table.lookup(2), None);
}

#[test]
fn test_older_observation_does_not_overwrite() {
    let table = AddressTable::new();
    table.update(5, 0x20_0000, 4);
    table.update(5, 0x10_0000, 3);
    table.update(5, 0x30_0000, 4);

    assert_eq!(table.lookup(5), Some(0x20_0000));
}

#[test]
fn test_issue_is_monotonic() {
    let table = AddressTable::new();
    assert_eq!(table.last_issued(), 0);
    assert_eq!(table.issue(), 1);
    assert_eq!(table.issue(), 2);
    assert_eq!(table.last_issued(), 2);
}

#[test]
fn test_invalidate_ignores_in_flight_observations() {
    let table = AddressTable::new();
    let before = table.issue();
    table.update(6, 0x4000, before);

    let in_flight = table.issue();
    table.invalidate(6);
    assert_eq!(table.lookup(6), None);

    table.update(6, 0x4000, in_flight);
    assert_eq!(table.lookup(6), None);
    assert!(table.is_empty());

    let after = table.issue();
    table.update(6, 0x9000, after);
    assert_eq!(table.lookup(6), Some(0x9000));
}

#[test]
fn test_invalidate_without_submissions_removes_entry() {
    let table = AddressTable::new();
    table.update(9, 0x4000, 0);
    table.invalidate(9);

    table.update(9, 0x5000, 0);
    assert_eq!(table.lookup(9), Some(0x5000));
}

#[test]
fn test_forget() {
    let table = AddressTable::new();
    table.update(7, 0x8000, 1);
    table.forget(7);
    table.forget(8);

    assert_eq!(table.lookup(7), None);
    assert!(table.is_empty());
}

#[test]
fn test_48_bit_slot_layout() {
    let mut buffer = vec![0u8; 16];
    write_address(&mut buffer, 4, 0x0001_2345_6789_a000, 2);

    assert_eq!(&buffer[4..8], &0x6789_a000u32.to_le_bytes());
    assert_eq!(&buffer[8..12], &0x0001_2345u32.to_le_bytes());
    assert_eq!(read_address(&buffer, 4, 2), 0x0001_2345_6789_a000);
}

#[test]
fn test_32_bit_slot_truncates() {
    let mut buffer = vec![0xffu8; 8];
    write_address(&mut buffer, 0, 0x0001_0000_4000, 1);

    assert_eq!(read_address(&buffer, 0, 1), 0x4000);
    assert_eq!(&buffer[4..8], &[0xff; 4]);
}
