// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut

use super::super::*;

fn desc(tiling: Tiling, base_address: u64) -> SurfaceDesc {
    SurfaceDesc {
        base_address,
        ..SurfaceDesc::new_2d(SURFACEFORMAT_B8G8R8A8_UNORM, 512, 256, 2048, tiling)
    }
}

#[test]
fn test_state_sizes() {
    let gen6 = GenOps::for_gen(6).unwrap();
    let gen7 = GenOps::for_gen(7).unwrap();
    let gen8 = GenOps::for_gen(8).unwrap();

    assert_eq!(gen6.surface_state_size(), 24);
    assert_eq!(gen7.surface_state_size(), 32);
    assert_eq!(gen8.surface_state_size(), 64);
    assert_eq!(gen7.surface_state_alignment(), 32);
    assert_eq!(gen8.surface_state_alignment(), 64);
    assert_eq!(gen7.surface_base_dword(), 1);
    assert_eq!(gen8.surface_base_dword(), 8);
}

#[test]
fn test_gen6_layout() {
    let ops = GenOps::for_gen(6).unwrap();
    let ss = ops.encode_surface_state(&desc(Tiling::X, 0x1000));

    assert_eq!(ss.len(), 6);
    assert_eq!(ss[0], 0x2300_0000);
    assert_eq!(ss[1], 0x1000);
    assert_eq!(ss[2], 0x07f8_7fc0);
    assert_eq!(ss[3], 0x3ffa);
    assert_eq!(ops.decode_surface_state(&ss), desc(Tiling::X, 0x1000));
}

#[test]
fn test_gen7_layout() {
    let ops = GenOps::for_gen(7).unwrap();
    let ss = ops.encode_surface_state(&desc(Tiling::X, 0x1000));

    assert_eq!(ss.len(), 8);
    assert_eq!(ss[0], 0x2300_4000);
    assert_eq!(ss[1], 0x1000);
    assert_eq!(ss[2], 0x00ff_01ff);
    assert_eq!(ss[3], 0x7ff);
    assert!(ss[4..].iter().all(|&w| w == 0));
}

#[test]
fn test_gen7_y_tiling_bits() {
    let ops = GenOps::for_gen(7).unwrap();
    let ss = ops.encode_surface_state(&desc(Tiling::Y, 0));

    assert_eq!(ss[0] & (3 << 13), 3 << 13);
    assert_eq!(ops.decode_surface_state(&ss).tiling, Tiling::Y);
}

#[test]
fn test_gen8_layout() {
    let ops = GenOps::for_gen(8).unwrap();
    let ss = ops.encode_surface_state(&desc(Tiling::Y, 0x1_0000_2000));

    assert_eq!(ss.len(), 16);
    assert_eq!(ss[0], 0x2301_7000);
    assert_eq!(ss[2], 0x00ff_01ff);
    assert_eq!(ss[3], 0x7ff);
    assert_eq!(ss[7], 0x0977_0000);
    assert_eq!(ss[8], 0x2000);
    assert_eq!(ss[9], 1);
    assert_eq!(ss[1], 0);
}

#[test]
fn test_gen8_decode_recovers_description() {
    let ops = GenOps::for_gen(9).unwrap();
    for tiling in [Tiling::None, Tiling::X, Tiling::Y] {
        let original = desc(tiling, 0xfff_f000);
        let ss = ops.encode_surface_state(&original);
        assert_eq!(ops.decode_surface_state(&ss), original);
    }
}

#[test]
fn test_fields_are_masked() {
    let ops = GenOps::for_gen(7).unwrap();
    let oversized = SurfaceDesc::new_2d(SURFACEFORMAT_R8_UNORM, 1 << 15, 1, 64, Tiling::None);
    let ss = ops.encode_surface_state(&oversized);

    // Width field is 14 bits wide and must not bleed into the height.
    assert_eq!(ss[2] >> 16, 0);
}
