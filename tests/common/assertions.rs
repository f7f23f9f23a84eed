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

//! Custom assertions for buffer contents and submissions

use gemkit::core::driver::SubmissionRecord;
use gemkit::core::BufferObject;

/// Assert every dword of the object equals `expected`
#[allow(dead_code)]
pub fn assert_bo_filled(bo: &BufferObject, expected: u32) {
    let words = bo.read_words().expect("Failed to read buffer object");
    if let Some((index, &actual)) = words.iter().enumerate().find(|&(_, &w)| w != expected) {
        panic!(
            "BO {} ({}) word {} mismatch: expected 0x{:08X}, got 0x{:08X}",
            bo.handle(),
            bo.name(),
            index,
            expected,
            actual
        );
    }
}

/// Assert the object holds the ascending pattern written by `pattern_bo`
#[allow(dead_code)]
pub fn assert_bo_pattern(bo: &BufferObject, seed: u32) {
    let words = bo.read_words().expect("Failed to read buffer object");
    for (index, &actual) in words.iter().enumerate() {
        let expected = seed.wrapping_add(index as u32);
        assert_eq!(
            actual, expected,
            "BO {} word {} mismatch: expected 0x{:08X}, got 0x{:08X}",
            bo.handle(),
            index,
            expected,
            actual
        );
    }
}

/// Assert a single dword of the object
#[allow(dead_code)]
pub fn assert_bo_word(bo: &BufferObject, index: usize, expected: u32) {
    let words = bo.read_words().expect("Failed to read buffer object");
    assert_eq!(
        words[index], expected,
        "BO {} word {} mismatch: expected 0x{:08X}, got 0x{:08X}",
        bo.handle(),
        index,
        expected,
        words[index]
    );
}

/// Assert every recorded submission was accepted
#[allow(dead_code)]
pub fn assert_all_accepted(records: &[SubmissionRecord]) {
    for (index, record) in records.iter().enumerate() {
        assert!(
            record.result.is_ok(),
            "Submission {} rejected: {:?}",
            index,
            record.result
        );
    }
}
