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

//! Simulated GPU address space
//!
//! Objects are bound at page granularity. The first page is never handed
//! out, so address 0 always means "not bound".

use std::collections::{BTreeMap, HashMap};

pub(super) const PAGE_SIZE: u64 = 4096;

fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

fn binding_size(size: u64) -> u64 {
    align_up(size.max(1), PAGE_SIZE)
}

pub(super) struct Aperture {
    size: u64,
    /// start -> (handle, bound size)
    bindings: BTreeMap<u64, (u32, u64)>,
    offsets: HashMap<u32, u64>,
}

impl Aperture {
    pub(super) fn new(size: u64) -> Self {
        Self {
            size,
            bindings: BTreeMap::new(),
            offsets: HashMap::new(),
        }
    }

    pub(super) fn offset_of(&self, handle: u32) -> Option<u64> {
        self.offsets.get(&handle).copied()
    }

    /// Whether `[start, start + size)` is inside the aperture and unused
    pub(super) fn is_free(&self, start: u64, size: u64) -> bool {
        let size = binding_size(size);
        if start < PAGE_SIZE || start % PAGE_SIZE != 0 || start + size > self.size {
            return false;
        }
        if let Some((&prev, &(_, prev_size))) = self.bindings.range(..start + size).next_back() {
            if prev + prev_size > start {
                return false;
            }
        }
        true
    }

    /// Lowest free range of `size` bytes with the given alignment
    pub(super) fn find_free(&self, size: u64, alignment: u64) -> Option<u64> {
        let size = binding_size(size);
        let alignment = alignment.max(PAGE_SIZE);
        let mut cursor = PAGE_SIZE;

        for (&start, &(_, bound)) in &self.bindings {
            let candidate = align_up(cursor, alignment);
            if candidate + size <= start {
                return Some(candidate);
            }
            cursor = cursor.max(start + bound);
        }

        let candidate = align_up(cursor, alignment);
        (candidate + size <= self.size).then_some(candidate)
    }

    pub(super) fn bind(&mut self, handle: u32, start: u64, size: u64) {
        self.unbind(handle);
        self.bindings.insert(start, (handle, binding_size(size)));
        self.offsets.insert(handle, start);
    }

    pub(super) fn unbind(&mut self, handle: u32) {
        if let Some(start) = self.offsets.remove(&handle) {
            self.bindings.remove(&start);
        }
    }

    /// Bound handles in address order
    pub(super) fn bound(&self) -> Vec<u32> {
        self.bindings.values().map(|&(handle, _)| handle).collect()
    }

    /// Object and byte offset backing a GPU address
    pub(super) fn translate(&self, address: u64) -> Option<(u32, u64)> {
        let (&start, &(handle, size)) = self.bindings.range(..=address).next_back()?;
        (address < start + size).then_some((handle, address - start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_page_reserved() {
        let aperture = Aperture::new(1 << 20);
        assert_eq!(aperture.find_free(4096, 4096), Some(PAGE_SIZE));
        assert!(!aperture.is_free(0, 4096));
    }

    #[test]
    fn test_first_fit_skips_bound_ranges() {
        let mut aperture = Aperture::new(1 << 20);
        aperture.bind(1, 0x1000, 0x2000);
        aperture.bind(2, 0x4000, 0x1000);

        // Hole at 0x3000 fits one page
        assert_eq!(aperture.find_free(0x1000, 0x1000), Some(0x3000));
        // Two pages only fit after the last binding
        assert_eq!(aperture.find_free(0x2000, 0x1000), Some(0x5000));
        // Alignment pushes the candidate forward
        assert_eq!(aperture.find_free(0x1000, 0x4000), Some(0x8000));
    }

    #[test]
    fn test_translate() {
        let mut aperture = Aperture::new(1 << 20);
        aperture.bind(7, 0x2000, 100);

        assert_eq!(aperture.translate(0x2000), Some((7, 0)));
        assert_eq!(aperture.translate(0x2fff), Some((7, 0xfff)));
        assert_eq!(aperture.translate(0x3000), None);
        assert_eq!(aperture.translate(0x1fff), None);
    }

    #[test]
    fn test_exhaustion() {
        let mut aperture = Aperture::new(0x3000);
        aperture.bind(1, 0x1000, 0x2000);
        assert_eq!(aperture.find_free(0x1000, 0x1000), None);

        aperture.unbind(1);
        assert_eq!(aperture.find_free(0x2000, 0x1000), Some(0x1000));
    }
}
