// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Open-addressing directory with linear probing.
//!
//! Each slot is a little-endian `u64`: `prefix << 48 | (ordinal + 1)`, where
//! `prefix` is the top 16 bits of the tuple hash. Zero is the empty slot.
use std::sync::Arc;

use crate::common::error::{AggError, AggResult};
use crate::runtime::buffer_manager::{BufferAllocator, BufferHandle};

use super::hash::{HASH_PREFIX_BITS, hash_prefix};

const SLOT_WIDTH: usize = std::mem::size_of::<u64>();
const ORDINAL_BITS: u32 = 64 - HASH_PREFIX_BITS;
const ORDINAL_MASK: u64 = (1u64 << ORDINAL_BITS) - 1;
pub(crate) const EMPTY_SLOT: u64 = 0;
pub(crate) const MIN_DIRECTORY_CAPACITY: usize = 16;

#[inline]
pub(crate) fn pack_slot(prefix: u16, ordinal: usize) -> u64 {
    ((prefix as u64) << ORDINAL_BITS) | ((ordinal as u64 + 1) & ORDINAL_MASK)
}

#[inline]
pub(crate) fn slot_prefix(slot: u64) -> u16 {
    (slot >> ORDINAL_BITS) as u16
}

#[inline]
pub(crate) fn slot_ordinal(slot: u64) -> usize {
    ((slot & ORDINAL_MASK) - 1) as usize
}

pub(crate) struct Directory {
    allocator: Arc<dyn BufferAllocator>,
    slots: Option<BufferHandle>,
    capacity: usize,
    bitmask: u64,
}

impl Directory {
    pub(crate) fn try_new(allocator: Arc<dyn BufferAllocator>, capacity: usize) -> AggResult<Self> {
        if !capacity.is_power_of_two() || capacity < MIN_DIRECTORY_CAPACITY {
            return Err(AggError::precondition(format!(
                "directory capacity {} must be a power of two >= {}",
                capacity, MIN_DIRECTORY_CAPACITY
            )));
        }
        let bytes = capacity
            .checked_mul(SLOT_WIDTH)
            .ok_or_else(|| AggError::allocation("directory size overflow"))?;
        let slots = allocator.acquire(bytes)?;
        Ok(Self {
            allocator,
            slots: Some(slots),
            capacity,
            bitmask: (capacity - 1) as u64,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn start_index(&self, hash: u64) -> usize {
        (hash & self.bitmask) as usize
    }

    #[inline]
    pub(crate) fn next_index(&self, idx: usize) -> usize {
        (idx + 1) & self.bitmask as usize
    }

    #[inline]
    pub(crate) fn slot(&self, idx: usize) -> u64 {
        let Some(handle) = self.slots.as_ref() else {
            return EMPTY_SLOT;
        };
        let start = idx * SLOT_WIDTH;
        let mut buf = [0u8; SLOT_WIDTH];
        buf.copy_from_slice(&handle.as_slice()[start..start + SLOT_WIDTH]);
        u64::from_le_bytes(buf)
    }

    #[inline]
    pub(crate) fn set_slot(&mut self, idx: usize, value: u64) {
        if let Some(handle) = self.slots.as_mut() {
            let start = idx * SLOT_WIDTH;
            handle.as_mut_slice()[start..start + SLOT_WIDTH].copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Place an entry at the first empty slot of its probe sequence.
    /// The caller guarantees the directory is not full.
    fn place(&mut self, hash_prefix_bits: u16, start: usize, ordinal: usize) {
        let mut idx = start;
        while self.slot(idx) != EMPTY_SLOT {
            idx = self.next_index(idx);
        }
        self.set_slot(idx, pack_slot(hash_prefix_bits, ordinal));
    }

    #[cfg(test)]
    pub(crate) fn insert(&mut self, hash: u64, ordinal: usize) {
        let start = self.start_index(hash);
        self.place(hash_prefix(hash), start, ordinal);
    }

    /// Move every entry into a directory of `new_capacity` slots.
    ///
    /// Only the slot's prefix and ordinal move; tuple data is untouched. The
    /// start index needs the low hash bits, which are recovered through
    /// `hash_of(ordinal)`.
    pub(crate) fn resize(
        &mut self,
        new_capacity: usize,
        hash_of: impl Fn(usize) -> u64,
    ) -> AggResult<()> {
        if new_capacity <= self.capacity {
            return Err(AggError::precondition(format!(
                "resize to {} must exceed current capacity {}",
                new_capacity, self.capacity
            )));
        }
        let mut next = Directory::try_new(Arc::clone(&self.allocator), new_capacity)?;
        for idx in 0..self.capacity {
            let slot = self.slot(idx);
            if slot == EMPTY_SLOT {
                continue;
            }
            let ordinal = slot_ordinal(slot);
            let start = next.start_index(hash_of(ordinal));
            next.place(slot_prefix(slot), start, ordinal);
        }
        std::mem::swap(self, &mut next);
        Ok(())
    }
}

impl Drop for Directory {
    fn drop(&mut self) {
        if let Some(handle) = self.slots.take() {
            self.allocator.release(handle);
        }
    }
}
