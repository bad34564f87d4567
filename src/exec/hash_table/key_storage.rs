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
use std::fmt;
use std::sync::Arc;

use crate::common::error::{AggError, AggResult};
use crate::runtime::buffer_manager::{BufferAllocator, BufferHandle};

/// Stable address of a tuple: block index plus byte offset inside that block.
///
/// Tuples never move, so an address stays valid for the lifetime of the table
/// that issued it. Addresses are validated against arena bounds on every access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TupleAddr {
    pub block: u32,
    pub offset: u32,
}

impl fmt::Display for TupleAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.offset)
    }
}

/// Append-only tuple storage made of fixed-size blocks from a `BufferAllocator`.
///
/// A tuple is never split across blocks; a block holds `tuples_per_block`
/// tuples and the remainder is left unused.
pub(crate) struct TupleArena {
    allocator: Arc<dyn BufferAllocator>,
    blocks: Vec<BufferHandle>,
    block_size: usize,
    tuple_size: usize,
    tuples_per_block: usize,
    len: usize,
}

impl TupleArena {
    pub(crate) fn new(
        allocator: Arc<dyn BufferAllocator>,
        tuple_size: usize,
        block_size: usize,
    ) -> Self {
        let tuple_size = tuple_size.max(1);
        let block_size = block_size.max(tuple_size);
        Self {
            allocator,
            blocks: Vec::new(),
            block_size,
            tuple_size,
            tuples_per_block: block_size / tuple_size,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn capacity(&self) -> usize {
        self.blocks.len() * self.tuples_per_block
    }

    fn grow(&mut self) -> AggResult<()> {
        if self.blocks.len() >= u32::MAX as usize {
            return Err(AggError::allocation("tuple arena block count overflow"));
        }
        let handle = self.allocator.acquire(self.block_size)?;
        self.blocks.push(handle);
        Ok(())
    }

    /// Make room for `additional` more tuples without further allocation.
    pub(crate) fn reserve(&mut self, additional: usize) -> AggResult<()> {
        let needed = self.len.saturating_add(additional);
        while self.capacity() < needed {
            self.grow()?;
        }
        Ok(())
    }

    /// Claim the next zeroed tuple slot, growing by one block when full.
    pub(crate) fn append(&mut self) -> AggResult<(usize, TupleAddr)> {
        if self.len == self.capacity() {
            self.grow()?;
        }
        let ordinal = self.len;
        self.len += 1;
        Ok((ordinal, self.addr_of(ordinal)))
    }

    pub(crate) fn addr_of(&self, ordinal: usize) -> TupleAddr {
        TupleAddr {
            block: (ordinal / self.tuples_per_block) as u32,
            offset: ((ordinal % self.tuples_per_block) * self.tuple_size) as u32,
        }
    }

    pub(crate) fn ordinal_of(&self, addr: TupleAddr) -> AggResult<usize> {
        let offset = addr.offset as usize;
        let block = addr.block as usize;
        if block >= self.blocks.len()
            || offset % self.tuple_size != 0
            || offset / self.tuple_size >= self.tuples_per_block
        {
            return Err(AggError::precondition(format!(
                "tuple address {} outside arena (blocks={} tuple_size={})",
                addr,
                self.blocks.len(),
                self.tuple_size
            )));
        }
        let ordinal = block * self.tuples_per_block + offset / self.tuple_size;
        if ordinal >= self.len {
            return Err(AggError::precondition(format!(
                "tuple address {} refers to an unallocated tuple (len={})",
                addr, self.len
            )));
        }
        Ok(ordinal)
    }

    pub(crate) fn tuple(&self, addr: TupleAddr) -> AggResult<&[u8]> {
        self.ordinal_of(addr)?;
        let block = &self.blocks[addr.block as usize];
        let start = addr.offset as usize;
        Ok(&block.as_slice()[start..start + self.tuple_size])
    }

    pub(crate) fn tuple_mut(&mut self, addr: TupleAddr) -> AggResult<&mut [u8]> {
        self.ordinal_of(addr)?;
        let tuple_size = self.tuple_size;
        let block = &mut self.blocks[addr.block as usize];
        let start = addr.offset as usize;
        Ok(&mut block.as_mut_slice()[start..start + tuple_size])
    }

    pub(crate) fn tuple_at(&self, ordinal: usize) -> AggResult<&[u8]> {
        if ordinal >= self.len {
            return Err(AggError::precondition(format!(
                "tuple ordinal {} out of range (len={})",
                ordinal, self.len
            )));
        }
        self.tuple(self.addr_of(ordinal))
    }

    /// Iterate tuples in append order, starting at `start`.
    pub(crate) fn iter_from(&self, start: usize) -> impl Iterator<Item = &[u8]> + '_ {
        (start.min(self.len)..self.len).map(move |ordinal| {
            let addr = self.addr_of(ordinal);
            let begin = addr.offset as usize;
            &self.blocks[addr.block as usize].as_slice()[begin..begin + self.tuple_size]
        })
    }
}

impl Drop for TupleArena {
    fn drop(&mut self) {
        for handle in self.blocks.drain(..) {
            self.allocator.release(handle);
        }
    }
}

pub(crate) const STRING_REF_WIDTH: usize = 12;

/// Location of a variable-length key payload inside the string heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct StringRef {
    pub(crate) block: u32,
    pub(crate) offset: u32,
    pub(crate) len: u32,
}

impl StringRef {
    pub(crate) const EMPTY: StringRef = StringRef {
        block: 0,
        offset: 0,
        len: 0,
    };

    pub(crate) fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.len.to_le_bytes());
        out[4..8].copy_from_slice(&self.block.to_le_bytes());
        out[8..12].copy_from_slice(&self.offset.to_le_bytes());
    }

    pub(crate) fn decode(bytes: &[u8]) -> Self {
        let word = |range: std::ops::Range<usize>| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[range]);
            u32::from_le_bytes(buf)
        };
        Self {
            len: word(0..4),
            block: word(4..8),
            offset: word(8..12),
        }
    }
}

/// Append-only byte heap that keeps variable-length group keys alive after
/// their input batch is gone.
///
/// A reservation that does not fit the tail of the current block parks a
/// spare block instead of opening it, so the tail keeps taking strings until
/// one no longer fits.
pub(crate) struct StringHeap {
    allocator: Arc<dyn BufferAllocator>,
    blocks: Vec<BufferHandle>,
    spare: Option<BufferHandle>,
    cursor: usize,
    block_size: usize,
    used_bytes: usize,
}

impl StringHeap {
    pub(crate) fn new(allocator: Arc<dyn BufferAllocator>, block_size: usize) -> Self {
        Self {
            allocator,
            blocks: Vec::new(),
            spare: None,
            cursor: 0,
            block_size: block_size.max(1),
            used_bytes: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.blocks
            .last()
            .map(|b| b.len() - self.cursor)
            .unwrap_or(0)
    }

    fn start_block(&mut self, min_size: usize) -> AggResult<()> {
        if self.blocks.len() >= u32::MAX as usize {
            return Err(AggError::allocation("string heap block count overflow"));
        }
        let handle = match self.spare.take() {
            Some(spare) if spare.len() >= min_size => spare,
            spare => {
                self.spare = spare;
                self.allocator.acquire(self.block_size.max(min_size))?
            }
        };
        self.blocks.push(handle);
        self.cursor = 0;
        Ok(())
    }

    /// Guarantee that the next `total` bytes of `add` calls need no allocation.
    ///
    /// Strings go to the current block while they fit and then move to the
    /// spare block, which alone holds `total` bytes.
    pub(crate) fn reserve_contiguous(&mut self, total: usize) -> AggResult<()> {
        if total == 0 || self.remaining() >= total {
            return Ok(());
        }
        if self.spare.as_ref().is_some_and(|spare| spare.len() >= total) {
            return Ok(());
        }
        if self.blocks.len() >= u32::MAX as usize {
            return Err(AggError::allocation("string heap block count overflow"));
        }
        let handle = self.allocator.acquire(self.block_size.max(total))?;
        if let Some(old) = self.spare.replace(handle) {
            self.allocator.release(old);
        }
        Ok(())
    }

    pub(crate) fn add(&mut self, bytes: &[u8]) -> AggResult<StringRef> {
        if bytes.is_empty() {
            return Ok(StringRef::EMPTY);
        }
        let len = u32::try_from(bytes.len()).map_err(|_| {
            AggError::precondition(format!("string key of {} bytes is too long", bytes.len()))
        })?;
        if self.remaining() < bytes.len() {
            self.start_block(bytes.len())?;
        }
        let block_idx = self.blocks.len() - 1;
        let start = self.cursor;
        let block = &mut self.blocks[block_idx];
        block.as_mut_slice()[start..start + bytes.len()].copy_from_slice(bytes);
        self.cursor += bytes.len();
        self.used_bytes += bytes.len();
        Ok(StringRef {
            block: block_idx as u32,
            offset: start as u32,
            len,
        })
    }

    pub(crate) fn get(&self, r: StringRef) -> AggResult<&[u8]> {
        if r.len == 0 {
            return Ok(&[]);
        }
        let start = r.offset as usize;
        let end = start + r.len as usize;
        self.blocks
            .get(r.block as usize)
            .and_then(|b| b.as_slice().get(start..end))
            .ok_or_else(|| {
                AggError::precondition(format!(
                    "string ref block={} offset={} len={} outside heap",
                    r.block, r.offset, r.len
                ))
            })
    }

    pub(crate) fn used_bytes(&self) -> usize {
        self.used_bytes
    }
}

impl Drop for StringHeap {
    fn drop(&mut self) {
        for handle in self.blocks.drain(..).chain(self.spare.take()) {
            self.allocator.release(handle);
        }
    }
}
