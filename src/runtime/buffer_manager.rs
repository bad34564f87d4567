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
//! Paged buffer allocation used by hash-table storage.
//!
//! The hash table never owns raw memory directly; it asks a `BufferAllocator`
//! for pinned blocks and hands every block back on drop. Separately acquired
//! handles are never assumed to be contiguous.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::common::error::{AggError, AggResult};
use crate::novarocks_logging::warn;
use crate::runtime::mem_tracker::{MemTracker, process_mem_tracker};

/// A pinned, zero-initialized byte block obtained from a `BufferAllocator`.
pub struct BufferHandle {
    id: u64,
    data: Box<[u8]>,
}

impl BufferHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHandle")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish()
    }
}

pub trait BufferAllocator: Send + Sync + fmt::Debug {
    /// Acquire a pinned block of exactly `size` zeroed bytes.
    fn acquire(&self, size: usize) -> AggResult<BufferHandle>;

    /// Return a block previously handed out by `acquire`.
    fn release(&self, handle: BufferHandle);
}

/// Default allocator: heap blocks accounted in a `MemTracker`, with an optional byte limit.
#[derive(Debug)]
pub struct BufferManager {
    tracker: Arc<MemTracker>,
    next_id: AtomicU64,
    live_handles: AtomicI64,
}

impl BufferManager {
    /// Unlimited manager reporting into a child of the process tracker.
    pub fn new() -> Arc<Self> {
        let tracker = MemTracker::new_child("BufferManager", &process_mem_tracker());
        Self::with_tracker(tracker)
    }

    /// Manager that fails allocations once `limit_bytes` are outstanding.
    pub fn with_limit(limit_bytes: i64) -> Arc<Self> {
        Self::with_tracker(MemTracker::new_root_with_limit(
            "BufferManager",
            limit_bytes,
        ))
    }

    /// Manager configured from `[memory] limit_bytes`, unlimited when unset.
    pub fn from_config() -> Arc<Self> {
        match crate::common::config::memory_limit_bytes() {
            Some(limit) => Self::with_limit(limit),
            None => Self::new(),
        }
    }

    pub fn with_tracker(tracker: Arc<MemTracker>) -> Arc<Self> {
        Arc::new(Self {
            tracker,
            next_id: AtomicU64::new(1),
            live_handles: AtomicI64::new(0),
        })
    }

    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.tracker
    }

    /// Number of handles acquired and not yet released.
    pub fn live_handles(&self) -> i64 {
        self.live_handles.load(Ordering::Relaxed)
    }
}

impl BufferAllocator for BufferManager {
    fn acquire(&self, size: usize) -> AggResult<BufferHandle> {
        let bytes = i64::try_from(size)
            .map_err(|_| AggError::allocation(format!("block size {size} overflows i64")))?;
        if let Err(reason) = self.tracker.try_consume(bytes) {
            warn!("buffer acquire of {} bytes refused: {}", size, reason);
            return Err(AggError::allocation(reason));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live_handles.fetch_add(1, Ordering::Relaxed);
        Ok(BufferHandle {
            id,
            data: vec![0u8; size].into_boxed_slice(),
        })
    }

    fn release(&self, handle: BufferHandle) {
        let bytes = i64::try_from(handle.len()).unwrap_or(i64::MAX);
        self.tracker.release(bytes);
        self.live_handles.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::AggErrorKind;

    #[test]
    fn acquire_and_release_are_accounted() {
        let manager = BufferManager::with_limit(-1);
        let mut handle = manager.acquire(1024).unwrap();
        assert_eq!(handle.len(), 1024);
        assert!(handle.as_slice().iter().all(|b| *b == 0));
        handle.as_mut_slice()[0] = 7;
        assert_eq!(manager.mem_tracker().current(), 1024);
        assert_eq!(manager.live_handles(), 1);

        manager.release(handle);
        assert_eq!(manager.mem_tracker().current(), 0);
        assert_eq!(manager.live_handles(), 0);
    }

    #[test]
    fn limit_turns_into_allocation_failure() {
        let manager = BufferManager::with_limit(1500);
        let first = manager.acquire(1000).unwrap();
        let err = manager.acquire(1000).unwrap_err();
        assert_eq!(err.kind(), AggErrorKind::AllocationFailure);
        assert_eq!(manager.live_handles(), 1);
        manager.release(first);
        let second = manager.acquire(1000).unwrap();
        manager.release(second);
    }
}
