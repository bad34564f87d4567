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
use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::datatypes::DataType;

use crate::common::error::{AggError, AggResult};
use crate::exec::node::aggregate::AggFunction;
use crate::runtime::mem_tracker::MemTracker;

use super::functions;
use super::spec::{AggSpec, build_spec};
use super::views::AggInputView;

/// Resolved description of one aggregate computation.
///
/// Built once from planner input; the hash table dispatches every state
/// operation through it.
#[derive(Clone, Debug)]
pub struct AggregateObject {
    pub name: String,
    pub(crate) spec: AggSpec,
    /// Number of consecutive payload columns this aggregate consumes.
    pub child_count: usize,
    /// Bytes of the state block inside each tuple.
    pub payload_size: usize,
    pub distinct: bool,
    pub return_type: DataType,
}

impl AggregateObject {
    pub fn try_new(func: &AggFunction) -> AggResult<Self> {
        let spec = build_spec(func)?;
        let payload_size = functions::state_size(&spec.kind);
        Ok(Self {
            name: func.name.clone(),
            child_count: spec.input_types.len(),
            payload_size,
            distinct: func.distinct,
            return_type: spec.output_type.clone(),
            spec,
        })
    }

    pub fn create_aggregate_objects(funcs: &[AggFunction]) -> AggResult<Vec<Self>> {
        funcs.iter().map(Self::try_new).collect()
    }

    pub fn input_types(&self) -> &[DataType] {
        &self.spec.input_types
    }

    /// Two descriptors whose states can be combined with each other.
    pub fn same_signature(&self, other: &AggregateObject) -> bool {
        self.spec.kind == other.spec.kind
            && self.distinct == other.distinct
            && self.spec.input_types == other.spec.input_types
            && self.spec.separator == other.spec.separator
    }

    /// Whether states keep data in the table's `AggStateStore`.
    pub fn owns_heap(&self) -> bool {
        functions::owns_heap(&self.spec.kind)
    }

    pub(crate) fn build_input_view<'a>(
        &self,
        columns: &'a [ArrayRef],
    ) -> AggResult<AggInputView<'a>> {
        if columns.len() != self.child_count {
            return Err(AggError::precondition(format!(
                "{} expects {} payload column(s), got {}",
                self.name,
                self.child_count,
                columns.len()
            )));
        }
        functions::build_input_view(&self.spec, columns)
    }

    pub(crate) fn init_state(&self, state: &mut [u8]) {
        functions::init_state(&self.spec, state)
    }

    pub(crate) fn update(
        &self,
        store: &mut AggStateStore,
        state: &mut [u8],
        input: &AggInputView,
        row: usize,
    ) -> AggResult<()> {
        functions::update(&self.spec, store, state, input, row)
    }

    pub(crate) fn combine(
        &self,
        src_store: &AggStateStore,
        src: &[u8],
        dst_store: &mut AggStateStore,
        dst: &mut [u8],
    ) -> AggResult<()> {
        functions::combine(&self.spec, src_store, src, dst_store, dst)
    }

    pub(crate) fn destroy(&self, store: &mut AggStateStore, state: &mut [u8]) {
        functions::destroy(&self.spec, store, state)
    }

    pub(crate) fn build_array(
        &self,
        store: &AggStateStore,
        states: &[&[u8]],
    ) -> AggResult<ArrayRef> {
        functions::build_array(&self.spec, store, states)
    }
}

/// Side storage for aggregate states that own variable-sized data.
///
/// A state block keeps a slot id (0 = no value); the bytes live here and are
/// accounted in a `MemTracker` until the slot is freed.
#[derive(Debug)]
pub struct AggStateStore {
    slots: Vec<Option<Vec<u8>>>,
    free: Vec<usize>,
    tracker: Arc<MemTracker>,
    live: usize,
}

impl AggStateStore {
    pub fn new(tracker: Arc<MemTracker>) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            tracker,
            live: 0,
        }
    }

    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.tracker
    }

    pub fn live_slots(&self) -> usize {
        self.live
    }

    pub(crate) fn alloc(&mut self, bytes: Vec<u8>) -> u64 {
        self.tracker.consume(bytes.capacity() as i64);
        self.live += 1;
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(bytes);
                idx as u64 + 1
            }
            None => {
                self.slots.push(Some(bytes));
                self.slots.len() as u64
            }
        }
    }

    pub(crate) fn get(&self, id: u64) -> Option<&[u8]> {
        if id == 0 {
            return None;
        }
        self.slots
            .get(id as usize - 1)
            .and_then(|slot| slot.as_deref())
    }

    fn slot_mut(&mut self, id: u64) -> AggResult<&mut Vec<u8>> {
        let idx = (id as usize).wrapping_sub(1);
        self.slots
            .get_mut(idx)
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| AggError::precondition(format!("aggregate state slot {} is not live", id)))
    }

    /// Replace the contents of a live slot.
    pub(crate) fn set(&mut self, id: u64, bytes: &[u8]) -> AggResult<()> {
        let tracker = Arc::clone(&self.tracker);
        let slot = self.slot_mut(id)?;
        let before = slot.capacity();
        slot.clear();
        slot.extend_from_slice(bytes);
        tracker.consume(slot.capacity() as i64 - before as i64);
        Ok(())
    }

    pub(crate) fn append(&mut self, id: u64, bytes: &[u8]) -> AggResult<()> {
        let tracker = Arc::clone(&self.tracker);
        let slot = self.slot_mut(id)?;
        let before = slot.capacity();
        slot.extend_from_slice(bytes);
        tracker.consume(slot.capacity() as i64 - before as i64);
        Ok(())
    }

    pub(crate) fn free(&mut self, id: u64) {
        if id == 0 {
            return;
        }
        let idx = id as usize - 1;
        if let Some(bytes) = self.slots.get_mut(idx).and_then(|slot| slot.take()) {
            self.tracker.release(bytes.capacity() as i64);
            self.free.push(idx);
            self.live -= 1;
        }
    }
}

impl Drop for AggStateStore {
    fn drop(&mut self) {
        let remaining: usize = self
            .slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|b| b.capacity()))
            .sum();
        if remaining > 0 {
            self.tracker.release(remaining as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::node::aggregate::AggFunction;

    #[test]
    fn state_store_reuses_freed_slots_and_tracks_bytes() {
        let tracker = MemTracker::new_root("AggStateStore");
        let mut store = AggStateStore::new(Arc::clone(&tracker));
        let a = store.alloc(b"abc".to_vec());
        let b = store.alloc(Vec::with_capacity(16));
        assert_ne!(a, b);
        store.append(b, b"xyz").unwrap();
        assert_eq!(store.get(b), Some(&b"xyz"[..]));
        assert!(tracker.current() >= 19);

        store.free(a);
        assert_eq!(store.get(a), None);
        let c = store.alloc(b"q".to_vec());
        assert_eq!(c, a);
        assert_eq!(store.live_slots(), 2);

        store.free(b);
        store.free(c);
        assert_eq!(tracker.current(), 0);
        assert!(store.set(b, b"gone").is_err());
    }

    #[test]
    fn descriptors_report_child_count_and_state_size() {
        let aggs = AggregateObject::create_aggregate_objects(&[
            AggFunction::new("count", vec![]),
            AggFunction::new("avg", vec![DataType::Int32]),
            AggFunction::new("max", vec![DataType::Utf8]),
            AggFunction::new("count", vec![DataType::Int64]).with_distinct(true),
        ])
        .unwrap();
        assert_eq!(aggs[0].child_count, 0);
        assert_eq!(aggs[1].payload_size, 16);
        assert_eq!(aggs[1].return_type, DataType::Float64);
        assert!(aggs[2].owns_heap());
        assert_eq!(aggs[2].return_type, DataType::Utf8);
        assert!(aggs[3].distinct);
        assert_eq!(aggs[3].input_types(), &[DataType::Int64]);
    }

    #[test]
    fn unknown_aggregate_is_unsupported() {
        let err = AggregateObject::try_new(&AggFunction::new("median", vec![DataType::Int64]))
            .unwrap_err();
        assert_eq!(err.kind(), crate::common::error::AggErrorKind::Unsupported);
    }
}
