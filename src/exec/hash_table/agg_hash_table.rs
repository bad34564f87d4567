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
//! Grouped aggregation hash table.
//!
//! Tuples live in an append-only arena and never move; the open-addressing
//! directory only stores `(hash prefix, ordinal)` pairs and is rebuilt on
//! resize. Every batch reserves its worst-case memory before the first
//! mutation, so an allocation failure leaves the table untouched.
use std::ops::Range;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, UInt32Array, new_empty_array};
use arrow::compute::take;
use arrow::datatypes::DataType;

use crate::common::config;
use crate::common::error::{AggError, AggErrorKind, AggResult};
use crate::exec::chunk::Chunk;
use crate::exec::expr::agg::{AggInputView, AggStateStore, AggregateObject};
use crate::novarocks_logging::{debug, warn};
use crate::runtime::buffer_manager::BufferAllocator;
use crate::runtime::mem_tracker::{MemTracker, process_mem_tracker};

use super::directory::{Directory, EMPTY_SLOT, MIN_DIRECTORY_CAPACITY, pack_slot, slot_ordinal, slot_prefix};
use super::hash::hash_prefix;
use super::key_builder::{GroupKeyRows, gather_group_keys};
use super::key_layout::{TupleLayout, read_hash, write_hash};
use super::key_storage::{StringHeap, TupleAddr, TupleArena};

/// Per-table tuning knobs.
#[derive(Clone, Debug, PartialEq)]
pub struct HashTableOptions {
    /// Initial directory size; rounded up to a power of two, at least 16.
    pub initial_capacity: usize,
    pub block_size_bytes: usize,
    pub string_heap_block_size_bytes: usize,
    /// Directory occupancy that triggers doubling.
    pub max_load_factor: f64,
    /// Tuples per internal batch when combining tables.
    pub scan_batch_size: usize,
}

impl Default for HashTableOptions {
    fn default() -> Self {
        let defaults = crate::common::app_config::HashTableConfig::default();
        Self {
            initial_capacity: defaults.initial_capacity,
            block_size_bytes: defaults.block_size_bytes,
            string_heap_block_size_bytes: defaults.string_heap_block_size_bytes,
            max_load_factor: defaults.max_load_factor,
            scan_batch_size: defaults.scan_batch_size,
        }
    }
}

impl HashTableOptions {
    pub fn from_config() -> Self {
        Self {
            initial_capacity: config::hash_table_initial_capacity(),
            block_size_bytes: config::hash_table_block_size_bytes(),
            string_heap_block_size_bytes: config::string_heap_block_size_bytes(),
            max_load_factor: config::hash_table_max_load_factor(),
            scan_batch_size: config::hash_table_scan_batch_size(),
        }
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn with_block_size_bytes(mut self, bytes: usize) -> Self {
        self.block_size_bytes = bytes;
        self
    }

    pub fn with_max_load_factor(mut self, load_factor: f64) -> Self {
        self.max_load_factor = load_factor;
        self
    }

    pub fn directory_capacity(&self) -> usize {
        self.initial_capacity
            .max(MIN_DIRECTORY_CAPACITY)
            .checked_next_power_of_two()
            .unwrap_or(MIN_DIRECTORY_CAPACITY)
    }

    fn validate(&self) -> AggResult<()> {
        if !(self.max_load_factor > 0.0 && self.max_load_factor < 1.0) {
            return Err(AggError::precondition(format!(
                "max_load_factor must be in (0, 1), got {}",
                self.max_load_factor
            )));
        }
        if self.block_size_bytes == 0 || self.string_heap_block_size_bytes == 0 {
            return Err(AggError::precondition("block sizes must be positive"));
        }
        Ok(())
    }
}

/// One slice of scan output: group keys and finalized aggregate values, row aligned.
#[derive(Debug, Clone)]
pub struct ScanBatch {
    pub groups: Chunk,
    pub results: Chunk,
}

impl ScanBatch {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct GroupedAggHashTable {
    group_types: Vec<DataType>,
    payload_types: Vec<DataType>,
    aggregates: Vec<AggregateObject>,
    payload_ranges: Vec<Range<usize>>,
    layout: Arc<TupleLayout>,
    options: HashTableOptions,
    arena: TupleArena,
    heap: StringHeap,
    directory: Directory,
    store: AggStateStore,
    /// One deduplicating sub-table per DISTINCT aggregate, keyed on group columns plus arguments.
    distinct_tables: Vec<Option<GroupedAggHashTable>>,
    finalized: Option<Vec<ArrayRef>>,
    poisoned: Option<AggError>,
}

impl std::fmt::Debug for GroupedAggHashTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupedAggHashTable")
            .field("group_types", &self.group_types)
            .field("aggregates", &self.aggregates.len())
            .field("entries", &self.arena.len())
            .field("capacity", &self.directory.capacity())
            .field("finalized", &self.finalized.is_some())
            .finish()
    }
}

impl GroupedAggHashTable {
    pub fn try_new(
        allocator: Arc<dyn BufferAllocator>,
        group_types: Vec<DataType>,
        payload_types: Vec<DataType>,
        aggregates: Vec<AggregateObject>,
        options: HashTableOptions,
    ) -> AggResult<Self> {
        options.validate()?;

        let mut payload_ranges = Vec::with_capacity(aggregates.len());
        let mut expected_payload = Vec::new();
        for aggregate in &aggregates {
            let start = expected_payload.len();
            expected_payload.extend_from_slice(aggregate.input_types());
            payload_ranges.push(start..expected_payload.len());
        }
        if expected_payload != payload_types {
            return Err(AggError::precondition(format!(
                "payload types {:?} do not match aggregate inputs {:?}",
                payload_types, expected_payload
            )));
        }

        let layout = Arc::new(TupleLayout::try_new(&group_types, &aggregates)?);

        let mut distinct_tables = Vec::with_capacity(aggregates.len());
        for aggregate in &aggregates {
            if !aggregate.distinct {
                distinct_tables.push(None);
                continue;
            }
            let mut key_types = group_types.clone();
            key_types.extend_from_slice(aggregate.input_types());
            distinct_tables.push(Some(GroupedAggHashTable::try_new(
                Arc::clone(&allocator),
                key_types,
                Vec::new(),
                Vec::new(),
                options.clone(),
            )?));
        }

        let directory = Directory::try_new(Arc::clone(&allocator), options.directory_capacity())?;
        let arena = TupleArena::new(
            Arc::clone(&allocator),
            layout.tuple_size,
            options.block_size_bytes,
        );
        let heap = StringHeap::new(
            Arc::clone(&allocator),
            options.string_heap_block_size_bytes,
        );
        let store = AggStateStore::new(MemTracker::new_child(
            "AggStateStore",
            &process_mem_tracker(),
        ));

        Ok(Self {
            group_types,
            payload_types,
            aggregates,
            payload_ranges,
            layout,
            options,
            arena,
            heap,
            directory,
            store,
            distinct_tables,
            finalized: None,
            poisoned: None,
        })
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }

    /// Directory size in slots.
    pub fn capacity(&self) -> usize {
        self.directory.capacity()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    pub fn tuple_size(&self) -> usize {
        self.layout.tuple_size
    }

    pub fn group_width(&self) -> usize {
        self.layout.group_width
    }

    pub fn payload_width(&self) -> usize {
        self.layout.payload_width
    }

    pub fn group_types(&self) -> &[DataType] {
        &self.group_types
    }

    pub fn payload_types(&self) -> &[DataType] {
        &self.payload_types
    }

    pub fn aggregates(&self) -> &[AggregateObject] {
        &self.aggregates
    }

    pub fn options(&self) -> &HashTableOptions {
        &self.options
    }

    /// Tracker for bytes owned by heap-backed aggregate states.
    pub fn state_mem_tracker(&self) -> Arc<MemTracker> {
        Arc::clone(self.store.mem_tracker())
    }

    pub fn string_heap_bytes(&self) -> usize {
        self.heap.used_bytes()
    }

    /// Raw bytes of a stored tuple: hash, key fields, aggregate states.
    pub fn tuple(&self, addr: TupleAddr) -> AggResult<&[u8]> {
        self.arena.tuple(addr)
    }

    /// Address of the `ordinal`-th tuple in insertion order.
    pub fn address_of(&self, ordinal: usize) -> AggResult<TupleAddr> {
        if ordinal >= self.arena.len() {
            return Err(AggError::precondition(format!(
                "ordinal {} out of range (entries={})",
                ordinal,
                self.arena.len()
            )));
        }
        Ok(self.arena.addr_of(ordinal))
    }

    /// Byte range of aggregate `idx`'s state inside a tuple.
    pub fn state_range(&self, idx: usize) -> AggResult<Range<usize>> {
        let offset = *self.layout.state_offsets.get(idx).ok_or_else(|| {
            AggError::precondition(format!("aggregate index {} out of range", idx))
        })?;
        Ok(offset..offset + self.layout.state_widths[idx])
    }

    fn check_usable(&self) -> AggResult<()> {
        match &self.poisoned {
            Some(err) => Err(AggError::precondition(format!(
                "hash table is poisoned by an earlier failure: {}",
                err
            ))),
            None => Ok(()),
        }
    }

    fn check_mutable(&self) -> AggResult<()> {
        self.check_usable()?;
        if self.finalized.is_some() {
            return Err(AggError::precondition(
                "hash table is finalized and no longer accepts input",
            ));
        }
        Ok(())
    }

    fn check_finalized(&self) -> AggResult<()> {
        self.check_usable()?;
        if self.finalized.is_none() {
            return Err(AggError::precondition("hash table must be finalized first"));
        }
        Ok(())
    }

    fn poison(&mut self, err: AggError) -> AggError {
        if err.kind() == AggErrorKind::AggregateOperationFailure {
            warn!("hash table poisoned: {}", err);
            self.poisoned = Some(err.clone());
        }
        err
    }

    fn check_group_signature(&self, groups: &Chunk) -> AggResult<()> {
        let types = groups.data_types();
        if types != self.group_types {
            return Err(AggError::precondition(format!(
                "group types {:?} do not match table signature {:?}",
                types, self.group_types
            )));
        }
        Ok(())
    }

    pub fn hash_groups(&self, groups: &Chunk) -> AggResult<Vec<u64>> {
        self.check_group_signature(groups)?;
        let rows = GroupKeyRows::try_new(&self.layout, groups.columns())?;
        Ok((0..groups.len())
            .map(|row| rows.hash_row(groups.physical_row(row)))
            .collect())
    }

    /// Make room for `new_rows` tuples and `var_bytes` of key payload without
    /// any further allocation.
    fn reserve(&mut self, new_rows: usize, var_bytes: usize) -> AggResult<()> {
        let needed = self.arena.len().saturating_add(new_rows);
        let mut capacity = self.directory.capacity();
        while needed as f64 > capacity as f64 * self.options.max_load_factor {
            capacity = capacity
                .checked_mul(2)
                .ok_or_else(|| AggError::allocation("directory capacity overflow"))?;
        }
        let result = self.reserve_exact(capacity, new_rows, var_bytes);
        if let Err(err) = &result {
            warn!(
                "hash table reservation failed: rows={} var_bytes={} entries={} error={}",
                new_rows,
                var_bytes,
                self.arena.len(),
                err
            );
        }
        result
    }

    fn reserve_exact(&mut self, capacity: usize, new_rows: usize, var_bytes: usize) -> AggResult<()> {
        if capacity > self.directory.capacity() {
            self.grow_directory(capacity)?;
        }
        self.arena.reserve(new_rows)?;
        self.heap.reserve_contiguous(var_bytes)
    }

    fn grow_directory(&mut self, new_capacity: usize) -> AggResult<()> {
        let old_capacity = self.directory.capacity();
        let arena = &self.arena;
        self.directory.resize(new_capacity, |ordinal| {
            arena.tuple_at(ordinal).map(read_hash).unwrap_or(0)
        })?;
        debug!(
            "hash table directory resized: {} -> {} slots, entries={}",
            old_capacity,
            new_capacity,
            self.arena.len()
        );
        Ok(())
    }

    /// Rebuild the directory with `new_capacity` slots. Tuple addresses are unaffected.
    pub fn resize(&mut self, new_capacity: usize) -> AggResult<()> {
        self.check_usable()?;
        if !new_capacity.is_power_of_two() || new_capacity <= self.directory.capacity() {
            return Err(AggError::precondition(format!(
                "resize capacity {} must be a power of two larger than {}",
                new_capacity,
                self.directory.capacity()
            )));
        }
        if (self.arena.len() as f64) > new_capacity as f64 * self.options.max_load_factor {
            return Err(AggError::precondition(format!(
                "resize capacity {} too small for {} entries",
                new_capacity,
                self.arena.len()
            )));
        }
        self.grow_directory(new_capacity)
    }

    /// Probe for a row's key. `Ok(Ok(ordinal))` is a match, `Ok(Err(slot))` the
    /// empty slot that ended the probe sequence.
    fn find_slot(
        &self,
        rows: &GroupKeyRows,
        row: usize,
        scratch: &[u8],
        hash: u64,
    ) -> AggResult<Result<usize, usize>> {
        let prefix = hash_prefix(hash);
        let group_range = self.layout.group_range();
        let mut idx = self.directory.start_index(hash);
        loop {
            let slot = self.directory.slot(idx);
            if slot == EMPTY_SLOT {
                return Ok(Err(idx));
            }
            if slot_prefix(slot) == prefix {
                let ordinal = slot_ordinal(slot);
                let tuple = self.arena.tuple_at(ordinal)?;
                if read_hash(tuple) == hash
                    && rows.matches(row, scratch, &tuple[group_range.clone()], &self.heap)?
                {
                    return Ok(Ok(ordinal));
                }
            }
            idx = self.directory.next_index(idx);
        }
    }

    /// Find-or-create over already reserved space.
    fn probe_or_insert(
        &mut self,
        groups: &Chunk,
        rows: &GroupKeyRows,
        hashes: &[u64],
        addrs: &mut Vec<TupleAddr>,
        new_rows: &mut Vec<usize>,
    ) -> AggResult<usize> {
        addrs.clear();
        new_rows.clear();
        let group_range = self.layout.group_range();
        let mut scratch = vec![0u8; self.layout.group_width];
        for (logical, &hash) in hashes.iter().enumerate() {
            let row = groups.physical_row(logical);
            rows.encode_fixed(row, &mut scratch);
            match self.find_slot(rows, row, &scratch, hash)? {
                Ok(ordinal) => addrs.push(self.arena.addr_of(ordinal)),
                Err(slot) => {
                    let (ordinal, addr) = self.arena.append()?;
                    let tuple = self.arena.tuple_mut(addr)?;
                    write_hash(tuple, hash);
                    rows.write_row(row, &scratch, &mut tuple[group_range.clone()], &mut self.heap)?;
                    for (idx, aggregate) in self.aggregates.iter().enumerate() {
                        let offset = self.layout.state_offsets[idx];
                        let width = self.layout.state_widths[idx];
                        aggregate.init_state(&mut tuple[offset..offset + width]);
                    }
                    self.directory
                        .set_slot(slot, pack_slot(hash_prefix(hash), ordinal));
                    addrs.push(addr);
                    new_rows.push(logical);
                }
            }
        }
        Ok(new_rows.len())
    }

    fn prepare_groups<'a>(
        &self,
        layout: &'a TupleLayout,
        groups: &'a Chunk,
        hashes: &[u64],
    ) -> AggResult<GroupKeyRows<'a>> {
        self.check_group_signature(groups)?;
        if hashes.len() != groups.len() {
            return Err(AggError::precondition(format!(
                "hash count {} does not match row count {}",
                hashes.len(),
                groups.len()
            )));
        }
        GroupKeyRows::try_new(layout, groups.columns())
    }

    /// Reserve for the rows whose key is not in the table yet. Repeated new
    /// keys inside one batch are counted once per row.
    fn reserve_for_groups(
        &mut self,
        groups: &Chunk,
        rows: &GroupKeyRows,
        hashes: &[u64],
    ) -> AggResult<()> {
        let mut scratch = vec![0u8; self.layout.group_width];
        let mut missing = Vec::new();
        for (logical, &hash) in hashes.iter().enumerate() {
            let row = groups.physical_row(logical);
            rows.encode_fixed(row, &mut scratch);
            if self.find_slot(rows, row, &scratch, hash)?.is_err() {
                missing.push(row);
            }
        }
        if missing.is_empty() {
            return Ok(());
        }
        let var_bytes = rows.var_bytes_total(&missing);
        self.reserve(missing.len(), var_bytes)
    }

    /// Look up every row's group, creating missing ones. Fills one address per
    /// row and the indices of rows that created a group; returns the number created.
    pub fn find_or_create_groups(
        &mut self,
        groups: &Chunk,
        hashes: &[u64],
        addrs: &mut Vec<TupleAddr>,
        new_rows: &mut Vec<usize>,
    ) -> AggResult<usize> {
        self.check_mutable()?;
        let layout = Arc::clone(&self.layout);
        let rows = self.prepare_groups(&layout, groups, hashes)?;
        self.reserve_for_groups(groups, &rows, hashes)?;
        self.probe_or_insert(groups, &rows, hashes, addrs, new_rows)
    }

    pub fn find_or_create_groups_hashed(
        &mut self,
        groups: &Chunk,
        addrs: &mut Vec<TupleAddr>,
        new_rows: &mut Vec<usize>,
    ) -> AggResult<usize> {
        let hashes = self.hash_groups(groups)?;
        self.find_or_create_groups(groups, &hashes, addrs, new_rows)
    }

    /// Lookup-only variant: every key must already exist.
    pub fn find_groups(
        &self,
        groups: &Chunk,
        hashes: &[u64],
        addrs: &mut Vec<TupleAddr>,
    ) -> AggResult<()> {
        self.check_usable()?;
        let rows = self.prepare_groups(&self.layout, groups, hashes)?;
        addrs.clear();
        let mut scratch = vec![0u8; self.layout.group_width];
        for (logical, &hash) in hashes.iter().enumerate() {
            let row = groups.physical_row(logical);
            rows.encode_fixed(row, &mut scratch);
            match self.find_slot(&rows, row, &scratch, hash)? {
                Ok(ordinal) => addrs.push(self.arena.addr_of(ordinal)),
                Err(_) => {
                    return Err(AggError::precondition(format!(
                        "group key of row {} does not exist in the table",
                        logical
                    )));
                }
            }
        }
        Ok(())
    }

    /// Ingest one batch: group columns plus the concatenated aggregate inputs.
    /// Returns the number of groups created.
    pub fn add_chunk(&mut self, groups: &Chunk, payload: &Chunk) -> AggResult<usize> {
        self.check_mutable()?;
        self.check_group_signature(groups)?;
        let payload_types = payload.data_types();
        if payload_types != self.payload_types {
            return Err(AggError::precondition(format!(
                "payload types {:?} do not match table signature {:?}",
                payload_types, self.payload_types
            )));
        }
        if groups.len() != payload.len() {
            return Err(AggError::precondition(format!(
                "group rows {} and payload rows {} differ",
                groups.len(),
                payload.len()
            )));
        }
        if groups.is_empty() {
            return Ok(0);
        }
        let (groups, payload) = align_selections(groups, payload)?;

        let mut distinct_inputs = Vec::with_capacity(self.aggregates.len());
        for idx in 0..self.aggregates.len() {
            if !self.aggregates[idx].distinct {
                distinct_inputs.push(None);
                continue;
            }
            let mut columns = groups.columns().to_vec();
            columns.extend_from_slice(&payload.columns()[self.payload_ranges[idx].clone()]);
            let keys = groups.project_with(columns)?;
            if let Some(sub) = self.distinct_tables[idx].as_mut() {
                let layout = Arc::clone(&sub.layout);
                let rows = GroupKeyRows::try_new(&layout, keys.columns())?;
                let hashes = sub.hash_groups(&keys)?;
                sub.reserve_for_groups(&keys, &rows, &hashes)?;
            }
            distinct_inputs.push(Some(keys));
        }

        let hashes = self.hash_groups(&groups)?;
        let layout = Arc::clone(&self.layout);
        let rows = GroupKeyRows::try_new(&layout, groups.columns())?;
        self.reserve_for_groups(&groups, &rows, &hashes)?;

        let mut addrs = Vec::with_capacity(groups.len());
        let mut new_rows = Vec::new();
        let created = self.probe_or_insert(&groups, &rows, &hashes, &mut addrs, &mut new_rows)?;

        for idx in 0..self.aggregates.len() {
            let range = self.payload_ranges[idx].clone();
            let columns = &payload.columns()[range];
            let result = match distinct_inputs[idx].as_ref() {
                None => {
                    let logical: Vec<usize> = (0..payload.len()).collect();
                    self.update_states(idx, columns, &payload, &logical, &addrs)
                }
                Some(keys) => self.update_distinct(idx, keys, columns, &payload, &addrs),
            };
            if let Err(err) = result {
                return Err(self.poison(err));
            }
        }
        Ok(created)
    }

    /// Fold the given logical rows into aggregate `idx`'s states.
    fn update_states(
        &mut self,
        idx: usize,
        columns: &[ArrayRef],
        payload: &Chunk,
        logical_rows: &[usize],
        addrs: &[TupleAddr],
    ) -> AggResult<()> {
        let aggregate = &self.aggregates[idx];
        let view = aggregate.build_input_view(columns)?;
        let range = self.layout.state_offsets[idx]..self.layout.state_offsets[idx] + self.layout.state_widths[idx];
        update_rows(
            aggregate,
            &view,
            range,
            &mut self.arena,
            &mut self.store,
            logical_rows.iter().map(|&l| (payload.physical_row(l), addrs[l])),
        )
    }

    fn update_distinct(
        &mut self,
        idx: usize,
        keys: &Chunk,
        columns: &[ArrayRef],
        payload: &Chunk,
        addrs: &[TupleAddr],
    ) -> AggResult<()> {
        let Some(mut sub) = self.distinct_tables[idx].take() else {
            return Err(AggError::precondition("distinct sub-table missing"));
        };
        let mut sub_addrs = Vec::new();
        let mut first_seen = Vec::new();
        let result = sub
            .find_or_create_groups_hashed(keys, &mut sub_addrs, &mut first_seen)
            .and_then(|_| self.update_states(idx, columns, payload, &first_seen, addrs));
        self.distinct_tables[idx] = Some(sub);
        result
    }

    fn check_compatible(&self, other: &GroupedAggHashTable) -> AggResult<()> {
        let same = self.group_types == other.group_types
            && self.payload_types == other.payload_types
            && self.aggregates.len() == other.aggregates.len()
            && self
                .aggregates
                .iter()
                .zip(other.aggregates.iter())
                .all(|(a, b)| a.same_signature(b));
        if !same {
            return Err(AggError::precondition(
                "cannot combine hash tables with different signatures",
            ));
        }
        Ok(())
    }

    /// Merge every group of `other` into this table, combining aggregate states.
    pub fn combine(&mut self, other: &GroupedAggHashTable) -> AggResult<()> {
        self.check_mutable()?;
        other.check_usable()?;
        self.check_compatible(other)?;

        for (sub, other_sub) in self
            .distinct_tables
            .iter_mut()
            .zip(other.distinct_tables.iter())
        {
            if let (Some(sub), Some(other_sub)) = (sub.as_mut(), other_sub.as_ref()) {
                sub.reserve(other_sub.len(), other_sub.heap.used_bytes())?;
            }
        }
        self.reserve(other.len(), other.heap.used_bytes())?;

        let batch_size = self.options.scan_batch_size.max(1);
        let layout = Arc::clone(&self.layout);
        let mut addrs = Vec::new();
        let mut new_rows = Vec::new();
        let mut start = 0;
        let mut created = 0;
        while start < other.len() {
            let tuples: Vec<&[u8]> = other.arena.iter_from(start).take(batch_size).collect();
            let keys = gather_group_keys(&other.layout, &tuples, &other.heap)?;
            let hashes: Vec<u64> = tuples.iter().map(|t| read_hash(t)).collect();
            let chunk = Chunk::try_new_with_rows(keys, tuples.len())?;
            let rows = GroupKeyRows::try_new(&layout, chunk.columns())?;
            self.reserve_for_groups(&chunk, &rows, &hashes)?;
            created += self.probe_or_insert(&chunk, &rows, &hashes, &mut addrs, &mut new_rows)?;

            let result = combine_rows(
                &self.aggregates,
                &layout,
                &mut self.arena,
                &mut self.store,
                &other.store,
                &tuples,
                &addrs,
            );
            if let Err(err) = result {
                return Err(self.poison(err));
            }
            start += tuples.len();
        }

        for idx in 0..self.aggregates.len() {
            let Some(other_sub) = other.distinct_tables[idx].as_ref() else {
                continue;
            };
            let Some(mut sub) = self.distinct_tables[idx].take() else {
                continue;
            };
            let result = self.replay_distinct(idx, &mut sub, other_sub);
            self.distinct_tables[idx] = Some(sub);
            if let Err(err) = result {
                return Err(self.poison(err));
            }
        }
        debug!(
            "hash table combined: merged={} created={} entries={}",
            other.len(),
            created,
            self.arena.len()
        );
        Ok(())
    }

    /// Insert `other_sub`'s distinct keys into `sub`; only keys new to `sub`
    /// are forwarded to the outer aggregate state.
    fn replay_distinct(
        &mut self,
        idx: usize,
        sub: &mut GroupedAggHashTable,
        other_sub: &GroupedAggHashTable,
    ) -> AggResult<()> {
        let batch_size = self.options.scan_batch_size.max(1);
        let group_count = self.group_types.len();
        let mut sub_addrs = Vec::new();
        let mut first_seen = Vec::new();
        let mut addrs = Vec::new();
        let mut start = 0;
        while start < other_sub.len() {
            let tuples: Vec<&[u8]> = other_sub.arena.iter_from(start).take(batch_size).collect();
            start += tuples.len();
            let keys = gather_group_keys(&other_sub.layout, &tuples, &other_sub.heap)?;
            let hashes: Vec<u64> = tuples.iter().map(|t| read_hash(t)).collect();
            let chunk = Chunk::try_new_with_rows(keys.clone(), tuples.len())?;
            sub.find_or_create_groups(&chunk, &hashes, &mut sub_addrs, &mut first_seen)?;
            if first_seen.is_empty() {
                continue;
            }

            let selection: Vec<u32> = first_seen.iter().map(|&r| r as u32).collect();
            let outer_keys = Chunk::try_new_with_rows(keys[..group_count].to_vec(), tuples.len())?
                .with_selection(selection)?;
            let outer_hashes = self.hash_groups(&outer_keys)?;
            self.find_groups(&outer_keys, &outer_hashes, &mut addrs)?;

            let args = Chunk::try_new_with_rows(keys[group_count..].to_vec(), tuples.len())?
                .with_selection(first_seen.iter().map(|&r| r as u32).collect())?;
            let logical: Vec<usize> = (0..args.len()).collect();
            self.update_states(idx, args.columns(), &args, &logical, &addrs)?;
        }
        Ok(())
    }

    /// Produce the output value of every aggregate for every group. Call once,
    /// after all ingestion and combining.
    pub fn finalize(&mut self) -> AggResult<()> {
        self.check_usable()?;
        if self.finalized.is_some() {
            return Err(AggError::precondition("hash table is already finalized"));
        }
        let mut outputs = Vec::with_capacity(self.aggregates.len());
        for (idx, aggregate) in self.aggregates.iter().enumerate() {
            let offset = self.layout.state_offsets[idx];
            let width = self.layout.state_widths[idx];
            let states: Vec<&[u8]> = self
                .arena
                .iter_from(0)
                .map(|tuple| &tuple[offset..offset + width])
                .collect();
            outputs.push(aggregate.build_array(&self.store, &states)?);
        }
        debug!(
            "hash table finalized: groups={} aggregates={}",
            self.arena.len(),
            self.aggregates.len()
        );
        self.finalized = Some(outputs);
        Ok(())
    }

    /// Emit up to `capacity` groups starting at `cursor`, in first-insertion order.
    /// Returns an empty batch once every group has been emitted.
    pub fn scan(&self, cursor: &mut usize, capacity: usize) -> AggResult<ScanBatch> {
        self.check_finalized()?;
        if capacity == 0 {
            return Err(AggError::precondition("scan capacity must be positive"));
        }
        let outputs = self.finalized_outputs()?;
        let start = (*cursor).min(self.arena.len());
        let count = capacity.min(self.arena.len() - start);
        if count == 0 {
            return Ok(ScanBatch {
                groups: self.empty_chunk(&self.group_types)?,
                results: self.empty_chunk(
                    &self
                        .aggregates
                        .iter()
                        .map(|a| a.return_type.clone())
                        .collect::<Vec<_>>(),
                )?,
            });
        }
        let tuples: Vec<&[u8]> = self.arena.iter_from(start).take(count).collect();
        let keys = gather_group_keys(&self.layout, &tuples, &self.heap)?;
        let results: Vec<ArrayRef> = outputs.iter().map(|a| a.slice(start, count)).collect();
        *cursor = start + count;
        Ok(ScanBatch {
            groups: Chunk::try_new_with_rows(keys, count)?,
            results: Chunk::try_new_with_rows(results, count)?,
        })
    }

    /// Finalized aggregate values for the given keys, one array per aggregate.
    /// Every key must exist; the table is not modified.
    pub fn fetch_aggregates(&self, groups: &Chunk) -> AggResult<Vec<ArrayRef>> {
        self.check_finalized()?;
        let outputs = self.finalized_outputs()?;
        let hashes = self.hash_groups(groups)?;
        let mut addrs = Vec::with_capacity(groups.len());
        self.find_groups(groups, &hashes, &mut addrs)?;
        let mut indices = Vec::with_capacity(addrs.len());
        for addr in &addrs {
            indices.push(self.arena.ordinal_of(*addr)? as u32);
        }
        let indices = UInt32Array::from(indices);
        outputs
            .iter()
            .map(|array| take(array.as_ref(), &indices, None).map_err(AggError::from))
            .collect()
    }

    fn finalized_outputs(&self) -> AggResult<&[ArrayRef]> {
        self.finalized
            .as_deref()
            .ok_or_else(|| AggError::precondition("hash table must be finalized first"))
    }

    fn empty_chunk(&self, types: &[DataType]) -> AggResult<Chunk> {
        Chunk::try_new_with_rows(types.iter().map(new_empty_array).collect(), 0)
    }
}

fn update_rows(
    aggregate: &AggregateObject,
    view: &AggInputView,
    state: Range<usize>,
    arena: &mut TupleArena,
    store: &mut AggStateStore,
    rows: impl Iterator<Item = (usize, TupleAddr)>,
) -> AggResult<()> {
    for (row, addr) in rows {
        let tuple = arena.tuple_mut(addr)?;
        aggregate.update(store, &mut tuple[state.clone()], view, row)?;
    }
    Ok(())
}

fn combine_rows(
    aggregates: &[AggregateObject],
    layout: &TupleLayout,
    arena: &mut TupleArena,
    store: &mut AggStateStore,
    src_store: &AggStateStore,
    src_tuples: &[&[u8]],
    addrs: &[TupleAddr],
) -> AggResult<()> {
    for (idx, aggregate) in aggregates.iter().enumerate() {
        // distinct states are rebuilt from the sub-table replay instead
        if aggregate.distinct {
            continue;
        }
        let state = layout.state_offsets[idx]..layout.state_offsets[idx] + layout.state_widths[idx];
        for (src, addr) in src_tuples.iter().zip(addrs.iter()) {
            let dst = arena.tuple_mut(*addr)?;
            aggregate.combine(src_store, &src[state.clone()], store, &mut dst[state.clone()])?;
        }
    }
    Ok(())
}

/// Give both chunks the same physical row mapping, materializing when their
/// selections differ.
fn align_selections(groups: &Chunk, payload: &Chunk) -> AggResult<(Chunk, Chunk)> {
    if groups.selection() == payload.selection()
        && groups.num_physical_rows() == payload.num_physical_rows()
    {
        return Ok((groups.clone(), payload.clone()));
    }
    Ok((materialize(groups)?, materialize(payload)?))
}

fn materialize(chunk: &Chunk) -> AggResult<Chunk> {
    let Some(selection) = chunk.selection() else {
        return Ok(chunk.clone());
    };
    let indices = UInt32Array::from(selection.to_vec());
    let mut columns = Vec::with_capacity(chunk.num_columns());
    for column in chunk.columns() {
        columns.push(take(column.as_ref(), &indices, None)?);
    }
    Chunk::try_new_with_rows(columns, selection.len())
}

impl Drop for GroupedAggHashTable {
    fn drop(&mut self) {
        for (idx, aggregate) in self.aggregates.iter().enumerate() {
            if !aggregate.owns_heap() {
                continue;
            }
            let state = self.layout.state_offsets[idx]
                ..self.layout.state_offsets[idx] + self.layout.state_widths[idx];
            for ordinal in 0..self.arena.len() {
                let addr = self.arena.addr_of(ordinal);
                if let Ok(tuple) = self.arena.tuple_mut(addr) {
                    aggregate.destroy(&mut self.store, &mut tuple[state.clone()]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::node::aggregate::AggFunction;
    use crate::runtime::buffer_manager::BufferManager;
    use arrow::array::{Int64Array, StringArray};

    fn sum_table(options: HashTableOptions) -> GroupedAggHashTable {
        let aggregates =
            AggregateObject::create_aggregate_objects(&[AggFunction::new(
                "sum",
                vec![DataType::Int64],
            )])
            .unwrap();
        GroupedAggHashTable::try_new(
            BufferManager::with_limit(-1),
            vec![DataType::Int64],
            vec![DataType::Int64],
            aggregates,
            options,
        )
        .unwrap()
    }

    fn int_chunk(values: Vec<i64>) -> Chunk {
        Chunk::try_new(vec![Arc::new(Int64Array::from(values)) as ArrayRef]).unwrap()
    }

    #[test]
    fn options_round_capacity_up() {
        let options = HashTableOptions::default().with_initial_capacity(100);
        assert_eq!(options.directory_capacity(), 128);
        let options = HashTableOptions::default().with_initial_capacity(0);
        assert_eq!(options.directory_capacity(), 16);
        assert!(HashTableOptions::default()
            .with_max_load_factor(1.0)
            .validate()
            .is_err());
    }

    #[test]
    fn same_batch_duplicates_share_one_tuple() {
        let mut table = sum_table(HashTableOptions::default().with_initial_capacity(16));
        let groups = int_chunk(vec![7, 8, 7, 7]);
        let mut addrs = Vec::new();
        let mut new_rows = Vec::new();
        let created = table
            .find_or_create_groups_hashed(&groups, &mut addrs, &mut new_rows)
            .unwrap();
        assert_eq!(created, 2);
        assert_eq!(new_rows, vec![0, 1]);
        assert_eq!(addrs[0], addrs[2]);
        assert_eq!(addrs[0], addrs[3]);
        assert_ne!(addrs[0], addrs[1]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn directory_prefix_matches_stored_hash() {
        let mut table = sum_table(HashTableOptions::default().with_initial_capacity(16));
        let groups = int_chunk((0..40).collect());
        let mut addrs = Vec::new();
        let mut new_rows = Vec::new();
        table
            .find_or_create_groups_hashed(&groups, &mut addrs, &mut new_rows)
            .unwrap();
        assert!(table.capacity() >= 80);
        let mut occupied = 0;
        for idx in 0..table.capacity() {
            let slot = table.directory.slot(idx);
            if slot == EMPTY_SLOT {
                continue;
            }
            occupied += 1;
            let tuple = table.arena.tuple_at(slot_ordinal(slot)).unwrap();
            assert_eq!(slot_prefix(slot), hash_prefix(read_hash(tuple)));
        }
        assert_eq!(occupied, 40);
    }

    #[test]
    fn lookup_of_missing_key_fails_without_inserting() {
        let mut table = sum_table(HashTableOptions::default());
        let groups = int_chunk(vec![1]);
        table.add_chunk(&groups, &int_chunk(vec![10])).unwrap();
        let lookup = int_chunk(vec![1, 2]);
        let hashes = table.hash_groups(&lookup).unwrap();
        let mut addrs = Vec::new();
        let err = table.find_groups(&lookup, &hashes, &mut addrs).unwrap_err();
        assert_eq!(err.kind(), AggErrorKind::PreconditionViolation);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn explicit_resize_validates_capacity() {
        let mut table = sum_table(HashTableOptions::default().with_initial_capacity(16));
        assert!(table.resize(16).is_err());
        assert!(table.resize(48).is_err());
        table.resize(64).unwrap();
        assert_eq!(table.capacity(), 64);
    }

    #[test]
    fn string_keys_from_dropped_batches_stay_readable() {
        let aggregates =
            AggregateObject::create_aggregate_objects(&[AggFunction::new("count", vec![])])
                .unwrap();
        let mut table = GroupedAggHashTable::try_new(
            BufferManager::with_limit(-1),
            vec![DataType::Utf8],
            vec![],
            aggregates,
            HashTableOptions::default(),
        )
        .unwrap();
        {
            let words = vec!["alpha".to_string(), "beta".to_string(), "alpha".to_string()];
            let groups = Chunk::try_new(vec![
                Arc::new(StringArray::from(words)) as ArrayRef
            ])
            .unwrap();
            table.add_chunk(&groups, &Chunk::empty_with_rows(3)).unwrap();
        }
        table.finalize().unwrap();
        let mut cursor = 0;
        let batch = table.scan(&mut cursor, 16).unwrap();
        let keys = batch.groups.columns()[0]
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(keys.value(0), "alpha");
        assert_eq!(keys.value(1), "beta");
        let counts = batch.results.columns()[0]
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(counts.values().to_vec(), vec![2, 1]);
    }
}
