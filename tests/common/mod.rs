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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::DataType;
use arrow::util::display::array_value_to_string;

use novarocks_hashagg::{
    AggFunction, AggResult, AggregateObject, BufferAllocator, BufferManager, Chunk,
    GroupedAggHashTable, HashTableOptions,
};

pub fn int64(values: Vec<Option<i64>>) -> ArrayRef {
    Arc::new(Int64Array::from(values)) as ArrayRef
}

pub fn ints(values: &[i64]) -> ArrayRef {
    Arc::new(Int64Array::from(values.to_vec())) as ArrayRef
}

pub fn float64(values: Vec<Option<f64>>) -> ArrayRef {
    Arc::new(Float64Array::from(values)) as ArrayRef
}

pub fn utf8(values: Vec<Option<&str>>) -> ArrayRef {
    Arc::new(StringArray::from(values)) as ArrayRef
}

pub fn chunk(columns: Vec<ArrayRef>) -> Chunk {
    Chunk::try_new(columns).expect("chunk")
}

pub fn small_options() -> HashTableOptions {
    HashTableOptions::default().with_initial_capacity(16)
}

pub fn payload_types(functions: &[AggFunction]) -> Vec<DataType> {
    functions
        .iter()
        .flat_map(|f| f.inputs.iter().cloned())
        .collect()
}

pub fn try_build_table(
    allocator: Arc<dyn BufferAllocator>,
    group_types: Vec<DataType>,
    functions: &[AggFunction],
    options: HashTableOptions,
) -> AggResult<GroupedAggHashTable> {
    let aggregates = AggregateObject::create_aggregate_objects(functions)?;
    GroupedAggHashTable::try_new(
        allocator,
        group_types,
        payload_types(functions),
        aggregates,
        options,
    )
}

pub fn build_table(group_types: Vec<DataType>, functions: &[AggFunction]) -> GroupedAggHashTable {
    try_build_table(
        BufferManager::with_limit(-1),
        group_types,
        functions,
        small_options(),
    )
    .expect("build table")
}

fn render(column: &ArrayRef, row: usize) -> String {
    if column.is_null(row) {
        return "NULL".to_string();
    }
    array_value_to_string(column, row).expect("render value")
}

/// Every scanned row as (group values, aggregate values), in scan order.
pub fn scan_rows(table: &GroupedAggHashTable, capacity: usize) -> Vec<(Vec<String>, Vec<String>)> {
    let mut cursor = 0;
    let mut rows = Vec::new();
    loop {
        let batch = table.scan(&mut cursor, capacity).expect("scan");
        if batch.is_empty() {
            break;
        }
        for row in 0..batch.len() {
            let keys = batch.groups.columns().iter().map(|c| render(c, row)).collect();
            let values = batch.results.columns().iter().map(|c| render(c, row)).collect();
            rows.push((keys, values));
        }
    }
    rows
}

pub fn scan_map(table: &GroupedAggHashTable) -> BTreeMap<Vec<String>, Vec<String>> {
    scan_rows(table, 7).into_iter().collect()
}

/// Finalize and return the keyed result map.
pub fn finalize_map(table: &mut GroupedAggHashTable) -> BTreeMap<Vec<String>, Vec<String>> {
    table.finalize().expect("finalize");
    scan_map(table)
}

pub fn key(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
