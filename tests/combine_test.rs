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
mod common;

use std::sync::Arc;

use arrow::datatypes::DataType;

use common::*;
use novarocks_hashagg::{
    AggErrorKind, AggFunction, AggregateInput, BufferAllocator, BufferManager, Chunk,
    HashTableOptions, parallel_aggregate,
};

fn mixed_functions() -> Vec<AggFunction> {
    vec![
        AggFunction::new("sum", vec![DataType::Int64]),
        AggFunction::new("count", vec![]),
        AggFunction::new("avg", vec![DataType::Int64]),
        AggFunction::new("min", vec![DataType::Utf8]),
        AggFunction::new("max", vec![DataType::Utf8]),
        AggFunction::new("group_concat", vec![DataType::Utf8]).with_separator("|"),
        AggFunction::new("count", vec![DataType::Int64]).with_distinct(true),
        AggFunction::new("ndv", vec![DataType::Int64]),
        AggFunction::new("min", vec![DataType::Int64]),
        AggFunction::new("max", vec![DataType::Int64]),
        AggFunction::new("min", vec![DataType::Float64]),
        AggFunction::new("max", vec![DataType::Float64]),
        AggFunction::new("avg", vec![DataType::Float64]),
    ]
}

fn mixed_input(keys: &[i64], values: &[i64]) -> AggregateInput {
    let words: Vec<String> = values.iter().map(|v| format!("w{}", v % 11)).collect();
    let word_refs: Vec<Option<&str>> = words.iter().map(|w| Some(w.as_str())).collect();
    let buckets: Vec<i64> = values.iter().map(|v| v % 4).collect();
    let signed: Vec<i64> = values.iter().map(|v| v * 5 % 89 - 40).collect();
    let quarters: Vec<Option<f64>> = values
        .iter()
        .map(|v| (v % 6 != 0).then(|| (v % 23) as f64 * 0.25 - 2.0))
        .collect();
    AggregateInput::new(
        chunk(vec![ints(keys)]),
        chunk(vec![
            ints(values),
            ints(values),
            utf8(word_refs.clone()),
            utf8(word_refs.clone()),
            utf8(word_refs),
            ints(&buckets),
            ints(&buckets),
            ints(&signed),
            ints(&signed),
            float64(quarters.clone()),
            float64(quarters.clone()),
            float64(quarters),
        ]),
    )
}

#[test]
fn distinct_count_ignores_duplicate_values() {
    let functions = vec![
        AggFunction::new("count", vec![DataType::Int64]).with_distinct(true),
        AggFunction::new("sum", vec![DataType::Int64]),
    ];
    let mut table = build_table(vec![DataType::Int64], &functions);
    table
        .add_chunk(
            &chunk(vec![ints(&[1, 1, 1, 2])]),
            &chunk(vec![ints(&[5, 5, 6, 7]), ints(&[5, 5, 6, 7])]),
        )
        .unwrap();
    table
        .add_chunk(
            &chunk(vec![ints(&[1, 2])]),
            &chunk(vec![int64(vec![Some(6), None]), ints(&[1, 1])]),
        )
        .unwrap();
    let result = finalize_map(&mut table);
    assert_eq!(result[&key(&["1"])], key(&["2", "17"]));
    assert_eq!(result[&key(&["2"])], key(&["1", "8"]));
}

#[test]
fn combine_equals_single_table_over_all_input() {
    let keys: Vec<i64> = (0..400).map(|v| (v * 7) % 53).collect();
    let values: Vec<i64> = (0..400).collect();
    let functions = mixed_functions();
    let group_types = vec![DataType::Int64];

    let mut single = build_table(group_types.clone(), &functions);
    let all = mixed_input(&keys, &values);
    single.add_chunk(&all.groups, &all.payload).unwrap();

    let options = HashTableOptions {
        scan_batch_size: 5,
        ..small_options()
    };
    let build = || {
        try_build_table(
            BufferManager::with_limit(-1),
            group_types.clone(),
            &functions,
            options.clone(),
        )
        .unwrap()
    };
    let mut left = build();
    let mut right = build();
    let first = mixed_input(&keys[..150], &values[..150]);
    let second = mixed_input(&keys[150..], &values[150..]);
    left.add_chunk(&first.groups, &first.payload).unwrap();
    right.add_chunk(&second.groups, &second.payload).unwrap();
    let right_len = right.len();

    left.combine(&right).unwrap();
    assert_eq!(right.len(), right_len);

    let expected = finalize_map(&mut single);
    assert_eq!(finalize_map(&mut left), expected);

    // the source is still a complete table of its own
    let right_result = finalize_map(&mut right);
    assert_eq!(right_result.len(), right_len);
}

#[test]
fn combine_with_empty_table_is_identity() {
    let functions = mixed_functions();
    let mut table = build_table(vec![DataType::Int64], &functions);
    let input = mixed_input(&[1, 2, 2], &[3, 4, 5]);
    table.add_chunk(&input.groups, &input.payload).unwrap();
    let mut reference = build_table(vec![DataType::Int64], &functions);
    reference.add_chunk(&input.groups, &input.payload).unwrap();

    let empty = build_table(vec![DataType::Int64], &functions);
    table.combine(&empty).unwrap();
    assert_eq!(finalize_map(&mut table), finalize_map(&mut reference));
}

#[test]
fn distinct_values_seen_by_both_tables_count_once() {
    let functions = vec![AggFunction::new("count", vec![DataType::Int64]).with_distinct(true)];
    let mut left = build_table(vec![DataType::Int64], &functions);
    let mut right = build_table(vec![DataType::Int64], &functions);
    left.add_chunk(&chunk(vec![ints(&[1, 1])]), &chunk(vec![ints(&[5, 6])]))
        .unwrap();
    right
        .add_chunk(&chunk(vec![ints(&[1, 1, 2])]), &chunk(vec![ints(&[5, 7, 5])]))
        .unwrap();
    left.combine(&right).unwrap();
    let result = finalize_map(&mut left);
    assert_eq!(result[&key(&["1"])], key(&["3"]));
    assert_eq!(result[&key(&["2"])], key(&["1"]));
}

#[test]
fn refused_combine_leaves_target_unchanged() {
    let manager = BufferManager::with_limit(4096);
    let options = HashTableOptions {
        initial_capacity: 16,
        block_size_bytes: 1024,
        string_heap_block_size_bytes: 1024,
        max_load_factor: 0.5,
        scan_batch_size: 32,
    };
    let functions = vec![
        AggFunction::new("sum", vec![DataType::Int64]),
        AggFunction::new("count", vec![DataType::Int64]).with_distinct(true),
    ];
    let mut target = try_build_table(
        Arc::clone(&manager) as Arc<dyn BufferAllocator>,
        vec![DataType::Int64],
        &functions,
        options,
    )
    .unwrap();
    target
        .add_chunk(
            &chunk(vec![ints(&[1, 2, 1])]),
            &chunk(vec![ints(&[10, 20, 30]), ints(&[5, 5, 6])]),
        )
        .unwrap();
    let used = manager.mem_tracker().current();

    let mut source = build_table(vec![DataType::Int64], &functions);
    let keys: Vec<i64> = (0..300).collect();
    source
        .add_chunk(&chunk(vec![ints(&keys)]), &chunk(vec![ints(&keys), ints(&keys)]))
        .unwrap();

    let err = target.combine(&source).unwrap_err();
    assert_eq!(err.kind(), AggErrorKind::AllocationFailure);
    assert_eq!(target.len(), 2);
    assert!(!target.is_poisoned());
    assert_eq!(manager.mem_tracker().current(), used);

    // a source that fits still merges afterwards
    let mut small = build_table(vec![DataType::Int64], &functions);
    small
        .add_chunk(&chunk(vec![ints(&[1])]), &chunk(vec![ints(&[1]), ints(&[7])]))
        .unwrap();
    target.combine(&small).unwrap();
    let result = finalize_map(&mut target);
    assert_eq!(result.len(), 2);
    assert_eq!(result[&key(&["1"])], key(&["41", "3"]));
    assert_eq!(result[&key(&["2"])], key(&["20", "1"]));
}

#[test]
fn combine_rejects_different_signatures() {
    let mut table = build_table(
        vec![DataType::Int64],
        &[AggFunction::new("sum", vec![DataType::Int64])],
    );
    let other_groups = build_table(
        vec![DataType::Utf8],
        &[AggFunction::new("sum", vec![DataType::Int64])],
    );
    let other_aggs = build_table(
        vec![DataType::Int64],
        &[AggFunction::new("max", vec![DataType::Int64])],
    );
    let other_distinct = build_table(
        vec![DataType::Int64],
        &[AggFunction::new("sum", vec![DataType::Int64]).with_distinct(true)],
    );
    for other in [&other_groups, &other_aggs, &other_distinct] {
        assert_eq!(
            table.combine(other).unwrap_err().kind(),
            AggErrorKind::PreconditionViolation
        );
    }
    assert!(table.is_empty());
}

#[test]
fn parallel_aggregate_matches_serial_aggregation() {
    let keys: Vec<i64> = (0..1000).map(|v| (v * 13) % 97).collect();
    let values: Vec<i64> = (0..1000).collect();
    let functions = mixed_functions();
    let group_types = vec![DataType::Int64];

    let mut serial = build_table(group_types.clone(), &functions);
    let mut partitions = Vec::new();
    for part in 0..4 {
        let range = part * 250..(part + 1) * 250;
        let mut inputs = Vec::new();
        for sub in range.clone().step_by(50) {
            let input = mixed_input(&keys[sub..sub + 50], &values[sub..sub + 50]);
            serial.add_chunk(&input.groups, &input.payload).unwrap();
            inputs.push(input);
        }
        partitions.push(inputs);
    }

    let allocator: Arc<dyn BufferAllocator> = BufferManager::with_limit(-1);
    let mut merged = parallel_aggregate(partitions, || {
        try_build_table(
            Arc::clone(&allocator),
            group_types.clone(),
            &functions,
            small_options(),
        )
    })
    .unwrap();
    assert_eq!(merged.len(), 97);
    assert_eq!(finalize_map(&mut merged), finalize_map(&mut serial));
}

#[test]
fn parallel_aggregate_surfaces_worker_errors() {
    let functions = vec![AggFunction::new("sum", vec![DataType::Int64])];
    let partitions = vec![
        vec![AggregateInput::new(chunk(vec![ints(&[1])]), chunk(vec![ints(&[1])]))],
        vec![AggregateInput::new(
            chunk(vec![ints(&[1, 2])]),
            Chunk::empty_with_rows(2),
        )],
    ];
    let err = parallel_aggregate(partitions, || {
        try_build_table(
            BufferManager::with_limit(-1),
            vec![DataType::Int64],
            &functions,
            small_options(),
        )
    })
    .unwrap_err();
    assert_eq!(err.kind(), AggErrorKind::PreconditionViolation);
}
