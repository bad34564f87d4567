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

use arrow::datatypes::DataType;

use common::*;
use novarocks_hashagg::{AggErrorKind, AggFunction, AggregateObject, Chunk};

#[test]
fn count_star_counts_rows_and_count_skips_nulls() {
    let functions = vec![
        AggFunction::new("count", vec![]),
        AggFunction::new("count", vec![DataType::Int64]),
    ];
    let mut table = build_table(vec![DataType::Int64], &functions);
    table
        .add_chunk(
            &chunk(vec![ints(&[1, 1, 1])]),
            &chunk(vec![int64(vec![Some(3), None, Some(4)])]),
        )
        .unwrap();
    let result = finalize_map(&mut table);
    assert_eq!(result[&key(&["1"])], key(&["3", "2"]));
}

#[test]
fn sum_and_avg_of_only_nulls_are_null() {
    let functions = vec![
        AggFunction::new("sum", vec![DataType::Int64]),
        AggFunction::new("avg", vec![DataType::Int64]),
        AggFunction::new("sum", vec![DataType::Float64]),
    ];
    let mut table = build_table(vec![DataType::Int64], &functions);
    table
        .add_chunk(
            &chunk(vec![ints(&[1, 2, 2])]),
            &chunk(vec![
                int64(vec![None, Some(1), Some(2)]),
                int64(vec![None, Some(1), Some(2)]),
                float64(vec![None, Some(0.25), Some(0.5)]),
            ]),
        )
        .unwrap();
    let result = finalize_map(&mut table);
    assert_eq!(result[&key(&["1"])], key(&["NULL", "NULL", "NULL"]));
    assert_eq!(result[&key(&["2"])], key(&["3", "1.5", "0.75"]));
}

#[test]
fn min_and_max_cover_ints_floats_and_strings() {
    let functions = vec![
        AggFunction::new("min", vec![DataType::Int32]),
        AggFunction::new("max", vec![DataType::Int32]),
        AggFunction::new("min", vec![DataType::Float64]),
        AggFunction::new("max", vec![DataType::Utf8]),
        AggFunction::new("min", vec![DataType::Utf8]),
    ];
    let mut table = build_table(vec![DataType::Int64], &functions);
    let small = std::sync::Arc::new(arrow::array::Int32Array::from(vec![
        Some(4),
        None,
        Some(-2),
    ])) as arrow::array::ArrayRef;
    table
        .add_chunk(
            &chunk(vec![ints(&[9, 9, 9])]),
            &chunk(vec![
                small.clone(),
                small,
                float64(vec![Some(1.5), Some(-0.5), None]),
                utf8(vec![Some("kiwi"), Some("banana"), None]),
                utf8(vec![Some("kiwi"), Some("banana"), None]),
            ]),
        )
        .unwrap();
    let result = finalize_map(&mut table);
    assert_eq!(
        result[&key(&["9"])],
        key(&["-2", "4", "-0.5", "kiwi", "banana"])
    );
}

#[test]
fn group_concat_uses_separator_and_skips_nulls() {
    let functions = vec![
        AggFunction::new("group_concat", vec![DataType::Utf8]),
        AggFunction::new("string_agg", vec![DataType::Utf8]).with_separator(" / "),
    ];
    let mut table = build_table(vec![DataType::Int64], &functions);
    let words = vec![Some("a"), None, Some("b"), Some("c")];
    table
        .add_chunk(
            &chunk(vec![ints(&[1, 1, 1, 2])]),
            &chunk(vec![utf8(words.clone()), utf8(words)]),
        )
        .unwrap();
    table
        .add_chunk(
            &chunk(vec![ints(&[3])]),
            &chunk(vec![utf8(vec![None]), utf8(vec![None])]),
        )
        .unwrap();
    let result = finalize_map(&mut table);
    assert_eq!(result[&key(&["1"])], key(&["a,b", "a / b"]));
    assert_eq!(result[&key(&["2"])], key(&["c", "c"]));
    assert_eq!(result[&key(&["3"])], key(&["NULL", "NULL"]));
}

#[test]
fn approx_count_distinct_is_close_to_exact() {
    let functions = vec![
        AggFunction::new("approx_count_distinct", vec![DataType::Int64]),
        AggFunction::new("ndv", vec![DataType::Utf8]),
    ];
    let mut table = build_table(vec![DataType::Int64], &functions);
    let values: Vec<i64> = (0..3000).map(|v| v % 500).collect();
    let words: Vec<String> = values.iter().map(|v| format!("v{v}")).collect();
    let word_refs: Vec<Option<&str>> = words.iter().map(|w| Some(w.as_str())).collect();
    let keys = vec![0i64; values.len()];
    table
        .add_chunk(
            &chunk(vec![ints(&keys)]),
            &chunk(vec![ints(&values), utf8(word_refs)]),
        )
        .unwrap();
    table
        .add_chunk(
            &chunk(vec![ints(&[1, 1])]),
            &chunk(vec![int64(vec![None, None]), utf8(vec![None, None])]),
        )
        .unwrap();
    let result = finalize_map(&mut table);
    for estimate in &result[&key(&["0"])] {
        let estimate: i64 = estimate.parse().unwrap();
        assert!((400..=600).contains(&estimate), "estimate {estimate}");
    }
    assert_eq!(result[&key(&["1"])], key(&["0", "0"]));
}

#[test]
fn names_are_case_insensitive_and_arity_is_checked() {
    let sum = AggregateObject::try_new(&AggFunction::new("SUM", vec![DataType::Float32])).unwrap();
    assert_eq!(sum.return_type, DataType::Float64);

    let err = AggregateObject::try_new(&AggFunction::new("sum", vec![])).unwrap_err();
    assert_eq!(err.kind(), AggErrorKind::Unsupported);
    let err = AggregateObject::try_new(&AggFunction::new(
        "count",
        vec![DataType::Int64, DataType::Int64],
    ))
    .unwrap_err();
    assert_eq!(err.kind(), AggErrorKind::Unsupported);
    let err = AggregateObject::try_new(&AggFunction::new("sum", vec![DataType::Utf8])).unwrap_err();
    assert_eq!(err.kind(), AggErrorKind::Unsupported);
    let err = AggregateObject::try_new(&AggFunction::new("count", vec![]).with_distinct(true))
        .unwrap_err();
    assert_eq!(err.kind(), AggErrorKind::PreconditionViolation);
}

#[test]
fn global_aggregation_uses_zero_group_columns() {
    let functions = vec![AggFunction::new("sum", vec![DataType::Int64])];
    let mut table = build_table(vec![], &functions);
    table
        .add_chunk(&Chunk::empty_with_rows(3), &chunk(vec![ints(&[1, 2, 3])]))
        .unwrap();
    table
        .add_chunk(&Chunk::empty_with_rows(1), &chunk(vec![ints(&[4])]))
        .unwrap();
    assert_eq!(table.len(), 1);
    let result = finalize_map(&mut table);
    assert_eq!(result[&Vec::<String>::new()], key(&["10"]));
}
