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
use std::cmp::Ordering;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringBuilder};

use crate::common::error::{AggError, AggResult};

use super::super::*;

pub(super) fn input_mismatch(spec: &AggSpec) -> AggError {
    AggError::precondition(format!("{:?} input view mismatch", spec.kind))
}

pub(super) fn build_optional_i64_array(states: &[&[u8]]) -> AggResult<ArrayRef> {
    let values: Vec<Option<i64>> = states.iter().map(|s| OptionalI64::load(s).get()).collect();
    Ok(Arc::new(Int64Array::from(values)))
}

pub(super) fn build_optional_f64_array(states: &[&[u8]]) -> AggResult<ArrayRef> {
    let values: Vec<Option<f64>> = states.iter().map(|s| OptionalF64::load(s).get()).collect();
    Ok(Arc::new(Float64Array::from(values)))
}

/// Keep the smaller (`want = Less`) or larger (`want = Greater`) value.
pub(super) fn fold_extreme_i64(state: &mut [u8], value: i64, want: Ordering) {
    let mut current = OptionalI64::load(state);
    if !current.has_value || value.cmp(&current.value) == want {
        current = OptionalI64 {
            has_value: true,
            value,
        };
        current.store(state);
    }
}

/// Floats compare by IEEE total order, so NaN sorts above every number.
pub(super) fn fold_extreme_f64(state: &mut [u8], value: f64, want: Ordering) {
    let mut current = OptionalF64::load(state);
    if !current.has_value || value.total_cmp(&current.value) == want {
        current = OptionalF64 {
            has_value: true,
            value,
        };
        current.store(state);
    }
}

pub(super) fn slot_id(state: &[u8]) -> u64 {
    read_u64(state)
}

/// Store `bytes` as the value of a slot-backed state, allocating the slot on first use.
pub(super) fn put_slot_value(
    store: &mut AggStateStore,
    state: &mut [u8],
    bytes: &[u8],
) -> AggResult<()> {
    let id = slot_id(state);
    if id == 0 {
        let id = store.alloc(bytes.to_vec());
        write_u64(state, id);
        Ok(())
    } else {
        store.set(id, bytes)
    }
}

pub(super) fn fold_extreme_bytes(
    store: &mut AggStateStore,
    state: &mut [u8],
    value: &[u8],
    want: Ordering,
) -> AggResult<()> {
    let replace = match store.get(slot_id(state)) {
        None => true,
        Some(current) => value.cmp(current) == want,
    };
    if replace {
        put_slot_value(store, state, value)?;
    }
    Ok(())
}

pub(super) fn free_slot(store: &mut AggStateStore, state: &mut [u8]) {
    store.free(slot_id(state));
    write_u64(state, 0);
}

pub(super) fn build_utf8_from_slots(
    store: &AggStateStore,
    states: &[&[u8]],
) -> AggResult<ArrayRef> {
    let mut builder = StringBuilder::new();
    for state in states {
        match store.get(slot_id(state)) {
            Some(bytes) => {
                let text = std::str::from_utf8(bytes).map_err(|e| {
                    AggError::aggregate(format!("aggregate produced invalid utf8: {e}"))
                })?;
                builder.append_value(text);
            }
            None => builder.append_null(),
        }
    }
    Ok(Arc::new(builder.finish()))
}
