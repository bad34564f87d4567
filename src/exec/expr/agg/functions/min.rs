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

use arrow::array::{Array, ArrayRef};
use arrow::datatypes::DataType;

use crate::common::error::{AggError, AggResult};
use crate::exec::node::aggregate::AggFunction;

use super::super::*;
use super::AggregateFunction;
use super::common;

pub(super) struct MinAgg;

/// Shared by MIN and MAX.
pub(super) fn extreme_spec(
    func: &AggFunction,
    int_kind: AggKind,
    float_kind: AggKind,
    utf8_kind: AggKind,
) -> AggResult<AggSpec> {
    let data_type = expect_arity(func, 1)?;
    if is_int_input(data_type) {
        Ok(AggSpec::new(int_kind, DataType::Int64))
    } else if is_float_input(data_type) {
        Ok(AggSpec::new(float_kind, DataType::Float64))
    } else if data_type == &DataType::Utf8 {
        Ok(AggSpec::new(utf8_kind, DataType::Utf8))
    } else {
        Err(AggError::unsupported(format!(
            "{} unsupported input type: {:?}",
            func.name, data_type
        )))
    }
}

pub(super) fn extreme_state_size(kind: &AggKind) -> usize {
    match kind {
        AggKind::MinUtf8 | AggKind::MaxUtf8 => SLOT_STATE_SIZE,
        _ => OPTIONAL_STATE_SIZE,
    }
}

pub(super) fn extreme_input_view<'a>(
    spec: &AggSpec,
    columns: &'a [ArrayRef],
) -> AggResult<AggInputView<'a>> {
    let arr = columns
        .first()
        .ok_or_else(|| AggError::precondition("min/max input missing"))?;
    match spec.kind {
        AggKind::MinInt | AggKind::MaxInt => Ok(AggInputView::Int(IntArrayView::new(arr)?)),
        AggKind::MinFloat | AggKind::MaxFloat => {
            Ok(AggInputView::Float(FloatArrayView::new(arr)?))
        }
        _ => Ok(AggInputView::Utf8(utf8_view(arr)?)),
    }
}

/// `want` is the ordering a new value must have against the current one to replace it.
pub(super) fn extreme_update(
    spec: &AggSpec,
    store: &mut AggStateStore,
    state: &mut [u8],
    input: &AggInputView,
    row: usize,
    want: Ordering,
) -> AggResult<()> {
    match input {
        AggInputView::Int(view) => {
            if let Some(value) = view.value_at(row) {
                common::fold_extreme_i64(state, value, want);
            }
        }
        AggInputView::Float(view) => {
            if let Some(value) = view.value_at(row) {
                common::fold_extreme_f64(state, value, want);
            }
        }
        AggInputView::Utf8(arr) => {
            if !arr.is_null(row) {
                common::fold_extreme_bytes(store, state, arr.value(row).as_bytes(), want)?;
            }
        }
        _ => return Err(common::input_mismatch(spec)),
    }
    Ok(())
}

pub(super) fn extreme_combine(
    spec: &AggSpec,
    src_store: &AggStateStore,
    src: &[u8],
    dst_store: &mut AggStateStore,
    dst: &mut [u8],
    want: Ordering,
) -> AggResult<()> {
    match spec.kind {
        AggKind::MinInt | AggKind::MaxInt => {
            if let Some(value) = OptionalI64::load(src).get() {
                common::fold_extreme_i64(dst, value, want);
            }
        }
        AggKind::MinFloat | AggKind::MaxFloat => {
            if let Some(value) = OptionalF64::load(src).get() {
                common::fold_extreme_f64(dst, value, want);
            }
        }
        _ => {
            if let Some(value) = src_store.get(common::slot_id(src)) {
                common::fold_extreme_bytes(dst_store, dst, value, want)?;
            }
        }
    }
    Ok(())
}

pub(super) fn extreme_build_array(
    spec: &AggSpec,
    store: &AggStateStore,
    states: &[&[u8]],
) -> AggResult<ArrayRef> {
    match spec.kind {
        AggKind::MinInt | AggKind::MaxInt => common::build_optional_i64_array(states),
        AggKind::MinFloat | AggKind::MaxFloat => common::build_optional_f64_array(states),
        _ => common::build_utf8_from_slots(store, states),
    }
}

impl AggregateFunction for MinAgg {
    fn build_spec(&self, func: &AggFunction) -> AggResult<AggSpec> {
        extreme_spec(func, AggKind::MinInt, AggKind::MinFloat, AggKind::MinUtf8)
    }

    fn state_size(&self, kind: &AggKind) -> usize {
        extreme_state_size(kind)
    }

    fn owns_heap(&self, kind: &AggKind) -> bool {
        matches!(kind, AggKind::MinUtf8)
    }

    fn build_input_view<'a>(
        &self,
        spec: &AggSpec,
        columns: &'a [ArrayRef],
    ) -> AggResult<AggInputView<'a>> {
        extreme_input_view(spec, columns)
    }

    fn destroy(&self, spec: &AggSpec, store: &mut AggStateStore, state: &mut [u8]) {
        if spec.kind == AggKind::MinUtf8 {
            common::free_slot(store, state);
        }
    }

    fn update(
        &self,
        spec: &AggSpec,
        store: &mut AggStateStore,
        state: &mut [u8],
        input: &AggInputView,
        row: usize,
    ) -> AggResult<()> {
        extreme_update(spec, store, state, input, row, Ordering::Less)
    }

    fn combine(
        &self,
        spec: &AggSpec,
        src_store: &AggStateStore,
        src: &[u8],
        dst_store: &mut AggStateStore,
        dst: &mut [u8],
    ) -> AggResult<()> {
        extreme_combine(spec, src_store, src, dst_store, dst, Ordering::Less)
    }

    fn build_array(
        &self,
        spec: &AggSpec,
        store: &AggStateStore,
        states: &[&[u8]],
    ) -> AggResult<ArrayRef> {
        extreme_build_array(spec, store, states)
    }
}
