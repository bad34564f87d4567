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
use arrow::array::ArrayRef;
use arrow::datatypes::DataType;

use crate::common::error::{AggError, AggResult};
use crate::exec::node::aggregate::AggFunction;

use super::super::*;
use super::AggregateFunction;
use super::common;

pub(super) struct SumAgg;

fn add_int(state: &mut [u8], value: i64) -> AggResult<()> {
    let current = OptionalI64::load(state);
    let sum = current
        .value
        .checked_add(value)
        .ok_or_else(|| AggError::aggregate(format!("sum overflow: {} + {}", current.value, value)))?;
    OptionalI64 {
        has_value: true,
        value: sum,
    }
    .store(state);
    Ok(())
}

fn add_float(state: &mut [u8], value: f64) {
    let current = OptionalF64::load(state);
    OptionalF64 {
        has_value: true,
        value: current.value + value,
    }
    .store(state);
}

impl AggregateFunction for SumAgg {
    fn build_spec(&self, func: &AggFunction) -> AggResult<AggSpec> {
        let data_type = expect_arity(func, 1)?;
        if is_int_input(data_type) {
            Ok(AggSpec::new(AggKind::SumInt, DataType::Int64))
        } else if is_float_input(data_type) {
            Ok(AggSpec::new(AggKind::SumFloat, DataType::Float64))
        } else {
            Err(AggError::unsupported(format!(
                "sum unsupported input type: {:?}",
                data_type
            )))
        }
    }

    fn state_size(&self, _kind: &AggKind) -> usize {
        OPTIONAL_STATE_SIZE
    }

    fn build_input_view<'a>(
        &self,
        spec: &AggSpec,
        columns: &'a [ArrayRef],
    ) -> AggResult<AggInputView<'a>> {
        let arr = columns
            .first()
            .ok_or_else(|| AggError::precondition("sum input missing"))?;
        match spec.kind {
            AggKind::SumInt => Ok(AggInputView::Int(IntArrayView::new(arr)?)),
            _ => Ok(AggInputView::Float(FloatArrayView::new(arr)?)),
        }
    }

    fn update(
        &self,
        spec: &AggSpec,
        _store: &mut AggStateStore,
        state: &mut [u8],
        input: &AggInputView,
        row: usize,
    ) -> AggResult<()> {
        match input {
            AggInputView::Int(view) => {
                if let Some(value) = view.value_at(row) {
                    add_int(state, value)?;
                }
                Ok(())
            }
            AggInputView::Float(view) => {
                if let Some(value) = view.value_at(row) {
                    add_float(state, value);
                }
                Ok(())
            }
            _ => Err(common::input_mismatch(spec)),
        }
    }

    fn combine(
        &self,
        spec: &AggSpec,
        _src_store: &AggStateStore,
        src: &[u8],
        _dst_store: &mut AggStateStore,
        dst: &mut [u8],
    ) -> AggResult<()> {
        match spec.kind {
            AggKind::SumInt => {
                if let Some(value) = OptionalI64::load(src).get() {
                    add_int(dst, value)?;
                }
            }
            _ => {
                if let Some(value) = OptionalF64::load(src).get() {
                    add_float(dst, value);
                }
            }
        }
        Ok(())
    }

    fn build_array(
        &self,
        spec: &AggSpec,
        _store: &AggStateStore,
        states: &[&[u8]],
    ) -> AggResult<ArrayRef> {
        match spec.kind {
            AggKind::SumInt => common::build_optional_i64_array(states),
            _ => common::build_optional_f64_array(states),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_overflow_is_an_aggregate_failure() {
        let mut state = [0u8; OPTIONAL_STATE_SIZE];
        add_int(&mut state, i64::MAX).unwrap();
        let err = add_int(&mut state, 1).unwrap_err();
        assert_eq!(
            err.kind(),
            crate::common::error::AggErrorKind::AggregateOperationFailure
        );
        assert_eq!(OptionalI64::load(&state).get(), Some(i64::MAX));
    }
}
