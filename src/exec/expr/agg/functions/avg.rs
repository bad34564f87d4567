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

use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::DataType;

use crate::common::error::{AggError, AggResult};
use crate::exec::node::aggregate::AggFunction;

use super::super::*;
use super::AggregateFunction;
use super::common;

pub(super) struct AvgAgg;

impl AggregateFunction for AvgAgg {
    fn build_spec(&self, func: &AggFunction) -> AggResult<AggSpec> {
        let data_type = expect_arity(func, 1)?;
        if is_int_input(data_type) {
            Ok(AggSpec::new(AggKind::AvgInt, DataType::Float64))
        } else if is_float_input(data_type) {
            Ok(AggSpec::new(AggKind::AvgFloat, DataType::Float64))
        } else {
            Err(AggError::unsupported(format!(
                "avg unsupported input type: {:?}",
                data_type
            )))
        }
    }

    fn state_size(&self, _kind: &AggKind) -> usize {
        AVG_STATE_SIZE
    }

    fn build_input_view<'a>(
        &self,
        spec: &AggSpec,
        columns: &'a [ArrayRef],
    ) -> AggResult<AggInputView<'a>> {
        let arr = columns
            .first()
            .ok_or_else(|| AggError::precondition("avg input missing"))?;
        match spec.kind {
            AggKind::AvgInt => Ok(AggInputView::Int(IntArrayView::new(arr)?)),
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
        let value = match input {
            AggInputView::Int(view) => view.value_at(row).map(|v| v as f64),
            AggInputView::Float(view) => view.value_at(row),
            _ => return Err(common::input_mismatch(spec)),
        };
        if let Some(value) = value {
            let mut avg = AvgState::load(state);
            avg.sum += value;
            avg.count += 1;
            avg.store(state);
        }
        Ok(())
    }

    fn combine(
        &self,
        _spec: &AggSpec,
        _src_store: &AggStateStore,
        src: &[u8],
        _dst_store: &mut AggStateStore,
        dst: &mut [u8],
    ) -> AggResult<()> {
        let other = AvgState::load(src);
        let mut avg = AvgState::load(dst);
        avg.sum += other.sum;
        avg.count += other.count;
        avg.store(dst);
        Ok(())
    }

    fn build_array(
        &self,
        _spec: &AggSpec,
        _store: &AggStateStore,
        states: &[&[u8]],
    ) -> AggResult<ArrayRef> {
        let values: Vec<Option<f64>> = states
            .iter()
            .map(|s| {
                let avg = AvgState::load(s);
                (avg.count > 0).then(|| avg.sum / avg.count as f64)
            })
            .collect();
        Ok(Arc::new(Float64Array::from(values)))
    }
}
