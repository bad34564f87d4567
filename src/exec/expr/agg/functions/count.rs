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

use arrow::array::{Array, ArrayRef, Int64Array};
use arrow::datatypes::DataType;

use crate::common::error::{AggError, AggResult};
use crate::exec::node::aggregate::AggFunction;

use super::super::*;
use super::AggregateFunction;
use super::common;

pub(super) struct CountAgg;

impl AggregateFunction for CountAgg {
    fn build_spec(&self, func: &AggFunction) -> AggResult<AggSpec> {
        // count(a, b) counts rows where any argument is non-null; only one is supported.
        match func.inputs.len() {
            0 => Ok(AggSpec::new(AggKind::CountStar, DataType::Int64)),
            1 => Ok(AggSpec::new(AggKind::Count, DataType::Int64)),
            n => Err(AggError::unsupported(format!(
                "count expects at most 1 argument, got {}",
                n
            ))),
        }
    }

    fn state_size(&self, _kind: &AggKind) -> usize {
        COUNT_STATE_SIZE
    }

    fn build_input_view<'a>(
        &self,
        spec: &AggSpec,
        columns: &'a [ArrayRef],
    ) -> AggResult<AggInputView<'a>> {
        match spec.kind {
            AggKind::CountStar => Ok(AggInputView::None),
            _ => columns
                .first()
                .map(AggInputView::Any)
                .ok_or_else(|| AggError::precondition("count input missing")),
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
            AggInputView::None => {}
            AggInputView::Any(array) => {
                if array.is_null(row) {
                    return Ok(());
                }
            }
            _ => return Err(common::input_mismatch(spec)),
        }
        write_i64(state, read_i64(state) + 1);
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
        write_i64(dst, read_i64(dst) + read_i64(src));
        Ok(())
    }

    fn build_array(
        &self,
        _spec: &AggSpec,
        _store: &AggStateStore,
        states: &[&[u8]],
    ) -> AggResult<ArrayRef> {
        let values: Vec<i64> = states.iter().map(|s| read_i64(s)).collect();
        Ok(Arc::new(Int64Array::from(values)))
    }
}
