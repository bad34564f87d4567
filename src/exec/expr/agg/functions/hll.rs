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
//! HyperLogLog sketch with 256 one-byte registers stored inline in the tuple.
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array};
use arrow::datatypes::DataType;

use crate::common::error::{AggError, AggResult};
use crate::exec::hash_table::key_builder::GroupKeyArrayView;
use crate::exec::hash_table::key_layout::key_encoding;
use crate::exec::node::aggregate::AggFunction;

use super::super::*;
use super::AggregateFunction;
use super::common;

pub(super) struct HllAgg;

const HLL_SEED: u64 = 0x5bd1_e995_9e37_79b9;
const INDEX_BITS: u32 = 8;

fn add_hash(registers: &mut [u8], hash: u64) {
    let idx = (hash & (HLL_REGISTER_COUNT as u64 - 1)) as usize;
    let rest = hash >> INDEX_BITS;
    let rank = if rest == 0 {
        (64 - INDEX_BITS + 1) as u8
    } else {
        rest.trailing_zeros() as u8 + 1
    };
    if registers[idx] < rank {
        registers[idx] = rank;
    }
}

pub(super) fn estimate(registers: &[u8]) -> i64 {
    let m = HLL_REGISTER_COUNT as f64;
    let alpha = 0.7213 / (1.0 + 1.079 / m);
    let mut harmonic = 0.0;
    let mut zeros = 0usize;
    for &r in registers {
        harmonic += 2f64.powi(-(r as i32));
        if r == 0 {
            zeros += 1;
        }
    }
    let raw = alpha * m * m / harmonic;
    let estimate = if raw <= 2.5 * m && zeros > 0 {
        // Linear counting for small cardinalities.
        m * (m / zeros as f64).ln()
    } else {
        raw
    };
    estimate.round() as i64
}

impl AggregateFunction for HllAgg {
    fn build_spec(&self, func: &AggFunction) -> AggResult<AggSpec> {
        let data_type = expect_arity(func, 1)?;
        key_encoding(data_type).map_err(|_| {
            AggError::unsupported(format!(
                "{} unsupported input type: {:?}",
                func.name, data_type
            ))
        })?;
        Ok(AggSpec::new(AggKind::ApproxCountDistinct, DataType::Int64))
    }

    fn state_size(&self, _kind: &AggKind) -> usize {
        HLL_REGISTER_COUNT
    }

    fn build_input_view<'a>(
        &self,
        _spec: &AggSpec,
        columns: &'a [ArrayRef],
    ) -> AggResult<AggInputView<'a>> {
        let arr = columns
            .first()
            .ok_or_else(|| AggError::precondition("approx_count_distinct input missing"))?;
        Ok(AggInputView::Key(GroupKeyArrayView::new(arr)?))
    }

    fn update(
        &self,
        spec: &AggSpec,
        _store: &mut AggStateStore,
        state: &mut [u8],
        input: &AggInputView,
        row: usize,
    ) -> AggResult<()> {
        let AggInputView::Key(view) = input else {
            return Err(common::input_mismatch(spec));
        };
        if !view.is_null(row) {
            add_hash(state, view.hash_value(HLL_SEED, row));
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
        for (d, s) in dst.iter_mut().zip(src.iter()) {
            *d = (*d).max(*s);
        }
        Ok(())
    }

    fn build_array(
        &self,
        _spec: &AggSpec,
        _store: &AggStateStore,
        states: &[&[u8]],
    ) -> AggResult<ArrayRef> {
        let values: Vec<i64> = states.iter().map(|s| estimate(s)).collect();
        Ok(Arc::new(Int64Array::from(values)))
    }
}
