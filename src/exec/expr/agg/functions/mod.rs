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

use crate::common::error::{AggError, AggResult};
use crate::exec::node::aggregate::AggFunction;

use super::{AggInputView, AggSpec, AggStateStore};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum AggKind {
    CountStar,
    Count,
    SumInt,
    SumFloat,
    AvgInt,
    AvgFloat,
    MinInt,
    MaxInt,
    MinFloat,
    MaxFloat,
    MinUtf8,
    MaxUtf8,
    GroupConcat,
    ApproxCountDistinct,
}

mod avg;
pub(crate) mod common;
mod count;
mod group_concat;
mod hll;
mod max;
mod min;
mod sum;

use avg::AvgAgg;
use count::CountAgg;
use group_concat::GroupConcatAgg;
use hll::HllAgg;
use max::MaxAgg;
use min::MinAgg;
use sum::SumAgg;

pub(super) trait AggregateFunction {
    fn build_spec(&self, func: &AggFunction) -> AggResult<AggSpec>;

    fn state_size(&self, kind: &AggKind) -> usize;

    fn owns_heap(&self, _kind: &AggKind) -> bool {
        false
    }

    fn build_input_view<'a>(
        &self,
        spec: &AggSpec,
        columns: &'a [ArrayRef],
    ) -> AggResult<AggInputView<'a>>;

    fn init_state(&self, _spec: &AggSpec, state: &mut [u8]) {
        state.fill(0);
    }

    fn destroy(&self, _spec: &AggSpec, _store: &mut AggStateStore, _state: &mut [u8]) {}

    fn update(
        &self,
        spec: &AggSpec,
        store: &mut AggStateStore,
        state: &mut [u8],
        input: &AggInputView,
        row: usize,
    ) -> AggResult<()>;

    fn combine(
        &self,
        spec: &AggSpec,
        src_store: &AggStateStore,
        src: &[u8],
        dst_store: &mut AggStateStore,
        dst: &mut [u8],
    ) -> AggResult<()>;

    fn build_array(
        &self,
        spec: &AggSpec,
        store: &AggStateStore,
        states: &[&[u8]],
    ) -> AggResult<ArrayRef>;
}

static COUNT: CountAgg = CountAgg;
static SUM: SumAgg = SumAgg;
static AVG: AvgAgg = AvgAgg;
static MIN: MinAgg = MinAgg;
static MAX: MaxAgg = MaxAgg;
static GROUP_CONCAT: GroupConcatAgg = GroupConcatAgg;
static HLL: HllAgg = HllAgg;

fn resolve_by_func(func: &AggFunction) -> AggResult<&'static dyn AggregateFunction> {
    match func.name.to_ascii_lowercase().as_str() {
        "count" => Ok(&COUNT),
        "sum" => Ok(&SUM),
        "avg" => Ok(&AVG),
        "min" => Ok(&MIN),
        "max" => Ok(&MAX),
        "group_concat" | "string_agg" => Ok(&GROUP_CONCAT),
        "approx_count_distinct" | "ndv" => Ok(&HLL),
        other => Err(AggError::unsupported(format!(
            "unsupported agg function: {}",
            other
        ))),
    }
}

fn resolve_by_kind(kind: &AggKind) -> &'static dyn AggregateFunction {
    match kind {
        AggKind::CountStar | AggKind::Count => &COUNT,
        AggKind::SumInt | AggKind::SumFloat => &SUM,
        AggKind::AvgInt | AggKind::AvgFloat => &AVG,
        AggKind::MinInt | AggKind::MinFloat | AggKind::MinUtf8 => &MIN,
        AggKind::MaxInt | AggKind::MaxFloat | AggKind::MaxUtf8 => &MAX,
        AggKind::GroupConcat => &GROUP_CONCAT,
        AggKind::ApproxCountDistinct => &HLL,
    }
}

pub(super) fn build_spec(func: &AggFunction) -> AggResult<AggSpec> {
    resolve_by_func(func)?.build_spec(func)
}

pub(super) fn state_size(kind: &AggKind) -> usize {
    resolve_by_kind(kind).state_size(kind)
}

pub(super) fn owns_heap(kind: &AggKind) -> bool {
    resolve_by_kind(kind).owns_heap(kind)
}

pub(super) fn build_input_view<'a>(
    spec: &AggSpec,
    columns: &'a [ArrayRef],
) -> AggResult<AggInputView<'a>> {
    resolve_by_kind(&spec.kind).build_input_view(spec, columns)
}

pub(super) fn init_state(spec: &AggSpec, state: &mut [u8]) {
    resolve_by_kind(&spec.kind).init_state(spec, state)
}

pub(super) fn destroy(spec: &AggSpec, store: &mut AggStateStore, state: &mut [u8]) {
    resolve_by_kind(&spec.kind).destroy(spec, store, state)
}

pub(super) fn update(
    spec: &AggSpec,
    store: &mut AggStateStore,
    state: &mut [u8],
    input: &AggInputView,
    row: usize,
) -> AggResult<()> {
    resolve_by_kind(&spec.kind).update(spec, store, state, input, row)
}

pub(super) fn combine(
    spec: &AggSpec,
    src_store: &AggStateStore,
    src: &[u8],
    dst_store: &mut AggStateStore,
    dst: &mut [u8],
) -> AggResult<()> {
    resolve_by_kind(&spec.kind).combine(spec, src_store, src, dst_store, dst)
}

pub(super) fn build_array(
    spec: &AggSpec,
    store: &AggStateStore,
    states: &[&[u8]],
) -> AggResult<ArrayRef> {
    resolve_by_kind(&spec.kind).build_array(spec, store, states)
}
