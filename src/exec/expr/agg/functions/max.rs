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

use arrow::array::ArrayRef;

use crate::common::error::AggResult;
use crate::exec::node::aggregate::AggFunction;

use super::super::*;
use super::AggregateFunction;
use super::common;
use super::min::{
    extreme_build_array, extreme_combine, extreme_input_view, extreme_spec, extreme_state_size,
    extreme_update,
};

pub(super) struct MaxAgg;

impl AggregateFunction for MaxAgg {
    fn build_spec(&self, func: &AggFunction) -> AggResult<AggSpec> {
        extreme_spec(func, AggKind::MaxInt, AggKind::MaxFloat, AggKind::MaxUtf8)
    }

    fn state_size(&self, kind: &AggKind) -> usize {
        extreme_state_size(kind)
    }

    fn owns_heap(&self, kind: &AggKind) -> bool {
        matches!(kind, AggKind::MaxUtf8)
    }

    fn build_input_view<'a>(
        &self,
        spec: &AggSpec,
        columns: &'a [ArrayRef],
    ) -> AggResult<AggInputView<'a>> {
        extreme_input_view(spec, columns)
    }

    fn destroy(&self, spec: &AggSpec, store: &mut AggStateStore, state: &mut [u8]) {
        if spec.kind == AggKind::MaxUtf8 {
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
        extreme_update(spec, store, state, input, row, Ordering::Greater)
    }

    fn combine(
        &self,
        spec: &AggSpec,
        src_store: &AggStateStore,
        src: &[u8],
        dst_store: &mut AggStateStore,
        dst: &mut [u8],
    ) -> AggResult<()> {
        extreme_combine(spec, src_store, src, dst_store, dst, Ordering::Greater)
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
