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
use arrow::array::{Array, ArrayRef};
use arrow::datatypes::DataType;

use crate::common::error::{AggError, AggResult};
use crate::exec::node::aggregate::AggFunction;

use super::super::*;
use super::AggregateFunction;
use super::common;

pub(super) struct GroupConcatAgg;

fn concat_into(
    store: &mut AggStateStore,
    state: &mut [u8],
    separator: &str,
    value: &[u8],
) -> AggResult<()> {
    let id = common::slot_id(state);
    if store.get(id).is_none() {
        return common::put_slot_value(store, state, value);
    }
    store.append(id, separator.as_bytes())?;
    store.append(id, value)
}

impl AggregateFunction for GroupConcatAgg {
    fn build_spec(&self, func: &AggFunction) -> AggResult<AggSpec> {
        let data_type = expect_arity(func, 1)?;
        if data_type != &DataType::Utf8 {
            return Err(AggError::unsupported(format!(
                "{} unsupported input type: {:?}",
                func.name, data_type
            )));
        }
        let mut spec = AggSpec::new(AggKind::GroupConcat, DataType::Utf8);
        spec.separator = func
            .separator
            .clone()
            .unwrap_or_else(|| DEFAULT_GROUP_CONCAT_SEPARATOR.to_string());
        Ok(spec)
    }

    fn state_size(&self, _kind: &AggKind) -> usize {
        SLOT_STATE_SIZE
    }

    fn owns_heap(&self, _kind: &AggKind) -> bool {
        true
    }

    fn build_input_view<'a>(
        &self,
        _spec: &AggSpec,
        columns: &'a [ArrayRef],
    ) -> AggResult<AggInputView<'a>> {
        let arr = columns
            .first()
            .ok_or_else(|| AggError::precondition("group_concat input missing"))?;
        Ok(AggInputView::Utf8(utf8_view(arr)?))
    }

    fn destroy(&self, _spec: &AggSpec, store: &mut AggStateStore, state: &mut [u8]) {
        common::free_slot(store, state);
    }

    fn update(
        &self,
        spec: &AggSpec,
        store: &mut AggStateStore,
        state: &mut [u8],
        input: &AggInputView,
        row: usize,
    ) -> AggResult<()> {
        let AggInputView::Utf8(arr) = input else {
            return Err(common::input_mismatch(spec));
        };
        if arr.is_null(row) {
            return Ok(());
        }
        concat_into(store, state, &spec.separator, arr.value(row).as_bytes())
    }

    fn combine(
        &self,
        spec: &AggSpec,
        src_store: &AggStateStore,
        src: &[u8],
        dst_store: &mut AggStateStore,
        dst: &mut [u8],
    ) -> AggResult<()> {
        match src_store.get(common::slot_id(src)) {
            Some(value) => concat_into(dst_store, dst, &spec.separator, value),
            None => Ok(()),
        }
    }

    fn build_array(
        &self,
        _spec: &AggSpec,
        store: &AggStateStore,
        states: &[&[u8]],
    ) -> AggResult<ArrayRef> {
        common::build_utf8_from_slots(store, states)
    }
}
