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
use arrow::array::{
    Array, ArrayRef, Float32Array, Float64Array, Int8Array, Int16Array, Int32Array, Int64Array,
    StringArray, UInt8Array, UInt16Array, UInt32Array,
};
use arrow::datatypes::DataType;

use crate::common::error::{AggError, AggResult};
use crate::exec::hash_table::key_builder::GroupKeyArrayView;

/// Typed access to the payload columns one aggregate consumes.
pub(crate) enum AggInputView<'a> {
    None,
    Any(&'a ArrayRef),
    Int(IntArrayView<'a>),
    Float(FloatArrayView<'a>),
    Utf8(&'a StringArray),
    Key(GroupKeyArrayView<'a>),
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, name: &str) -> AggResult<&'a T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| AggError::precondition(format!("failed to downcast to {}", name)))
}

pub(crate) fn is_int_input(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
    )
}

pub(crate) fn is_float_input(data_type: &DataType) -> bool {
    matches!(data_type, DataType::Float32 | DataType::Float64)
}

#[derive(Clone, Debug)]
pub(crate) enum IntArrayView<'a> {
    Int64(&'a Int64Array),
    Int32(&'a Int32Array),
    Int16(&'a Int16Array),
    Int8(&'a Int8Array),
    UInt32(&'a UInt32Array),
    UInt16(&'a UInt16Array),
    UInt8(&'a UInt8Array),
}

impl<'a> IntArrayView<'a> {
    pub(crate) fn new(array: &'a ArrayRef) -> AggResult<Self> {
        match array.data_type() {
            DataType::Int64 => Ok(Self::Int64(downcast(array, "Int64Array")?)),
            DataType::Int32 => Ok(Self::Int32(downcast(array, "Int32Array")?)),
            DataType::Int16 => Ok(Self::Int16(downcast(array, "Int16Array")?)),
            DataType::Int8 => Ok(Self::Int8(downcast(array, "Int8Array")?)),
            DataType::UInt32 => Ok(Self::UInt32(downcast(array, "UInt32Array")?)),
            DataType::UInt16 => Ok(Self::UInt16(downcast(array, "UInt16Array")?)),
            DataType::UInt8 => Ok(Self::UInt8(downcast(array, "UInt8Array")?)),
            other => Err(AggError::unsupported(format!(
                "unsupported int input type: {:?}",
                other
            ))),
        }
    }

    pub(crate) fn value_at(&self, row: usize) -> Option<i64> {
        match self {
            IntArrayView::Int64(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            IntArrayView::Int32(arr) => (!arr.is_null(row)).then(|| arr.value(row) as i64),
            IntArrayView::Int16(arr) => (!arr.is_null(row)).then(|| arr.value(row) as i64),
            IntArrayView::Int8(arr) => (!arr.is_null(row)).then(|| arr.value(row) as i64),
            IntArrayView::UInt32(arr) => (!arr.is_null(row)).then(|| arr.value(row) as i64),
            IntArrayView::UInt16(arr) => (!arr.is_null(row)).then(|| arr.value(row) as i64),
            IntArrayView::UInt8(arr) => (!arr.is_null(row)).then(|| arr.value(row) as i64),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) enum FloatArrayView<'a> {
    Float64(&'a Float64Array),
    Float32(&'a Float32Array),
}

impl<'a> FloatArrayView<'a> {
    pub(crate) fn new(array: &'a ArrayRef) -> AggResult<Self> {
        match array.data_type() {
            DataType::Float64 => Ok(Self::Float64(downcast(array, "Float64Array")?)),
            DataType::Float32 => Ok(Self::Float32(downcast(array, "Float32Array")?)),
            other => Err(AggError::unsupported(format!(
                "unsupported float input type: {:?}",
                other
            ))),
        }
    }

    pub(crate) fn value_at(&self, row: usize) -> Option<f64> {
        match self {
            FloatArrayView::Float64(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            FloatArrayView::Float32(arr) => (!arr.is_null(row)).then(|| arr.value(row) as f64),
        }
    }
}

pub(crate) fn utf8_view(array: &ArrayRef) -> AggResult<&StringArray> {
    downcast(array, "StringArray")
}
