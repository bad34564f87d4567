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
//! Row-wise access to group key columns: hashing, serialization into tuples,
//! key comparison against stored tuples, and gathering stored keys back into
//! Arrow arrays.
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Float32Array, Float64Array,
    Int8Array, Int16Array, Int32Array, Int64Array, StringArray, UInt8Array, UInt16Array,
    UInt32Array, UInt64Array,
};
use arrow::datatypes::DataType;

use crate::common::error::{AggError, AggResult};

use super::hash::{
    GROUP_HASH_SEED, canonical_f32_bits, canonical_f64_bits, combine_hash, hash_bytes_with_seed,
    hash_null_with_seed, hash_u64_with_seed,
};
use super::key_layout::{HASH_WIDTH, KeyEncoding, KeyField, TupleLayout};
use super::key_storage::{STRING_REF_WIDTH, StringHeap, StringRef};

pub(crate) enum GroupKeyArrayView<'a> {
    Boolean(&'a BooleanArray),
    Int8(&'a Int8Array),
    Int16(&'a Int16Array),
    Int32(&'a Int32Array),
    Int64(&'a Int64Array),
    UInt8(&'a UInt8Array),
    UInt16(&'a UInt16Array),
    UInt32(&'a UInt32Array),
    UInt64(&'a UInt64Array),
    Float32(&'a Float32Array),
    Float64(&'a Float64Array),
    Date32(&'a Date32Array),
    Utf8(&'a StringArray),
    Binary(&'a BinaryArray),
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, name: &str) -> AggResult<&'a T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| AggError::precondition(format!("failed to downcast to {}", name)))
}

impl<'a> GroupKeyArrayView<'a> {
    pub(crate) fn new(array: &'a ArrayRef) -> AggResult<Self> {
        let view = match array.data_type() {
            DataType::Boolean => Self::Boolean(downcast(array, "BooleanArray")?),
            DataType::Int8 => Self::Int8(downcast(array, "Int8Array")?),
            DataType::Int16 => Self::Int16(downcast(array, "Int16Array")?),
            DataType::Int32 => Self::Int32(downcast(array, "Int32Array")?),
            DataType::Int64 => Self::Int64(downcast(array, "Int64Array")?),
            DataType::UInt8 => Self::UInt8(downcast(array, "UInt8Array")?),
            DataType::UInt16 => Self::UInt16(downcast(array, "UInt16Array")?),
            DataType::UInt32 => Self::UInt32(downcast(array, "UInt32Array")?),
            DataType::UInt64 => Self::UInt64(downcast(array, "UInt64Array")?),
            DataType::Float32 => Self::Float32(downcast(array, "Float32Array")?),
            DataType::Float64 => Self::Float64(downcast(array, "Float64Array")?),
            DataType::Date32 => Self::Date32(downcast(array, "Date32Array")?),
            DataType::Utf8 => Self::Utf8(downcast(array, "StringArray")?),
            DataType::Binary => Self::Binary(downcast(array, "BinaryArray")?),
            other => {
                return Err(AggError::unsupported(format!(
                    "group key type {:?} is not supported",
                    other
                )));
            }
        };
        Ok(view)
    }

    fn array(&self) -> &dyn Array {
        match self {
            Self::Boolean(a) => *a,
            Self::Int8(a) => *a,
            Self::Int16(a) => *a,
            Self::Int32(a) => *a,
            Self::Int64(a) => *a,
            Self::UInt8(a) => *a,
            Self::UInt16(a) => *a,
            Self::UInt32(a) => *a,
            Self::UInt64(a) => *a,
            Self::Float32(a) => *a,
            Self::Float64(a) => *a,
            Self::Date32(a) => *a,
            Self::Utf8(a) => *a,
            Self::Binary(a) => *a,
        }
    }

    #[inline]
    pub(crate) fn is_null(&self, row: usize) -> bool {
        self.array().is_null(row)
    }

    /// Write the little-endian value of a fixed-width row into `out`.
    /// Returns the number of bytes written, 0 for variable-length views.
    fn write_fixed(&self, row: usize, out: &mut [u8]) -> usize {
        macro_rules! put {
            ($bytes:expr) => {{
                let bytes = $bytes;
                out[..bytes.len()].copy_from_slice(&bytes);
                bytes.len()
            }};
        }
        match self {
            Self::Boolean(a) => put!([a.value(row) as u8]),
            Self::Int8(a) => put!(a.value(row).to_le_bytes()),
            Self::Int16(a) => put!(a.value(row).to_le_bytes()),
            Self::Int32(a) => put!(a.value(row).to_le_bytes()),
            Self::Int64(a) => put!(a.value(row).to_le_bytes()),
            Self::UInt8(a) => put!(a.value(row).to_le_bytes()),
            Self::UInt16(a) => put!(a.value(row).to_le_bytes()),
            Self::UInt32(a) => put!(a.value(row).to_le_bytes()),
            Self::UInt64(a) => put!(a.value(row).to_le_bytes()),
            Self::Float32(a) => put!(canonical_f32_bits(a.value(row)).to_le_bytes()),
            Self::Float64(a) => put!(canonical_f64_bits(a.value(row)).to_le_bytes()),
            Self::Date32(a) => put!(a.value(row).to_le_bytes()),
            Self::Utf8(_) | Self::Binary(_) => 0,
        }
    }

    #[inline]
    pub(crate) fn var_bytes(&self, row: usize) -> Option<&'a [u8]> {
        match self {
            Self::Utf8(a) => Some(a.value(row).as_bytes()),
            Self::Binary(a) => Some(a.value(row)),
            _ => None,
        }
    }

    /// Hash of one value; NULL hashes to a fixed sentinel.
    pub(crate) fn hash_value(&self, seed: u64, row: usize) -> u64 {
        if self.is_null(row) {
            return hash_null_with_seed(seed);
        }
        if let Some(bytes) = self.var_bytes(row) {
            return hash_bytes_with_seed(seed, bytes);
        }
        let mut buf = [0u8; 8];
        self.write_fixed(row, &mut buf);
        hash_u64_with_seed(seed, u64::from_le_bytes(buf))
    }
}

/// The group key columns of one input batch, bound to a table's tuple layout.
pub(crate) struct GroupKeyRows<'a> {
    views: Vec<GroupKeyArrayView<'a>>,
    fields: &'a [KeyField],
}

impl<'a> GroupKeyRows<'a> {
    pub(crate) fn try_new(layout: &'a TupleLayout, columns: &'a [ArrayRef]) -> AggResult<Self> {
        if columns.len() != layout.fields.len() {
            return Err(AggError::precondition(format!(
                "group column count mismatch: expected {} got {}",
                layout.fields.len(),
                columns.len()
            )));
        }
        let mut views = Vec::with_capacity(columns.len());
        for (column, field) in columns.iter().zip(layout.fields.iter()) {
            if column.data_type() != &field.data_type {
                return Err(AggError::precondition(format!(
                    "group column type mismatch: expected {:?} got {:?}",
                    field.data_type,
                    column.data_type()
                )));
            }
            views.push(GroupKeyArrayView::new(column)?);
        }
        Ok(Self {
            views,
            fields: &layout.fields,
        })
    }

    /// Order-sensitive combination of every key column's value hash.
    pub(crate) fn hash_row(&self, row: usize) -> u64 {
        self.views.iter().fold(GROUP_HASH_SEED, |acc, view| {
            combine_hash(acc, view.hash_value(GROUP_HASH_SEED, row))
        })
    }

    /// Variable-length key bytes the given rows would add to the string heap.
    pub(crate) fn var_bytes_total(&self, rows: &[usize]) -> usize {
        let mut total = 0usize;
        for view in &self.views {
            if !matches!(view, GroupKeyArrayView::Utf8(_) | GroupKeyArrayView::Binary(_)) {
                continue;
            }
            for &row in rows {
                if !view.is_null(row) {
                    total += view.var_bytes(row).map(|b| b.len()).unwrap_or(0);
                }
            }
        }
        total
    }

    /// Serialize the fixed part of a row's key into `scratch` (group-width bytes).
    /// Variable-length value regions are left zeroed.
    pub(crate) fn encode_fixed(&self, row: usize, scratch: &mut [u8]) {
        scratch.fill(0);
        for (view, field) in self.views.iter().zip(self.fields.iter()) {
            let start = field.offset - HASH_WIDTH;
            if view.is_null(row) {
                continue;
            }
            scratch[start] = 1;
            if let KeyEncoding::Fixed(_) = field.encoding {
                view.write_fixed(row, &mut scratch[start + 1..start + field.width]);
            }
        }
    }

    /// Compare a row (its fixed part pre-encoded in `scratch`) against a stored group region.
    pub(crate) fn matches(
        &self,
        row: usize,
        scratch: &[u8],
        stored: &[u8],
        heap: &StringHeap,
    ) -> AggResult<bool> {
        for (view, field) in self.views.iter().zip(self.fields.iter()) {
            let start = field.offset - HASH_WIDTH;
            let end = start + field.width;
            match field.encoding {
                KeyEncoding::Fixed(_) => {
                    if scratch[start..end] != stored[start..end] {
                        return Ok(false);
                    }
                }
                KeyEncoding::VarLen => {
                    if scratch[start] != stored[start] {
                        return Ok(false);
                    }
                    if scratch[start] == 0 {
                        continue;
                    }
                    let stored_ref = StringRef::decode(&stored[start + 1..end]);
                    let row_bytes = view.var_bytes(row).unwrap_or(&[]);
                    if stored_ref.len as usize != row_bytes.len() {
                        return Ok(false);
                    }
                    if heap.get(stored_ref)? != row_bytes {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    /// Write a row's full key into a tuple's group region, copying
    /// variable-length payloads into `heap`.
    pub(crate) fn write_row(
        &self,
        row: usize,
        scratch: &[u8],
        group_region: &mut [u8],
        heap: &mut StringHeap,
    ) -> AggResult<()> {
        group_region.copy_from_slice(scratch);
        for (view, field) in self.views.iter().zip(self.fields.iter()) {
            if field.encoding != KeyEncoding::VarLen || view.is_null(row) {
                continue;
            }
            let start = field.offset - HASH_WIDTH + 1;
            let bytes = view.var_bytes(row).unwrap_or(&[]);
            let string_ref = heap.add(bytes)?;
            string_ref.encode(&mut group_region[start..start + STRING_REF_WIDTH]);
        }
        Ok(())
    }
}

macro_rules! gather_primitive {
    ($array:ty, $native:ty, $field:expr, $tuples:expr) => {{
        let start = $field.value_offset();
        let values: Vec<Option<$native>> = $tuples
            .iter()
            .map(|tuple| {
                if tuple[$field.offset] == 0 {
                    return None;
                }
                const WIDTH: usize = std::mem::size_of::<$native>();
                let mut buf = [0u8; WIDTH];
                buf.copy_from_slice(&tuple[start..start + WIDTH]);
                Some(<$native>::from_le_bytes(buf))
            })
            .collect();
        Arc::new(<$array>::from(values)) as ArrayRef
    }};
}

fn gather_var<'h>(
    field: &KeyField,
    tuples: &[&[u8]],
    heap: &'h StringHeap,
) -> AggResult<Vec<Option<&'h [u8]>>> {
    let start = field.value_offset();
    tuples
        .iter()
        .map(|tuple| {
            if tuple[field.offset] == 0 {
                return Ok(None);
            }
            let string_ref = StringRef::decode(&tuple[start..start + STRING_REF_WIDTH]);
            heap.get(string_ref).map(Some)
        })
        .collect()
}

/// Rebuild one key column from stored tuples.
pub(crate) fn gather_key_column(
    field: &KeyField,
    tuples: &[&[u8]],
    heap: &StringHeap,
) -> AggResult<ArrayRef> {
    let array = match &field.data_type {
        DataType::Boolean => {
            let values: Vec<Option<bool>> = tuples
                .iter()
                .map(|t| (t[field.offset] != 0).then(|| t[field.value_offset()] != 0))
                .collect();
            Arc::new(BooleanArray::from(values)) as ArrayRef
        }
        DataType::Int8 => gather_primitive!(Int8Array, i8, field, tuples),
        DataType::Int16 => gather_primitive!(Int16Array, i16, field, tuples),
        DataType::Int32 => gather_primitive!(Int32Array, i32, field, tuples),
        DataType::Int64 => gather_primitive!(Int64Array, i64, field, tuples),
        DataType::UInt8 => gather_primitive!(UInt8Array, u8, field, tuples),
        DataType::UInt16 => gather_primitive!(UInt16Array, u16, field, tuples),
        DataType::UInt32 => gather_primitive!(UInt32Array, u32, field, tuples),
        DataType::UInt64 => gather_primitive!(UInt64Array, u64, field, tuples),
        DataType::Float32 => gather_primitive!(Float32Array, f32, field, tuples),
        DataType::Float64 => gather_primitive!(Float64Array, f64, field, tuples),
        DataType::Date32 => gather_primitive!(Date32Array, i32, field, tuples),
        DataType::Utf8 => {
            let raw = gather_var(field, tuples, heap)?;
            let mut values = Vec::with_capacity(raw.len());
            for bytes in raw {
                values.push(match bytes {
                    Some(b) => Some(std::str::from_utf8(b).map_err(|e| {
                        AggError::precondition(format!("stored utf8 key is invalid: {e}"))
                    })?),
                    None => None,
                });
            }
            Arc::new(StringArray::from(values)) as ArrayRef
        }
        DataType::Binary => {
            let values = gather_var(field, tuples, heap)?;
            Arc::new(BinaryArray::from(values)) as ArrayRef
        }
        other => {
            return Err(AggError::unsupported(format!(
                "group key type {:?} is not supported",
                other
            )));
        }
    };
    Ok(array)
}

pub(crate) fn gather_group_keys(
    layout: &TupleLayout,
    tuples: &[&[u8]],
    heap: &StringHeap,
) -> AggResult<Vec<ArrayRef>> {
    layout
        .fields
        .iter()
        .map(|field| gather_key_column(field, tuples, heap))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::buffer_manager::BufferManager;

    fn layout(types: &[DataType]) -> TupleLayout {
        TupleLayout::try_new(types, &[]).unwrap()
    }

    #[test]
    fn null_keys_hash_and_encode_identically() {
        let layout = layout(&[DataType::Int64]);
        let cols = vec![Arc::new(Int64Array::from(vec![None, Some(0), None])) as ArrayRef];
        let rows = GroupKeyRows::try_new(&layout, &cols).unwrap();
        assert_eq!(rows.hash_row(0), rows.hash_row(2));
        assert_ne!(rows.hash_row(0), rows.hash_row(1));

        let mut a = vec![0u8; layout.group_width];
        let mut b = vec![0u8; layout.group_width];
        rows.encode_fixed(0, &mut a);
        rows.encode_fixed(1, &mut b);
        assert_ne!(a, b);
        rows.encode_fixed(2, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn string_keys_round_trip_through_heap() {
        let manager = BufferManager::with_limit(-1);
        let mut heap = StringHeap::new(manager, 64);
        let layout = layout(&[DataType::Utf8, DataType::Int32]);
        let cols = vec![
            Arc::new(StringArray::from(vec![Some("apple"), None])) as ArrayRef,
            Arc::new(Int32Array::from(vec![Some(7), Some(8)])) as ArrayRef,
        ];
        let rows = GroupKeyRows::try_new(&layout, &cols).unwrap();
        assert_eq!(rows.var_bytes_total(&[0, 1]), 5);

        let mut tuples = vec![vec![0u8; layout.tuple_size]; 2];
        let mut scratch = vec![0u8; layout.group_width];
        for (row, tuple) in tuples.iter_mut().enumerate() {
            rows.encode_fixed(row, &mut scratch);
            rows.write_row(row, &scratch, &mut tuple[layout.group_range()], &mut heap)
                .unwrap();
        }
        rows.encode_fixed(0, &mut scratch);
        assert!(
            rows.matches(0, &scratch, &tuples[0][layout.group_range()], &heap)
                .unwrap()
        );
        assert!(
            !rows
                .matches(0, &scratch, &tuples[1][layout.group_range()], &heap)
                .unwrap()
        );

        let slices: Vec<&[u8]> = tuples.iter().map(|t| t.as_slice()).collect();
        let keys = gather_group_keys(&layout, &slices, &heap).unwrap();
        let names = keys[0].as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(names.value(0), "apple");
        assert!(names.is_null(1));
        let ints = keys[1].as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(ints.values(), &[7, 8]);
    }

    #[test]
    fn signature_mismatch_is_a_precondition_violation() {
        let layout = layout(&[DataType::Int64]);
        let cols = vec![Arc::new(Int32Array::from(vec![1])) as ArrayRef];
        let err = GroupKeyRows::try_new(&layout, &cols).err().unwrap();
        assert_eq!(
            err.kind(),
            crate::common::error::AggErrorKind::PreconditionViolation
        );
    }
}
