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
//! Byte layout of one hash-table tuple.
//!
//! ```text
//! [hash: u64 LE][key field 0]...[key field n-1][agg state 0]...[agg state m-1]
//! ```
//!
//! Every key field starts with a validity byte (1 = valid). A NULL field keeps
//! its value bytes zeroed so two NULLs serialize identically. Variable-length
//! fields store a `StringRef` into the table's string heap instead of the bytes.

use arrow::datatypes::DataType;

use crate::common::error::{AggError, AggResult};
use crate::exec::expr::agg::AggregateObject;

use super::key_storage::STRING_REF_WIDTH;

pub(crate) const HASH_WIDTH: usize = std::mem::size_of::<u64>();
pub(crate) const VALIDITY_WIDTH: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum KeyEncoding {
    Fixed(usize),
    VarLen,
}

#[derive(Clone, Debug)]
pub(crate) struct KeyField {
    pub(crate) data_type: DataType,
    pub(crate) encoding: KeyEncoding,
    /// Offset of the validity byte, relative to the tuple start.
    pub(crate) offset: usize,
    /// Validity byte plus value bytes.
    pub(crate) width: usize,
}

impl KeyField {
    pub(crate) fn value_offset(&self) -> usize {
        self.offset + VALIDITY_WIDTH
    }
}

pub(crate) fn fixed_width_size(data_type: &DataType) -> Option<usize> {
    match data_type {
        DataType::Boolean | DataType::Int8 | DataType::UInt8 => Some(1),
        DataType::Int16 | DataType::UInt16 => Some(2),
        DataType::Int32 | DataType::UInt32 | DataType::Float32 | DataType::Date32 => Some(4),
        DataType::Int64 | DataType::UInt64 | DataType::Float64 => Some(8),
        _ => None,
    }
}

pub(crate) fn key_encoding(data_type: &DataType) -> AggResult<KeyEncoding> {
    if let Some(width) = fixed_width_size(data_type) {
        return Ok(KeyEncoding::Fixed(width));
    }
    match data_type {
        DataType::Utf8 | DataType::Binary => Ok(KeyEncoding::VarLen),
        other => Err(AggError::unsupported(format!(
            "group key type {:?} is not supported",
            other
        ))),
    }
}

/// Fixed per-table tuple geometry, computed once from group types and aggregates.
#[derive(Clone, Debug)]
pub(crate) struct TupleLayout {
    pub(crate) fields: Vec<KeyField>,
    pub(crate) group_width: usize,
    pub(crate) state_offsets: Vec<usize>,
    pub(crate) state_widths: Vec<usize>,
    pub(crate) payload_width: usize,
    pub(crate) tuple_size: usize,
}

impl TupleLayout {
    pub(crate) fn try_new(
        group_types: &[DataType],
        aggregates: &[AggregateObject],
    ) -> AggResult<Self> {
        let mut fields = Vec::with_capacity(group_types.len());
        let mut offset = HASH_WIDTH;
        for data_type in group_types {
            let encoding = key_encoding(data_type)?;
            let value_width = match encoding {
                KeyEncoding::Fixed(width) => width,
                KeyEncoding::VarLen => STRING_REF_WIDTH,
            };
            let width = VALIDITY_WIDTH + value_width;
            fields.push(KeyField {
                data_type: data_type.clone(),
                encoding,
                offset,
                width,
            });
            offset += width;
        }
        let group_width = offset - HASH_WIDTH;

        let mut state_offsets = Vec::with_capacity(aggregates.len());
        let mut state_widths = Vec::with_capacity(aggregates.len());
        for aggregate in aggregates {
            state_offsets.push(offset);
            state_widths.push(aggregate.payload_size);
            offset += aggregate.payload_size;
        }
        let payload_width = offset - HASH_WIDTH - group_width;

        Ok(Self {
            fields,
            group_width,
            state_offsets,
            state_widths,
            payload_width,
            tuple_size: offset,
        })
    }

    pub(crate) fn group_range(&self) -> std::ops::Range<usize> {
        HASH_WIDTH..HASH_WIDTH + self.group_width
    }
}

pub(crate) fn read_hash(tuple: &[u8]) -> u64 {
    let mut bytes = [0u8; HASH_WIDTH];
    bytes.copy_from_slice(&tuple[..HASH_WIDTH]);
    u64::from_le_bytes(bytes)
}

pub(crate) fn write_hash(tuple: &mut [u8], hash: u64) {
    tuple[..HASH_WIDTH].copy_from_slice(&hash.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::expr::agg::AggregateObject;
    use crate::exec::node::aggregate::AggFunction;

    #[test]
    fn layout_places_hash_keys_then_states() {
        let aggregates = AggregateObject::create_aggregate_objects(&[
            AggFunction::new("sum", vec![DataType::Int64]),
            AggFunction::new("count", vec![]),
        ])
        .unwrap();
        let layout =
            TupleLayout::try_new(&[DataType::Int32, DataType::Utf8], &aggregates).unwrap();

        assert_eq!(layout.fields[0].offset, HASH_WIDTH);
        assert_eq!(layout.fields[0].width, 1 + 4);
        assert_eq!(layout.fields[1].offset, HASH_WIDTH + 5);
        assert_eq!(layout.fields[1].width, 1 + STRING_REF_WIDTH);
        assert_eq!(layout.group_width, 5 + 1 + STRING_REF_WIDTH);
        let payload_start = HASH_WIDTH + layout.group_width;
        assert_eq!(layout.state_offsets[0], payload_start);
        assert_eq!(
            layout.state_offsets[1],
            payload_start + aggregates[0].payload_size
        );
        assert_eq!(
            layout.tuple_size,
            HASH_WIDTH + layout.group_width + layout.payload_width
        );
        assert_eq!(layout.fields[1].encoding, KeyEncoding::VarLen);
    }

    #[test]
    fn unsupported_key_type_is_rejected() {
        let err = TupleLayout::try_new(&[DataType::Decimal128(10, 2)], &[]).unwrap_err();
        assert_eq!(err.kind(), crate::common::error::AggErrorKind::Unsupported);
    }
}
