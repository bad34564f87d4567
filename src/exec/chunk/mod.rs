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
use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch};
use arrow::buffer::Buffer;
use arrow::datatypes::DataType;

use crate::common::error::{AggError, AggResult};

/// A vector of columns sharing one row count, with an optional selection vector.
///
/// When a selection is present only the selected physical rows take part in
/// processing, in selection order. Zero-column chunks still carry a row count
/// so that `COUNT(*)` payloads can be expressed.
#[derive(Debug, Clone)]
pub struct Chunk {
    columns: Vec<ArrayRef>,
    num_rows: usize,
    selection: Option<Arc<[u32]>>,
}

impl Chunk {
    pub fn try_new(columns: Vec<ArrayRef>) -> AggResult<Self> {
        let num_rows = columns.first().map(|c| c.len()).unwrap_or(0);
        Self::try_new_with_rows(columns, num_rows)
    }

    pub fn try_new_with_rows(columns: Vec<ArrayRef>, num_rows: usize) -> AggResult<Self> {
        for (idx, column) in columns.iter().enumerate() {
            if column.len() != num_rows {
                return Err(AggError::precondition(format!(
                    "chunk column row count mismatch: idx={} expected_rows={} actual_rows={}",
                    idx,
                    num_rows,
                    column.len()
                )));
            }
        }
        Ok(Self {
            columns,
            num_rows,
            selection: None,
        })
    }

    /// Chunk with no columns and `num_rows` rows.
    pub fn empty_with_rows(num_rows: usize) -> Self {
        Self {
            columns: Vec::new(),
            num_rows,
            selection: None,
        }
    }

    pub fn from_record_batch(batch: &RecordBatch) -> Self {
        Self {
            columns: batch.columns().to_vec(),
            num_rows: batch.num_rows(),
            selection: None,
        }
    }

    /// Restrict processing to the given physical rows.
    pub fn with_selection(mut self, selection: Vec<u32>) -> AggResult<Self> {
        if let Some(bad) = selection.iter().find(|&&r| r as usize >= self.num_rows) {
            return Err(AggError::precondition(format!(
                "selection row {} out of bounds for chunk of {} rows",
                bad, self.num_rows
            )));
        }
        self.selection = Some(selection.into());
        Ok(self)
    }

    pub fn selection(&self) -> Option<&[u32]> {
        self.selection.as_deref()
    }

    /// Number of logical (selected) rows.
    pub fn len(&self) -> usize {
        match self.selection.as_ref() {
            Some(sel) => sel.len(),
            None => self.num_rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_physical_rows(&self) -> usize {
        self.num_rows
    }

    /// Physical row index of logical row `row`.
    #[inline]
    pub fn physical_row(&self, row: usize) -> usize {
        match self.selection.as_ref() {
            Some(sel) => sel[row] as usize,
            None => row,
        }
    }

    pub fn physical_rows(&self) -> Vec<usize> {
        (0..self.len()).map(|row| self.physical_row(row)).collect()
    }

    pub fn columns(&self) -> &[ArrayRef] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> AggResult<&ArrayRef> {
        self.columns.get(idx).ok_or_else(|| {
            AggError::precondition(format!(
                "chunk column {} out of range (num_columns={})",
                idx,
                self.columns.len()
            ))
        })
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn data_types(&self) -> Vec<DataType> {
        self.columns.iter().map(|c| c.data_type().clone()).collect()
    }

    /// A chunk over the same rows and selection with `columns` replaced.
    pub fn project_with(&self, columns: Vec<ArrayRef>) -> AggResult<Self> {
        let mut out = Self::try_new_with_rows(columns, self.num_rows)?;
        out.selection = self.selection.clone();
        Ok(out)
    }

    pub fn logical_bytes(&self) -> usize {
        let mut seen = HashSet::new();
        let mut total = 0usize;
        for column in &self.columns {
            total = total.saturating_add(array_data_bytes(&column.to_data(), &mut seen));
        }
        total
    }
}

fn array_data_bytes(data: &arrow::array::ArrayData, seen: &mut HashSet<usize>) -> usize {
    let mut total = 0usize;
    for buffer in data.buffers() {
        total = total.saturating_add(buffer_bytes(buffer, seen));
    }
    if let Some(nulls) = data.nulls() {
        total = total.saturating_add(buffer_bytes(nulls.buffer(), seen));
    }
    for child in data.child_data() {
        total = total.saturating_add(array_data_bytes(child, seen));
    }
    total
}

fn buffer_bytes(buffer: &Buffer, seen: &mut HashSet<usize>) -> usize {
    let key = buffer.as_ptr() as usize;
    if seen.insert(key) {
        buffer.len()
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};

    #[test]
    fn selection_maps_logical_to_physical_rows() {
        let col = Arc::new(Int64Array::from(vec![10, 20, 30, 40])) as ArrayRef;
        let chunk = Chunk::try_new(vec![col]).unwrap().with_selection(vec![3, 1]).unwrap();
        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk.num_physical_rows(), 4);
        assert_eq!(chunk.physical_rows(), vec![3, 1]);
    }

    #[test]
    fn mismatched_columns_are_rejected() {
        let a = Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef;
        let b = Arc::new(StringArray::from(vec!["x"])) as ArrayRef;
        assert!(Chunk::try_new(vec![a, b]).is_err());
    }

    #[test]
    fn out_of_bounds_selection_is_rejected() {
        let chunk = Chunk::empty_with_rows(2);
        assert!(chunk.with_selection(vec![2]).is_err());
    }
}
