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
//! Hash-aggregation sink over a `GroupedAggHashTable`.
//!
//! Responsibilities:
//! - Feeds `(groups, payload)` chunks into one table and drains finalized results in batches.
//! - Builds per-partition tables on scoped worker threads and reduces them with `combine`.
//!
//! Key exported interfaces:
//! - Types: `HashAggregator`, `AggregateInput`.
//! - Functions: `parallel_aggregate`.

use std::sync::Arc;
use std::thread;

use arrow::array::RecordBatch;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use crate::common::error::{AggError, AggResult};
use crate::exec::chunk::Chunk;
use crate::exec::expr::agg::AggregateObject;
use crate::exec::hash_table::{GroupedAggHashTable, HashTableOptions, ScanBatch};
use crate::exec::node::aggregate::AggFunction;
use crate::novarocks_logging::{debug, info};
use crate::runtime::buffer_manager::BufferAllocator;

/// One input batch: group key columns plus the concatenated aggregate inputs.
#[derive(Clone, Debug)]
pub struct AggregateInput {
    pub groups: Chunk,
    pub payload: Chunk,
}

impl AggregateInput {
    pub fn new(groups: Chunk, payload: Chunk) -> Self {
        Self { groups, payload }
    }
}

/// Sink that owns one hash table for the lifetime of an aggregation.
#[derive(Debug)]
pub struct HashAggregator {
    name: String,
    table: GroupedAggHashTable,
    output_schema: SchemaRef,
    cursor: usize,
    input_rows: usize,
    input_bytes: usize,
    output_rows: usize,
}

impl HashAggregator {
    pub fn try_new(
        node_id: i32,
        allocator: Arc<dyn BufferAllocator>,
        group_types: Vec<DataType>,
        functions: &[AggFunction],
        options: HashTableOptions,
    ) -> AggResult<Self> {
        let aggregates = AggregateObject::create_aggregate_objects(functions)?;
        let payload_types: Vec<DataType> = functions
            .iter()
            .flat_map(|f| f.inputs.iter().cloned())
            .collect();
        let table =
            GroupedAggHashTable::try_new(allocator, group_types, payload_types, aggregates, options)?;
        Ok(Self::from_table(node_id, table))
    }

    /// Wrap an already populated table, e.g. the result of `parallel_aggregate`.
    pub fn from_table(node_id: i32, table: GroupedAggHashTable) -> Self {
        let name = if node_id >= 0 {
            format!("AGGREGATE (id={node_id})")
        } else {
            "AGGREGATE".to_string()
        };
        let output_schema = build_output_schema(&table);
        Self {
            name,
            table,
            output_schema,
            cursor: 0,
            input_rows: 0,
            input_bytes: 0,
            output_rows: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &GroupedAggHashTable {
        &self.table
    }

    pub fn into_table(self) -> GroupedAggHashTable {
        self.table
    }

    /// Group columns first, then one column per aggregate.
    pub fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.output_schema)
    }

    pub fn push_chunk(&mut self, groups: &Chunk, payload: &Chunk) -> AggResult<()> {
        self.table.add_chunk(groups, payload)?;
        self.input_rows += groups.len();
        self.input_bytes += groups.logical_bytes() + payload.logical_bytes();
        Ok(())
    }

    pub fn push(&mut self, input: &AggregateInput) -> AggResult<()> {
        self.push_chunk(&input.groups, &input.payload)
    }

    pub fn finish(&mut self) -> AggResult<()> {
        self.table.finalize()?;
        info!(
            "{} finished: input_rows={} input_bytes={} groups={}",
            self.name,
            self.input_rows,
            self.input_bytes,
            self.table.len()
        );
        Ok(())
    }

    /// Next slice of output, `None` once drained.
    pub fn next_batch(&mut self, capacity: usize) -> AggResult<Option<ScanBatch>> {
        let batch = self.table.scan(&mut self.cursor, capacity)?;
        if batch.is_empty() {
            return Ok(None);
        }
        self.output_rows += batch.len();
        Ok(Some(batch))
    }

    pub fn next_record_batch(&mut self, capacity: usize) -> AggResult<Option<RecordBatch>> {
        let Some(batch) = self.next_batch(capacity)? else {
            return Ok(None);
        };
        let mut columns = batch.groups.columns().to_vec();
        columns.extend_from_slice(batch.results.columns());
        Ok(Some(RecordBatch::try_new(self.output_schema(), columns)?))
    }

    pub fn output_rows(&self) -> usize {
        self.output_rows
    }
}

fn build_output_schema(table: &GroupedAggHashTable) -> SchemaRef {
    let mut fields = Vec::with_capacity(table.group_types().len() + table.aggregates().len());
    for (idx, data_type) in table.group_types().iter().enumerate() {
        fields.push(Field::new(format!("group_{idx}"), data_type.clone(), true));
    }
    for (idx, aggregate) in table.aggregates().iter().enumerate() {
        fields.push(Field::new(
            format!("{}_{idx}", aggregate.name),
            aggregate.return_type.clone(),
            true,
        ));
    }
    Arc::new(Schema::new(fields))
}

/// Aggregate each partition into its own table on a scoped thread, then merge
/// the partial tables on the calling thread. The returned table is not finalized.
pub fn parallel_aggregate<F>(
    partitions: Vec<Vec<AggregateInput>>,
    builder: F,
) -> AggResult<GroupedAggHashTable>
where
    F: Fn() -> AggResult<GroupedAggHashTable> + Sync,
{
    let partition_count = partitions.len();
    let partials: Vec<AggResult<GroupedAggHashTable>> = thread::scope(|scope| {
        let builder = &builder;
        let handles: Vec<_> = partitions
            .into_iter()
            .map(|inputs| {
                scope.spawn(move || -> AggResult<GroupedAggHashTable> {
                    let mut table = builder()?;
                    for input in &inputs {
                        table.add_chunk(&input.groups, &input.payload)?;
                    }
                    Ok(table)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(AggError::aggregate("aggregation worker panicked")))
            })
            .collect()
    });

    let mut merged: Option<GroupedAggHashTable> = None;
    for partial in partials {
        let partial = partial?;
        match merged.as_mut() {
            None => merged = Some(partial),
            Some(table) => table.combine(&partial)?,
        }
    }
    let table = match merged {
        Some(table) => table,
        None => builder()?,
    };
    debug!(
        "parallel aggregate merged {} partitions into {} groups",
        partition_count,
        table.len()
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::buffer_manager::BufferManager;
    use arrow::array::{Array, ArrayRef, Int64Array};

    fn int_column(values: Vec<i64>) -> ArrayRef {
        Arc::new(Int64Array::from(values)) as ArrayRef
    }

    #[test]
    fn aggregator_drains_in_batches_with_schema() {
        let mut aggregator = HashAggregator::try_new(
            7,
            BufferManager::with_limit(-1),
            vec![DataType::Int64],
            &[AggFunction::new("sum", vec![DataType::Int64])],
            HashTableOptions::default(),
        )
        .unwrap();
        assert_eq!(aggregator.name(), "AGGREGATE (id=7)");
        let groups = Chunk::try_new(vec![int_column(vec![1, 2, 3, 1])]).unwrap();
        let payload = Chunk::try_new(vec![int_column(vec![10, 20, 30, 40])]).unwrap();
        aggregator.push_chunk(&groups, &payload).unwrap();
        aggregator.finish().unwrap();

        let first = aggregator.next_record_batch(2).unwrap().unwrap();
        assert_eq!(first.num_rows(), 2);
        assert_eq!(first.schema().field(1).name(), "sum_0");
        let sums = first
            .column(1)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(sums.value(0), 50);
        let second = aggregator.next_record_batch(2).unwrap().unwrap();
        assert_eq!(second.num_rows(), 1);

        let keys = Chunk::from_record_batch(&second.project(&[0]).unwrap());
        let fetched = aggregator.table().fetch_aggregates(&keys).unwrap();
        let sums = fetched[0].as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(sums.value(0), 30);
        assert!(aggregator.next_record_batch(2).unwrap().is_none());
        assert_eq!(aggregator.output_rows(), 3);
    }

    #[test]
    fn parallel_aggregate_with_no_partitions_builds_empty_table() {
        let allocator = BufferManager::with_limit(-1);
        let table = parallel_aggregate(Vec::new(), || {
            GroupedAggHashTable::try_new(
                allocator.clone(),
                vec![DataType::Int64],
                vec![],
                AggregateObject::create_aggregate_objects(&[AggFunction::new("count", vec![])])?,
                HashTableOptions::default(),
            )
        })
        .unwrap();
        assert!(table.is_empty());
        assert!(!table.is_finalized());
    }
}
