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
pub mod common;
pub mod exec;
pub mod runtime;

// NovaRocks-BE-like folder layout, with `novarocks_*` / `hashagg_*` convenience aliases.
pub use common::app_config as hashagg_config;
pub use common::logging as novarocks_logging;

pub use common::error::{AggError, AggErrorKind, AggResult};
pub use exec::chunk::Chunk;
pub use exec::expr::agg::{AggStateStore, AggregateObject};
pub use exec::hash_table::{GroupedAggHashTable, HashTableOptions, ScanBatch, TupleAddr};
pub use exec::node::aggregate::AggFunction;
pub use exec::operators::{AggregateInput, HashAggregator, parallel_aggregate};
pub use runtime::buffer_manager::{BufferAllocator, BufferHandle, BufferManager};
pub use runtime::mem_tracker::MemTracker;
