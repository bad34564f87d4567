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
use crate::hashagg_config::config as hashagg_app_config;

pub(crate) fn hash_table_initial_capacity() -> usize {
    hashagg_app_config()
        .ok()
        .map(|c| c.hash_table.initial_capacity)
        .unwrap_or(4096)
}

pub(crate) fn hash_table_block_size_bytes() -> usize {
    hashagg_app_config()
        .ok()
        .map(|c| c.hash_table.block_size_bytes)
        .unwrap_or(262_144)
}

pub(crate) fn string_heap_block_size_bytes() -> usize {
    hashagg_app_config()
        .ok()
        .map(|c| c.hash_table.string_heap_block_size_bytes)
        .unwrap_or(65_536)
}

pub(crate) fn hash_table_max_load_factor() -> f64 {
    hashagg_app_config()
        .ok()
        .map(|c| c.hash_table.max_load_factor)
        .unwrap_or(0.5)
}

pub(crate) fn hash_table_scan_batch_size() -> usize {
    hashagg_app_config()
        .ok()
        .map(|c| c.hash_table.scan_batch_size)
        .unwrap_or(4096)
}

pub(crate) fn memory_limit_bytes() -> Option<i64> {
    hashagg_app_config()
        .ok()
        .and_then(|c| c.memory.limit_bytes)
}
