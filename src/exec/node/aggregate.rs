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
use arrow::datatypes::DataType;

/// One aggregate call as handed over by the planner.
#[derive(Clone, Debug, PartialEq)]
pub struct AggFunction {
    /// Lowercased function name (e.g. "sum", "count").
    pub name: String,
    /// Payload column types the aggregate consumes, in order; empty means COUNT(*).
    pub inputs: Vec<DataType>,
    pub distinct: bool,
    /// Separator for `group_concat`; `,` when unset.
    pub separator: Option<String>,
}

impl AggFunction {
    pub fn new(name: impl Into<String>, inputs: Vec<DataType>) -> Self {
        Self {
            name: name.into(),
            inputs,
            distinct: false,
            separator: None,
        }
    }

    pub fn with_distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }
}
