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

use crate::common::error::{AggError, AggResult};
use crate::exec::node::aggregate::AggFunction;

use super::functions;
use super::functions::AggKind;

pub(super) const DEFAULT_GROUP_CONCAT_SEPARATOR: &str = ",";

pub(super) fn build_spec(func: &AggFunction) -> AggResult<AggSpec> {
    let mut spec = functions::build_spec(func)?;
    spec.input_types = func.inputs.clone();
    if func.distinct && spec.input_types.is_empty() {
        return Err(AggError::precondition(format!(
            "{}(DISTINCT) needs at least one argument",
            func.name
        )));
    }
    Ok(spec)
}

pub(super) fn expect_arity(func: &AggFunction, arity: usize) -> AggResult<&DataType> {
    if func.inputs.len() != arity || arity == 0 {
        return Err(AggError::unsupported(format!(
            "{} expects {} argument(s), got {}",
            func.name,
            arity,
            func.inputs.len()
        )));
    }
    Ok(&func.inputs[0])
}

#[derive(Clone, Debug)]
pub(crate) struct AggSpec {
    pub(crate) kind: AggKind,
    pub(crate) output_type: DataType,
    /// Payload column types consumed by this aggregate, in order.
    pub(crate) input_types: Vec<DataType>,
    pub(crate) separator: String,
}

impl AggSpec {
    pub(super) fn new(kind: AggKind, output_type: DataType) -> Self {
        Self {
            kind,
            output_type,
            input_types: Vec::new(),
            separator: String::new(),
        }
    }
}
