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
//! Aggregate descriptors and their state machines.
//!
//! Each aggregate kind implements init / update / combine / finalize / destroy
//! over a fixed-size state block owned by the hash table.

mod views;
pub(crate) use views::*;
mod spec;
pub(crate) use spec::AggSpec;
use spec::{DEFAULT_GROUP_CONCAT_SEPARATOR, expect_arity};
mod kernel;
pub use kernel::*;

mod state_types;
use state_types::*;
mod functions;
pub(crate) use functions::AggKind;
