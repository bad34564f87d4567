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
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggErrorKind {
    /// The buffer allocator could not hand out a block.
    AllocationFailure,
    /// Caller misuse: wrong signature, bad capacity, missing key on lookup, lifecycle order.
    PreconditionViolation,
    /// An aggregate state operation rejected its input (e.g. integer overflow).
    AggregateOperationFailure,
    /// Aggregate name or column type that the table has no kernel for.
    Unsupported,
}

impl AggErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggErrorKind::AllocationFailure => "allocation failure",
            AggErrorKind::PreconditionViolation => "precondition violation",
            AggErrorKind::AggregateOperationFailure => "aggregate operation failure",
            AggErrorKind::Unsupported => "unsupported",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggError {
    pub kind: AggErrorKind,
    pub message: String,
}

pub type AggResult<T> = Result<T, AggError>;

impl AggError {
    pub fn new(kind: AggErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn allocation(message: impl Into<String>) -> Self {
        Self::new(AggErrorKind::AllocationFailure, message)
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(AggErrorKind::PreconditionViolation, message)
    }

    pub fn aggregate(message: impl Into<String>) -> Self {
        Self::new(AggErrorKind::AggregateOperationFailure, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(AggErrorKind::Unsupported, message)
    }

    pub fn kind(&self) -> AggErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for AggError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for AggError {}

impl From<arrow::error::ArrowError> for AggError {
    fn from(err: arrow::error::ArrowError) -> Self {
        AggError::precondition(format!("arrow: {err}"))
    }
}
