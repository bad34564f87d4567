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
//! Fixed-size aggregate states and their little-endian byte codecs.
//!
//! States live inside hash-table tuples, so they are read and written through
//! byte slices rather than typed pointers. An all-zero block is always the
//! empty state.

pub(super) const COUNT_STATE_SIZE: usize = 8;
pub(super) const OPTIONAL_STATE_SIZE: usize = 9;
pub(super) const AVG_STATE_SIZE: usize = 16;
pub(super) const SLOT_STATE_SIZE: usize = 8;
pub(super) const HLL_REGISTER_COUNT: usize = 256;

#[inline]
pub(super) fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

#[inline]
pub(super) fn read_i64(bytes: &[u8]) -> i64 {
    read_u64(bytes) as i64
}

#[inline]
pub(super) fn write_i64(bytes: &mut [u8], value: i64) {
    bytes[..8].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(super) fn write_u64(bytes: &mut [u8], value: u64) {
    bytes[..8].copy_from_slice(&value.to_le_bytes());
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(super) struct OptionalI64 {
    pub(super) has_value: bool,
    pub(super) value: i64,
}

impl OptionalI64 {
    pub(super) fn load(bytes: &[u8]) -> Self {
        Self {
            has_value: bytes[0] != 0,
            value: read_i64(&bytes[1..]),
        }
    }

    pub(super) fn store(&self, bytes: &mut [u8]) {
        bytes[0] = self.has_value as u8;
        write_i64(&mut bytes[1..], self.value);
    }

    pub(super) fn get(&self) -> Option<i64> {
        self.has_value.then_some(self.value)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(super) struct OptionalF64 {
    pub(super) has_value: bool,
    pub(super) value: f64,
}

impl OptionalF64 {
    pub(super) fn load(bytes: &[u8]) -> Self {
        Self {
            has_value: bytes[0] != 0,
            value: f64::from_bits(read_u64(&bytes[1..])),
        }
    }

    pub(super) fn store(&self, bytes: &mut [u8]) {
        bytes[0] = self.has_value as u8;
        write_u64(&mut bytes[1..], self.value.to_bits());
    }

    pub(super) fn get(&self) -> Option<f64> {
        self.has_value.then_some(self.value)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(super) struct AvgState {
    pub(super) sum: f64,
    pub(super) count: i64,
}

impl AvgState {
    pub(super) fn load(bytes: &[u8]) -> Self {
        Self {
            sum: f64::from_bits(read_u64(bytes)),
            count: read_i64(&bytes[8..]),
        }
    }

    pub(super) fn store(&self, bytes: &mut [u8]) {
        write_u64(bytes, self.sum.to_bits());
        write_i64(&mut bytes[8..], self.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_bytes_are_empty_states() {
        let zeros = [0u8; AVG_STATE_SIZE];
        assert_eq!(OptionalI64::load(&zeros).get(), None);
        assert_eq!(OptionalF64::load(&zeros).get(), None);
        assert_eq!(AvgState::load(&zeros), AvgState::default());
    }

    #[test]
    fn optional_state_keeps_negative_values() {
        let mut bytes = [0u8; OPTIONAL_STATE_SIZE];
        OptionalI64 {
            has_value: true,
            value: -17,
        }
        .store(&mut bytes);
        assert_eq!(OptionalI64::load(&bytes).get(), Some(-17));
    }
}
