// Copyright 2022 The Engula Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::{PartitionId, START_PARTITION_ID};

/// Maps a correlation key to a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationStrategy {
    HashMod { partition_count: u32 },
}

impl CorrelationStrategy {
    pub fn hash_mod(partition_count: u32) -> Self {
        CorrelationStrategy::HashMod { partition_count }
    }

    pub fn partition_count(&self) -> u32 {
        match self {
            CorrelationStrategy::HashMod { partition_count } => *partition_count,
        }
    }

    /// REQUIRES: `partition_count > 0`.
    pub fn partition_for_key(&self, key: &[u8]) -> PartitionId {
        match self {
            CorrelationStrategy::HashMod { partition_count } => {
                let hash = correlation_hash(key) as i64;
                START_PARTITION_ID + (hash % *partition_count as i64).unsigned_abs() as u32
            }
        }
    }
}

/// `h = 31 * h + b` over the signed bytes of the key, wrapping at 32 bits.
pub fn correlation_hash(key: &[u8]) -> i32 {
    key.iter()
        .fold(0i32, |h, b| h.wrapping_mul(31).wrapping_add(*b as i8 as i32))
}
