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

//! The partition routing state.
//!
//! The routing table tracks the active partitions and the strategy to correlate keys to
//! them. Changing the partitions takes two phases: a desired table is staged first, then
//! promoted to the current one in a single step.

mod info;
mod store;
mod strategy;

use std::collections::BTreeSet;

pub use self::{
    info::{RoutingInfo, RoutingView},
    store::{
        routing_table_row, HashModRow, MemRoutingStore, RoutingKey, RoutingStore,
        RoutingTableRow, RoutingWrite, RoutingWriteBatch,
    },
    strategy::{correlation_hash, CorrelationStrategy},
};
use crate::{Error, Result};

pub type PartitionId = u32;

pub const START_PARTITION_ID: PartitionId = 1;

/// The bits a partition id takes in the upper part of a record key.
pub const PARTITION_ID_BITS: u32 = 13;

pub const MAX_PARTITION_ID: PartitionId = (1 << PARTITION_ID_BITS) - 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    pub partitions: BTreeSet<PartitionId>,
    pub correlation: CorrelationStrategy,
}

impl RoutingTable {
    pub fn new(
        partitions: BTreeSet<PartitionId>,
        correlation: CorrelationStrategy,
    ) -> Result<Self> {
        if partitions.is_empty() {
            return Err(Error::InvalidArgument("empty partition set".to_owned()));
        }
        if let Some(id) = partitions
            .iter()
            .find(|id| **id < START_PARTITION_ID || **id > MAX_PARTITION_ID)
        {
            return Err(Error::InvalidArgument(format!("partition id {id}")));
        }
        if correlation.partition_count() == 0 {
            return Err(Error::InvalidArgument(
                "correlate keys to zero partitions".to_owned(),
            ));
        }
        Ok(RoutingTable {
            partitions,
            correlation,
        })
    }

    /// Partitions `1..=partition_count`, correlated by [`CorrelationStrategy::HashMod`].
    pub fn with_partition_count(partition_count: u32) -> Result<Self> {
        if partition_count > MAX_PARTITION_ID {
            return Err(Error::InvalidArgument(format!(
                "{partition_count} partitions, at most {MAX_PARTITION_ID}"
            )));
        }
        let partitions = (START_PARTITION_ID..START_PARTITION_ID.saturating_add(partition_count))
            .collect();
        RoutingTable::new(partitions, CorrelationStrategy::hash_mod(partition_count))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingState {
    Uninitialized,
    Current(RoutingTable),
    CurrentAndDesired {
        current: RoutingTable,
        desired: RoutingTable,
    },
}

impl RoutingState {
    pub fn current(&self) -> Option<&RoutingTable> {
        match self {
            RoutingState::Uninitialized => None,
            RoutingState::Current(current) | RoutingState::CurrentAndDesired { current, .. } => {
                Some(current)
            }
        }
    }

    pub fn desired(&self) -> Option<&RoutingTable> {
        match self {
            RoutingState::CurrentAndDesired { desired, .. } => Some(desired),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_count_is_bounded_by_key_space() {
        let table = RoutingTable::with_partition_count(MAX_PARTITION_ID).unwrap();
        assert_eq!(table.partitions.len(), MAX_PARTITION_ID as usize);
        assert_eq!(table.partitions.iter().next_back(), Some(&MAX_PARTITION_ID));

        for count in [MAX_PARTITION_ID + 1, u32::MAX] {
            assert!(matches!(
                RoutingTable::with_partition_count(count),
                Err(Error::InvalidArgument(_))
            ));
        }
        let partitions = [1, MAX_PARTITION_ID + 1].into_iter().collect();
        assert!(matches!(
            RoutingTable::new(partitions, CorrelationStrategy::hash_mod(2)),
            Err(Error::InvalidArgument(_))
        ));
    }
}
