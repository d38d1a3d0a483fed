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

use std::{collections::BTreeSet, sync::Arc};

use arc_swap::ArcSwap;
use tracing::info;

use super::{
    store::{load_table, RoutingKey, RoutingStore, RoutingWriteBatch},
    CorrelationStrategy, PartitionId, RoutingState, RoutingTable, MAX_PARTITION_ID,
};
use crate::{Error, Result, RoutingConfig};

/// Lock-free reads of the routing state. A reader observes either the state before or after
/// a mutation, never a partial one.
#[derive(Clone)]
pub struct RoutingView {
    state: Arc<ArcSwap<RoutingState>>,
    static_correlation: CorrelationStrategy,
}

impl RoutingView {
    pub fn state(&self) -> Arc<RoutingState> {
        self.state.load_full()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.load().current().is_some()
    }

    pub fn current_partitions(&self) -> Result<BTreeSet<PartitionId>> {
        self.state
            .load()
            .current()
            .map(|t| t.partitions.clone())
            .ok_or(Error::RoutingNotInitialized)
    }

    /// Returns `None` if no desired state is staged.
    pub fn desired_partitions(&self) -> Result<Option<BTreeSet<PartitionId>>> {
        let state = self.state.load();
        if state.current().is_none() {
            return Err(Error::RoutingNotInitialized);
        }
        Ok(state.desired().map(|t| t.partitions.clone()))
    }

    pub fn current_correlation(&self) -> Result<CorrelationStrategy> {
        self.state
            .load()
            .current()
            .map(|t| t.correlation)
            .ok_or(Error::RoutingNotInitialized)
    }

    /// Correlate with the current strategy, or the static one before the routing info is
    /// initialized.
    pub fn partition_for_correlation_key(&self, key: &[u8]) -> PartitionId {
        let correlation = self
            .state
            .load()
            .current()
            .map(|t| t.correlation)
            .unwrap_or(self.static_correlation);
        correlation.partition_for_key(key)
    }
}

/// The single writer of the routing state. Every mutation is persisted before it becomes
/// visible to the readers.
pub struct RoutingInfo<S: RoutingStore> {
    store: S,
    view: RoutingView,
}

impl<S: RoutingStore> RoutingInfo<S> {
    /// Load the routing state persisted in `store`.
    pub fn new(store: S, cfg: &RoutingConfig) -> Result<Self> {
        if cfg.static_partition_count == 0 || cfg.static_partition_count > MAX_PARTITION_ID {
            return Err(Error::InvalidArgument(format!(
                "static partition count {} is out of 1..={MAX_PARTITION_ID}",
                cfg.static_partition_count
            )));
        }
        let current = load_table(&store, RoutingKey::Current)?;
        let desired = load_table(&store, RoutingKey::Desired)?;
        let state = match (current, desired) {
            (None, None) => RoutingState::Uninitialized,
            (Some(current), None) => RoutingState::Current(current),
            (Some(current), Some(desired)) => RoutingState::CurrentAndDesired { current, desired },
            (None, Some(_)) => {
                return Err(Error::InvalidData(
                    "routing store has a desired row without current one".to_owned(),
                ))
            }
        };
        Ok(RoutingInfo {
            store,
            view: RoutingView {
                state: Arc::new(ArcSwap::from_pointee(state)),
                static_correlation: CorrelationStrategy::hash_mod(cfg.static_partition_count),
            },
        })
    }

    pub fn view(&self) -> RoutingView {
        self.view.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.view.is_initialized()
    }

    pub fn current_partitions(&self) -> Result<BTreeSet<PartitionId>> {
        self.view.current_partitions()
    }

    pub fn desired_partitions(&self) -> Result<Option<BTreeSet<PartitionId>>> {
        self.view.desired_partitions()
    }

    pub fn current_correlation(&self) -> Result<CorrelationStrategy> {
        self.view.current_correlation()
    }

    pub fn partition_for_correlation_key(&self, key: &[u8]) -> PartitionId {
        self.view.partition_for_correlation_key(key)
    }

    /// Create the current table with partitions `1..=partition_count`. It is only allowed
    /// once.
    pub fn initialize_routing_info(&mut self, partition_count: u32) -> Result<()> {
        if self.is_initialized() {
            return Err(Error::RoutingAlreadyInitialized);
        }
        let current = RoutingTable::with_partition_count(partition_count)?;
        let mut batch = RoutingWriteBatch::default();
        batch.put(RoutingKey::Current, &current);
        self.store.write(batch)?;
        info!("routing info is initialized with {partition_count} partitions");
        self.view.state.store(Arc::new(RoutingState::Current(current)));
        Ok(())
    }

    /// Stage `partitions` under the current correlation, it replaces any staged state.
    pub fn set_desired_partitions(&mut self, partitions: BTreeSet<PartitionId>) -> Result<()> {
        let current = self.current_table()?;
        let desired = RoutingTable::new(partitions, current.correlation)?;
        self.stage(current, desired)
    }

    /// Change the correlation of the staged desired state.
    pub fn set_desired_correlation(&mut self, correlation: CorrelationStrategy) -> Result<()> {
        let state = self.view.state.load_full();
        let (current, desired) = match state.as_ref() {
            RoutingState::CurrentAndDesired { current, desired } => (current, desired),
            RoutingState::Current(_) => return Err(Error::NoDesiredRoutingState),
            RoutingState::Uninitialized => return Err(Error::RoutingNotInitialized),
        };
        let desired = RoutingTable::new(desired.partitions.clone(), correlation)?;
        self.stage(current.clone(), desired)
    }

    /// Promote the desired state to the current one. Either both rows are written and the
    /// readers see the new table, or nothing changes.
    pub fn arrive_at_desired_state(&mut self) -> Result<()> {
        let state = self.view.state.load_full();
        let desired = match state.as_ref() {
            RoutingState::CurrentAndDesired { desired, .. } => desired.clone(),
            RoutingState::Current(_) => return Err(Error::NoDesiredRoutingState),
            RoutingState::Uninitialized => return Err(Error::RoutingNotInitialized),
        };

        let mut batch = RoutingWriteBatch::default();
        batch.put(RoutingKey::Current, &desired);
        batch.delete(RoutingKey::Desired);
        self.store.write(batch)?;
        info!(
            "routing arrives at desired state, partitions {:?}",
            desired.partitions
        );
        self.view.state.store(Arc::new(RoutingState::Current(desired)));
        Ok(())
    }

    fn current_table(&self) -> Result<RoutingTable> {
        self.view
            .state
            .load()
            .current()
            .cloned()
            .ok_or(Error::RoutingNotInitialized)
    }

    fn stage(&mut self, current: RoutingTable, desired: RoutingTable) -> Result<()> {
        let mut batch = RoutingWriteBatch::default();
        batch.put(RoutingKey::Desired, &desired);
        self.store.write(batch)?;
        self.view
            .state
            .store(Arc::new(RoutingState::CurrentAndDesired { current, desired }));
        Ok(())
    }
}
