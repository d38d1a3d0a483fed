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

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, RwLock,
    },
};

use super::ResourceRegistry;
use crate::{
    log::LogStream,
    routing::{PartitionId, RoutingView, PARTITION_ID_BITS},
    snap::SnapshotChunkSource,
};

/// Generates the keys of a partition. The partition id takes the upper 13 bits of a key.
pub struct KeyGenerator {
    partition_id: PartitionId,
    next: AtomicI64,
}

impl KeyGenerator {
    pub const KEY_BITS: u32 = i64::BITS - PARTITION_ID_BITS;

    pub fn new(partition_id: PartitionId) -> Self {
        KeyGenerator::with_last_key(partition_id, 0)
    }

    /// Continue after `last_key`, e.g. the last key found in a restored snapshot.
    pub fn with_last_key(partition_id: PartitionId, last_key: i64) -> Self {
        KeyGenerator {
            partition_id,
            next: AtomicI64::new((last_key & Self::key_mask()) + 1),
        }
    }

    pub fn next_key(&self) -> i64 {
        let value = self.next.fetch_add(1, Ordering::Relaxed);
        ((self.partition_id as i64) << Self::KEY_BITS) + value
    }

    pub fn partition_id_of(key: i64) -> PartitionId {
        ((key as u64) >> Self::KEY_BITS) as PartitionId
    }

    fn key_mask() -> i64 {
        (1i64 << Self::KEY_BITS) - 1
    }
}

/// The state a request handler needs to execute against one partition.
pub struct ResourceContext {
    pub partition_id: PartitionId,
    pub log_stream: LogStream,
    pub routing: RoutingView,
    pub key_generator: KeyGenerator,
    pub snapshots: Option<Arc<dyn SnapshotChunkSource>>,
}

impl ResourceContext {
    pub fn new(partition_id: PartitionId, log_stream: LogStream, routing: RoutingView) -> Self {
        ResourceContext {
            partition_id,
            log_stream,
            routing,
            key_generator: KeyGenerator::new(partition_id),
            snapshots: None,
        }
    }

    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotChunkSource>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }
}

/// The contexts of the partitions served by this node.
pub struct PartitionRegistry<C = ResourceContext> {
    contexts: Arc<RwLock<HashMap<u32, Arc<C>>>>,
}

impl<C: Send + Sync> PartitionRegistry<C> {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        PartitionRegistry {
            contexts: Arc::default(),
        }
    }

    pub fn find(&self, resource_id: u32) -> Option<Arc<C>> {
        self.contexts.read().unwrap().get(&resource_id).cloned()
    }

    pub fn update(&self, resource_id: u32, context: Arc<C>) {
        self.contexts.write().unwrap().insert(resource_id, context);
    }

    pub fn remove(&self, resource_id: u32) {
        self.contexts.write().unwrap().remove(&resource_id);
    }
}

impl<C: Send + Sync> Clone for PartitionRegistry<C> {
    fn clone(&self) -> Self {
        PartitionRegistry {
            contexts: self.contexts.clone(),
        }
    }
}

impl<C: Send + Sync> ResourceRegistry<C> for PartitionRegistry<C> {
    fn context_for_resource(&self, resource_id: u32) -> Option<Arc<C>> {
        self.find(resource_id)
    }
}
