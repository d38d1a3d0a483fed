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

//! Snapshot based recovery of a lagging replica.
//!
//! A remote snapshot is fetched chunk by chunk into the local [`SnapshotStore`], then the
//! log suffix which is not covered by the snapshot is replicated.

mod replicator;
mod store;
mod strategy;
mod transport;

use tokio::sync::watch;

pub use self::{
    replicator::{RestoreSnapshotReplicator, RestoreState, SnapshotRestoreSession},
    store::FileSnapshotStore,
    strategy::{
        LogReplicator, ReplicationRange, RestoreInfo, RestoreOutcome, SnapshotRestoreStrategy,
    },
    transport::LoopbackSnapshotTransport,
};
use crate::Result;

/// The node a snapshot is fetched from.
pub type PeerId = u64;

#[derive(Clone, PartialEq, prost::Message)]
pub struct SnapshotChunk {
    #[prost(int64, tag = "1")]
    pub snapshot_id: i64,
    #[prost(int32, tag = "2")]
    pub total_count: i32,
    #[prost(int32, tag = "3")]
    pub chunk_index: i32,
    /// The crc32 of `content`.
    #[prost(uint32, tag = "4")]
    pub checksum: u32,
    #[prost(int64, tag = "5")]
    pub processed_position: i64,
    #[prost(int64, tag = "6")]
    pub exported_position: i64,
    #[prost(bytes = "vec", tag = "7")]
    pub content: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SnapshotChunkRequest {
    #[prost(int64, tag = "1")]
    pub snapshot_id: i64,
    #[prost(int32, tag = "2")]
    pub chunk_index: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SnapshotChunkResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(message, optional, tag = "2")]
    pub chunk: Option<SnapshotChunk>,
    #[prost(string, tag = "3")]
    pub error: String,
}

/// The meta of a completed snapshot, stored beside its chunks.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SnapshotMeta {
    #[prost(int64, tag = "1")]
    pub snapshot_id: i64,
    #[prost(int32, tag = "2")]
    pub total_count: i32,
    #[prost(int64, tag = "3")]
    pub processed_position: i64,
    #[prost(int64, tag = "4")]
    pub exported_position: i64,
    #[prost(uint32, repeated, tag = "5")]
    pub checksums: Vec<u32>,
}

impl SnapshotChunk {
    pub fn new(
        snapshot_id: i64,
        total_count: i32,
        chunk_index: i32,
        positions: SnapshotPositions,
        content: Vec<u8>,
    ) -> Self {
        SnapshotChunk {
            snapshot_id,
            total_count,
            chunk_index,
            checksum: crc32fast::hash(&content),
            processed_position: positions.processed_position,
            exported_position: positions.exported_position,
            content,
        }
    }

    pub fn positions(&self) -> SnapshotPositions {
        SnapshotPositions {
            processed_position: self.processed_position,
            exported_position: self.exported_position,
        }
    }
}

impl SnapshotChunkResponse {
    pub fn ok(chunk: SnapshotChunk) -> Self {
        SnapshotChunkResponse {
            success: true,
            chunk: Some(chunk),
            error: String::default(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        SnapshotChunkResponse {
            success: false,
            chunk: None,
            error: error.into(),
        }
    }
}

/// The log positions a snapshot covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotPositions {
    /// The position of the last record applied to the snapshot.
    pub processed_position: i64,
    /// The position of the last record acknowledged by all exporters.
    pub exported_position: i64,
}

/// Fetches snapshot chunks from remote nodes.
#[crate::async_trait]
pub trait SnapshotTransport: Send + Sync {
    async fn request_snapshot_chunk(
        &self,
        peer: PeerId,
        request: SnapshotChunkRequest,
    ) -> Result<SnapshotChunkResponse>;
}

/// Receives the chunks of a restoring snapshot.
pub trait SnapshotConsumer: Send + Sync {
    /// Validate and store a chunk, returns false if the chunk is rejected.
    fn consume_snapshot_chunk(&self, chunk: &SnapshotChunk) -> bool;

    /// Turn the received chunks into a valid snapshot.
    fn complete_snapshot(&self, snapshot_id: i64) -> bool;

    /// Discard everything received for the snapshot.
    fn invalidate_snapshot(&self, snapshot_id: i64);
}

pub trait SnapshotStore: SnapshotConsumer {
    /// Returns the positions of a completed snapshot.
    fn snapshot_positions(&self, snapshot_id: i64) -> Option<SnapshotPositions>;
}

/// Serves the chunks of local snapshots to the other nodes.
pub trait SnapshotChunkSource: Send + Sync {
    fn read_chunk(&self, snapshot_id: i64, chunk_index: i32) -> Result<SnapshotChunk>;
}

/// Aborts a running restore.
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (sender, receiver) = watch::channel(false);
    (CancelHandle { sender }, CancelToken { receiver })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send(true).unwrap_or_default();
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancelled. It never resolves if the handle is dropped without
    /// cancelling.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow() {
                return;
            }
            if receiver.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }
}
