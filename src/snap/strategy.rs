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

use std::sync::Arc;

use tracing::info;

use super::{PeerId, RestoreSnapshotReplicator, SnapshotPositions};
use crate::Result;

/// Replicates log records from a remote node.
#[crate::async_trait]
pub trait LogReplicator: Send + Sync {
    /// Replicate the records in `(from_position, to_position]` and returns the position of
    /// the last replicated record.
    async fn replicate(&self, server: PeerId, from_position: i64, to_position: i64)
        -> Result<i64>;
}

#[derive(Debug, Clone)]
pub struct RestoreInfo {
    pub server: PeerId,
    pub snapshot_id: i64,
    pub num_chunks: i32,
    /// The position of the last record in the local log.
    pub latest_local_position: i64,
    /// The position the replica is asked to catch up to.
    pub backup_position: i64,
}

/// The log suffix to replicate once the snapshot is restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationRange {
    pub from_position: i64,
    pub to_position: i64,
}

impl ReplicationRange {
    /// The records the replica already has or the snapshot already covers are skipped, and
    /// the range reaches at least the backup position.
    pub fn compute(
        latest_local_position: i64,
        positions: SnapshotPositions,
        backup_position: i64,
    ) -> Self {
        let from_position = std::cmp::max(
            latest_local_position,
            std::cmp::min(positions.processed_position, positions.exported_position),
        );
        let to_position = std::cmp::max(positions.processed_position, backup_position);
        ReplicationRange {
            from_position,
            to_position,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.from_position >= self.to_position
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub positions: SnapshotPositions,
    pub range: ReplicationRange,
    /// The last replicated position, `None` if nothing needs to be replicated.
    pub replicated_position: Option<i64>,
}

/// Restore a snapshot, then replicate the log suffix it does not cover.
pub struct SnapshotRestoreStrategy {
    snapshot_replicator: RestoreSnapshotReplicator,
    log_replicator: Arc<dyn LogReplicator>,
}

impl SnapshotRestoreStrategy {
    pub fn new(
        snapshot_replicator: RestoreSnapshotReplicator,
        log_replicator: Arc<dyn LogReplicator>,
    ) -> Self {
        SnapshotRestoreStrategy {
            snapshot_replicator,
            log_replicator,
        }
    }

    pub async fn execute_restore(&self, info: RestoreInfo) -> Result<RestoreOutcome> {
        let positions = self
            .snapshot_replicator
            .restore(info.server, info.snapshot_id, info.num_chunks)
            .await?;
        let range =
            ReplicationRange::compute(info.latest_local_position, positions, info.backup_position);
        if range.is_empty() {
            info!(
                "snapshot {} covers position {}, skip replicating log",
                info.snapshot_id, range.to_position
            );
            return Ok(RestoreOutcome {
                positions,
                range,
                replicated_position: None,
            });
        }

        info!(
            "snapshot {} is restored, replicate log from {} to {}",
            info.snapshot_id, range.from_position, range.to_position
        );
        let replicated_position = self
            .log_replicator
            .replicate(info.server, range.from_position, range.to_position)
            .await?;
        Ok(RestoreOutcome {
            positions,
            range,
            replicated_position: Some(replicated_position),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(processed_position: i64, exported_position: i64) -> SnapshotPositions {
        SnapshotPositions {
            processed_position,
            exported_position,
        }
    }

    #[test]
    fn range_starts_after_local_records() {
        let range = ReplicationRange::compute(50, positions(100, 80), 120);
        assert_eq!(range.from_position, 80);
        assert_eq!(range.to_position, 120);

        let range = ReplicationRange::compute(90, positions(100, 80), 120);
        assert_eq!(range.from_position, 90);
    }

    #[test]
    fn range_reaches_processed_position() {
        let range = ReplicationRange::compute(10, positions(100, 100), 60);
        assert_eq!(range.from_position, 100);
        assert_eq!(range.to_position, 100);
        assert!(range.is_empty());

        // The exporters lag behind the processing.
        let range = ReplicationRange::compute(10, positions(100, 40), 60);
        assert_eq!(range.from_position, 40);
        assert_eq!(range.to_position, 100);
        assert!(!range.is_empty());
    }
}
