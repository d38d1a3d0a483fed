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

use tracing::{debug, error, info};

use super::{
    CancelToken, PeerId, SnapshotChunk, SnapshotChunkRequest, SnapshotPositions, SnapshotStore,
    SnapshotTransport,
};
use crate::{metrics::*, record_latency, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    Start,
    FetchChunk(i32),
    CompleteSnapshot,
    Done,
    Failed,
}

/// The progress of restoring one snapshot. It only lives as long as the restore.
#[derive(Debug, Clone)]
pub struct SnapshotRestoreSession {
    pub server: PeerId,
    pub snapshot_id: i64,
    /// The index of the next chunk to fetch.
    pub chunk_index: i32,
    pub num_chunks: i32,
    pub state: RestoreState,
}

impl SnapshotRestoreSession {
    fn new(server: PeerId, snapshot_id: i64, num_chunks: i32) -> Self {
        SnapshotRestoreSession {
            server,
            snapshot_id,
            chunk_index: 0,
            num_chunks,
            state: RestoreState::Start,
        }
    }
}

/// Fetches a remote snapshot chunk by chunk into the local snapshot store.
pub struct RestoreSnapshotReplicator {
    transport: Arc<dyn SnapshotTransport>,
    store: Arc<dyn SnapshotStore>,
    cancel: Option<CancelToken>,
}

impl RestoreSnapshotReplicator {
    pub fn new(transport: Arc<dyn SnapshotTransport>, store: Arc<dyn SnapshotStore>) -> Self {
        RestoreSnapshotReplicator {
            transport,
            store,
            cancel: None,
        }
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Restore the snapshot from `server` and returns the positions it covers.
    ///
    /// A snapshot which already exists locally is not fetched again. Any failure discards
    /// the chunks received so far.
    pub async fn restore(
        &self,
        server: PeerId,
        snapshot_id: i64,
        num_chunks: i32,
    ) -> Result<SnapshotPositions> {
        if let Some(positions) = self.store.snapshot_positions(snapshot_id) {
            debug!("snapshot {snapshot_id} already exists, skip restoring");
            SNAPSHOT_RESTORE_TOTAL_VEC.with_label_values(&["exists"]).inc();
            return Ok(positions);
        }

        record_latency!(SNAPSHOT_RESTORE_DURATION_SECONDS);
        info!("restore snapshot {snapshot_id} of {num_chunks} chunks from node {server}");
        let mut session = SnapshotRestoreSession::new(server, snapshot_id, num_chunks);
        match self.run_session(&mut session).await {
            Ok(positions) => {
                session.state = RestoreState::Done;
                SNAPSHOT_RESTORE_TOTAL_VEC
                    .with_label_values(&["success"])
                    .inc();
                info!(
                    "snapshot {snapshot_id} is restored, processed position {}, exported position {}",
                    positions.processed_position, positions.exported_position
                );
                Ok(positions)
            }
            Err(err) => {
                error!(
                    "restore snapshot {snapshot_id} at {:?}: {err}",
                    session.state
                );
                session.state = RestoreState::Failed;
                self.store.invalidate_snapshot(snapshot_id);
                SNAPSHOT_RESTORE_TOTAL_VEC.with_label_values(&["failed"]).inc();
                Err(err)
            }
        }
    }

    async fn run_session(&self, session: &mut SnapshotRestoreSession) -> Result<SnapshotPositions> {
        if session.num_chunks <= 0 {
            return Err(Error::InvalidArgument(format!(
                "snapshot {} has {} chunks",
                session.snapshot_id, session.num_chunks
            )));
        }

        let mut positions = SnapshotPositions::default();
        while session.chunk_index < session.num_chunks {
            session.state = RestoreState::FetchChunk(session.chunk_index);
            let chunk = self.fetch_chunk(session).await?;
            verify_chunk(session, &chunk)?;
            if !self.store.consume_snapshot_chunk(&chunk) {
                return Err(Error::SnapshotChunk {
                    snapshot_id: session.snapshot_id,
                    chunk_index: chunk.chunk_index,
                    reason: "rejected by the snapshot store".to_owned(),
                });
            }
            SNAPSHOT_RESTORE_CHUNK_BYTES_TOTAL.inc_by(chunk.content.len() as u64);
            positions = chunk.positions();
            session.chunk_index += 1;
        }

        session.state = RestoreState::CompleteSnapshot;
        if !self.store.complete_snapshot(session.snapshot_id) {
            return Err(Error::CompleteSnapshot(session.snapshot_id));
        }
        Ok(self
            .store
            .snapshot_positions(session.snapshot_id)
            .unwrap_or(positions))
    }

    async fn fetch_chunk(&self, session: &SnapshotRestoreSession) -> Result<SnapshotChunk> {
        let request = SnapshotChunkRequest {
            snapshot_id: session.snapshot_id,
            chunk_index: session.chunk_index,
        };
        let fetch = self
            .transport
            .request_snapshot_chunk(session.server, request);
        let response = match &self.cancel {
            Some(token) => {
                if token.is_cancelled() {
                    return Err(Error::Aborted);
                }
                tokio::select! {
                    response = fetch => response?,
                    _ = token.cancelled() => return Err(Error::Aborted),
                }
            }
            None => fetch.await?,
        };

        if !response.success {
            return Err(Error::SnapshotChunk {
                snapshot_id: session.snapshot_id,
                chunk_index: session.chunk_index,
                reason: response.error,
            });
        }
        response.chunk.ok_or_else(|| Error::SnapshotChunk {
            snapshot_id: session.snapshot_id,
            chunk_index: session.chunk_index,
            reason: "response without chunk".to_owned(),
        })
    }
}

fn verify_chunk(session: &SnapshotRestoreSession, chunk: &SnapshotChunk) -> Result<()> {
    if chunk.snapshot_id != session.snapshot_id || chunk.total_count != session.num_chunks {
        return Err(Error::SnapshotChunk {
            snapshot_id: session.snapshot_id,
            chunk_index: session.chunk_index,
            reason: format!(
                "receive chunk of snapshot {} with {} chunks",
                chunk.snapshot_id, chunk.total_count
            ),
        });
    }
    if chunk.chunk_index != session.chunk_index {
        return Err(Error::OutOfOrderChunk {
            snapshot_id: session.snapshot_id,
            expected: session.chunk_index,
            actual: chunk.chunk_index,
        });
    }
    Ok(())
}
