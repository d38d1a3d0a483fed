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
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use bytes::BytesMut;

use super::{PeerId, SnapshotChunkRequest, SnapshotChunkResponse, SnapshotTransport};
use crate::{
    codec::HeaderView,
    dispatch::{
        protocol::{
            decode_message, encode_message, ErrorResponse, SnapshotChunkRequestMessage,
            SnapshotChunkResponseMessage,
        },
        CompositeRequestDispatcher, Dispatch, ERROR_RESPONSE, MANAGEMENT_SCHEMA_ID,
    },
    Error, Result,
};

/// Requests snapshot chunks from the dispatchers of peers in the same process, through the
/// same envelopes as a network transport.
pub struct LoopbackSnapshotTransport {
    resource_id: u32,
    next_request_id: AtomicU64,
    peers: RwLock<HashMap<PeerId, Arc<CompositeRequestDispatcher>>>,
}

impl LoopbackSnapshotTransport {
    /// `resource_id` is the partition the requested snapshots belong to.
    pub fn new(resource_id: u32) -> Self {
        LoopbackSnapshotTransport {
            resource_id,
            next_request_id: AtomicU64::new(1),
            peers: RwLock::default(),
        }
    }

    pub fn add_peer(&self, peer: PeerId, dispatcher: Arc<CompositeRequestDispatcher>) {
        self.peers.write().unwrap().insert(peer, dispatcher);
    }

    pub fn remove_peer(&self, peer: PeerId) {
        self.peers.write().unwrap().remove(&peer);
    }
}

#[crate::async_trait]
impl SnapshotTransport for LoopbackSnapshotTransport {
    async fn request_snapshot_chunk(
        &self,
        peer: PeerId,
        request: SnapshotChunkRequest,
    ) -> Result<SnapshotChunkResponse> {
        let dispatcher = self
            .peers
            .read()
            .unwrap()
            .get(&peer)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("node {peer} is unreachable")))?;

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let message = SnapshotChunkRequestMessage {
            resource_id: self.resource_id,
            request,
        };
        let buf = encode_message(MANAGEMENT_SCHEMA_ID, request_id, &message);
        let mut response = BytesMut::new();
        if dispatcher.on_request(&buf, &mut response).await == Dispatch::NotHandled {
            return Err(Error::Transport(format!(
                "node {peer} does not serve partition {}",
                self.resource_id
            )));
        }

        if HeaderView::new(&response)?.template_id() == ERROR_RESPONSE {
            let (_, err) = decode_message::<ErrorResponse>(&response)?;
            return Err(Error::Transport(format!(
                "node {peer} responds error {}: {}",
                err.code, err.message
            )));
        }
        let (header, message) = decode_message::<SnapshotChunkResponseMessage>(&response)?;
        if header.request_id != request_id {
            return Err(Error::Transport(format!(
                "node {peer} responds request {}, expect {request_id}",
                header.request_id
            )));
        }
        Ok(message.response)
    }
}
