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

use bytes::Bytes;
use tracing::debug;

use super::{
    protocol::{
        decode_body, to_response, AppendRequest, AppendResponse, PartitionRequest,
        PartitionResponse, SnapshotChunkRequestMessage, SnapshotChunkResponseMessage,
    },
    RequestHandler, ResourceContext, Response,
};
use crate::{codec::MessageHeader, snap::SnapshotChunkResponse, Result};

/// Appends the payload to the log stream of the partition, answers the position and a new
/// key.
pub struct AppendRecordHandler;

#[crate::async_trait]
impl RequestHandler<ResourceContext> for AppendRecordHandler {
    async fn handle(
        &self,
        context: Arc<ResourceContext>,
        header: &MessageHeader,
        body: Bytes,
    ) -> Result<Response> {
        let request: AppendRequest = decode_body(header, &body)?;
        let position = context.log_stream.writer().write(request.payload).await?;
        let key = context.key_generator.next_key();
        Ok(to_response(&AppendResponse {
            resource_id: request.resource_id,
            position,
            key,
        }))
    }
}

/// Answers the partition a correlation key belongs to.
pub struct PartitionLookupHandler;

#[crate::async_trait]
impl RequestHandler<ResourceContext> for PartitionLookupHandler {
    async fn handle(
        &self,
        context: Arc<ResourceContext>,
        header: &MessageHeader,
        body: Bytes,
    ) -> Result<Response> {
        let request: PartitionRequest = decode_body(header, &body)?;
        let partition_id = context
            .routing
            .partition_for_correlation_key(&request.correlation_key);
        Ok(to_response(&PartitionResponse {
            resource_id: request.resource_id,
            partition_id,
        }))
    }
}

/// Serves the chunks of the local snapshots of a partition.
pub struct SnapshotChunkHandler;

#[crate::async_trait]
impl RequestHandler<ResourceContext> for SnapshotChunkHandler {
    async fn handle(
        &self,
        context: Arc<ResourceContext>,
        header: &MessageHeader,
        body: Bytes,
    ) -> Result<Response> {
        let message: SnapshotChunkRequestMessage = decode_body(header, &body)?;
        let request = &message.request;
        let response = match context.snapshots.as_ref() {
            Some(source) => match source.read_chunk(request.snapshot_id, request.chunk_index) {
                Ok(chunk) => SnapshotChunkResponse::ok(chunk),
                Err(err) => {
                    debug!(
                        "partition {} read snapshot {} chunk {}: {err}",
                        context.partition_id, request.snapshot_id, request.chunk_index
                    );
                    SnapshotChunkResponse::failed(err.to_string())
                }
            },
            None => SnapshotChunkResponse::failed(format!(
                "partition {} serves no snapshots",
                context.partition_id
            )),
        };
        Ok(to_response(&SnapshotChunkResponseMessage {
            resource_id: message.resource_id,
            response,
        }))
    }
}
