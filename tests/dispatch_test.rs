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

mod helper;

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use helper::context::{new_routing_info, open_mem_stream, TestContext};
use tngp_logstreams::{
    codec::{HeaderView, MessageHeader},
    dispatch::{
        protocol::{
            decode_message, encode_message, AppendRequest, AppendResponse, ErrorResponse,
            PartitionRequest, PartitionResponse, SnapshotChunkRequestMessage,
            SnapshotChunkResponseMessage,
        },
        AppendRecordHandler, BrokerRequestDispatcher, CompositeRequestDispatcher, Dispatch,
        KeyGenerator, PartitionLookupHandler, PartitionRegistry, RequestDispatcher,
        ResourceContext, SnapshotChunkHandler, APPEND_REQUEST, ERROR_RESPONSE, LOG_API_SCHEMA_ID,
        MANAGEMENT_SCHEMA_ID, PARTITION_REQUEST, SNAPSHOT_CHUNK_REQUEST,
    },
    log::{LogStreams, MemLogStorage},
    routing::{MemRoutingStore, RoutingInfo},
    snap::SnapshotChunkRequest,
};

use crate::helper::init::{setup_panic_hook, setup_tracing};

#[ctor::ctor]
fn init() {
    setup_panic_hook();
    setup_tracing();
}

struct Node {
    _streams: LogStreams,
    storages: Vec<Arc<MemLogStorage>>,
    routing: RoutingInfo<Arc<MemRoutingStore>>,
    registry: PartitionRegistry,
    dispatcher: CompositeRequestDispatcher,
}

/// A node serving partitions 1 and 2 through the log api and management schemas.
async fn start_node() -> Node {
    let streams = TestContext::new().start();
    let routing = new_routing_info(Some(2));
    let registry = PartitionRegistry::new();
    let mut storages = vec![];
    for partition_id in [1, 2] {
        let (stream, storage) = open_mem_stream(&streams, partition_id).await;
        registry.update(
            partition_id,
            Arc::new(ResourceContext::new(partition_id, stream, routing.view())),
        );
        storages.push(storage);
    }

    let log_api = BrokerRequestDispatcher::<ResourceContext>::new(
        LOG_API_SCHEMA_ID,
        Arc::new(registry.clone()),
    )
    .with_handler(APPEND_REQUEST, AppendRecordHandler)
    .with_handler(PARTITION_REQUEST, PartitionLookupHandler);
    let management = BrokerRequestDispatcher::<ResourceContext>::new(
        MANAGEMENT_SCHEMA_ID,
        Arc::new(registry.clone()),
    )
    .with_handler(SNAPSHOT_CHUNK_REQUEST, SnapshotChunkHandler);
    let dispatcher = CompositeRequestDispatcher::new(vec![
        Arc::new(log_api) as Arc<dyn RequestDispatcher>,
        Arc::new(management) as Arc<dyn RequestDispatcher>,
    ]);

    Node {
        _streams: streams,
        storages,
        routing,
        registry,
        dispatcher,
    }
}

async fn append(
    node: &Node,
    request_id: u64,
    resource_id: u32,
    payload: &'static [u8],
) -> BytesMut {
    let request = AppendRequest {
        resource_id,
        payload: Bytes::from_static(payload),
    };
    let buf = encode_message(LOG_API_SCHEMA_ID, request_id, &request);
    let mut response = BytesMut::new();
    assert_eq!(
        node.dispatcher.on_request(&buf, &mut response).await,
        Dispatch::Handled
    );
    response
}

#[tokio::test]
async fn append_through_log_api() {
    let node = start_node().await;
    for (request_id, expect_position) in [(10, 1), (11, 2)] {
        let response = append(&node, request_id, 2, b"event").await;
        let (header, response) = decode_message::<AppendResponse>(&response).unwrap();
        assert_eq!(header.schema_id, LOG_API_SCHEMA_ID);
        assert_eq!(header.request_id, request_id);
        assert_eq!(response.resource_id, 2);
        assert_eq!(response.position, expect_position);
        assert_eq!(KeyGenerator::partition_id_of(response.key), 2);
    }
    assert_eq!(node.storages[0].num_blocks(), 0);
    assert_eq!(node.storages[1].num_blocks(), 2);

    let response = append(&node, 12, 1, b"other").await;
    let (_, response) = decode_message::<AppendResponse>(&response).unwrap();
    assert_eq!(response.position, 1);
    assert_eq!(KeyGenerator::partition_id_of(response.key), 1);
}

#[tokio::test]
async fn append_failure_answers_error() {
    let node = start_node().await;
    node.storages[0].fail_next_appends(1);
    let response = append(&node, 1, 1, b"event").await;
    assert_eq!(HeaderView::new(&response).unwrap().template_id(), ERROR_RESPONSE);
    let (header, err) = decode_message::<ErrorResponse>(&response).unwrap();
    assert_eq!(header.request_id, 1);
    assert_eq!(err.code, 6);

    let response = append(&node, 2, 1, b"event").await;
    let (_, response) = decode_message::<AppendResponse>(&response).unwrap();
    assert_eq!(response.position, 1);
}

#[tokio::test]
async fn lookup_partition() {
    let node = start_node().await;
    let view = node.routing.view();
    for key in [&b"order-1"[..], b"order-2", b"order-123", b""] {
        let request = PartitionRequest {
            resource_id: 1,
            correlation_key: Bytes::copy_from_slice(key),
        };
        let buf = encode_message(LOG_API_SCHEMA_ID, 7, &request);
        let mut response = BytesMut::new();
        assert_eq!(
            node.dispatcher.on_request(&buf, &mut response).await,
            Dispatch::Handled
        );
        let (_, response) = decode_message::<PartitionResponse>(&response).unwrap();
        assert_eq!(response.resource_id, 1);
        assert_eq!(response.partition_id, view.partition_for_correlation_key(key));
    }
}

#[tokio::test]
async fn route_by_schema_and_resource() {
    let node = start_node().await;

    // The management schema reaches its own dispatcher, partition 1 serves no snapshots.
    let request = SnapshotChunkRequestMessage {
        resource_id: 1,
        request: SnapshotChunkRequest {
            snapshot_id: 1,
            chunk_index: 0,
        },
    };
    let buf = encode_message(MANAGEMENT_SCHEMA_ID, 3, &request);
    let mut response = BytesMut::new();
    assert_eq!(
        node.dispatcher.on_request(&buf, &mut response).await,
        Dispatch::Handled
    );
    let (header, response) = decode_message::<SnapshotChunkResponseMessage>(&response).unwrap();
    assert_eq!(header.schema_id, MANAGEMENT_SCHEMA_ID);
    assert!(!response.response.success);
    assert!(response.response.chunk.is_none());

    // Unknown schema.
    let request = AppendRequest {
        resource_id: 1,
        payload: Bytes::from_static(b"event"),
    };
    let buf = encode_message(9, 4, &request);
    let mut response = BytesMut::new();
    assert_eq!(
        node.dispatcher.on_request(&buf, &mut response).await,
        Dispatch::NotHandled
    );
    assert!(response.is_empty());

    // Unknown resource.
    let request = AppendRequest {
        resource_id: 3,
        payload: Bytes::from_static(b"event"),
    };
    let buf = encode_message(LOG_API_SCHEMA_ID, 5, &request);
    assert_eq!(
        node.dispatcher.on_request(&buf, &mut response).await,
        Dispatch::NotHandled
    );
    assert!(response.is_empty());

    // The partition moves away.
    node.registry.remove(1);
    let buf = encode_message(
        LOG_API_SCHEMA_ID,
        6,
        &AppendRequest {
            resource_id: 1,
            payload: Bytes::from_static(b"event"),
        },
    );
    assert_eq!(
        node.dispatcher.on_request(&buf, &mut response).await,
        Dispatch::NotHandled
    );

    // Unknown template.
    let mut buf = encode_message(
        LOG_API_SCHEMA_ID,
        8,
        &AppendRequest {
            resource_id: 2,
            payload: Bytes::from_static(b"event"),
        },
    );
    let mut header = MessageHeader::decode(&buf).unwrap();
    header.template_id = 30;
    buf[..header.encode_to_vec().len()].copy_from_slice(&header.encode_to_vec());
    assert_eq!(
        node.dispatcher.on_request(&buf, &mut response).await,
        Dispatch::NotHandled
    );
    assert!(response.is_empty());
}
