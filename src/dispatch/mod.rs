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

//! Dispatches binary requests to the handlers of a resource.
//!
//! A dispatcher owns one schema. It only reads the schema id of a request it does not own,
//! and answers [`Dispatch::NotHandled`] so the caller could try the next dispatcher.

mod broker;
mod composite;
mod context;
mod handlers;
pub mod protocol;

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

pub use self::{
    broker::BrokerRequestDispatcher,
    composite::CompositeRequestDispatcher,
    context::{KeyGenerator, PartitionRegistry, ResourceContext},
    handlers::{AppendRecordHandler, PartitionLookupHandler, SnapshotChunkHandler},
};
use crate::{codec::MessageHeader, Result};

pub const LOG_API_SCHEMA_ID: u16 = 5;
pub const MANAGEMENT_SCHEMA_ID: u16 = 7;
pub const PROTOCOL_VERSION: u16 = 1;

/// Templates shared by all schemas.
pub const ERROR_RESPONSE: u16 = 0;

/// Templates of the log api schema.
pub const APPEND_REQUEST: u16 = 1;
pub const APPEND_RESPONSE: u16 = 2;
pub const PARTITION_REQUEST: u16 = 3;
pub const PARTITION_RESPONSE: u16 = 4;

/// Templates of the management schema.
pub const SNAPSHOT_CHUNK_REQUEST: u16 = 1;
pub const SNAPSHOT_CHUNK_RESPONSE: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    NotHandled,
}

#[crate::async_trait]
pub trait RequestDispatcher: Send + Sync {
    fn schema_id(&self) -> u16;

    /// Handle `request` and append the response message to `response`.
    async fn on_request(&self, request: &[u8], response: &mut BytesMut) -> Dispatch;
}

/// The body of a response, the dispatcher prefixes it with the message header.
#[derive(Debug, Clone)]
pub struct Response {
    pub template_id: u16,
    pub block_length: u16,
    pub body: Bytes,
}

#[crate::async_trait]
pub trait RequestHandler<C>: Send + Sync {
    /// `body` is the request without the message header.
    async fn handle(&self, context: Arc<C>, header: &MessageHeader, body: Bytes)
        -> Result<Response>;
}

/// Finds the context of the resource a request is addressed to.
pub trait ResourceRegistry<C>: Send + Sync {
    fn context_for_resource(&self, resource_id: u32) -> Option<Arc<C>>;
}
