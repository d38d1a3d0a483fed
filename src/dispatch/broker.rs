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

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use super::{
    protocol::{self, ErrorResponse},
    Dispatch, RequestDispatcher, RequestHandler, ResourceRegistry, Response, PROTOCOL_VERSION,
};
use crate::{
    codec::{HeaderView, MessageHeader, HEADER_LENGTH},
    metrics::*,
};

/// Dispatches the requests of one schema by template id.
pub struct BrokerRequestDispatcher<C> {
    schema_id: u16,
    handlers: Vec<Option<Arc<dyn RequestHandler<C>>>>,
    registry: Arc<dyn ResourceRegistry<C>>,
}

impl<C: Send + Sync + 'static> BrokerRequestDispatcher<C> {
    pub fn new(schema_id: u16, registry: Arc<dyn ResourceRegistry<C>>) -> Self {
        BrokerRequestDispatcher {
            schema_id,
            handlers: vec![],
            registry,
        }
    }

    pub fn with_handler<H>(mut self, template_id: u16, handler: H) -> Self
    where
        H: RequestHandler<C> + 'static,
    {
        let index = template_id as usize;
        if self.handlers.len() <= index {
            self.handlers.resize_with(index + 1, || None);
        }
        self.handlers[index] = Some(Arc::new(handler));
        self
    }

    fn handler(&self, template_id: u16) -> Option<Arc<dyn RequestHandler<C>>> {
        self.handlers
            .get(template_id as usize)
            .and_then(|handler| handler.clone())
    }

    fn write_response(&self, buf: &mut BytesMut, request_id: u64, response: Response) {
        let header = MessageHeader {
            block_length: response.block_length,
            template_id: response.template_id,
            schema_id: self.schema_id,
            version: PROTOCOL_VERSION,
            request_id,
        };
        header.encode(buf);
        buf.extend_from_slice(&response.body);
    }
}

#[crate::async_trait]
impl<C: Send + Sync + 'static> RequestDispatcher for BrokerRequestDispatcher<C> {
    fn schema_id(&self) -> u16 {
        self.schema_id
    }

    async fn on_request(&self, request: &[u8], response: &mut BytesMut) -> Dispatch {
        let schema_id = match HeaderView::new(request) {
            Ok(view) => view.schema_id(),
            Err(_) => return Dispatch::NotHandled,
        };
        if schema_id != self.schema_id {
            return Dispatch::NotHandled;
        }

        let header = match MessageHeader::decode(request) {
            Ok(header) => header,
            Err(_) => return Dispatch::NotHandled,
        };
        let handler = match self.handler(header.template_id) {
            Some(handler) => handler,
            None => {
                debug!(
                    "schema {} template {} has no handler",
                    self.schema_id, header.template_id
                );
                DISPATCH_REQUEST_TOTAL_VEC
                    .with_label_values(&["unhandled"])
                    .inc();
                return Dispatch::NotHandled;
            }
        };

        let body = Bytes::copy_from_slice(&request[HEADER_LENGTH..]);
        let context = match protocol::resource_id(&body)
            .ok()
            .and_then(|id| self.registry.context_for_resource(id))
        {
            Some(context) => context,
            None => {
                debug!(
                    "schema {} template {} request {}, resource is not found",
                    self.schema_id, header.template_id, header.request_id
                );
                DISPATCH_REQUEST_TOTAL_VEC
                    .with_label_values(&["unhandled"])
                    .inc();
                return Dispatch::NotHandled;
            }
        };

        let resp = match handler.handle(context, &header, body).await {
            Ok(resp) => {
                DISPATCH_REQUEST_TOTAL_VEC
                    .with_label_values(&["handled"])
                    .inc();
                resp
            }
            Err(err) => {
                warn!(
                    "schema {} template {} request {}: {err}",
                    self.schema_id, header.template_id, header.request_id
                );
                DISPATCH_REQUEST_TOTAL_VEC.with_label_values(&["error"]).inc();
                protocol::to_response(&ErrorResponse::from(&err))
            }
        };
        self.write_response(response, header.request_id, resp);
        Dispatch::Handled
    }
}
