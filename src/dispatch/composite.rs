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

use bytes::BytesMut;
use tracing::debug;

use super::{Dispatch, RequestDispatcher};
use crate::codec::HeaderView;

/// Tries the dispatchers one by one until the schema matches.
#[derive(Default, Clone)]
pub struct CompositeRequestDispatcher {
    dispatchers: Vec<Arc<dyn RequestDispatcher>>,
}

impl CompositeRequestDispatcher {
    pub fn new(dispatchers: Vec<Arc<dyn RequestDispatcher>>) -> Self {
        CompositeRequestDispatcher { dispatchers }
    }

    pub fn add(&mut self, dispatcher: Arc<dyn RequestDispatcher>) {
        self.dispatchers.push(dispatcher);
    }

    pub async fn on_request(&self, request: &[u8], response: &mut BytesMut) -> Dispatch {
        let schema_id = match HeaderView::new(request) {
            Ok(view) => view.schema_id(),
            Err(_) => return Dispatch::NotHandled,
        };
        for dispatcher in &self.dispatchers {
            if dispatcher.schema_id() == schema_id {
                return dispatcher.on_request(request, response).await;
            }
        }
        debug!("no dispatcher for schema {schema_id}");
        Dispatch::NotHandled
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::codec::MessageHeader;

    struct CountingDispatcher {
        schema_id: u16,
        requests: AtomicUsize,
    }

    #[crate::async_trait]
    impl RequestDispatcher for CountingDispatcher {
        fn schema_id(&self) -> u16 {
            self.schema_id
        }

        async fn on_request(&self, _request: &[u8], response: &mut BytesMut) -> Dispatch {
            self.requests.fetch_add(1, Ordering::SeqCst);
            response.extend_from_slice(&self.schema_id.to_le_bytes());
            Dispatch::Handled
        }
    }

    fn counting(schema_id: u16) -> Arc<CountingDispatcher> {
        Arc::new(CountingDispatcher {
            schema_id,
            requests: AtomicUsize::new(0),
        })
    }

    fn request(schema_id: u16) -> Vec<u8> {
        MessageHeader {
            schema_id,
            template_id: 1,
            ..Default::default()
        }
        .encode_to_vec()
    }

    #[tokio::test]
    async fn route_by_schema_id() {
        let log_api = counting(5);
        let management = counting(7);
        let composite = CompositeRequestDispatcher::new(vec![
            log_api.clone() as Arc<dyn RequestDispatcher>,
            management.clone(),
        ]);

        let mut response = BytesMut::new();
        assert_eq!(
            composite.on_request(&request(7), &mut response).await,
            Dispatch::Handled
        );
        assert_eq!(&response[..], &7u16.to_le_bytes());
        assert_eq!(log_api.requests.load(Ordering::SeqCst), 0);
        assert_eq!(management.requests.load(Ordering::SeqCst), 1);

        let mut response = BytesMut::new();
        assert_eq!(
            composite.on_request(&request(9), &mut response).await,
            Dispatch::NotHandled
        );
        assert!(response.is_empty());
    }
}
