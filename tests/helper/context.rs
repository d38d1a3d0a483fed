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

use tngp_logstreams::{
    log::{LogStream, LogStreams, MemLogStorage},
    routing::{MemRoutingStore, RoutingInfo},
    LogConfig, RoutingConfig,
};

pub struct TestContext {
    pub cfg: LogConfig,
}

impl TestContext {
    pub fn new() -> Self {
        TestContext {
            cfg: LogConfig::default(),
        }
    }

    pub fn with_block_size(mut self, max_block_size: usize, index_block_size: usize) -> Self {
        self.cfg.max_block_size = max_block_size;
        self.cfg.index_block_size = index_block_size;
        self
    }

    pub fn start(&self) -> LogStreams {
        LogStreams::start(self.cfg.clone()).unwrap()
    }
}

pub async fn open_mem_stream(
    streams: &LogStreams,
    stream_id: u32,
) -> (LogStream, Arc<MemLogStorage>) {
    let storage = Arc::new(MemLogStorage::new());
    let stream = streams.open(stream_id, storage.clone()).await.unwrap();
    (stream, storage)
}

pub fn new_routing_info(partition_count: Option<u32>) -> RoutingInfo<Arc<MemRoutingStore>> {
    let store = Arc::new(MemRoutingStore::new());
    let mut info = RoutingInfo::new(store, &RoutingConfig::default()).unwrap();
    if let Some(count) = partition_count {
        info.initialize_routing_info(count).unwrap();
    }
    info
}
