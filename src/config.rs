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

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Default, Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Limit the bytes of a block appended to the storage. A single record must fit in one
    /// block, including the frame header.
    ///
    /// Default: 1MB
    pub max_block_size: usize,

    /// A new block index entry is added once the bytes appended since the last entry reach
    /// this threshold.
    ///
    /// Default: 4MB
    pub index_block_size: usize,

    /// The capacity of the pending records queue of each log stream. Writers wait once the
    /// queue is full.
    ///
    /// Default: 1024
    pub pending_record_capacity: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// The partition count used to correlate keys before the routing info is initialized.
    ///
    /// Default: 1
    pub static_partition_count: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// The bytes of each chunk when a local snapshot is split for transferring.
    ///
    /// Default: 512KB
    pub chunk_size: usize,
}

impl Config {
    pub fn from_json(content: &str) -> Result<Config> {
        serde_json::from_str(content)
            .map_err(|err| Error::InvalidArgument(format!("config: {err}")))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            max_block_size: 1 << 20,
            index_block_size: 4 << 20,
            pending_record_capacity: 1024,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig {
            static_partition_count: 1,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            chunk_size: 512 << 10,
        }
    }
}
