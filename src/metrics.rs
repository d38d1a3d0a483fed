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

use lazy_static::lazy_static;
use prometheus::*;

lazy_static! {
    pub static ref LOG_APPEND_BLOCK_TOTAL: IntCounter = register_int_counter!(
        "log_append_block_total",
        "The total of blocks appended to log storages",
    )
    .unwrap();
    pub static ref LOG_APPEND_BYTES_TOTAL: IntCounter = register_int_counter!(
        "log_append_bytes_total",
        "The total bytes of blocks appended to log storages",
    )
    .unwrap();
    pub static ref LOG_APPEND_FAILED_TOTAL: IntCounter = register_int_counter!(
        "log_append_failed_total",
        "The total of blocks rejected by log storages",
    )
    .unwrap();
    pub static ref LOG_APPEND_DURATION_SECONDS: Histogram = register_histogram!(
        "log_append_duration_seconds",
        "The intervals of appending a block to log storage",
        exponential_buckets(0.00005, 1.8, 26).unwrap(),
    )
    .unwrap();
    pub static ref LOG_BLOCK_INDEX_ENTRIES_TOTAL: IntCounter = register_int_counter!(
        "log_block_index_entries_total",
        "The total of entries added to block indexes",
    )
    .unwrap();
}

lazy_static! {
    pub static ref SNAPSHOT_RESTORE_TOTAL_VEC: IntCounterVec = register_int_counter_vec!(
        "snapshot_restore_total",
        "The total of snapshot restore sessions",
        &["type"],
    )
    .unwrap();
    pub static ref SNAPSHOT_RESTORE_CHUNK_BYTES_TOTAL: IntCounter = register_int_counter!(
        "snapshot_restore_chunk_bytes_total",
        "The total bytes of snapshot chunks received",
    )
    .unwrap();
    pub static ref SNAPSHOT_RESTORE_DURATION_SECONDS: Histogram = register_histogram!(
        "snapshot_restore_duration_seconds",
        "The intervals of restoring a remote snapshot",
        exponential_buckets(0.0005, 1.8, 26).unwrap(),
    )
    .unwrap();
}

lazy_static! {
    pub static ref DISPATCH_REQUEST_TOTAL_VEC: IntCounterVec = register_int_counter_vec!(
        "dispatch_request_total",
        "The total of dispatched requests",
        &["type"],
    )
    .unwrap();
}

#[macro_export]
macro_rules! record_latency {
    ($metrics: expr) => {
        let _timer = $metrics.start_timer();
    };
}
