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

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    RwLock,
};

use bytes::Bytes;

use crate::Result;

/// The storage rejected the block.
pub const APPEND_FAILED: i64 = -1;
/// The storage is not opened, or already closed.
pub const STORAGE_CLOSED: i64 = -2;

/// A block read back from a storage.
#[derive(Debug, Clone)]
pub struct StoredBlock {
    pub data: Bytes,
    /// The address of the block which follows this one.
    pub next_address: i64,
}

/// The durable storage a log stream appends blocks into.
///
/// `append` is only invoked by the appender which owns the stream, reads may come from any
/// thread at any time.
pub trait LogStorage: Send + Sync {
    fn open(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Durably append a block and returns its address. Negative values indicate failures,
    /// see [`APPEND_FAILED`] and [`STORAGE_CLOSED`].
    fn append(&self, block: &[u8]) -> i64;

    /// The address of the first block, `None` if the storage is empty.
    fn first_block_address(&self) -> Option<i64>;

    /// Read the block at `address`. Returns `None` if no block starts at or after it.
    fn read(&self, address: i64) -> Result<Option<StoredBlock>>;
}

/// A storage keeps blocks in memory, the address of a block is its byte offset.
#[derive(Default)]
pub struct MemLogStorage {
    opened: AtomicBool,
    failures: AtomicUsize,
    blocks: RwLock<Vec<(i64, Bytes)>>,
}

impl MemLogStorage {
    pub fn new() -> Self {
        MemLogStorage::default()
    }

    /// The next `count` appends return [`APPEND_FAILED`].
    pub fn fail_next_appends(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.read().unwrap().len()
    }
}

impl LogStorage for MemLogStorage {
    fn open(&self) -> Result<()> {
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.opened.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    fn append(&self, block: &[u8]) -> i64 {
        if !self.is_open() {
            return STORAGE_CLOSED;
        }
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
        if injected.is_ok() {
            return APPEND_FAILED;
        }

        let mut blocks = self.blocks.write().unwrap();
        let address = blocks
            .last()
            .map(|(addr, data)| addr + data.len() as i64)
            .unwrap_or_default();
        blocks.push((address, Bytes::copy_from_slice(block)));
        address
    }

    fn first_block_address(&self) -> Option<i64> {
        self.blocks.read().unwrap().first().map(|(addr, _)| *addr)
    }

    fn read(&self, address: i64) -> Result<Option<StoredBlock>> {
        let blocks = self.blocks.read().unwrap();
        let index = blocks.partition_point(|(addr, _)| *addr < address);
        Ok(blocks.get(index).map(|(addr, data)| StoredBlock {
            data: data.clone(),
            next_address: addr + data.len() as i64,
        }))
    }
}
