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

use arc_swap::ArcSwap;

use crate::{metrics::*, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockIndexEntry {
    /// The position of the first record of the block.
    pub position: i64,
    pub address: i64,
}

/// A sparse index from the first record position of a block to the block address.
///
/// Only the appender of the stream adds entries, readers load an immutable snapshot of the
/// entries and never block the appender.
#[derive(Default)]
pub struct BlockIndex {
    entries: ArcSwap<Vec<BlockIndexEntry>>,
}

impl BlockIndex {
    pub fn new() -> Self {
        BlockIndex::default()
    }

    pub fn add_block(&self, position: i64, address: i64) -> Result<()> {
        let current = self.entries.load();
        if let Some(last) = current.last() {
            if last.position >= position || last.address >= address {
                return Err(Error::InvalidArgument(format!(
                    "block index entry ({position}, {address}) must follow ({}, {})",
                    last.position, last.address
                )));
            }
        }

        let mut entries = Vec::with_capacity(current.len() + 1);
        entries.extend_from_slice(&current);
        entries.push(BlockIndexEntry { position, address });
        self.entries.store(Arc::new(entries));
        LOG_BLOCK_INDEX_ENTRIES_TOTAL.inc();
        Ok(())
    }

    /// Returns the entry of the block which may contain `position`, that is the last entry
    /// whose position is less than or equals to `position`.
    pub fn lookup(&self, position: i64) -> Option<BlockIndexEntry> {
        let entries = self.entries.load();
        let index = entries.partition_point(|e| e.position <= position);
        if index == 0 {
            None
        } else {
            Some(entries[index - 1])
        }
    }

    pub fn lookup_block_address(&self, position: i64) -> Option<i64> {
        self.lookup(position).map(|e| e.address)
    }

    pub fn lookup_block_position(&self, position: i64) -> Option<i64> {
        self.lookup(position).map(|e| e.position)
    }

    pub fn last_entry(&self) -> Option<BlockIndexEntry> {
        self.entries.load().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    pub fn snapshot(&self) -> Arc<Vec<BlockIndexEntry>> {
        self.entries.load_full()
    }
}

/// Decides which appended blocks get an index entry. Both the appender and the recovery
/// apply it, so a reopened stream ends up with the same index.
#[derive(Debug)]
pub(crate) struct IndexPolicy {
    index_block_size: usize,
    bytes_since_index: usize,
}

impl IndexPolicy {
    pub fn new(index_block_size: usize) -> Self {
        IndexPolicy {
            index_block_size,
            bytes_since_index: 0,
        }
    }

    /// Continue from a block which is already indexed.
    pub fn resume(index_block_size: usize, bytes_since_index: usize) -> Self {
        IndexPolicy {
            index_block_size,
            bytes_since_index,
        }
    }

    /// Record an appended block, add an index entry if it is the first block since the last
    /// entry was closed.
    pub fn on_block(
        &mut self,
        index: &BlockIndex,
        position: i64,
        address: i64,
        len: usize,
    ) -> Result<bool> {
        let indexed = if index.is_empty() || self.bytes_since_index >= self.index_block_size {
            index.add_block(position, address)?;
            self.bytes_since_index = 0;
            true
        } else {
            false
        };
        self.bytes_since_index += len;
        Ok(indexed)
    }
}
