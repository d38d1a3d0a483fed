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

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use super::{block_index::BlockIndex, storage::LogStorage};
use crate::{
    codec::frame::{FrameIter, LogRecord},
    Result,
};

/// Reads the durable records of a log stream.
///
/// A reader never observes a record beyond the last position published by the appender,
/// and it picks up the records appended after it reached the tail.
pub struct LogStreamReader {
    storage: Arc<dyn LogStorage>,
    block_index: Arc<BlockIndex>,
    last_position: Arc<AtomicI64>,
    /// The address of the next block to load, `None` means the first block.
    next_address: Option<i64>,
    records: VecDeque<LogRecord>,
}

impl LogStreamReader {
    pub(crate) fn new(
        storage: Arc<dyn LogStorage>,
        block_index: Arc<BlockIndex>,
        last_position: Arc<AtomicI64>,
    ) -> Self {
        LogStreamReader {
            storage,
            block_index,
            last_position,
            next_address: None,
            records: VecDeque::new(),
        }
    }

    pub fn seek_to_first(&mut self) {
        self.next_address = None;
        self.records.clear();
    }

    /// Position the reader at `position`. Returns whether a record with exactly this
    /// position exists, otherwise the reader is left at the first record after it.
    pub fn seek(&mut self, position: i64) -> Result<bool> {
        self.next_address = self.block_index.lookup_block_address(position);
        self.records.clear();
        loop {
            while matches!(self.records.front(), Some(r) if r.position < position) {
                self.records.pop_front();
            }
            if let Some(record) = self.records.front() {
                return Ok(record.position == position && record.position <= self.committed());
            }
            if !self.load_next_block()? {
                return Ok(false);
            }
        }
    }

    pub fn next_record(&mut self) -> Result<Option<LogRecord>> {
        if self.records.is_empty() && !self.load_next_block()? {
            return Ok(None);
        }
        match self.records.front() {
            Some(record) if record.position <= self.committed() => Ok(self.records.pop_front()),
            _ => Ok(None),
        }
    }

    fn committed(&self) -> i64 {
        self.last_position.load(Ordering::Acquire)
    }

    fn load_next_block(&mut self) -> Result<bool> {
        let address = match self.next_address.or_else(|| self.storage.first_block_address()) {
            Some(address) => address,
            None => return Ok(false),
        };
        let block = match self.storage.read(address)? {
            Some(block) => block,
            None => {
                self.next_address = Some(address);
                return Ok(false);
            }
        };
        for record in FrameIter::new(block.data) {
            self.records.push_back(record?);
        }
        self.next_address = Some(block.next_address);
        Ok(true)
    }
}

impl Iterator for LogStreamReader {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
