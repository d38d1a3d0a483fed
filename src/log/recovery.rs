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

use tracing::info;

use super::{
    block_index::{BlockIndex, IndexPolicy},
    storage::LogStorage,
    FIRST_POSITION,
};
use crate::{
    codec::frame::{self, FrameIter},
    Error, Result,
};

pub(crate) struct RecoveredLog {
    /// The position of the last record, `None` if the stream is empty.
    pub last_position: Option<i64>,
    pub policy: IndexPolicy,
}

impl RecoveredLog {
    pub fn next_position(&self) -> i64 {
        self.last_position.map(|p| p + 1).unwrap_or(FIRST_POSITION)
    }
}

/// Returns whether the last entry of `index` still points to a block of `storage` which
/// starts with the indexed position.
pub(crate) fn index_matches(storage: &dyn LogStorage, index: &BlockIndex) -> Result<bool> {
    let entry = match index.last_entry() {
        Some(entry) => entry,
        None => return Ok(true),
    };
    match storage.read(entry.address)? {
        Some(block) => Ok(frame::first_position(&block.data)? == entry.position),
        None => Ok(false),
    }
}

/// Find the tail of a log stream. The replay starts from the last entry of the block index,
/// or from the first block if the index is empty, and adds index entries for the blocks
/// after it.
pub(crate) fn recover_log(
    stream_id: u32,
    storage: &dyn LogStorage,
    index: &BlockIndex,
    index_block_size: usize,
) -> Result<RecoveredLog> {
    let mut resume_from = index.last_entry();
    let mut address = match resume_from {
        Some(entry) => Some(entry.address),
        None => storage.first_block_address(),
    };
    let mut policy = IndexPolicy::new(index_block_size);
    let mut last_position: Option<i64> = None;
    let mut num_blocks = 0;
    while let Some(block_address) = address {
        let block = match storage.read(block_address)? {
            Some(block) => block,
            None => break,
        };
        let first_position = frame::first_position(&block.data)?;
        if resume_from.take().is_some() {
            policy = IndexPolicy::resume(index_block_size, block.data.len());
        } else {
            policy.on_block(index, first_position, block_address, block.data.len())?;
        }

        for record in FrameIter::new(block.data) {
            let record = record?;
            if let Some(last) = last_position {
                if record.position <= last {
                    return Err(Error::InvalidData(format!(
                        "log stream {stream_id} position {} follows {last}",
                        record.position
                    )));
                }
            }
            last_position = Some(record.position);
        }
        num_blocks += 1;
        address = Some(block.next_address);
    }

    info!(
        "log stream {stream_id} is recovered, replay {num_blocks} blocks, last position {:?}",
        last_position
    );
    Ok(RecoveredLog {
        last_position,
        policy,
    })
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::log::storage::MemLogStorage;

    fn append_records(storage: &MemLogStorage, positions: std::ops::Range<i64>) -> i64 {
        let mut block = BytesMut::new();
        for position in positions {
            frame::encode_frame(&mut block, position, b"0123456789");
        }
        storage.append(&block)
    }

    #[test]
    fn recover_empty_stream() {
        let storage = MemLogStorage::new();
        storage.open().unwrap();
        let index = BlockIndex::new();
        let recovered = recover_log(1, &storage, &index, 64).unwrap();
        assert_eq!(recovered.last_position, None);
        assert_eq!(recovered.next_position(), FIRST_POSITION);
        assert!(index.is_empty());
    }

    #[test]
    fn recover_rebuilds_index() {
        let storage = MemLogStorage::new();
        storage.open().unwrap();
        // Blocks of 44 bytes.
        for i in 0..5 {
            append_records(&storage, (1 + i * 2)..(3 + i * 2));
        }

        let index = BlockIndex::new();
        let recovered = recover_log(1, &storage, &index, 64).unwrap();
        assert_eq!(recovered.last_position, Some(10));
        assert_eq!(recovered.next_position(), 11);
        let positions = index.snapshot().iter().map(|e| e.position).collect::<Vec<_>>();
        assert_eq!(positions, vec![1, 5, 9]);
    }

    #[test]
    fn recover_resumes_from_last_index_entry() {
        let storage = MemLogStorage::new();
        storage.open().unwrap();
        for i in 0..3 {
            append_records(&storage, (1 + i * 2)..(3 + i * 2));
        }
        let index = BlockIndex::new();
        recover_log(1, &storage, &index, 64).unwrap();
        assert_eq!(index.len(), 2);

        // Records appended after the stream was closed.
        for i in 3..5 {
            append_records(&storage, (1 + i * 2)..(3 + i * 2));
        }
        assert!(index_matches(&storage, &index).unwrap());
        let mut recovered = recover_log(1, &storage, &index, 64).unwrap();
        assert_eq!(recovered.last_position, Some(10));
        let positions = index.snapshot().iter().map(|e| e.position).collect::<Vec<_>>();
        assert_eq!(positions, vec![1, 5, 9]);

        // The policy continues from the block at position 9.
        assert!(!recovered.policy.on_block(&index, 11, 220, 44).unwrap());
    }

    #[test]
    fn recover_rejects_non_increasing_positions() {
        let storage = MemLogStorage::new();
        storage.open().unwrap();
        append_records(&storage, 1..3);
        append_records(&storage, 2..4);
        let index = BlockIndex::new();
        assert!(matches!(
            recover_log(1, &storage, &index, 64),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn index_mismatches_other_storage() {
        let storage = MemLogStorage::new();
        storage.open().unwrap();
        let index = BlockIndex::new();
        index.add_block(100, 0).unwrap();
        assert!(!index_matches(&storage, &index).unwrap());
        append_records(&storage, 1..2);
        assert!(!index_matches(&storage, &index).unwrap());
    }
}
