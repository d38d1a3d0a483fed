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

//! Log record frames. A block is a sequence of frames:
//!
//! ```text
//! | length: u32 | position: i64 | payload (length bytes) |
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::ReadCursor;
use crate::{Error, Result};

pub const FRAME_HEADER_LENGTH: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub position: i64,
    pub payload: Bytes,
}

/// Returns the bytes a payload takes once framed.
#[inline]
pub fn framed_length(payload_len: usize) -> usize {
    FRAME_HEADER_LENGTH + payload_len
}

pub fn encode_frame(buf: &mut BytesMut, position: i64, payload: &[u8]) {
    buf.reserve(framed_length(payload.len()));
    buf.put_u32_le(payload.len() as u32);
    buf.put_i64_le(position);
    buf.put_slice(payload);
}

/// Reads the position of the first frame of a block.
pub fn first_position(block: &[u8]) -> Result<i64> {
    let mut cursor = ReadCursor::new(block);
    cursor.skip(4)?;
    cursor.get_i64()
}

/// Walks the frames of a block.
pub struct FrameIter {
    block: Bytes,
    offset: usize,
}

impl FrameIter {
    pub fn new(block: Bytes) -> Self {
        FrameIter { block, offset: 0 }
    }

    fn read_frame(&mut self) -> Result<LogRecord> {
        let mut cursor = ReadCursor::new(&self.block[self.offset..]);
        let len = cursor.get_u32()? as usize;
        let position = cursor.get_i64()?;
        if cursor.remaining() < len {
            return Err(Error::InvalidData(format!(
                "log frame at offset {}, payload {} bytes, but only {} left",
                self.offset,
                len,
                cursor.remaining()
            )));
        }
        let start = self.offset + FRAME_HEADER_LENGTH;
        let payload = self.block.slice(start..start + len);
        self.offset = start + len;
        Ok(LogRecord { position, payload })
    }
}

impl Iterator for FrameIter {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.block.len() {
            return None;
        }
        match self.read_frame() {
            Ok(record) => Some(Ok(record)),
            Err(err) => {
                // A corrupted block ends the iteration.
                self.offset = self.block.len();
                Some(Err(err))
            }
        }
    }
}
