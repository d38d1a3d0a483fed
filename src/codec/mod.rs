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

//! The message envelope which prefixes every request, response and log record body.
//!
//! ```text
//! offset  field          type
//! 0       block_length   u16
//! 2       template_id    u16
//! 4       schema_id      u16
//! 6       version        u16
//! 8       request_id     u64
//! ```
//!
//! All fields are little-endian, the template specific body starts at offset 16.

mod cursor;
pub mod frame;

use bytes::{BufMut, BytesMut};

pub use self::cursor::{ReadCursor, WriteCursor};
use crate::{Error, Result};

pub const HEADER_LENGTH: usize = 16;

const BLOCK_LENGTH_OFFSET: usize = 0;
const TEMPLATE_ID_OFFSET: usize = 2;
const SCHEMA_ID_OFFSET: usize = 4;
const VERSION_OFFSET: usize = 6;
const REQUEST_ID_OFFSET: usize = 8;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// The length of the fixed root block of the body.
    pub block_length: u16,
    pub template_id: u16,
    pub schema_id: u16,
    pub version: u16,
    pub request_id: u64,
}

impl MessageHeader {
    pub fn decode(buf: &[u8]) -> Result<MessageHeader> {
        let view = HeaderView::new(buf)?;
        Ok(MessageHeader {
            block_length: view.block_length(),
            template_id: view.template_id(),
            schema_id: view.schema_id(),
            version: view.version(),
            request_id: view.request_id(),
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_LENGTH);
        buf.put_u16_le(self.block_length);
        buf.put_u16_le(self.template_id);
        buf.put_u16_le(self.schema_id);
        buf.put_u16_le(self.version);
        buf.put_u64_le(self.request_id);
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_LENGTH);
        self.encode(&mut buf);
        buf.to_vec()
    }
}

/// Reads the header fields in place, without copying the whole header out.
#[derive(Clone, Copy)]
pub struct HeaderView<'a> {
    buf: &'a [u8],
}

impl<'a> HeaderView<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < HEADER_LENGTH {
            return Err(Error::InvalidData(format!(
                "message header, expect {} bytes, but got {}",
                HEADER_LENGTH,
                buf.len()
            )));
        }
        Ok(HeaderView {
            buf: &buf[..HEADER_LENGTH],
        })
    }

    #[inline]
    pub fn block_length(&self) -> u16 {
        self.u16_at(BLOCK_LENGTH_OFFSET)
    }

    #[inline]
    pub fn template_id(&self) -> u16 {
        self.u16_at(TEMPLATE_ID_OFFSET)
    }

    #[inline]
    pub fn schema_id(&self) -> u16 {
        self.u16_at(SCHEMA_ID_OFFSET)
    }

    #[inline]
    pub fn version(&self) -> u16 {
        self.u16_at(VERSION_OFFSET)
    }

    #[inline]
    pub fn request_id(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.buf[REQUEST_ID_OFFSET..REQUEST_ID_OFFSET + 8]);
        u64::from_le_bytes(bytes)
    }

    #[inline]
    fn u16_at(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.buf[offset], self.buf[offset + 1]])
    }
}
