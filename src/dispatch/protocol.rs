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

//! The bodies of the log api and management schemas.
//!
//! A body starts with a fixed root block of `block_length` bytes, followed by the variable
//! length fields, each prefixed by a `u32` length. The first field of every request root
//! block is the resource id.

use bytes::{Bytes, BytesMut};
use prost::Message;

use super::{
    Response, APPEND_REQUEST, APPEND_RESPONSE, ERROR_RESPONSE, PARTITION_REQUEST,
    PARTITION_RESPONSE, PROTOCOL_VERSION, SNAPSHOT_CHUNK_REQUEST, SNAPSHOT_CHUNK_RESPONSE,
};
use crate::{
    codec::{MessageHeader, ReadCursor, WriteCursor, HEADER_LENGTH},
    snap::{SnapshotChunkRequest, SnapshotChunkResponse},
    Error, Result,
};

pub trait WireMessage: Sized {
    const TEMPLATE_ID: u16;
    const BLOCK_LENGTH: u16;

    /// Write the root block, then the variable length fields.
    fn encode_body(&self, cursor: &mut WriteCursor);

    fn decode_body(root: &mut ReadCursor<'_>, var: &mut ReadCursor<'_>) -> Result<Self>;
}

/// Encode a message with its header.
pub fn encode_message<M: WireMessage>(schema_id: u16, request_id: u64, msg: &M) -> BytesMut {
    let header = MessageHeader {
        block_length: M::BLOCK_LENGTH,
        template_id: M::TEMPLATE_ID,
        schema_id,
        version: PROTOCOL_VERSION,
        request_id,
    };
    let mut buf = BytesMut::with_capacity(HEADER_LENGTH + M::BLOCK_LENGTH as usize);
    header.encode(&mut buf);
    let mut cursor = WriteCursor::new();
    msg.encode_body(&mut cursor);
    buf.extend_from_slice(&cursor.into_inner());
    buf
}

/// Decode a whole message, the template of the message must be `M`.
pub fn decode_message<M: WireMessage>(buf: &[u8]) -> Result<(MessageHeader, M)> {
    let header = MessageHeader::decode(buf)?;
    if header.template_id != M::TEMPLATE_ID {
        return Err(Error::InvalidData(format!(
            "message template {}, expect {}",
            header.template_id,
            M::TEMPLATE_ID
        )));
    }
    let msg = decode_body(&header, &buf[HEADER_LENGTH..])?;
    Ok((header, msg))
}

pub fn decode_body<M: WireMessage>(header: &MessageHeader, body: &[u8]) -> Result<M> {
    let block_length = header.block_length as usize;
    if block_length < M::BLOCK_LENGTH as usize || body.len() < block_length {
        return Err(Error::InvalidData(format!(
            "message root block of {} bytes, body {} bytes",
            block_length,
            body.len()
        )));
    }
    // A newer version may append fields to the root block.
    let mut root = ReadCursor::new(&body[..block_length]);
    let mut var = ReadCursor::new(&body[block_length..]);
    M::decode_body(&mut root, &mut var)
}

/// Read the resource id of a request body.
pub fn resource_id(body: &[u8]) -> Result<u32> {
    ReadCursor::new(body).get_u32()
}

pub fn to_response<M: WireMessage>(msg: &M) -> Response {
    let mut cursor = WriteCursor::new();
    msg.encode_body(&mut cursor);
    Response {
        template_id: M::TEMPLATE_ID,
        block_length: M::BLOCK_LENGTH,
        body: cursor.into_inner().freeze(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRequest {
    pub resource_id: u32,
    pub payload: Bytes,
}

impl WireMessage for AppendRequest {
    const TEMPLATE_ID: u16 = APPEND_REQUEST;
    const BLOCK_LENGTH: u16 = 4;

    fn encode_body(&self, cursor: &mut WriteCursor) {
        cursor.put_u32(self.resource_id).put_var_data(&self.payload);
    }

    fn decode_body(root: &mut ReadCursor<'_>, var: &mut ReadCursor<'_>) -> Result<Self> {
        Ok(AppendRequest {
            resource_id: root.get_u32()?,
            payload: Bytes::copy_from_slice(var.get_var_data()?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendResponse {
    pub resource_id: u32,
    pub position: i64,
    pub key: i64,
}

impl WireMessage for AppendResponse {
    const TEMPLATE_ID: u16 = APPEND_RESPONSE;
    const BLOCK_LENGTH: u16 = 20;

    fn encode_body(&self, cursor: &mut WriteCursor) {
        cursor
            .put_u32(self.resource_id)
            .put_i64(self.position)
            .put_i64(self.key);
    }

    fn decode_body(root: &mut ReadCursor<'_>, _: &mut ReadCursor<'_>) -> Result<Self> {
        Ok(AppendResponse {
            resource_id: root.get_u32()?,
            position: root.get_i64()?,
            key: root.get_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRequest {
    pub resource_id: u32,
    pub correlation_key: Bytes,
}

impl WireMessage for PartitionRequest {
    const TEMPLATE_ID: u16 = PARTITION_REQUEST;
    const BLOCK_LENGTH: u16 = 4;

    fn encode_body(&self, cursor: &mut WriteCursor) {
        cursor
            .put_u32(self.resource_id)
            .put_var_data(&self.correlation_key);
    }

    fn decode_body(root: &mut ReadCursor<'_>, var: &mut ReadCursor<'_>) -> Result<Self> {
        Ok(PartitionRequest {
            resource_id: root.get_u32()?,
            correlation_key: Bytes::copy_from_slice(var.get_var_data()?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionResponse {
    pub resource_id: u32,
    pub partition_id: u32,
}

impl WireMessage for PartitionResponse {
    const TEMPLATE_ID: u16 = PARTITION_RESPONSE;
    const BLOCK_LENGTH: u16 = 8;

    fn encode_body(&self, cursor: &mut WriteCursor) {
        cursor.put_u32(self.resource_id).put_u32(self.partition_id);
    }

    fn decode_body(root: &mut ReadCursor<'_>, _: &mut ReadCursor<'_>) -> Result<Self> {
        Ok(PartitionResponse {
            resource_id: root.get_u32()?,
            partition_id: root.get_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotChunkRequestMessage {
    pub resource_id: u32,
    pub request: SnapshotChunkRequest,
}

impl WireMessage for SnapshotChunkRequestMessage {
    const TEMPLATE_ID: u16 = SNAPSHOT_CHUNK_REQUEST;
    const BLOCK_LENGTH: u16 = 4;

    fn encode_body(&self, cursor: &mut WriteCursor) {
        cursor
            .put_u32(self.resource_id)
            .put_var_data(&self.request.encode_to_vec());
    }

    fn decode_body(root: &mut ReadCursor<'_>, var: &mut ReadCursor<'_>) -> Result<Self> {
        Ok(SnapshotChunkRequestMessage {
            resource_id: root.get_u32()?,
            request: SnapshotChunkRequest::decode(var.get_var_data()?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotChunkResponseMessage {
    pub resource_id: u32,
    pub response: SnapshotChunkResponse,
}

impl WireMessage for SnapshotChunkResponseMessage {
    const TEMPLATE_ID: u16 = SNAPSHOT_CHUNK_RESPONSE;
    const BLOCK_LENGTH: u16 = 4;

    fn encode_body(&self, cursor: &mut WriteCursor) {
        cursor
            .put_u32(self.resource_id)
            .put_var_data(&self.response.encode_to_vec());
    }

    fn decode_body(root: &mut ReadCursor<'_>, var: &mut ReadCursor<'_>) -> Result<Self> {
        Ok(SnapshotChunkResponseMessage {
            resource_id: root.get_u32()?,
            response: SnapshotChunkResponse::decode(var.get_var_data()?)?,
        })
    }
}

/// Answers a request whose handler failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        ErrorResponse {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl WireMessage for ErrorResponse {
    const TEMPLATE_ID: u16 = ERROR_RESPONSE;
    const BLOCK_LENGTH: u16 = 2;

    fn encode_body(&self, cursor: &mut WriteCursor) {
        cursor
            .put_u16(self.code)
            .put_var_data(self.message.as_bytes());
    }

    fn decode_body(root: &mut ReadCursor<'_>, var: &mut ReadCursor<'_>) -> Result<Self> {
        Ok(ErrorResponse {
            code: root.get_u16()?,
            message: String::from_utf8_lossy(var.get_var_data()?).into_owned(),
        })
    }
}
