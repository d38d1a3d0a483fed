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

use bytes::{Buf, BufMut, BytesMut};

use crate::{Error, Result};

/// A bounds checked little-endian reader. Reading past the end returns
/// [`Error::InvalidData`] and leaves the cursor untouched.
pub struct ReadCursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

macro_rules! get_fixed {
    ($name:ident, $ty:ty, $get:ident) => {
        pub fn $name(&mut self) -> Result<$ty> {
            self.ensure(std::mem::size_of::<$ty>())?;
            let mut slice = &self.buf[self.offset..];
            let value = slice.$get();
            self.offset += std::mem::size_of::<$ty>();
            Ok(value)
        }
    };
}

impl<'a> ReadCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ReadCursor { buf, offset: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    get_fixed!(get_u16, u16, get_u16_le);
    get_fixed!(get_u32, u32, get_u32_le);
    get_fixed!(get_i32, i32, get_i32_le);
    get_fixed!(get_u64, u64, get_u64_le);
    get_fixed!(get_i64, i64, get_i64_le);

    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let bytes = &self.buf[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    /// Reads a `u32` length prefixed byte sequence.
    pub fn get_var_data(&mut self) -> Result<&'a [u8]> {
        let start = self.offset;
        let len = self.get_u32()? as usize;
        match self.get_bytes(len) {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                self.offset = start;
                Err(err)
            }
        }
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.ensure(len)?;
        self.offset += len;
        Ok(())
    }

    fn ensure(&self, len: usize) -> Result<()> {
        if self.remaining() < len {
            return Err(Error::InvalidData(format!(
                "buffer at offset {}, require {} bytes, but only {} left",
                self.offset,
                len,
                self.remaining()
            )));
        }
        Ok(())
    }
}

pub struct WriteCursor {
    buf: BytesMut,
}

impl WriteCursor {
    pub fn new() -> Self {
        WriteCursor::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        WriteCursor {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16_le(v);
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    pub fn put_i32(&mut self, v: i32) -> &mut Self {
        self.buf.put_i32_le(v);
        self
    }

    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        self.buf.put_u64_le(v);
        self
    }

    pub fn put_i64(&mut self, v: i64) -> &mut Self {
        self.buf.put_i64_le(v);
        self
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    pub fn put_var_data(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_u32_le(bytes.len() as u32);
        self.buf.put_slice(bytes);
        self
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }
}

impl Default for WriteCursor {
    fn default() -> Self {
        WriteCursor::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_past_end_keeps_offset() {
        let mut w = WriteCursor::new();
        w.put_u32(7).put_i64(-3);
        let bytes = w.into_inner();

        let mut r = ReadCursor::new(&bytes);
        assert_eq!(r.get_u32().unwrap(), 7);
        assert!(r.get_u64().is_ok());
        assert_eq!(r.remaining(), 0);
        assert!(matches!(r.get_u16(), Err(Error::InvalidData(_))));
        assert_eq!(r.position(), 12);
    }

    #[test]
    fn truncated_var_data_is_rejected() {
        let mut w = WriteCursor::new();
        w.put_u32(10).put_bytes(b"abc");
        let bytes = w.into_inner();

        let mut r = ReadCursor::new(&bytes);
        assert!(r.get_var_data().is_err());
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn var_data() {
        let mut w = WriteCursor::new();
        w.put_var_data(b"hello").put_var_data(b"");
        let bytes = w.into_inner();

        let mut r = ReadCursor::new(&bytes);
        assert_eq!(r.get_var_data().unwrap(), b"hello");
        assert_eq!(r.get_var_data().unwrap(), b"");
        assert_eq!(r.remaining(), 0);
    }
}
