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
    fs::{File, OpenOptions},
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use bytes::Bytes;
use tracing::{debug, error, warn};

use super::storage::{LogStorage, StoredBlock, APPEND_FAILED, STORAGE_CLOSED};
use crate::Result;

/// `| len: u32 | crc32: u32 |`
const BLOCK_HEADER_SIZE: usize = 8;

/// A log storage backed by a single segment file. Each block is prefixed by its length and
/// checksum, the address of a block is the offset of its header.
pub struct FileLogStorage {
    path: PathBuf,
    segment: Mutex<Option<Segment>>,
}

struct Segment {
    file: File,
    /// The offset of the first byte after the last complete block.
    end: u64,
}

impl FileLogStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileLogStorage {
            path: path.as_ref().to_owned(),
            segment: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogStorage for FileLogStorage {
    fn open(&self) -> Result<()> {
        let mut segment = self.segment.lock().unwrap();
        if segment.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;
        let end = scan_valid_end(&mut file)?;
        let size = file.metadata()?.len();
        if end < size {
            warn!(
                "log segment {} has a torn tail, truncate from {} to {}",
                self.path.display(),
                size,
                end
            );
            file.set_len(end)?;
            file.sync_all()?;
        }
        debug!("open log segment {}, end {}", self.path.display(), end);
        *segment = Some(Segment { file, end });
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if let Some(segment) = self.segment.lock().unwrap().take() {
            segment.file.sync_all()?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.segment.lock().unwrap().is_some()
    }

    fn append(&self, block: &[u8]) -> i64 {
        let mut guard = self.segment.lock().unwrap();
        let segment = match guard.as_mut() {
            Some(segment) => segment,
            None => return STORAGE_CLOSED,
        };
        match segment.write_block(block) {
            Ok(address) => address as i64,
            Err(err) => {
                error!("log segment {} append block: {err}", self.path.display());
                // Drop the partial write, the next append starts from the last complete block.
                segment.file.set_len(segment.end).unwrap_or_default();
                APPEND_FAILED
            }
        }
    }

    fn first_block_address(&self) -> Option<i64> {
        let guard = self.segment.lock().unwrap();
        guard
            .as_ref()
            .and_then(|segment| if segment.end > 0 { Some(0) } else { None })
    }

    fn read(&self, address: i64) -> Result<Option<StoredBlock>> {
        let mut guard = self.segment.lock().unwrap();
        let segment = match guard.as_mut() {
            Some(segment) => segment,
            None => return Ok(None),
        };
        if address < 0 || address as u64 >= segment.end {
            return Ok(None);
        }
        segment.file.seek(SeekFrom::Start(address as u64))?;
        match read_block(&mut segment.file)? {
            Some(data) => Ok(Some(StoredBlock {
                next_address: address + (BLOCK_HEADER_SIZE + data.len()) as i64,
                data: Bytes::from(data),
            })),
            None => Err(crate::Error::InvalidData(format!(
                "log segment {} block at {}",
                self.path.display(),
                address
            ))),
        }
    }
}

impl Segment {
    fn write_block(&mut self, block: &[u8]) -> Result<u64> {
        let address = self.end;
        let mut header = [0u8; BLOCK_HEADER_SIZE];
        header[..4].copy_from_slice(&(block.len() as u32).to_le_bytes());
        header[4..].copy_from_slice(&crc32fast::hash(block).to_le_bytes());

        self.file.seek(SeekFrom::Start(address))?;
        self.file.write_all(&header)?;
        self.file.write_all(block)?;
        self.file.sync_data()?;
        self.end = address + (BLOCK_HEADER_SIZE + block.len()) as u64;
        Ok(address)
    }
}

/// Read a block from the current offset of the file. `None` means the block is incomplete
/// or its checksum mismatches.
fn read_block(file: &mut File) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; BLOCK_HEADER_SIZE];
    if !read_exact_or_eof(file, &mut header)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let crc32 = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let remaining = file
        .metadata()?
        .len()
        .saturating_sub(file.stream_position()?);
    if len as u64 > remaining {
        return Ok(None);
    }
    let mut data = vec![0u8; len];
    if !read_exact_or_eof(file, &mut data)? {
        return Ok(None);
    }
    if crc32fast::hash(&data) != crc32 {
        return Ok(None);
    }
    Ok(Some(data))
}

fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> Result<bool> {
    match file.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn scan_valid_end(file: &mut File) -> Result<u64> {
    file.seek(SeekFrom::Start(0))?;
    let mut end = 0;
    while let Some(data) = read_block(file)? {
        end += (BLOCK_HEADER_SIZE + data.len()) as u64;
    }
    Ok(end)
}
