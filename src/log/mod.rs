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

//! The single writer append pipeline of log streams.
//!
//! Two agents run on dedicated threads. The conductor opens, recovers and closes streams,
//! the appender owns every opened stream and is the only writer of its storage, block index
//! and position counter. Writers hand records to the appender through a bounded queue per
//! stream and get back the assigned position once the block is durable.

mod appender;
mod block_index;
mod conductor;
mod fs;
mod reader;
mod recovery;
mod storage;
mod writer;

use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex,
    },
    thread::JoinHandle,
};

use futures::channel::oneshot;
use tokio::sync::mpsc;
use tracing::warn;

pub use self::{
    appender::LogAppendHandler,
    block_index::{BlockIndex, BlockIndexEntry},
    fs::FileLogStorage,
    reader::LogStreamReader,
    storage::{LogStorage, MemLogStorage, StoredBlock, APPEND_FAILED, STORAGE_CLOSED},
    writer::LogStreamWriter,
};
use self::{
    appender::LogAppender,
    conductor::{ConductorCommand, LogConductor},
};
pub use crate::codec::frame::LogRecord;
use crate::{Error, LogConfig, Result};

/// The position of the first record of a log stream.
pub const FIRST_POSITION: i64 = 1;

/// The entry of the log subsystem. Cloned handles share the same agents, which are stopped
/// once the last handle is dropped.
#[derive(Clone)]
pub struct LogStreams {
    sender: mpsc::UnboundedSender<ConductorCommand>,
    _agents: Arc<Agents>,
}

struct Agents {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl LogStreams {
    pub fn start(cfg: LogConfig) -> Result<LogStreams> {
        if cfg.max_block_size <= crate::codec::frame::FRAME_HEADER_LENGTH {
            return Err(Error::InvalidArgument(format!(
                "max block size {} is too small",
                cfg.max_block_size
            )));
        }

        let (appender, appender_handle) = LogAppender::new(cfg.max_block_size);
        let (sender, receiver) = mpsc::unbounded_channel();
        let conductor = LogConductor::new(cfg, receiver, appender_handle);

        let appender_thread = std::thread::Builder::new()
            .name("log:appender".to_owned())
            .spawn(move || futures::executor::block_on(appender.run()))?;
        let conductor_thread = std::thread::Builder::new()
            .name("log:conductor".to_owned())
            .spawn(move || futures::executor::block_on(conductor.run()))?;

        Ok(LogStreams {
            sender,
            _agents: Arc::new(Agents {
                handles: Mutex::new(vec![conductor_thread, appender_thread]),
            }),
        })
    }

    /// Open the log stream on `storage`, recover its tail and start accepting records.
    pub async fn open(&self, stream_id: u32, storage: Arc<dyn LogStorage>) -> Result<LogStream> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(ConductorCommand::Open {
                stream_id,
                storage,
                sender,
            })
            .map_err(|_| Error::LogStreamClosed(stream_id))?;
        receiver.await?
    }

    /// Close the log stream. The pending records which are not appended yet are rejected.
    pub async fn close(&self, stream_id: u32) -> Result<()> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(ConductorCommand::Close { stream_id, sender })
            .map_err(|_| Error::LogStreamClosed(stream_id))?;
        receiver.await?
    }
}

impl Drop for Agents {
    fn drop(&mut self) {
        // The command sender is dropped before, so the conductor exits, then the appender.
        for handle in self.handles.lock().unwrap().drain(..) {
            if handle.join().is_err() {
                warn!("log agent thread panicked");
            }
        }
    }
}

/// A handle of an opened log stream.
#[derive(Clone)]
pub struct LogStream {
    stream_id: u32,
    storage: Arc<dyn LogStorage>,
    block_index: Arc<BlockIndex>,
    last_position: Arc<AtomicI64>,
    writer: LogStreamWriter,
}

impl LogStream {
    pub(crate) fn new(
        stream_id: u32,
        storage: Arc<dyn LogStorage>,
        block_index: Arc<BlockIndex>,
        last_position: Arc<AtomicI64>,
        writer: LogStreamWriter,
    ) -> Self {
        LogStream {
            stream_id,
            storage,
            block_index,
            last_position,
            writer,
        }
    }

    pub fn id(&self) -> u32 {
        self.stream_id
    }

    pub fn writer(&self) -> LogStreamWriter {
        self.writer.clone()
    }

    pub fn new_reader(&self) -> LogStreamReader {
        LogStreamReader::new(
            self.storage.clone(),
            self.block_index.clone(),
            self.last_position.clone(),
        )
    }

    /// The position of the last durable record.
    pub fn last_position(&self) -> Option<i64> {
        let position = self.last_position.load(Ordering::Acquire);
        if position < FIRST_POSITION {
            None
        } else {
            Some(position)
        }
    }

    pub fn block_index(&self) -> Arc<BlockIndex> {
        self.block_index.clone()
    }
}
