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
    atomic::{AtomicI64, Ordering},
    Arc,
};

use bytes::BytesMut;
use futures::channel::oneshot;
use tokio::sync::{
    mpsc::{self, error::TryRecvError},
    Notify,
};
use tracing::{error, info, warn};

use super::{
    block_index::{BlockIndex, IndexPolicy},
    storage::{LogStorage, APPEND_FAILED},
    writer::PendingRecord,
};
use crate::{codec::frame, metrics::*, record_latency, Error, Result};

/// Appends blocks of a log stream to its storage and maintains the block index.
///
/// REQUIRES: only the appender which owns the stream invokes [`LogAppendHandler::append`].
pub struct LogAppendHandler {
    stream_id: u32,
    storage: Arc<dyn LogStorage>,
    block_index: Arc<BlockIndex>,
    policy: IndexPolicy,
}

impl LogAppendHandler {
    pub fn new(stream_id: u32, storage: Arc<dyn LogStorage>, block_index: Arc<BlockIndex>) -> Self {
        LogAppendHandler::with_policy(
            stream_id,
            storage,
            block_index,
            IndexPolicy::new(crate::LogConfig::default().index_block_size),
        )
    }

    pub(crate) fn with_policy(
        stream_id: u32,
        storage: Arc<dyn LogStorage>,
        block_index: Arc<BlockIndex>,
        policy: IndexPolicy,
    ) -> Self {
        LogAppendHandler {
            stream_id,
            storage,
            block_index,
            policy,
        }
    }

    pub fn with_index_block_size(mut self, index_block_size: usize) -> Self {
        self.policy = IndexPolicy::new(index_block_size);
        self
    }

    /// Durably append a block and returns the bytes written. A failed block is not retried,
    /// the error is returned to the caller.
    ///
    /// Once the storage accepts the block its records are appended, even if the block could
    /// not be indexed. Readers still find it by scanning from the previous entry.
    pub fn append(&mut self, block: &[u8]) -> Result<usize> {
        record_latency!(LOG_APPEND_DURATION_SECONDS);
        let position = frame::first_position(block)?;
        let address = self.storage.append(block);
        if address < 0 {
            LOG_APPEND_FAILED_TOTAL.inc();
            error!(
                "log stream {} append block at position {position}: storage returns {address}",
                self.stream_id
            );
            return Err(Error::AppendFailed {
                stream_id: self.stream_id,
                position,
                code: address,
            });
        }

        if let Err(err) = self
            .policy
            .on_block(&self.block_index, position, address, block.len())
        {
            error!(
                "log stream {} index block at position {position} address {address}: {err}",
                self.stream_id
            );
        }
        LOG_APPEND_BLOCK_TOTAL.inc();
        LOG_APPEND_BYTES_TOTAL.inc_by(block.len() as u64);
        Ok(block.len())
    }
}

/// The state of an opened log stream, owned by the appender once registered.
pub(crate) struct LogContext {
    pub stream_id: u32,
    pub handler: LogAppendHandler,
    pub receiver: mpsc::Receiver<PendingRecord>,
    pub next_position: i64,
    /// The position of the last durable record, published for readers.
    pub last_position: Arc<AtomicI64>,
    /// A record which did not fit into the last block.
    pub carry: Option<PendingRecord>,
}

impl LogContext {
    /// Pull pending records into one block, append it and complete the records. Returns the
    /// number of records consumed.
    fn append_pending(&mut self, max_block_size: usize) -> usize {
        let mut records: Vec<PendingRecord> = vec![];
        let mut block_size = 0;
        let mut next = self.carry.take();
        loop {
            let record = match next.take() {
                Some(record) => record,
                None => match self.receiver.try_recv() {
                    Ok(record) => record,
                    Err(_) => break,
                },
            };
            let len = frame::framed_length(record.payload.len());
            if !records.is_empty() && block_size + len > max_block_size {
                self.carry = Some(record);
                break;
            }
            block_size += len;
            records.push(record);
        }
        if records.is_empty() {
            return 0;
        }

        let first_position = self.next_position;
        let mut block = BytesMut::with_capacity(block_size);
        for (i, record) in records.iter().enumerate() {
            frame::encode_frame(&mut block, first_position + i as i64, &record.payload);
        }

        let num_records = records.len();
        match self.handler.append(&block) {
            Ok(_) => {
                self.next_position += num_records as i64;
                self.last_position
                    .store(self.next_position - 1, Ordering::Release);
                for (i, record) in records.into_iter().enumerate() {
                    record
                        .sender
                        .send(Ok(first_position + i as i64))
                        .unwrap_or_default();
                }
            }
            Err(err) => {
                warn!(
                    "log stream {} fail {num_records} pending records: {err}",
                    self.stream_id
                );
                let code = match err {
                    Error::AppendFailed { code, .. } => code,
                    _ => APPEND_FAILED,
                };
                for record in records {
                    let err = Error::AppendFailed {
                        stream_id: self.stream_id,
                        position: first_position,
                        code,
                    };
                    record.sender.send(Err(err)).unwrap_or_default();
                }
            }
        }
        num_records
    }

    /// Reject all records which are not appended yet.
    fn close(mut self) {
        self.receiver.close();
        let stream_id = self.stream_id;
        let rejected = self.carry.take().into_iter().chain(std::iter::from_fn(|| {
            self.receiver.try_recv().ok()
        }));
        for record in rejected {
            record
                .sender
                .send(Err(Error::LogStreamClosed(stream_id)))
                .unwrap_or_default();
        }
    }
}

pub(crate) enum AppenderCommand {
    Register(Box<LogContext>),
    Unregister {
        stream_id: u32,
        sender: oneshot::Sender<bool>,
    },
}

/// The command queue of the appender.
pub(crate) struct AppenderHandle {
    sender: mpsc::UnboundedSender<AppenderCommand>,
    notify: Arc<Notify>,
}

impl AppenderHandle {
    pub fn register(&self, context: LogContext) -> Result<()> {
        let stream_id = context.stream_id;
        self.sender
            .send(AppenderCommand::Register(Box::new(context)))
            .map_err(|_| Error::LogStreamClosed(stream_id))?;
        self.notify.notify_one();
        Ok(())
    }

    /// Remove the stream from the appender, returns whether it was registered.
    pub async fn unregister(&self, stream_id: u32) -> Result<bool> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(AppenderCommand::Unregister { stream_id, sender })
            .map_err(|_| Error::LogStreamClosed(stream_id))?;
        self.notify.notify_one();
        Ok(receiver.await?)
    }

    pub fn notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Close the command queue and wake the appender, so it could exit.
    pub fn close(self) {
        let notify = self.notify.clone();
        drop(self.sender);
        notify.notify_one();
    }
}

/// The single writer of the registered log streams.
pub(crate) struct LogAppender {
    max_block_size: usize,
    commands: mpsc::UnboundedReceiver<AppenderCommand>,
    notify: Arc<Notify>,
    contexts: Vec<LogContext>,
    closed: bool,
}

impl LogAppender {
    pub fn new(max_block_size: usize) -> (LogAppender, AppenderHandle) {
        let (sender, commands) = mpsc::unbounded_channel();
        let notify = Arc::new(Notify::new());
        let appender = LogAppender {
            max_block_size,
            commands,
            notify: notify.clone(),
            contexts: vec![],
            closed: false,
        };
        (appender, AppenderHandle { sender, notify })
    }

    /// Returns the amount of work done, zero means nothing is pending.
    pub fn do_work(&mut self) -> usize {
        let mut work = self.drain_commands();
        for context in &mut self.contexts {
            work += context.append_pending(self.max_block_size);
        }
        work
    }

    pub async fn run(mut self) {
        info!("log appender is started");
        loop {
            let work = self.do_work();
            if self.closed {
                break;
            }
            if work == 0 {
                self.notify.notified().await;
            }
        }
        for context in std::mem::take(&mut self.contexts) {
            context.close();
        }
        info!("log appender is stopped");
    }

    fn drain_commands(&mut self) -> usize {
        let mut work = 0;
        loop {
            match self.commands.try_recv() {
                Ok(AppenderCommand::Register(context)) => {
                    info!(
                        "log stream {} is registered, next position {}",
                        context.stream_id, context.next_position
                    );
                    self.contexts.push(*context);
                }
                Ok(AppenderCommand::Unregister { stream_id, sender }) => {
                    let found = match self
                        .contexts
                        .iter()
                        .position(|c| c.stream_id == stream_id)
                    {
                        Some(index) => {
                            self.contexts.swap_remove(index).close();
                            info!("log stream {stream_id} is unregistered");
                            true
                        }
                        None => false,
                    };
                    sender.send(found).unwrap_or_default();
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
            work += 1;
        }
        work
    }
}
