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

use bytes::Bytes;
use futures::channel::oneshot;
use tokio::sync::{mpsc, Notify};

use crate::{codec::frame, Error, Result};

/// A record waiting for the appender.
pub(crate) struct PendingRecord {
    pub payload: Bytes,
    pub sender: oneshot::Sender<Result<i64>>,
}

/// Enqueues records into a log stream.
///
/// Records written through the same writer are appended in the order of the calls; once
/// the pending queue of the stream is full, `write` waits for the appender to catch up.
#[derive(Clone)]
pub struct LogStreamWriter {
    stream_id: u32,
    max_block_size: usize,
    sender: mpsc::Sender<PendingRecord>,
    notify: Arc<Notify>,
}

impl LogStreamWriter {
    pub(crate) fn new(
        stream_id: u32,
        max_block_size: usize,
        sender: mpsc::Sender<PendingRecord>,
        notify: Arc<Notify>,
    ) -> Self {
        LogStreamWriter {
            stream_id,
            max_block_size,
            sender,
            notify,
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Append a record and returns its position once the record is durable.
    ///
    /// A record of a failed block resolves with [`Error::AppendFailed`], retrying is up to
    /// the caller.
    pub async fn write(&self, payload: impl Into<Bytes>) -> Result<i64> {
        let payload = payload.into();
        if frame::framed_length(payload.len()) > self.max_block_size {
            return Err(Error::InvalidArgument(format!(
                "record of {} bytes exceeds the max block size {}",
                payload.len(),
                self.max_block_size
            )));
        }

        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(PendingRecord { payload, sender })
            .await
            .map_err(|_| Error::LogStreamClosed(self.stream_id))?;
        self.notify.notify_one();
        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(Error::LogStreamClosed(self.stream_id)),
        }
    }
}
