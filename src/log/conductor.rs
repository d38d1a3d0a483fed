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
    collections::HashMap,
    sync::{atomic::AtomicI64, Arc},
};

use futures::channel::oneshot;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{
    appender::{AppenderHandle, LogAppendHandler, LogContext},
    block_index::BlockIndex,
    recovery::{index_matches, recover_log},
    storage::LogStorage,
    writer::LogStreamWriter,
    LogStream,
};
use crate::{Error, LogConfig, Result};

pub(crate) enum ConductorCommand {
    Open {
        stream_id: u32,
        storage: Arc<dyn LogStorage>,
        sender: oneshot::Sender<Result<LogStream>>,
    },
    Close {
        stream_id: u32,
        sender: oneshot::Sender<Result<()>>,
    },
}

struct OpenedLog {
    storage: Arc<dyn LogStorage>,
    block_index: Arc<BlockIndex>,
}

/// Owns the lifecycle of log streams. It is the only one registers streams to the appender.
pub(crate) struct LogConductor {
    cfg: LogConfig,
    commands: mpsc::UnboundedReceiver<ConductorCommand>,
    appender: AppenderHandle,
    opened: HashMap<u32, OpenedLog>,
    /// The block indexes of closed streams, reused if the stream is opened again.
    retained: HashMap<u32, Arc<BlockIndex>>,
}

impl LogConductor {
    pub fn new(
        cfg: LogConfig,
        commands: mpsc::UnboundedReceiver<ConductorCommand>,
        appender: AppenderHandle,
    ) -> Self {
        LogConductor {
            cfg,
            commands,
            appender,
            opened: HashMap::default(),
            retained: HashMap::default(),
        }
    }

    pub async fn run(mut self) {
        info!("log conductor is started");
        while let Some(cmd) = self.commands.recv().await {
            match cmd {
                ConductorCommand::Open {
                    stream_id,
                    storage,
                    sender,
                } => {
                    let result = self.open(stream_id, storage);
                    sender.send(result).unwrap_or_default();
                }
                ConductorCommand::Close { stream_id, sender } => {
                    let result = self.close(stream_id).await;
                    sender.send(result).unwrap_or_default();
                }
            }
        }

        for (stream_id, log) in std::mem::take(&mut self.opened) {
            if let Err(err) = self.appender.unregister(stream_id).await {
                warn!("log stream {stream_id} unregister: {err}");
            }
            if let Err(err) = log.storage.close() {
                warn!("log stream {stream_id} close storage: {err}");
            }
        }
        self.appender.close();
        info!("log conductor is stopped");
    }

    fn open(&mut self, stream_id: u32, storage: Arc<dyn LogStorage>) -> Result<LogStream> {
        if self.opened.contains_key(&stream_id) {
            return Err(Error::LogStreamAlreadyOpened(stream_id));
        }

        storage.open()?;
        match self.register(stream_id, storage.clone()) {
            Ok(stream) => Ok(stream),
            Err(err) => {
                warn!("log stream {stream_id} open: {err}");
                storage.close().unwrap_or_default();
                Err(err)
            }
        }
    }

    fn register(&mut self, stream_id: u32, storage: Arc<dyn LogStorage>) -> Result<LogStream> {
        let block_index = match self.retained.remove(&stream_id) {
            Some(index) if index_matches(storage.as_ref(), &index)? => index,
            _ => Arc::new(BlockIndex::new()),
        };
        let recovered = recover_log(
            stream_id,
            storage.as_ref(),
            &block_index,
            self.cfg.index_block_size,
        )?;

        let next_position = recovered.next_position();
        let last_position = Arc::new(AtomicI64::new(next_position - 1));
        let (sender, receiver) = mpsc::channel(self.cfg.pending_record_capacity.max(1));
        let handler = LogAppendHandler::with_policy(
            stream_id,
            storage.clone(),
            block_index.clone(),
            recovered.policy,
        );
        self.appender.register(LogContext {
            stream_id,
            handler,
            receiver,
            next_position,
            last_position: last_position.clone(),
            carry: None,
        })?;

        self.opened.insert(
            stream_id,
            OpenedLog {
                storage: storage.clone(),
                block_index: block_index.clone(),
            },
        );
        info!("log stream {stream_id} is opened, next position {next_position}");

        let writer = LogStreamWriter::new(
            stream_id,
            self.cfg.max_block_size,
            sender,
            self.appender.notify(),
        );
        Ok(LogStream::new(
            stream_id,
            storage,
            block_index,
            last_position,
            writer,
        ))
    }

    /// Unregister the stream from the appender first, then close the storage.
    async fn close(&mut self, stream_id: u32) -> Result<()> {
        let log = self
            .opened
            .remove(&stream_id)
            .ok_or(Error::LogStreamNotFound(stream_id))?;
        self.appender.unregister(stream_id).await?;
        log.storage.close()?;
        self.retained.insert(stream_id, log.block_index);
        info!("log stream {stream_id} is closed");
        Ok(())
    }
}
