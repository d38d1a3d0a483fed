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

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid argument {0}")]
    InvalidArgument(String),

    #[error("invalid {0} data")]
    InvalidData(String),

    #[error("log stream {0} not found")]
    LogStreamNotFound(u32),

    #[error("log stream {0} already opened")]
    LogStreamAlreadyOpened(u32),

    #[error("log stream {0} is closed")]
    LogStreamClosed(u32),

    #[error("log stream {stream_id} append block at position {position}: storage returns {code}")]
    AppendFailed {
        stream_id: u32,
        position: i64,
        code: i64,
    },

    #[error("routing info is not initialized")]
    RoutingNotInitialized,

    #[error("routing info is already initialized")]
    RoutingAlreadyInitialized,

    #[error("no desired routing state was staged")]
    NoDesiredRoutingState,

    #[error("snapshot {snapshot_id} chunk {chunk_index}: {reason}")]
    SnapshotChunk {
        snapshot_id: i64,
        chunk_index: i32,
        reason: String,
    },

    #[error("snapshot {snapshot_id} expect chunk {expected}, but got {actual}")]
    OutOfOrderChunk {
        snapshot_id: i64,
        expected: i32,
        actual: i32,
    },

    #[error("complete snapshot {0} is rejected")]
    CompleteSnapshot(i64),

    #[error("transport {0}")]
    Transport(String),

    #[error("aborted")]
    Aborted,

    #[error("canceled")]
    Canceled,

    #[error("io {0}")]
    Io(#[from] std::io::Error),

    #[error("decode {0}")]
    Decode(#[from] prost::DecodeError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The code carried by an error response on the wire.
    pub fn code(&self) -> u16 {
        match self {
            Error::InvalidArgument(_) => 1,
            Error::InvalidData(_) | Error::Decode(_) => 2,
            Error::LogStreamNotFound(_) => 3,
            Error::LogStreamAlreadyOpened(_) => 4,
            Error::LogStreamClosed(_) => 5,
            Error::AppendFailed { .. } => 6,
            Error::RoutingNotInitialized
            | Error::RoutingAlreadyInitialized
            | Error::NoDesiredRoutingState => 7,
            Error::SnapshotChunk { .. }
            | Error::OutOfOrderChunk { .. }
            | Error::CompleteSnapshot(_) => 8,
            Error::Transport(_) => 9,
            Error::Aborted | Error::Canceled => 10,
            Error::Io(_) => 11,
        }
    }
}

impl From<futures::channel::oneshot::Canceled> for Error {
    fn from(_: futures::channel::oneshot::Canceled) -> Self {
        Error::Canceled
    }
}
