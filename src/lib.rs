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

//! The event log subsystem of a partitioned, replicated workflow broker.
//!
//! - [`codec`]: the 16 bytes message envelope and the log record frames.
//! - [`log`]: the single writer append pipeline, block index and readers.
//! - [`routing`]: the current/desired partition routing state.
//! - [`snap`]: chunked snapshot restore followed by log suffix replication.
//! - [`dispatch`]: schema/template based request dispatching.

pub mod codec;
pub mod dispatch;
pub mod log;
pub mod routing;
pub mod snap;

mod config;
mod error;
mod metrics;

pub use async_trait::async_trait;

pub use self::{
    config::{Config, LogConfig, RoutingConfig, SnapshotConfig},
    error::{Error, Result},
};
