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
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use prost::Message;

use super::{CorrelationStrategy, RoutingTable};
use crate::{Error, Result};

#[derive(Clone, PartialEq, Message)]
pub struct RoutingTableRow {
    #[prost(uint32, repeated, tag = "1")]
    pub partitions: Vec<u32>,
    #[prost(oneof = "routing_table_row::Correlation", tags = "2")]
    pub correlation: Option<routing_table_row::Correlation>,
}

pub mod routing_table_row {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Correlation {
        #[prost(message, tag = "2")]
        HashMod(super::HashModRow),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct HashModRow {
    #[prost(uint32, tag = "1")]
    pub partition_count: u32,
}

impl From<&RoutingTable> for RoutingTableRow {
    fn from(table: &RoutingTable) -> Self {
        let correlation = match table.correlation {
            CorrelationStrategy::HashMod { partition_count } => {
                routing_table_row::Correlation::HashMod(HashModRow { partition_count })
            }
        };
        RoutingTableRow {
            partitions: table.partitions.iter().cloned().collect(),
            correlation: Some(correlation),
        }
    }
}

impl TryFrom<RoutingTableRow> for RoutingTable {
    type Error = Error;

    fn try_from(row: RoutingTableRow) -> Result<Self> {
        let correlation = match row.correlation {
            Some(routing_table_row::Correlation::HashMod(HashModRow { partition_count })) => {
                CorrelationStrategy::hash_mod(partition_count)
            }
            None => {
                return Err(Error::InvalidData(
                    "routing table row without correlation".to_owned(),
                ))
            }
        };
        RoutingTable::new(row.partitions.into_iter().collect(), correlation)
            .map_err(|err| Error::InvalidData(format!("routing table row: {err}")))
    }
}

/// The logical keys of the routing rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingKey {
    Current,
    Desired,
}

impl RoutingKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingKey::Current => "CURRENT",
            RoutingKey::Desired => "DESIRED",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoutingWrite {
    Put { key: RoutingKey, value: Vec<u8> },
    Delete { key: RoutingKey },
}

/// Writes applied all-or-nothing by [`RoutingStore::write`].
#[derive(Debug, Default, Clone)]
pub struct RoutingWriteBatch {
    writes: Vec<RoutingWrite>,
}

impl RoutingWriteBatch {
    pub fn put(&mut self, key: RoutingKey, table: &RoutingTable) {
        let value = RoutingTableRow::from(table).encode_to_vec();
        self.writes.push(RoutingWrite::Put { key, value });
    }

    pub fn delete(&mut self, key: RoutingKey) {
        self.writes.push(RoutingWrite::Delete { key });
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[RoutingWrite] {
        &self.writes
    }
}

/// The persistence of routing rows.
pub trait RoutingStore: Send + Sync {
    fn get(&self, key: RoutingKey) -> Result<Option<Vec<u8>>>;

    /// Apply the batch atomically.
    fn write(&self, batch: RoutingWriteBatch) -> Result<()>;
}

pub(super) fn load_table<S: RoutingStore + ?Sized>(
    store: &S,
    key: RoutingKey,
) -> Result<Option<RoutingTable>> {
    match store.get(key)? {
        Some(value) => {
            let row = RoutingTableRow::decode(value.as_slice())?;
            Ok(Some(RoutingTable::try_from(row)?))
        }
        None => Ok(None),
    }
}

#[derive(Default)]
pub struct MemRoutingStore {
    rows: Mutex<HashMap<&'static str, Vec<u8>>>,
    fail_next_write: AtomicBool,
}

impl MemRoutingStore {
    pub fn new() -> Self {
        MemRoutingStore::default()
    }

    /// The next write is rejected without applying any of its writes.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }
}

impl RoutingStore for MemRoutingStore {
    fn get(&self, key: RoutingKey) -> Result<Option<Vec<u8>>> {
        Ok(self.rows.lock().unwrap().get(key.as_str()).cloned())
    }

    fn write(&self, batch: RoutingWriteBatch) -> Result<()> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected routing store failure",
            )));
        }
        let mut rows = self.rows.lock().unwrap();
        for write in batch.writes {
            match write {
                RoutingWrite::Put { key, value } => {
                    rows.insert(key.as_str(), value);
                }
                RoutingWrite::Delete { key } => {
                    rows.remove(key.as_str());
                }
            }
        }
        Ok(())
    }
}

impl<S: RoutingStore + ?Sized> RoutingStore for std::sync::Arc<S> {
    fn get(&self, key: RoutingKey) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn write(&self, batch: RoutingWriteBatch) -> Result<()> {
        (**self).write(batch)
    }
}
