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
    collections::{BTreeMap, HashMap},
    ffi::OsStr,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use prost::Message;
use tracing::{debug, error, info, warn};

use super::{
    SnapshotChunk, SnapshotChunkSource, SnapshotConsumer, SnapshotMeta, SnapshotPositions,
    SnapshotStore,
};
use crate::{Error, Result, SnapshotConfig};

const SNAP_PENDING: &str = "pending";
const SNAP_COMPLETED: &str = "snapshots";
const SNAP_META: &str = "META";

/// A snapshot store on the local file system.
///
/// ```text
/// <root>/pending/<snapshot id>/<chunk index>     chunks of restoring snapshots
/// <root>/snapshots/<snapshot id>/<chunk index>   chunks of completed snapshots
/// <root>/snapshots/<snapshot id>/META
/// ```
///
/// A snapshot only becomes visible once its directory is moved under `snapshots`.
pub struct FileSnapshotStore {
    root_dir: PathBuf,
    chunk_size: usize,
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    pending: HashMap<i64, PendingSnapshot>,
    completed: BTreeMap<i64, SnapshotMeta>,
}

struct PendingSnapshot {
    total_count: i32,
    next_index: i32,
    positions: SnapshotPositions,
    checksums: Vec<u32>,
}

impl FileSnapshotStore {
    /// Open the store, load the completed snapshots and discard the pending ones.
    pub fn open<P: AsRef<Path>>(root_dir: P, cfg: &SnapshotConfig) -> Result<FileSnapshotStore> {
        if cfg.chunk_size == 0 {
            return Err(Error::InvalidArgument("snapshot chunk size is zero".to_owned()));
        }

        let root_dir = root_dir.as_ref().to_owned();
        let pending_dir = root_dir.join(SNAP_PENDING);
        if pending_dir.exists() {
            info!("discard pending snapshots under {}", pending_dir.display());
            std::fs::remove_dir_all(&pending_dir)?;
        }
        std::fs::create_dir_all(&pending_dir)?;
        let completed_dir = root_dir.join(SNAP_COMPLETED);
        std::fs::create_dir_all(&completed_dir)?;

        let mut completed = BTreeMap::new();
        for (snapshot_id, snap_dir) in list_numeric_path(&completed_dir)? {
            match read_meta(&snap_dir) {
                Ok(meta)
                    if meta.snapshot_id == snapshot_id && chunks_intact(&snap_dir, &meta) =>
                {
                    completed.insert(snapshot_id, meta);
                }
                _ => {
                    warn!("remove broken snapshot {}", snap_dir.display());
                    std::fs::remove_dir_all(&snap_dir)?;
                }
            }
        }
        debug!(
            "open snapshot store {}, {} snapshots",
            root_dir.display(),
            completed.len()
        );

        Ok(FileSnapshotStore {
            root_dir,
            chunk_size: cfg.chunk_size,
            inner: Mutex::new(StoreInner {
                pending: HashMap::default(),
                completed,
            }),
        })
    }

    /// Take a local snapshot of `data`, split into chunks of the configured size.
    pub fn create_snapshot(
        &self,
        snapshot_id: i64,
        positions: SnapshotPositions,
        data: &[u8],
    ) -> Result<SnapshotMeta> {
        let contents = if data.is_empty() {
            vec![data]
        } else {
            data.chunks(self.chunk_size).collect::<Vec<_>>()
        };
        let total_count = contents.len() as i32;
        for (index, content) in contents.into_iter().enumerate() {
            let chunk = SnapshotChunk::new(
                snapshot_id,
                total_count,
                index as i32,
                positions,
                content.to_owned(),
            );
            if !self.consume_snapshot_chunk(&chunk) {
                self.invalidate_snapshot(snapshot_id);
                return Err(Error::SnapshotChunk {
                    snapshot_id,
                    chunk_index: index as i32,
                    reason: "create snapshot".to_owned(),
                });
            }
        }
        if !self.complete_snapshot(snapshot_id) {
            self.invalidate_snapshot(snapshot_id);
            return Err(Error::CompleteSnapshot(snapshot_id));
        }
        self.snapshot_meta(snapshot_id)
            .ok_or(Error::CompleteSnapshot(snapshot_id))
    }

    /// Read all chunks of a completed snapshot.
    pub fn read_snapshot(&self, snapshot_id: i64) -> Result<Vec<u8>> {
        let meta = self.snapshot_meta(snapshot_id).ok_or_else(|| {
            Error::InvalidArgument(format!("snapshot {snapshot_id} not found"))
        })?;
        let mut data = vec![];
        for index in 0..meta.total_count {
            data.extend_from_slice(&self.read_chunk(snapshot_id, index)?.content);
        }
        Ok(data)
    }

    pub fn snapshot_meta(&self, snapshot_id: i64) -> Option<SnapshotMeta> {
        self.inner
            .lock()
            .unwrap()
            .completed
            .get(&snapshot_id)
            .cloned()
    }

    pub fn latest_snapshot(&self) -> Option<SnapshotMeta> {
        let inner = self.inner.lock().unwrap();
        inner.completed.values().next_back().cloned()
    }

    pub fn snapshot_ids(&self) -> Vec<i64> {
        let inner = self.inner.lock().unwrap();
        inner.completed.keys().cloned().collect()
    }

    fn pending_dir(&self, snapshot_id: i64) -> PathBuf {
        self.root_dir
            .join(SNAP_PENDING)
            .join(format!("{snapshot_id}"))
    }

    fn completed_dir(&self, snapshot_id: i64) -> PathBuf {
        self.root_dir
            .join(SNAP_COMPLETED)
            .join(format!("{snapshot_id}"))
    }

    fn save_chunk(&self, inner: &mut StoreInner, chunk: &SnapshotChunk) -> Result<()> {
        let snapshot_id = chunk.snapshot_id;
        if crc32fast::hash(&chunk.content) != chunk.checksum {
            return Err(Error::InvalidData(format!(
                "snapshot {snapshot_id} chunk {} checksum",
                chunk.chunk_index
            )));
        }
        if inner.completed.contains_key(&snapshot_id) {
            return Err(Error::InvalidArgument(format!(
                "snapshot {snapshot_id} already exists"
            )));
        }
        if chunk.total_count <= 0 {
            return Err(Error::InvalidArgument(format!(
                "snapshot {snapshot_id} has {} chunks",
                chunk.total_count
            )));
        }

        let dir = self.pending_dir(snapshot_id);
        // The first chunk starts the restore over, whatever an abandoned session left behind.
        if chunk.chunk_index == 0 {
            if inner.pending.remove(&snapshot_id).is_some() {
                debug!("snapshot {snapshot_id} restarts from the first chunk");
            }
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
            std::fs::create_dir_all(&dir)?;
            inner.pending.insert(
                snapshot_id,
                PendingSnapshot {
                    total_count: chunk.total_count,
                    next_index: 0,
                    positions: chunk.positions(),
                    checksums: vec![],
                },
            );
        }

        let pending = inner.pending.get_mut(&snapshot_id).ok_or_else(|| {
            Error::InvalidArgument(format!("snapshot {snapshot_id} is not restoring"))
        })?;
        if pending.next_index != chunk.chunk_index {
            return Err(Error::OutOfOrderChunk {
                snapshot_id,
                expected: pending.next_index,
                actual: chunk.chunk_index,
            });
        }
        if pending.total_count != chunk.total_count || pending.positions != chunk.positions() {
            return Err(Error::InvalidData(format!(
                "snapshot {snapshot_id} chunk {} mismatches the first chunk",
                chunk.chunk_index
            )));
        }

        let mut file = std::fs::File::create(dir.join(format!("{}", chunk.chunk_index)))?;
        file.write_all(&chunk.content)?;
        file.sync_all()?;
        pending.checksums.push(chunk.checksum);
        pending.next_index += 1;
        Ok(())
    }

    fn install(&self, inner: &mut StoreInner, snapshot_id: i64) -> Result<()> {
        let pending = inner.pending.remove(&snapshot_id).ok_or_else(|| {
            Error::InvalidArgument(format!("snapshot {snapshot_id} is not restoring"))
        })?;
        if pending.next_index != pending.total_count {
            return Err(Error::InvalidData(format!(
                "snapshot {snapshot_id} received {} of {} chunks",
                pending.next_index, pending.total_count
            )));
        }

        let meta = SnapshotMeta {
            snapshot_id,
            total_count: pending.total_count,
            processed_position: pending.positions.processed_position,
            exported_position: pending.positions.exported_position,
            checksums: pending.checksums,
        };
        let dir = self.pending_dir(snapshot_id);
        std::fs::File::open(&dir)?.sync_all()?;
        stable_meta(&dir, &meta)?;
        std::fs::rename(&dir, self.completed_dir(snapshot_id))?;
        std::fs::File::open(self.root_dir.join(SNAP_COMPLETED))?.sync_all()?;
        inner.completed.insert(snapshot_id, meta);
        Ok(())
    }
}

impl SnapshotConsumer for FileSnapshotStore {
    fn consume_snapshot_chunk(&self, chunk: &SnapshotChunk) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match self.save_chunk(&mut inner, chunk) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "snapshot {} reject chunk {}: {err}",
                    chunk.snapshot_id, chunk.chunk_index
                );
                false
            }
        }
    }

    fn complete_snapshot(&self, snapshot_id: i64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match self.install(&mut inner, snapshot_id) {
            Ok(()) => {
                info!("snapshot {snapshot_id} is installed");
                true
            }
            Err(err) => {
                error!("install snapshot {snapshot_id}: {err}");
                false
            }
        }
    }

    fn invalidate_snapshot(&self, snapshot_id: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending.remove(&snapshot_id);
        let dir = self.pending_dir(snapshot_id);
        if dir.exists() {
            if let Err(err) = std::fs::remove_dir_all(&dir) {
                error!("remove pending snapshot {}: {err}", dir.display());
                return;
            }
        }
        info!("snapshot {snapshot_id} is invalidated");
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn snapshot_positions(&self, snapshot_id: i64) -> Option<SnapshotPositions> {
        self.snapshot_meta(snapshot_id).map(|meta| SnapshotPositions {
            processed_position: meta.processed_position,
            exported_position: meta.exported_position,
        })
    }
}

impl SnapshotChunkSource for FileSnapshotStore {
    fn read_chunk(&self, snapshot_id: i64, chunk_index: i32) -> Result<SnapshotChunk> {
        let meta = self.snapshot_meta(snapshot_id).ok_or_else(|| {
            Error::InvalidArgument(format!("snapshot {snapshot_id} not found"))
        })?;
        let checksum = match meta.checksums.get(chunk_index as usize) {
            Some(checksum) if chunk_index >= 0 => *checksum,
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "snapshot {snapshot_id} has no chunk {chunk_index}"
                )))
            }
        };

        let path = self
            .completed_dir(snapshot_id)
            .join(format!("{chunk_index}"));
        let content = std::fs::read(&path)?;
        if crc32fast::hash(&content) != checksum {
            return Err(Error::InvalidData(format!(
                "snapshot chunk {} checksum",
                path.display()
            )));
        }
        Ok(SnapshotChunk {
            snapshot_id,
            total_count: meta.total_count,
            chunk_index,
            checksum,
            processed_position: meta.processed_position,
            exported_position: meta.exported_position,
            content,
        })
    }
}

fn stable_meta(dir: &Path, meta: &SnapshotMeta) -> Result<()> {
    let tmp = dir.join(format!("{SNAP_META}.tmp"));
    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(&meta.encode_to_vec())?;
    file.sync_all()?;
    std::fs::rename(tmp, dir.join(SNAP_META))?;
    std::fs::File::open(dir)?.sync_all()?;
    Ok(())
}

/// Whether every chunk recorded in `meta` is on disk with the recorded checksum.
fn chunks_intact(dir: &Path, meta: &SnapshotMeta) -> bool {
    if meta.total_count <= 0 || meta.checksums.len() != meta.total_count as usize {
        return false;
    }
    meta.checksums.iter().enumerate().all(|(index, checksum)| {
        match std::fs::read(dir.join(format!("{index}"))) {
            Ok(content) => crc32fast::hash(&content) == *checksum,
            Err(_) => false,
        }
    })
}

fn read_meta(dir: &Path) -> Result<SnapshotMeta> {
    let bytes = std::fs::read(dir.join(SNAP_META))?;
    Ok(SnapshotMeta::decode(bytes.as_slice())?)
}

fn list_numeric_path(root: &Path) -> Result<Vec<(i64, PathBuf)>> {
    let mut values = vec![];
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(id) = path
            .file_name()
            .and_then(OsStr::to_str)
            .and_then(|name| name.parse().ok())
        {
            values.push((id, path));
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    fn positions() -> SnapshotPositions {
        SnapshotPositions {
            processed_position: 30,
            exported_position: 20,
        }
    }

    fn open(dir: &Path, chunk_size: usize) -> FileSnapshotStore {
        FileSnapshotStore::open(dir, &SnapshotConfig { chunk_size }).unwrap()
    }

    #[test]
    fn create_and_read_snapshot() {
        let dir = TempDir::new("create_and_read_snapshot").unwrap();
        let store = open(dir.path(), 4);
        let meta = store.create_snapshot(1, positions(), b"0123456789").unwrap();
        assert_eq!(meta.total_count, 3);
        assert_eq!(store.snapshot_positions(1), Some(positions()));

        let chunk = store.read_chunk(1, 2).unwrap();
        assert_eq!(chunk.content, b"89".to_vec());
        assert_eq!(chunk.total_count, 3);
        assert!(store.read_chunk(1, 3).is_err());
        assert_eq!(store.read_snapshot(1).unwrap(), b"0123456789".to_vec());
        assert!(store.create_snapshot(1, positions(), b"x").is_err());
    }

    #[test]
    fn reject_out_of_order_and_corrupted_chunks() {
        let dir = TempDir::new("reject_out_of_order_chunks").unwrap();
        let store = open(dir.path(), 4);

        let chunk = |index: i32| SnapshotChunk::new(7, 3, index, positions(), vec![index as u8]);
        assert!(!store.consume_snapshot_chunk(&chunk(1)));
        assert!(store.consume_snapshot_chunk(&chunk(0)));
        assert!(!store.consume_snapshot_chunk(&chunk(2)));

        let mut corrupted = chunk(1);
        corrupted.content.push(0);
        assert!(!store.consume_snapshot_chunk(&corrupted));

        assert!(store.consume_snapshot_chunk(&chunk(1)));
        // Not all chunks are received.
        assert!(!store.complete_snapshot(7));
        assert!(store.snapshot_positions(7).is_none());
    }

    #[test]
    fn invalidate_discards_pending_chunks() {
        let dir = TempDir::new("invalidate_discards_pending_chunks").unwrap();
        let store = open(dir.path(), 4);
        let chunk = SnapshotChunk::new(3, 2, 0, positions(), b"abc".to_vec());
        assert!(store.consume_snapshot_chunk(&chunk));
        assert!(dir.path().join("pending/3/0").exists());

        store.invalidate_snapshot(3);
        assert!(!dir.path().join("pending/3").exists());
        assert!(!store.complete_snapshot(3));
        // The restore could start over.
        assert!(store.consume_snapshot_chunk(&chunk));
    }

    #[test]
    fn reopen_recovers_completed_snapshots() {
        let dir = TempDir::new("reopen_recovers_completed_snapshots").unwrap();
        {
            let store = open(dir.path(), 4);
            store.create_snapshot(1, positions(), b"snapshot-1").unwrap();
            store.create_snapshot(2, positions(), b"snapshot-2").unwrap();
            let chunk = SnapshotChunk::new(3, 2, 0, positions(), b"abc".to_vec());
            assert!(store.consume_snapshot_chunk(&chunk));
        }
        // A snapshot without meta.
        std::fs::create_dir_all(dir.path().join("snapshots/4")).unwrap();

        let store = open(dir.path(), 4);
        assert_eq!(store.snapshot_ids(), vec![1, 2]);
        assert_eq!(store.latest_snapshot().unwrap().snapshot_id, 2);
        assert_eq!(store.read_snapshot(2).unwrap(), b"snapshot-2".to_vec());
        assert!(!dir.path().join("pending/3").exists());
        assert!(!dir.path().join("snapshots/4").exists());
    }

    #[test]
    fn reopen_removes_torn_snapshots() {
        let dir = TempDir::new("reopen_removes_torn_snapshots").unwrap();
        {
            let store = open(dir.path(), 4);
            store.create_snapshot(1, positions(), b"0123456789").unwrap();
            store.create_snapshot(2, positions(), b"0123456789").unwrap();
            store.create_snapshot(3, positions(), b"0123456789").unwrap();
        }
        // A chunk whose content never reached the disk, and a lost chunk.
        std::fs::write(dir.path().join("snapshots/1/1"), b"").unwrap();
        std::fs::remove_file(dir.path().join("snapshots/2/2")).unwrap();

        let store = open(dir.path(), 4);
        assert_eq!(store.snapshot_ids(), vec![3]);
        assert!(store.snapshot_positions(1).is_none());
        assert!(store.snapshot_positions(2).is_none());
        assert!(!dir.path().join("snapshots/1").exists());
        assert!(!dir.path().join("snapshots/2").exists());

        // The removed snapshot could be restored again.
        let chunk = SnapshotChunk::new(1, 1, 0, positions(), b"abc".to_vec());
        assert!(store.consume_snapshot_chunk(&chunk));
        assert!(store.complete_snapshot(1));
        assert_eq!(store.read_snapshot(1).unwrap(), b"abc".to_vec());
    }

    #[test]
    fn first_chunk_restarts_abandoned_restore() {
        let dir = TempDir::new("first_chunk_restarts_abandoned_restore").unwrap();
        let store = open(dir.path(), 4);
        let chunk = |index: i32| SnapshotChunk::new(5, 2, index, positions(), vec![index as u8]);

        // The session stops after the first chunk without invalidating.
        assert!(store.consume_snapshot_chunk(&chunk(0)));

        assert!(store.consume_snapshot_chunk(&chunk(0)));
        assert!(store.consume_snapshot_chunk(&chunk(1)));
        assert!(store.complete_snapshot(5));
        assert_eq!(store.read_snapshot(5).unwrap(), vec![0u8, 1]);
    }
}
