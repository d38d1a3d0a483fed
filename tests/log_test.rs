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

mod helper;

use std::sync::Arc;

use helper::context::{open_mem_stream, TestContext};
use tempdir::TempDir;
use tngp_logstreams::{
    log::{FileLogStorage, LogStorage, FIRST_POSITION},
    Error,
};

use crate::helper::init::{setup_panic_hook, setup_tracing};

#[ctor::ctor]
fn init() {
    setup_panic_hook();
    setup_tracing();
}

#[tokio::test]
async fn positions_are_contiguous_across_writers() {
    let streams = TestContext::new().start();
    let (stream, _) = open_mem_stream(&streams, 1).await;

    let mut tasks = vec![];
    for writer_id in 0..4 {
        let writer = stream.writer();
        tasks.push(tokio::spawn(async move {
            let mut positions = vec![];
            for i in 0..100 {
                let payload = format!("writer-{writer_id}-{i}");
                positions.push(writer.write(payload).await.unwrap());
            }
            positions
        }));
    }

    let mut all = vec![];
    for task in tasks {
        let positions = task.await.unwrap();
        // The records of one writer keep their order.
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        all.extend(positions);
    }
    all.sort_unstable();
    assert_eq!(all, (FIRST_POSITION..FIRST_POSITION + 400).collect::<Vec<_>>());
    assert_eq!(stream.last_position(), Some(400));

    let records = stream
        .new_reader()
        .collect::<tngp_logstreams::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(records.len(), 400);
    assert!(records
        .iter()
        .enumerate()
        .all(|(i, r)| r.position == i as i64 + FIRST_POSITION));
}

#[tokio::test]
async fn failed_block_does_not_consume_positions() {
    let streams = TestContext::new().start();
    let (stream, storage) = open_mem_stream(&streams, 1).await;
    let writer = stream.writer();

    assert_eq!(writer.write(&b"first"[..]).await.unwrap(), 1);
    storage.fail_next_appends(1);
    let err = writer.write(&b"lost"[..]).await.unwrap_err();
    assert!(matches!(
        err,
        Error::AppendFailed {
            stream_id: 1,
            position: 2,
            ..
        }
    ));
    assert_eq!(stream.last_position(), Some(1));

    // Retrying is up to the writer.
    assert_eq!(writer.write(&b"retry"[..]).await.unwrap(), 2);
    let payloads = stream
        .new_reader()
        .map(|r| r.unwrap().payload)
        .collect::<Vec<_>>();
    assert_eq!(payloads, vec![&b"first"[..], &b"retry"[..]]);
}

#[tokio::test]
async fn seek_locates_every_record() {
    // Small blocks, so the stream has many blocks and index entries.
    let streams = TestContext::new().with_block_size(64, 128).start();
    let (stream, storage) = open_mem_stream(&streams, 1).await;
    let writer = stream.writer();
    for i in 0..200 {
        writer.write(format!("record-{i:03}")).await.unwrap();
    }
    assert!(storage.num_blocks() > 50);

    let entries = stream.block_index().snapshot();
    assert!(entries.len() > 10);
    assert!(entries
        .windows(2)
        .all(|w| w[0].position < w[1].position && w[0].address < w[1].address));

    let mut reader = stream.new_reader();
    for position in (1..=200).rev() {
        assert!(reader.seek(position).unwrap());
        let record = reader.next_record().unwrap().unwrap();
        assert_eq!(record.position, position);
        assert_eq!(record.payload, format!("record-{:03}", position - 1).into_bytes());
    }
    assert!(!reader.seek(201).unwrap());
    assert!(reader.next_record().unwrap().is_none());
}

#[tokio::test]
async fn reader_follows_the_tail() {
    let streams = TestContext::new().start();
    let (stream, _) = open_mem_stream(&streams, 1).await;
    let writer = stream.writer();
    let mut reader = stream.new_reader();
    assert!(reader.next_record().unwrap().is_none());

    writer.write(&b"a"[..]).await.unwrap();
    assert_eq!(reader.next_record().unwrap().unwrap().position, 1);
    assert!(reader.next_record().unwrap().is_none());

    writer.write(&b"b"[..]).await.unwrap();
    assert_eq!(reader.next_record().unwrap().unwrap().position, 2);

    reader.seek_to_first();
    assert_eq!(reader.next_record().unwrap().unwrap().position, 1);
}

#[tokio::test]
async fn stream_lifecycle() {
    let streams = TestContext::new().start();
    let (stream, storage) = open_mem_stream(&streams, 1).await;
    assert!(matches!(
        streams.open(1, storage.clone()).await,
        Err(Error::LogStreamAlreadyOpened(1))
    ));
    assert!(matches!(
        streams.close(2).await,
        Err(Error::LogStreamNotFound(2))
    ));

    let writer = stream.writer();
    writer.write(&b"a"[..]).await.unwrap();
    streams.close(1).await.unwrap();
    assert!(!storage.is_open());
    assert!(matches!(
        writer.write(&b"b"[..]).await,
        Err(Error::LogStreamClosed(1))
    ));

    // The stream continues after the recovered tail.
    let stream = streams.open(1, storage.clone()).await.unwrap();
    assert_eq!(stream.last_position(), Some(1));
    assert_eq!(stream.writer().write(&b"c"[..]).await.unwrap(), 2);
}

#[tokio::test]
async fn reopen_keeps_block_index() {
    let streams = TestContext::new().with_block_size(64, 128).start();
    let (stream, storage) = open_mem_stream(&streams, 1).await;
    let writer = stream.writer();
    for i in 0..100 {
        writer.write(format!("record-{i:03}")).await.unwrap();
    }
    let before = stream.block_index().snapshot();
    streams.close(1).await.unwrap();

    let stream = streams.open(1, storage.clone()).await.unwrap();
    assert_eq!(*stream.block_index().snapshot(), *before);
    assert_eq!(stream.last_position(), Some(100));

    for i in 100..200 {
        stream
            .writer()
            .write(format!("record-{i:03}"))
            .await
            .unwrap();
    }
    let mut reader = stream.new_reader();
    assert!(reader.seek(150).unwrap());
    assert_eq!(reader.next_record().unwrap().unwrap().position, 150);
}

#[tokio::test]
async fn recover_file_storage() {
    let dir = TempDir::new("recover_file_storage").unwrap();
    let path = dir.path().join("1.log");
    {
        let streams = TestContext::new().with_block_size(256, 1024).start();
        let storage = Arc::new(FileLogStorage::new(&path));
        let stream = streams.open(1, storage).await.unwrap();
        let writer = stream.writer();
        for i in 0..50 {
            assert_eq!(writer.write(format!("record-{i}")).await.unwrap(), i + 1);
        }
        streams.close(1).await.unwrap();
    }

    let streams = TestContext::new().with_block_size(256, 1024).start();
    let stream = streams
        .open(1, Arc::new(FileLogStorage::new(&path)))
        .await
        .unwrap();
    assert_eq!(stream.last_position(), Some(50));
    assert!(!stream.block_index().is_empty());
    assert_eq!(stream.writer().write(&b"next"[..]).await.unwrap(), 51);

    let mut reader = stream.new_reader();
    assert!(reader.seek(25).unwrap());
    let record = reader.next_record().unwrap().unwrap();
    assert_eq!(record.payload, &b"record-24"[..]);
}

#[tokio::test]
async fn reject_record_larger_than_block() {
    let streams = TestContext::new().with_block_size(64, 128).start();
    let (stream, _) = open_mem_stream(&streams, 1).await;
    assert!(matches!(
        stream.writer().write(vec![0u8; 64]).await,
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(stream.writer().write(vec![0u8; 52]).await.unwrap(), 1);
}
