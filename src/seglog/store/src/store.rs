// Copyright 2026 The Seglog Authors.
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
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use seglog_common::{
    BackupSession, Error, FreeRequest, Result, SegmentId, ServerId, SessionRef, WriteFlags,
    WriteRequest,
};
use tokio::sync::watch;

use crate::trace::StoreTrace;

struct ReplicaFile {
    data: Vec<u8>,
    closed: bool,
    primary: bool,
}

/// A replica as currently stored by a backup.
#[derive(Debug, Clone)]
pub struct ReplicaInfo {
    pub data: Bytes,
    pub closed: bool,
    pub primary: bool,
}

#[derive(Default)]
struct HoldState {
    all: bool,
    segments: HashSet<SegmentId>,
}

struct StoreInner {
    replicas: Mutex<HashMap<(ServerId, SegmentId), ReplicaFile>>,
    held: Mutex<HoldState>,
    /// Bumped on every hold-state change to wake parked writes.
    hold_changed: watch::Sender<()>,
    fail_writes: AtomicU32,
    fail_frees: AtomicU32,
}

/// One simulated backup server, keeping its replicas in memory.
///
/// Honours the backup write contract: `OPEN` creates a replica and is
/// idempotent for a matching pair, writes must be byte-exact at the next
/// offset, a closed replica accepts no further writes, and frees are
/// idempotent. Hold gates and one-shot fault injection let tests delay
/// acks or fail rpcs at chosen points; every request is recorded in the
/// shared trace at arrival, before any gate.
#[derive(Clone)]
pub struct MemStore {
    server_id: ServerId,
    trace: StoreTrace,
    inner: Arc<StoreInner>,
}

impl MemStore {
    pub fn new(server_id: ServerId, trace: StoreTrace) -> Self {
        let (hold_changed, _) = watch::channel(());
        MemStore {
            server_id,
            trace,
            inner: Arc::new(StoreInner {
                replicas: Mutex::new(HashMap::new()),
                held: Mutex::new(HoldState::default()),
                hold_changed,
                fail_writes: AtomicU32::new(0),
                fail_frees: AtomicU32::new(0),
            }),
        }
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    pub fn session(&self) -> SessionRef {
        Arc::new(self.clone())
    }

    /// Park every incoming write until [`MemStore::release_writes`].
    pub fn hold_writes(&self) {
        self.inner.held.lock().unwrap().all = true;
        self.inner.hold_changed.send_replace(());
    }

    pub fn release_writes(&self) {
        self.inner.held.lock().unwrap().all = false;
        self.inner.hold_changed.send_replace(());
    }

    /// Park incoming writes for one segment only.
    pub fn hold_segment_writes(&self, segment_id: SegmentId) {
        self.inner.held.lock().unwrap().segments.insert(segment_id);
        self.inner.hold_changed.send_replace(());
    }

    pub fn release_segment_writes(&self, segment_id: SegmentId) {
        self.inner.held.lock().unwrap().segments.remove(&segment_id);
        self.inner.hold_changed.send_replace(());
    }

    /// Fail the next write with a transport error, before it is applied.
    pub fn fail_next_write(&self) {
        self.inner.fail_writes.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fail_next_free(&self) {
        self.inner.fail_frees.fetch_add(1, Ordering::SeqCst);
    }

    pub fn replica(&self, master_id: ServerId, segment_id: SegmentId) -> Option<ReplicaInfo> {
        let replicas = self.inner.replicas.lock().unwrap();
        replicas.get(&(master_id, segment_id)).map(|file| ReplicaInfo {
            data: Bytes::copy_from_slice(&file.data),
            closed: file.closed,
            primary: file.primary,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.inner.replicas.lock().unwrap().is_empty()
    }

    fn is_held(&self, segment_id: SegmentId) -> bool {
        let held = self.inner.held.lock().unwrap();
        held.all || held.segments.contains(&segment_id)
    }

    async fn wait_released(&self, segment_id: SegmentId) {
        let mut rx = self.inner.hold_changed.subscribe();
        loop {
            if !self.is_held(segment_id) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    async fn apply_write(&self, req: WriteRequest) -> Result<()> {
        self.wait_released(req.segment_id).await;
        if take_one(&self.inner.fail_writes) {
            return Err(Error::transport("injected write failure"));
        }

        let mut replicas = self.inner.replicas.lock().unwrap();
        let key = (req.master_id, req.segment_id);
        if req.flags.contains(WriteFlags::OPEN) {
            if let Some(file) = replicas.get(&key) {
                // A retransmitted open for the matching pair is
                // idempotent.
                if file.data.len() >= req.data.len() {
                    debug!(
                        "backup {}: duplicate open of segment {}",
                        self.server_id, req.segment_id
                    );
                    return Ok(());
                }
                return Err(Error::protocol(format!(
                    "conflicting reopen of segment {}",
                    req.segment_id
                )));
            }
            replicas.insert(
                key,
                ReplicaFile {
                    data: Vec::new(),
                    closed: false,
                    primary: req.flags.contains(WriteFlags::PRIMARY),
                },
            );
        }

        let file = match replicas.get_mut(&key) {
            Some(file) => file,
            None => {
                return Err(Error::protocol(format!(
                    "segment {} is not open on backup {}",
                    req.segment_id, self.server_id
                )))
            }
        };
        if file.closed {
            return Err(Error::protocol(format!(
                "segment {} is closed on backup {}",
                req.segment_id, self.server_id
            )));
        }
        if req.offset as usize != file.data.len() {
            return Err(Error::protocol(format!(
                "non-contiguous write to segment {}: offset {} with {} bytes stored",
                req.segment_id,
                req.offset,
                file.data.len()
            )));
        }

        file.data.extend_from_slice(&req.data);
        if req.flags.contains(WriteFlags::CLOSE) {
            file.closed = true;
            debug!(
                "backup {}: segment {} closed at {} bytes",
                self.server_id,
                req.segment_id,
                file.data.len()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl BackupSession for MemStore {
    async fn write(&self, req: WriteRequest) -> Result<()> {
        self.trace.begin_write(self.server_id, &req);
        let result = self.apply_write(req).await;
        self.trace.end_write();
        result
    }

    async fn free(&self, req: FreeRequest) -> Result<()> {
        self.trace.record_free(self.server_id, &req);
        if take_one(&self.inner.fail_frees) {
            return Err(Error::transport("injected free failure"));
        }
        let mut replicas = self.inner.replicas.lock().unwrap();
        // Idempotent by construction.
        replicas.remove(&(req.master_id, req.segment_id));
        Ok(())
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemStore {
        MemStore::new(ServerId::new(1), StoreTrace::new())
    }

    fn write_req(segment: u64, offset: u32, data: &'static [u8], flags: WriteFlags) -> WriteRequest {
        WriteRequest {
            master_id: ServerId::new(9),
            segment_id: SegmentId::new(segment),
            offset,
            data: Bytes::from_static(data),
            flags,
        }
    }

    #[tokio::test]
    async fn open_is_idempotent_for_a_matching_pair() {
        let store = store();
        let req = write_req(1, 0, b"head", WriteFlags::OPEN);
        store.write(req.clone()).await.unwrap();
        store.write(req).await.unwrap();

        let info = store.replica(ServerId::new(9), SegmentId::new(1)).unwrap();
        assert_eq!(&info.data[..], b"head");
    }

    #[tokio::test]
    async fn writes_must_be_contiguous() {
        let store = store();
        store
            .write(write_req(1, 0, b"head", WriteFlags::OPEN))
            .await
            .unwrap();
        let err = store
            .write(write_req(1, 8, b"tail", WriteFlags::NONE))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        store
            .write(write_req(1, 4, b"tail", WriteFlags::NONE))
            .await
            .unwrap();
        let info = store.replica(ServerId::new(9), SegmentId::new(1)).unwrap();
        assert_eq!(&info.data[..], b"headtail");
    }

    #[tokio::test]
    async fn closed_replicas_reject_writes() {
        let store = store();
        store
            .write(write_req(1, 0, b"all", WriteFlags::OPEN | WriteFlags::CLOSE))
            .await
            .unwrap();
        let err = store
            .write(write_req(1, 3, b"more", WriteFlags::NONE))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(store.replica(ServerId::new(9), SegmentId::new(1)).unwrap().closed);
    }

    #[tokio::test]
    async fn unopened_segments_reject_writes() {
        let store = store();
        let err = store
            .write(write_req(1, 0, b"data", WriteFlags::NONE))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn free_is_idempotent() {
        let store = store();
        store
            .write(write_req(1, 0, b"head", WriteFlags::OPEN))
            .await
            .unwrap();
        let req = FreeRequest {
            master_id: ServerId::new(9),
            segment_id: SegmentId::new(1),
        };
        store.free(req.clone()).await.unwrap();
        store.free(req).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn injected_failure_hits_once() {
        let store = store();
        store.fail_next_write();
        let req = write_req(1, 0, b"head", WriteFlags::OPEN);
        assert!(matches!(
            store.write(req.clone()).await,
            Err(Error::Transport(_))
        ));
        store.write(req).await.unwrap();
    }
}
