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
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, Weak,
    },
    thread,
    time::Duration,
};

use log::{debug, error, info};
use seglog_common::{
    FreeRequest, Progress, SegmentId, SegmentSource, ServerId, SessionRef, WriteRequest,
};
use tokio::runtime::Handle;

use crate::{
    core::{FreeRpc, ReplicatedSegment, TaskQueue, WriteRpc},
    opt::ManagerOption,
    selector::BackupSelector,
    tracker::BackupTracker,
};

pub(crate) struct Shared {
    pub inner: Mutex<ManagerInner>,
    /// Signalled whenever new work may exist: a log-module mutation, an
    /// rpc completion, a membership change, or shutdown.
    pub work_available: Condvar,
}

/// All replication state, guarded by the one manager mutex. The state
/// machine never runs in parallel with itself or with a mutating caller.
pub(crate) struct ManagerInner {
    pub master_id: ServerId,
    pub opt: ManagerOption,
    runtime: Handle,
    shared: Weak<Shared>,

    pub tracker: BackupTracker,
    pub selector: BackupSelector,
    pub tasks: TaskQueue,
    pub segments: HashMap<SegmentId, ReplicatedSegment>,

    /// Write rpcs outstanding across all segments; bounded by
    /// `opt.max_write_rpcs_in_flight`. Mutated only under the mutex.
    pub write_rpcs_in_flight: u32,
}

impl ManagerInner {
    /// Drive one round of replication work: snapshot the scheduled set
    /// and step every segment in it once.
    pub fn proceed(&mut self) {
        for segment_id in self.tasks.take_scheduled() {
            self.perform_task(segment_id);
        }
        debug_assert!(self.write_rpcs_in_flight <= self.opt.max_write_rpcs_in_flight);
    }

    fn perform_task(&mut self, segment_id: SegmentId) {
        // The segment leaves the table for the duration of its step so
        // the step can reach its following segment through the table.
        let mut segment = match self.segments.remove(&segment_id) {
            Some(segment) => segment,
            None => return,
        };
        segment.perform_task(self);
        if segment.free_queued && !self.tasks.is_scheduled(segment_id) {
            // Every replica is cleaned up; destroy the segment.
            debug!("segment {} fully freed", segment_id);
        } else {
            self.segments.insert(segment_id, segment);
        }
    }

    pub fn issue_write(
        &self,
        segment_id: SegmentId,
        session: SessionRef,
        req: WriteRequest,
    ) -> WriteRpc {
        WriteRpc::issue(&self.runtime, self.shared.clone(), segment_id, session, req)
    }

    pub fn issue_free(
        &self,
        segment_id: SegmentId,
        session: SessionRef,
        req: FreeRequest,
    ) -> FreeRpc {
        FreeRpc::issue(&self.runtime, self.shared.clone(), segment_id, session, req)
    }
}

/// Creates and owns every replicated segment of one master and drives
/// their replication to backups.
///
/// The log module opens segments here and then talks to the returned
/// [`SegmentHandle`]s; a background driver thread (or any caller of
/// [`ReplicaManager::proceed`]) advances the per-segment state machines,
/// issuing new backup rpcs as permitted and reaping completed ones.
pub struct ReplicaManager {
    shared: Arc<Shared>,
    exit_flag: Arc<AtomicBool>,
    driver: Option<thread::JoinHandle<()>>,
}

impl ReplicaManager {
    pub fn new(master_id: ServerId, opt: ManagerOption, runtime: Handle) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| Shared {
            inner: Mutex::new(ManagerInner {
                master_id,
                opt,
                runtime,
                shared: weak.clone(),
                tracker: BackupTracker::default(),
                selector: BackupSelector::new(),
                tasks: TaskQueue::default(),
                segments: HashMap::new(),
                write_rpcs_in_flight: 0,
            }),
            work_available: Condvar::new(),
        });
        ReplicaManager {
            shared,
            exit_flag: Arc::new(AtomicBool::new(false)),
            driver: None,
        }
    }

    /// Tell the engine about a backup the membership layer reports as
    /// reachable.
    pub fn insert_backup(
        &self,
        id: ServerId,
        session: SessionRef,
        expected_read_mbytes_per_sec: u32,
    ) {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.tracker.insert(id, session, expected_read_mbytes_per_sec);
        drop(inner);
        // A new backup may unblock replicas waiting for placement.
        self.shared.work_available.notify_all();
    }

    pub fn remove_backup(&self, id: ServerId) {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.tracker.remove(id);
    }

    /// Construct a segment, schedule the replication of its opening
    /// bytes, and hand the log module its handle. Segment ids must not
    /// repeat within this master's lifetime.
    pub fn open_segment(
        &self,
        segment_id: SegmentId,
        source: Arc<dyn SegmentSource>,
        open_len: u32,
    ) -> SegmentHandle {
        let mut inner = self.shared.inner.lock().unwrap();
        assert!(
            !inner.segments.contains_key(&segment_id),
            "segment ids are unique within a master's lifetime"
        );
        debug!("opening segment {} ({} opening bytes)", segment_id, open_len);
        let num_replicas = inner.opt.num_replicas;
        inner.segments.insert(
            segment_id,
            ReplicatedSegment::new(segment_id, source, open_len, num_replicas),
        );
        inner.tasks.schedule(segment_id);
        drop(inner);
        self.shared.work_available.notify_all();
        SegmentHandle {
            segment_id,
            shared: self.shared.clone(),
        }
    }

    /// Block until every live segment is fully durable on all its
    /// replicas, cooperatively driving the task loop while waiting.
    /// Segments already queued for freeing are not waited on.
    pub fn sync(&self) {
        loop {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner
                .segments
                .values()
                .all(|segment| segment.free_queued || segment.is_synced())
            {
                return;
            }
            inner.proceed();
            drop(inner);
            thread::yield_now();
        }
    }

    /// Drive one round of replication work. Normally the background
    /// driver calls this; callers that have not started the driver (unit
    /// tests, single-threaded embeddings) call it directly.
    pub fn proceed(&self) {
        self.shared.inner.lock().unwrap().proceed();
    }

    pub fn segment_count(&self) -> usize {
        self.shared.inner.lock().unwrap().segments.len()
    }

    /// Start the background thread that repeatedly drives the task loop.
    pub fn start_driver(&mut self) {
        if self.driver.is_some() {
            return;
        }
        info!("starting replication driver");
        let shared = self.shared.clone();
        let exit_flag = self.exit_flag.clone();
        self.driver = Some(thread::spawn(move || Self::drive(shared, exit_flag)));
    }

    fn drive(shared: Arc<Shared>, exit_flag: Arc<AtomicBool>) {
        let mut inner = shared.inner.lock().unwrap();
        while !exit_flag.load(Ordering::Acquire) {
            inner.proceed();
            if inner.tasks.is_idle() {
                inner = shared.work_available.wait(inner).unwrap();
            } else {
                // Pending work is usually waiting on rpc completions;
                // back off briefly rather than spin on the mutex.
                let (guard, _) = shared
                    .work_available
                    .wait_timeout(inner, Duration::from_millis(1))
                    .unwrap();
                inner = guard;
            }
        }
    }
}

impl Drop for ReplicaManager {
    fn drop(&mut self) {
        self.exit_flag.store(true, Ordering::Release);
        self.shared.work_available.notify_all();
        if let Some(driver) = self.driver.take() {
            driver.join().unwrap_or_default();
        }
    }
}

/// The log module's handle to one replicated segment.
///
/// All mutations run under the manager mutex, so they never race with the
/// state machine. [`SegmentHandle::free`] consumes the handle: no call
/// can observe a segment after its free cycle has been requested.
pub struct SegmentHandle {
    segment_id: SegmentId,
    shared: Arc<Shared>,
}

impl SegmentHandle {
    pub fn id(&self) -> SegmentId {
        self.segment_id
    }

    /// Queue the bytes `[0, offset)` of the segment for replication.
    /// Offsets are cumulative and monotonic; the data becomes durable
    /// once a matching [`SegmentHandle::sync`] returns.
    pub fn write(&self, offset: u32) {
        let mut inner = self.shared.inner.lock().unwrap();
        if let Some(segment) = inner.segments.get_mut(&self.segment_id) {
            // Immutable after close; offsets monotonically increase.
            assert!(!segment.queued.close, "write to a closed segment");
            assert!(
                offset >= segment.queued.bytes,
                "segment write offsets must not move backwards"
            );
            segment.queued.bytes = offset;
            inner.tasks.schedule(self.segment_id);
            drop(inner);
            self.shared.work_available.notify_all();
        }
    }

    /// Queue the close of this segment's replicas. After this only
    /// [`SegmentHandle::sync`] and [`SegmentHandle::free`] are valid.
    ///
    /// For a head segment being retired, `following` names the new head;
    /// the engine then guarantees the new head is durably open before any
    /// close is transmitted, and holds the new head's data writes until
    /// this close is durable. Pass `None` for cleaned segments, whose
    /// writes are ordered by an explicit sync before they join the log
    /// digest; that bypasses the ordering guards entirely.
    pub fn close(&self, following: Option<&SegmentHandle>) {
        if let Some(following) = following {
            debug_assert!(Arc::ptr_eq(&self.shared, &following.shared));
        }

        let mut inner = self.shared.inner.lock().unwrap();
        let queued_bytes = match inner.segments.get_mut(&self.segment_id) {
            Some(segment) => {
                // Immutable after close.
                assert!(!segment.queued.close, "segment closed twice");
                segment.queued.close = true;
                segment.following_segment = following.map(|handle| handle.segment_id);
                segment.queued.bytes
            }
            None => return,
        };

        if let Some(following) = following {
            if let Some(next) = inner.segments.get_mut(&following.segment_id) {
                if next.queued.bytes != next.open_len {
                    error!(
                        "segment {} asked to order its close before writes to segment {}, \
                         but the following segment already has writes queued",
                        self.segment_id, following.segment_id
                    );
                }
                next.preceding_segment_close_acked = false;
            }
        }

        debug!("segment {} closed ({} bytes)", self.segment_id, queued_bytes);
        inner.tasks.schedule(self.segment_id);
        drop(inner);
        self.shared.work_available.notify_all();
    }

    /// Block until the bytes `[0, offset)` are durable on every replica,
    /// cooperatively driving the task loop while waiting. Never fails;
    /// waits forever for data that is never queued.
    pub fn sync(&self, offset: u32) {
        loop {
            let mut inner = self.shared.inner.lock().unwrap();
            match inner.segments.get(&self.segment_id) {
                Some(segment) => {
                    let acked = segment.acked();
                    if acked.open && acked.bytes >= offset {
                        return;
                    }
                }
                None => return,
            }
            inner.proceed();
            drop(inner);
            thread::yield_now();
        }
    }

    /// The progress every replica has durably acknowledged.
    pub fn acked(&self) -> Progress {
        let inner = self.shared.inner.lock().unwrap();
        inner
            .segments
            .get(&self.segment_id)
            .map(ReplicatedSegment::acked)
            .unwrap_or_default()
    }

    pub fn is_synced(&self) -> bool {
        let inner = self.shared.inner.lock().unwrap();
        inner
            .segments
            .get(&self.segment_id)
            .map_or(true, ReplicatedSegment::is_synced)
    }

    /// Request the eventual freeing of all replicas; the segment destroys
    /// itself once they are cleaned up.
    ///
    /// Consumes the handle. By the time this returns no write rpc is
    /// outstanding for the segment, so the caller may reuse the segment
    /// memory immediately.
    pub fn free(self) {
        debug!("freeing segment {}", self.segment_id);
        let mut inner = self.shared.inner.lock().unwrap();
        match inner.segments.get_mut(&self.segment_id) {
            // Mark the segment first so the task loop starts no new
            // writes for it while we wait on the outstanding ones.
            Some(segment) => segment.free_queued = true,
            None => return,
        }

        // Drain outstanding write rpcs, releasing and reacquiring the
        // lock each round to let other operations slip in while this
        // thread waits.
        loop {
            let outstanding = inner
                .segments
                .get(&self.segment_id)
                .map_or(false, ReplicatedSegment::has_write_rpc_outstanding);
            if !outstanding {
                break;
            }
            inner.proceed();
            drop(inner);
            thread::yield_now();
            inner = self.shared.inner.lock().unwrap();
        }

        inner.tasks.schedule(self.segment_id);
        drop(inner);
        self.shared.work_available.notify_all();
    }
}
