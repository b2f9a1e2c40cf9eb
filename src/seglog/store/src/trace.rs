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

use std::sync::{Arc, Mutex};

use seglog_common::{FreeRequest, SegmentId, ServerId, WriteFlags, WriteRequest};

/// One write rpc as received by a backup, recorded at arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub backup_id: ServerId,
    pub segment_id: SegmentId,
    pub offset: u32,
    pub length: u32,
    pub flags: WriteFlags,
}

/// One free rpc as received by a backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeRecord {
    pub backup_id: ServerId,
    pub segment_id: SegmentId,
}

/// Shared record of every rpc a set of stores received, in arrival
/// order, plus a high-water mark of concurrently outstanding writes
/// across all of them.
#[derive(Clone, Default)]
pub struct StoreTrace {
    inner: Arc<Mutex<TraceInner>>,
}

#[derive(Default)]
struct TraceInner {
    writes: Vec<WriteRecord>,
    frees: Vec<FreeRecord>,
    outstanding_writes: u32,
    max_outstanding_writes: u32,
}

impl StoreTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin_write(&self, backup_id: ServerId, req: &WriteRequest) {
        let mut inner = self.inner.lock().unwrap();
        inner.writes.push(WriteRecord {
            backup_id,
            segment_id: req.segment_id,
            offset: req.offset,
            length: req.data.len() as u32,
            flags: req.flags,
        });
        inner.outstanding_writes += 1;
        inner.max_outstanding_writes = inner.max_outstanding_writes.max(inner.outstanding_writes);
    }

    pub(crate) fn end_write(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.outstanding_writes -= 1;
    }

    pub(crate) fn record_free(&self, backup_id: ServerId, req: &FreeRequest) {
        let mut inner = self.inner.lock().unwrap();
        inner.frees.push(FreeRecord {
            backup_id,
            segment_id: req.segment_id,
        });
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.inner.lock().unwrap().writes.clone()
    }

    /// The writes received for one segment, still in arrival order.
    pub fn writes_for(&self, segment_id: SegmentId) -> Vec<WriteRecord> {
        self.inner
            .lock()
            .unwrap()
            .writes
            .iter()
            .filter(|record| record.segment_id == segment_id)
            .cloned()
            .collect()
    }

    pub fn frees(&self) -> Vec<FreeRecord> {
        self.inner.lock().unwrap().frees.clone()
    }

    /// The most writes that were ever in flight at once across every
    /// store sharing this trace.
    pub fn max_outstanding_writes(&self) -> u32 {
        self.inner.lock().unwrap().max_outstanding_writes
    }
}
