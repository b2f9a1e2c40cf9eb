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

use seglog_common::{SegmentId, ServerId};

use crate::{store::MemStore, trace::StoreTrace};

/// A set of in-memory backup stores sharing one trace, standing in for a
/// cluster of backup servers.
pub struct MemCluster {
    stores: Vec<MemStore>,
    trace: StoreTrace,
}

impl MemCluster {
    /// Build `num_stores` backups with server ids `1..=num_stores`.
    pub fn new(num_stores: usize) -> Self {
        let trace = StoreTrace::new();
        let stores = (1..=num_stores as u64)
            .map(|id| MemStore::new(ServerId::new(id), trace.clone()))
            .collect();
        MemCluster { stores, trace }
    }

    pub fn stores(&self) -> &[MemStore] {
        &self.stores
    }

    pub fn store(&self, id: ServerId) -> Option<&MemStore> {
        self.stores.iter().find(|store| store.server_id() == id)
    }

    pub fn trace(&self) -> &StoreTrace {
        &self.trace
    }

    pub fn hold_writes(&self) {
        for store in &self.stores {
            store.hold_writes();
        }
    }

    pub fn release_writes(&self) {
        for store in &self.stores {
            store.release_writes();
        }
    }

    pub fn hold_segment_writes(&self, segment_id: SegmentId) {
        for store in &self.stores {
            store.hold_segment_writes(segment_id);
        }
    }

    pub fn release_segment_writes(&self, segment_id: SegmentId) {
        for store in &self.stores {
            store.release_segment_writes(segment_id);
        }
    }

    /// How many stores currently hold a replica of the segment.
    pub fn replica_count(&self, master_id: ServerId, segment_id: SegmentId) -> usize {
        self.stores
            .iter()
            .filter(|store| store.replica(master_id, segment_id).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.iter().all(MemStore::is_empty)
    }
}
