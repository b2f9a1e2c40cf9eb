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

use std::collections::{HashSet, VecDeque};

use seglog_common::SegmentId;

/// FIFO set of segments with replication work pending. A drain pass
/// snapshots and clears the set, so a segment that reschedules itself
/// while being driven runs again on the next pass, not recursively.
///
/// Only a caller holding the manager mutex touches this.
#[derive(Default)]
pub(crate) struct TaskQueue {
    order: VecDeque<SegmentId>,
    scheduled: HashSet<SegmentId>,
}

impl TaskQueue {
    /// Idempotently mark the segment as having work pending.
    pub fn schedule(&mut self, id: SegmentId) {
        if self.scheduled.insert(id) {
            self.order.push_back(id);
        }
    }

    pub fn is_scheduled(&self, id: SegmentId) -> bool {
        self.scheduled.contains(&id)
    }

    pub fn is_idle(&self) -> bool {
        self.scheduled.is_empty()
    }

    /// Snapshot the pending set in schedule order and clear it.
    pub fn take_scheduled(&mut self) -> Vec<SegmentId> {
        self.scheduled.clear();
        self.order.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_is_idempotent() {
        let mut tasks = TaskQueue::default();
        let id = SegmentId::new(1);
        tasks.schedule(id);
        tasks.schedule(id);
        assert!(tasks.is_scheduled(id));
        assert_eq!(tasks.take_scheduled(), vec![id]);
        assert!(tasks.is_idle());
    }

    #[test]
    fn drain_keeps_fifo_order() {
        let mut tasks = TaskQueue::default();
        for id in [3, 1, 2] {
            tasks.schedule(SegmentId::new(id));
        }
        assert_eq!(
            tasks.take_scheduled(),
            vec![SegmentId::new(3), SegmentId::new(1), SegmentId::new(2)]
        );
    }

    #[test]
    fn reschedule_lands_in_next_snapshot() {
        let mut tasks = TaskQueue::default();
        let id = SegmentId::new(9);
        tasks.schedule(id);
        let batch = tasks.take_scheduled();
        assert_eq!(batch, vec![id]);

        // A task driven from the snapshot re-arms itself for later.
        tasks.schedule(id);
        assert!(tasks.is_scheduled(id));
        assert_eq!(tasks.take_scheduled(), vec![id]);
    }
}
