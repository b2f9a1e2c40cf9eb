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

use std::sync::Arc;

use log::{debug, warn};
use seglog_common::{
    FreeRequest, Progress, SegmentId, SegmentSource, ServerId, SessionRef, WriteFlags,
    WriteRequest,
};

use super::rpc::{FreeRpc, WriteRpc};
use crate::manager::ManagerInner;

/// One backup's copy of this segment. A slot holding `None` is a replica
/// that does not exist yet: a new segment, or one reset after its open
/// failed before being acknowledged.
pub(crate) struct Replica {
    pub backup_id: ServerId,
    pub session: SessionRef,

    /// Progress transmitted to the backup so far.
    pub sent: Progress,
    /// Progress the backup has acknowledged as durable.
    pub acked: Progress,

    pub write_rpc: Option<WriteRpc>,
    pub free_rpc: Option<FreeRpc>,
}

impl Replica {
    fn new(backup_id: ServerId, session: SessionRef) -> Self {
        Replica {
            backup_id,
            session,
            sent: Progress::default(),
            acked: Progress::default(),
            write_rpc: None,
            free_rpc: None,
        }
    }
}

/// Per-segment replication state machine. Driven by the manager's task
/// loop; every step runs with the manager mutex held and the segment
/// temporarily out of the segment table, so the step can reach its
/// following segment through the table without aliasing itself.
pub(crate) struct ReplicatedSegment {
    pub segment_id: SegmentId,
    source: Arc<dyn SegmentSource>,
    pub open_len: u32,

    /// Cumulative durable commitment requested by the log module.
    pub queued: Progress,
    pub free_queued: bool,

    /// The segment logically succeeding this one in the log, when the log
    /// module asked for close ordering. Cleared once this segment's close
    /// is first acknowledged.
    pub following_segment: Option<SegmentId>,
    /// False while the preceding segment's close has not been durably
    /// acknowledged; data writes are withheld until then.
    pub preceding_segment_close_acked: bool,

    replicas: Vec<Option<Replica>>,
}

impl ReplicatedSegment {
    pub fn new(
        segment_id: SegmentId,
        source: Arc<dyn SegmentSource>,
        open_len: u32,
        num_replicas: usize,
    ) -> Self {
        let mut replicas = Vec::with_capacity(num_replicas);
        replicas.resize_with(num_replicas, || None);
        ReplicatedSegment {
            segment_id,
            source,
            open_len,
            // The opening bytes are queued for replication from the start.
            queued: Progress::new(true, open_len, false),
            free_queued: false,
            following_segment: None,
            preceding_segment_close_acked: true,
            replicas,
        }
    }

    /// The progress the entire replica set has durably reached; an absent
    /// replica pins it to zero.
    pub fn acked(&self) -> Progress {
        let mut acked = self.queued;
        for replica in &self.replicas {
            match replica {
                Some(replica) => acked = acked.min(replica.acked),
                None => return Progress::default(),
            }
        }
        acked
    }

    pub fn is_synced(&self) -> bool {
        self.replicas.iter().all(|replica| {
            replica
                .as_ref()
                .map_or(false, |replica| replica.acked == self.queued)
        })
    }

    pub fn has_write_rpc_outstanding(&self) -> bool {
        self.replicas
            .iter()
            .flatten()
            .any(|replica| replica.write_rpc.is_some())
    }

    /// One step of the state machine; restores invariants and starts any
    /// work the last mutation made necessary. Reschedules itself whenever
    /// work remains.
    pub fn perform_task(&mut self, ctx: &mut ManagerInner) {
        if self.free_queued {
            for slot in 0..self.replicas.len() {
                self.perform_free(slot, ctx);
            }
        } else {
            for slot in 0..self.replicas.len() {
                self.perform_write(slot, ctx);
            }
            debug_assert!(self.is_synced() || ctx.tasks.is_scheduled(self.segment_id));
        }
    }

    /// Make progress in durably writing segment data to one replica.
    fn perform_write(&mut self, slot: usize, ctx: &mut ManagerInner) {
        let write_outstanding = match &self.replicas[slot] {
            None => {
                // The replica does not exist yet: a new segment, or one
                // reset after a lost backup.
                self.open_replica(slot, ctx);
                return;
            }
            Some(replica) => {
                debug_assert!(replica.acked <= replica.sent && replica.sent <= self.queued);
                if replica.acked == self.queued {
                    // Synced; no further work for now.
                    return;
                }
                replica.write_rpc.is_some()
            }
        };

        if write_outstanding {
            self.reap_write(slot, ctx);
        } else {
            self.send_more(slot, ctx);
        }
    }

    /// Choose a backup for an empty slot and transmit the opening bytes.
    fn open_replica(&mut self, slot: usize, ctx: &mut ManagerInner) {
        if ctx.write_rpcs_in_flight == ctx.opt.max_write_rpcs_in_flight {
            ctx.tasks.schedule(self.segment_id);
            return;
        }

        // Never place two replicas of one segment on the same backup.
        let avoid: Vec<ServerId> = self
            .replicas
            .iter()
            .flatten()
            .map(|replica| replica.backup_id)
            .collect();
        let primary = slot == 0;
        let selected = if primary {
            ctx.selector.select_primary(&ctx.tracker, &avoid)
        } else {
            ctx.selector.select_secondary(&ctx.tracker, &avoid)
        };
        let backup_id = match selected {
            Ok(backup_id) => backup_id,
            Err(err) => {
                warn!(
                    "segment {}: cannot place replica {}: {}",
                    self.segment_id, slot, err
                );
                ctx.tasks.schedule(self.segment_id);
                return;
            }
        };
        let session = match ctx.tracker.session(backup_id) {
            Ok(session) => session,
            Err(err) => {
                warn!(
                    "segment {}: backup {} vanished before the open: {}",
                    self.segment_id, backup_id, err
                );
                ctx.tasks.schedule(self.segment_id);
                return;
            }
        };

        let mut flags = WriteFlags::OPEN;
        if primary {
            flags |= WriteFlags::PRIMARY;
        }
        let req = WriteRequest {
            master_id: ctx.master_id,
            segment_id: self.segment_id,
            offset: 0,
            data: self.source.slice(0..self.open_len),
            flags,
        };
        debug!(
            "segment {}: opening replica {} on backup {}",
            self.segment_id, slot, backup_id
        );
        let write_rpc = ctx.issue_write(self.segment_id, session.clone(), req);
        let mut replica = Replica::new(backup_id, session);
        replica.sent = Progress::new(true, self.open_len, false);
        replica.write_rpc = Some(write_rpc);
        self.replicas[slot] = Some(replica);
        ctx.write_rpcs_in_flight += 1;
        ctx.tasks.schedule(self.segment_id);
    }

    /// Check on an outstanding write rpc and absorb its outcome.
    fn reap_write(&mut self, slot: usize, ctx: &mut ManagerInner) {
        let acked = if let Some(replica) = self.replicas[slot].as_mut() {
            let result = match replica.write_rpc.as_mut().and_then(|rpc| rpc.poll()) {
                Some(result) => result,
                None => {
                    // Still in flight; stay scheduled to wait on it.
                    ctx.tasks.schedule(self.segment_id);
                    return;
                }
            };
            match result {
                Ok(()) => {
                    replica.acked = replica.sent;
                    if replica.sent.close {
                        if let Some(following_id) = self.following_segment.take() {
                            // The close is durable; release the following
                            // segment's data writes and stop poking at a
                            // segment that may be destroyed later.
                            if let Some(following) = ctx.segments.get_mut(&following_id) {
                                following.preceding_segment_close_acked = true;
                            }
                        }
                    }
                }
                Err(err) => {
                    // Retry; if the backup is down the server list will
                    // let us know.
                    warn!(
                        "segment {}: failure writing replica on backup {}, retrying: {}",
                        self.segment_id, replica.backup_id, err
                    );
                    replica.sent = replica.acked;
                }
            }
            replica.write_rpc = None;
            replica.acked
        } else {
            return;
        };

        ctx.write_rpcs_in_flight -= 1;
        if acked != self.queued {
            ctx.tasks.schedule(self.segment_id);
        }
        if !acked.open {
            // The open was never acknowledged; reset the slot so the open
            // is retried, possibly on a different backup.
            self.replicas[slot] = None;
        }
    }

    /// Transmit the next stretch of queued data for a replica with no rpc
    /// outstanding.
    fn send_more(&mut self, slot: usize, ctx: &mut ManagerInner) {
        if let Some(replica) = self.replicas[slot].as_mut() {
            if replica.sent >= self.queued {
                // All queued data was sent with no rpc outstanding, yet
                // the replica is not synced; unreachable with one rpc per
                // replica.
                debug_assert!(
                    false,
                    "replica sent all queued data without an outstanding rpc"
                );
                return;
            }
            debug_assert!(replica.free_rpc.is_none());
            debug_assert!(!replica.sent.close);

            if !self.preceding_segment_close_acked {
                // Data queued here must not be transmitted until the
                // preceding segment's close is durable, so that losing
                // every replica of this segment cannot go undetected
                // during recovery.
                ctx.tasks.schedule(self.segment_id);
                return;
            }

            if ctx.write_rpcs_in_flight == ctx.opt.max_write_rpcs_in_flight {
                ctx.tasks.schedule(self.segment_id);
                return;
            }

            let offset = replica.sent.bytes;
            let mut length = self.queued.bytes - replica.sent.bytes;
            let mut flags = if self.queued.close {
                WriteFlags::CLOSE
            } else {
                WriteFlags::NONE
            };

            // A fragmented rpc never carries the close; it rides a later
            // rpc once the tail fits.
            if length > ctx.opt.max_bytes_per_write_rpc {
                length = ctx.opt.max_bytes_per_write_rpc;
                flags = WriteFlags::NONE;
            }

            if flags.contains(WriteFlags::CLOSE) {
                // Hold the close until a later segment is durably open, so
                // recovery always finds an open segment and can tell that
                // no head segments are missing.
                if let Some(following_id) = self.following_segment {
                    match ctx.segments.get(&following_id) {
                        Some(following) if !following.acked().open => {
                            ctx.tasks.schedule(self.segment_id);
                            return;
                        }
                        Some(_) => {}
                        None => {
                            // The successor is already gone; nothing left
                            // to order against.
                            self.following_segment = None;
                        }
                    }
                }
            }

            let req = WriteRequest {
                master_id: ctx.master_id,
                segment_id: self.segment_id,
                offset,
                data: self.source.slice(offset..offset + length),
                flags,
            };
            let session = replica.session.clone();
            replica.write_rpc = Some(ctx.issue_write(self.segment_id, session, req));
            replica.sent.bytes += length;
            replica.sent.close = flags.contains(WriteFlags::CLOSE);
            ctx.write_rpcs_in_flight += 1;
            ctx.tasks.schedule(self.segment_id);
        }
    }

    /// Make progress in freeing one replica, whatever state it is in.
    /// Only runs once `free_queued` is set.
    fn perform_free(&mut self, slot: usize, ctx: &mut ManagerInner) {
        let (free_outstanding, write_outstanding) = match &self.replicas[slot] {
            Some(replica) => (replica.free_rpc.is_some(), replica.write_rpc.is_some()),
            // Nothing to free, no need to reschedule.
            None => return,
        };

        if free_outstanding {
            self.reap_free(slot, ctx);
            return;
        }

        if write_outstanding {
            // Cannot free while a write is outstanding; make progress on
            // the write instead. Stay scheduled even if it completes, the
            // free still has to happen.
            self.perform_write(slot, ctx);
            ctx.tasks.schedule(self.segment_id);
            return;
        }

        if let Some(replica) = self.replicas[slot].as_mut() {
            let req = FreeRequest {
                master_id: ctx.master_id,
                segment_id: self.segment_id,
            };
            debug!(
                "segment {}: freeing replica on backup {}",
                self.segment_id, replica.backup_id
            );
            let session = replica.session.clone();
            replica.free_rpc = Some(ctx.issue_free(self.segment_id, session, req));
            ctx.tasks.schedule(self.segment_id);
        }
    }

    fn reap_free(&mut self, slot: usize, ctx: &mut ManagerInner) {
        if let Some(replica) = self.replicas[slot].as_mut() {
            match replica.free_rpc.as_mut().and_then(|rpc| rpc.poll()) {
                None => {
                    // Request not yet finished; stay scheduled to wait on
                    // it.
                    ctx.tasks.schedule(self.segment_id);
                }
                Some(Ok(())) => {
                    self.replicas[slot] = None;
                }
                Some(Err(err)) => {
                    let backup_id = replica.backup_id;
                    replica.free_rpc = None;
                    if ctx.tracker.session(backup_id).is_err() {
                        // The membership layer no longer lists the backup;
                        // reclamation is best effort, give up on it.
                        warn!(
                            "segment {}: backup {} gone while freeing replica, abandoning: {}",
                            self.segment_id, backup_id, err
                        );
                        self.replicas[slot] = None;
                    } else {
                        warn!(
                            "segment {}: failure freeing replica on backup {}, retrying: {}",
                            self.segment_id, backup_id, err
                        );
                        ctx.tasks.schedule(self.segment_id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use seglog_common::{BackupSession, Result};

    use super::*;

    struct NullSession;

    #[async_trait]
    impl BackupSession for NullSession {
        async fn write(&self, _req: WriteRequest) -> Result<()> {
            Ok(())
        }

        async fn free(&self, _req: FreeRequest) -> Result<()> {
            Ok(())
        }
    }

    fn segment_with_two_replicas() -> ReplicatedSegment {
        let mut segment = ReplicatedSegment::new(
            SegmentId::new(1),
            Arc::new(Bytes::from_static(&[0u8; 128])),
            64,
            2,
        );
        for (slot, backup) in [(0usize, 1u64), (1, 2)] {
            segment.replicas[slot] = Some(Replica::new(ServerId::new(backup), Arc::new(NullSession)));
        }
        segment
    }

    #[test]
    fn acked_pins_to_the_slowest_replica() {
        let mut segment = segment_with_two_replicas();
        segment.queued = Progress::new(true, 128, false);
        if let Some(replica) = segment.replicas[0].as_mut() {
            replica.acked = Progress::new(true, 128, false);
        }
        if let Some(replica) = segment.replicas[1].as_mut() {
            replica.acked = Progress::new(true, 64, false);
        }
        assert_eq!(segment.acked(), Progress::new(true, 64, false));
        assert!(!segment.is_synced());
    }

    #[test]
    fn absent_replica_zeroes_acked() {
        let mut segment = segment_with_two_replicas();
        segment.replicas[1] = None;
        if let Some(replica) = segment.replicas[0].as_mut() {
            replica.acked = Progress::new(true, 64, false);
        }
        assert_eq!(segment.acked(), Progress::default());
    }

    #[test]
    fn synced_once_all_replicas_match_queued() {
        let mut segment = segment_with_two_replicas();
        for slot in 0..2 {
            if let Some(replica) = segment.replicas[slot].as_mut() {
                replica.sent = segment.queued;
                replica.acked = segment.queued;
            }
        }
        assert!(segment.is_synced());
        assert_eq!(segment.acked(), segment.queued);
    }
}
