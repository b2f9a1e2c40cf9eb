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

use std::collections::HashMap;

use log::info;
use seglog_common::{Error, Result, ServerId, SessionRef};

struct BackupDesc {
    session: SessionRef,
    expected_read_mbytes_per_sec: u32,
}

/// Read-mostly view of the currently reachable backup servers, fed by the
/// membership layer. The membership layer is the source of truth for
/// liveness; once it removes a backup, session lookups for that id fail.
#[derive(Default)]
pub(crate) struct BackupTracker {
    backups: HashMap<ServerId, BackupDesc>,
}

impl BackupTracker {
    pub fn insert(&mut self, id: ServerId, session: SessionRef, expected_read_mbytes_per_sec: u32) {
        info!(
            "backup {} joined, expected read bandwidth {} MB/s",
            id, expected_read_mbytes_per_sec
        );
        self.backups.insert(
            id,
            BackupDesc {
                session,
                expected_read_mbytes_per_sec,
            },
        );
    }

    pub fn remove(&mut self, id: ServerId) {
        if self.backups.remove(&id).is_some() {
            info!("backup {} left the cluster", id);
        }
    }

    /// Return a usable transport session for the backup, or
    /// `ServerUnavailable` if the membership layer has since reported the
    /// id gone.
    pub fn session(&self, id: ServerId) -> Result<SessionRef> {
        self.backups
            .get(&id)
            .map(|desc| desc.session.clone())
            .ok_or(Error::ServerUnavailable(id))
    }

    pub fn read_bandwidth(&self, id: ServerId) -> Option<u32> {
        self.backups
            .get(&id)
            .map(|desc| desc.expected_read_mbytes_per_sec)
    }

    /// Known backups outside the avoid set, in a stable order; callers
    /// that need tie-breaking randomise over the result.
    pub fn eligible(&self, avoid: &[ServerId]) -> Vec<ServerId> {
        let mut candidates: Vec<_> = self
            .backups
            .keys()
            .copied()
            .filter(|id| !avoid.contains(id))
            .collect();
        candidates.sort_unstable();
        candidates
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use seglog_common::{BackupSession, FreeRequest, WriteRequest};

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

    #[test]
    fn session_lookup_follows_membership() {
        let mut tracker = BackupTracker::default();
        let id = ServerId::new(7);
        tracker.insert(id, Arc::new(NullSession), 100);
        assert!(tracker.session(id).is_ok());

        tracker.remove(id);
        match tracker.session(id) {
            Err(Error::ServerUnavailable(gone)) => assert_eq!(gone, id),
            _ => panic!("expected ServerUnavailable"),
        }
    }

    #[test]
    fn eligible_excludes_avoided() {
        let mut tracker = BackupTracker::default();
        for id in 1..=4u64 {
            tracker.insert(ServerId::new(id), Arc::new(NullSession), 100);
        }
        let avoid = [ServerId::new(2), ServerId::new(4)];
        assert_eq!(
            tracker.eligible(&avoid),
            vec![ServerId::new(1), ServerId::new(3)]
        );
    }
}
