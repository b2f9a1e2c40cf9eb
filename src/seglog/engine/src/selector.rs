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

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use seglog_common::{Error, Result, ServerId};

use crate::tracker::BackupTracker;

/// How many eligible backups primary selection samples before keeping the
/// one with the highest expected read bandwidth.
const PRIMARY_CANDIDATES: usize = 5;

/// Picks a backup for a new replica, avoiding the servers that already
/// hold a replica of the same segment. Primaries are additionally biased
/// toward backups with high expected read bandwidth, since the primary is
/// the read path during recovery. Selection is deterministic only up to
/// ties.
pub(crate) struct BackupSelector {
    rng: StdRng,
}

impl BackupSelector {
    pub fn new() -> Self {
        BackupSelector {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn select_primary(
        &mut self,
        tracker: &BackupTracker,
        avoid: &[ServerId],
    ) -> Result<ServerId> {
        let mut candidates = tracker.eligible(avoid);
        candidates.shuffle(&mut self.rng);
        candidates.truncate(PRIMARY_CANDIDATES);
        candidates
            .into_iter()
            .max_by_key(|id| tracker.read_bandwidth(*id).unwrap_or(0))
            .ok_or(Error::NoEligibleBackup)
    }

    pub fn select_secondary(
        &mut self,
        tracker: &BackupTracker,
        avoid: &[ServerId],
    ) -> Result<ServerId> {
        tracker
            .eligible(avoid)
            .choose(&mut self.rng)
            .copied()
            .ok_or(Error::NoEligibleBackup)
    }
}
