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

/// How far a segment has progressed through a stage of replication: has
/// the opening write reached the stage, how many bytes have, and has the
/// closing write.
///
/// The derived ordering (`open`, then `bytes`, then `close`) is the total
/// order replication progresses through, so `acked <= sent <= queued`
/// reads directly as tuple comparisons.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Progress {
    pub open: bool,
    pub bytes: u32,
    pub close: bool,
}

impl Progress {
    pub fn new(open: bool, bytes: u32, close: bool) -> Self {
        Progress { open, bytes, close }
    }

    /// Pointwise minimum, used to aggregate the progress a whole replica
    /// set has durably reached.
    pub fn min(self, other: Progress) -> Progress {
        Progress {
            open: self.open && other.open,
            bytes: self.bytes.min(other.bytes),
            close: self.close && other.close,
        }
    }
}
