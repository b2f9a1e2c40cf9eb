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

use std::ops::Range;

use bytes::Bytes;

/// The engine's read-only view of the in-memory log segment being
/// replicated.
///
/// The engine reads the bytes it ships at the moment each write rpc is
/// issued, so the log module may keep appending behind the committed
/// offset. The range `[0, committed)` must stay stable and readable until
/// the segment's free cycle returns.
pub trait SegmentSource: Send + Sync {
    fn slice(&self, range: Range<u32>) -> Bytes;
}

impl SegmentSource for Bytes {
    fn slice(&self, range: Range<u32>) -> Bytes {
        Bytes::slice(self, range.start as usize..range.end as usize)
    }
}
