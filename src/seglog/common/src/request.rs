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

use bitflags::bitflags;
use bytes::Bytes;

use crate::{SegmentId, ServerId};

bitflags! {
    /// Lifecycle markers a backup write request may carry. `PRIMARY`
    /// only ever accompanies `OPEN`.
    pub struct WriteFlags: u32 {
        const NONE = 0;
        const OPEN = 0x1;
        const PRIMARY = 0x2;
        const CLOSE = 0x4;
    }
}

/// Appends bytes to one replica of one segment.
///
/// Writes are byte-exact at `offset`; backups reject non-contiguous
/// writes as protocol errors. `OPEN` creates the replica (idempotent for
/// a matching `(master_id, segment_id)` pair), `CLOSE` finalises it so
/// recovery will enumerate it and no further writes are accepted.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub master_id: ServerId,
    pub segment_id: SegmentId,
    pub offset: u32,
    pub data: Bytes,
    pub flags: WriteFlags,
}

/// Deletes a replica by `(master_id, segment_id)`; idempotent.
#[derive(Debug, Clone)]
pub struct FreeRequest {
    pub master_id: ServerId,
    pub segment_id: SegmentId,
}
