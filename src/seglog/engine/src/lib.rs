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

mod core;
mod manager;
mod opt;
mod selector;
mod tracker;

pub use seglog_common::{
    BackupSession, Error, FreeRequest, Progress, Result, SegmentId, SegmentSource, ServerId,
    SessionRef, WriteFlags, WriteRequest,
};

pub use self::{
    manager::{ReplicaManager, SegmentHandle},
    opt::{
        ManagerOption, DEFAULT_NUM_REPLICAS, MAX_BYTES_PER_WRITE_RPC, MAX_WRITE_RPCS_IN_FLIGHT,
    },
};
