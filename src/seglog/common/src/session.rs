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

use async_trait::async_trait;

use crate::{FreeRequest, Result, WriteRequest};

/// A transport session to one backup server. The engine holds one per
/// live replica; concrete transports live behind this trait.
#[async_trait]
pub trait BackupSession: Send + Sync {
    async fn write(&self, req: WriteRequest) -> Result<()>;

    async fn free(&self, req: FreeRequest) -> Result<()>;
}

pub type SessionRef = Arc<dyn BackupSession>;
