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

use std::sync::Weak;

use seglog_common::{Error, FreeRequest, Result, SegmentId, SessionRef, WriteRequest};
use tokio::{
    runtime::Handle,
    sync::oneshot::{self, error::TryRecvError},
};

use crate::manager::Shared;

/// One in-flight write rpc to a backup. Presence of the handle in a
/// replica slot is the state discriminator: each replica has at most one
/// outstanding rpc.
pub(crate) struct WriteRpc {
    completion: oneshot::Receiver<Result<()>>,
}

impl WriteRpc {
    pub fn issue(
        runtime: &Handle,
        shared: Weak<Shared>,
        segment_id: SegmentId,
        session: SessionRef,
        req: WriteRequest,
    ) -> WriteRpc {
        let (sender, completion) = oneshot::channel();
        runtime.spawn(async move {
            let result = session.write(req).await;
            let _ = sender.send(result);
            wake(shared, segment_id);
        });
        WriteRpc { completion }
    }

    /// Non-blocking readiness check; `None` while the rpc is still in
    /// flight.
    pub fn poll(&mut self) -> Option<Result<()>> {
        poll_completion(&mut self.completion)
    }
}

/// One in-flight free rpc to a backup.
pub(crate) struct FreeRpc {
    completion: oneshot::Receiver<Result<()>>,
}

impl FreeRpc {
    pub fn issue(
        runtime: &Handle,
        shared: Weak<Shared>,
        segment_id: SegmentId,
        session: SessionRef,
        req: FreeRequest,
    ) -> FreeRpc {
        let (sender, completion) = oneshot::channel();
        runtime.spawn(async move {
            let result = session.free(req).await;
            let _ = sender.send(result);
            wake(shared, segment_id);
        });
        FreeRpc { completion }
    }

    pub fn poll(&mut self) -> Option<Result<()>> {
        poll_completion(&mut self.completion)
    }
}

fn poll_completion(completion: &mut oneshot::Receiver<Result<()>>) -> Option<Result<()>> {
    match completion.try_recv() {
        Ok(result) => Some(result),
        Err(TryRecvError::Empty) => None,
        // The transport task died without reporting; treat it like any
        // other lost connection.
        Err(TryRecvError::Closed) => Some(Err(Error::transport("rpc task dropped"))),
    }
}

/// Re-arm the owning segment and wake the driver once an rpc completes,
/// so waiters notice without spinning.
fn wake(shared: Weak<Shared>, segment_id: SegmentId) {
    if let Some(shared) = shared.upgrade() {
        {
            let mut inner = shared.inner.lock().unwrap();
            inner.tasks.schedule(segment_id);
        }
        shared.work_available.notify_all();
    }
}
