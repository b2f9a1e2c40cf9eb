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

//! Replicates a small chain of log segments to a cluster of in-memory
//! backups and prints the resulting rpc trace.
//!
//! ```text
//! RUST_LOG=debug cargo run --example replicate
//! ```

use std::{sync::Arc, thread, time::Duration};

use bytes::Bytes;
use seglog_engine::{ManagerOption, ReplicaManager, SegmentId, ServerId};
use seglog_store::MemCluster;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let runtime = tokio::runtime::Runtime::new()?;
    let opt = ManagerOption {
        num_replicas: 2,
        ..Default::default()
    };
    let mut manager = ReplicaManager::new(ServerId::new(1), opt, runtime.handle().clone());

    let cluster = MemCluster::new(4);
    for (i, store) in cluster.stores().iter().enumerate() {
        manager.insert_backup(store.server_id(), store.session(), 100 + 50 * i as u32);
    }
    manager.start_driver();

    // A full head segment, then the log rolls over to a new head.
    let head = Arc::new(Bytes::from(vec![7u8; 4096]));
    let s1 = manager.open_segment(SegmentId::new(1), head.clone(), 512);
    s1.write(4096);
    s1.sync(4096);

    let s2 = manager.open_segment(SegmentId::new(2), head.clone(), 512);
    s1.close(Some(&s2));
    s2.write(2048);
    s2.sync(2048);

    s2.close(None);
    manager.sync();

    s1.free();
    s2.free();
    while manager.segment_count() > 0 {
        thread::sleep(Duration::from_millis(1));
    }

    let trace = cluster.trace();
    println!("write rpcs received: {}", trace.writes().len());
    println!("free rpcs received: {}", trace.frees().len());
    println!(
        "max write rpcs in flight: {}",
        trace.max_outstanding_writes()
    );
    Ok(())
}
