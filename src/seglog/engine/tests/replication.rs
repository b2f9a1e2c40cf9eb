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

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use bytes::Bytes;
use seglog_engine::{
    ManagerOption, Progress, ReplicaManager, SegmentId, ServerId, WriteFlags,
};
use seglog_store::{MemCluster, WriteRecord};

struct Harness {
    manager: ReplicaManager,
    cluster: MemCluster,
    _runtime: tokio::runtime::Runtime,
}

fn master_id() -> ServerId {
    ServerId::new(99)
}

fn setup(num_backups: usize, opt: ManagerOption) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let manager = ReplicaManager::new(master_id(), opt, runtime.handle().clone());
    let cluster = MemCluster::new(num_backups);
    for store in cluster.stores() {
        manager.insert_backup(store.server_id(), store.session(), 100);
    }
    Harness {
        manager,
        cluster,
        _runtime: runtime,
    }
}

fn opt(num_replicas: usize) -> ManagerOption {
    ManagerOption {
        num_replicas,
        ..Default::default()
    }
}

fn source(len: usize) -> Arc<Bytes> {
    let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
    Arc::new(Bytes::from(data))
}

/// Drive the manager for a fixed number of rounds, letting spawned rpcs
/// land in between. Used where a condition must *not* become true.
fn pump(harness: &Harness, rounds: usize) {
    for _ in 0..rounds {
        harness.manager.proceed();
        thread::sleep(Duration::from_millis(1));
    }
}

/// Drive the manager until the condition holds.
fn wait_until(harness: &Harness, what: &str, pred: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !pred() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        harness.manager.proceed();
        thread::sleep(Duration::from_millis(1));
    }
}

fn opens(records: &[WriteRecord]) -> Vec<&WriteRecord> {
    records
        .iter()
        .filter(|r| r.flags.contains(WriteFlags::OPEN))
        .collect()
}

fn closes(records: &[WriteRecord]) -> Vec<&WriteRecord> {
    records
        .iter()
        .filter(|r| r.flags.contains(WriteFlags::CLOSE))
        .collect()
}

#[test]
fn open_write_sync_reaches_all_replicas() {
    let harness = setup(2, opt(2));
    let seg = SegmentId::new(10);
    let data = source(500);

    let handle = harness.manager.open_segment(seg, data.clone(), 100);
    handle.write(500);
    handle.sync(500);

    let records = harness.cluster.trace().writes_for(seg);
    let opens = opens(&records);
    assert_eq!(opens.len(), 2);
    assert!(opens.iter().all(|r| r.offset == 0 && r.length == 100));
    // Exactly one replica is the primary, and no backup holds two
    // replicas of the segment.
    assert_eq!(
        opens
            .iter()
            .filter(|r| r.flags.contains(WriteFlags::PRIMARY))
            .count(),
        1
    );
    assert_ne!(opens[0].backup_id, opens[1].backup_id);

    let deltas: Vec<_> = records
        .iter()
        .filter(|r| r.flags == WriteFlags::NONE)
        .collect();
    assert_eq!(deltas.len(), 2);
    assert!(deltas.iter().all(|r| r.offset == 100 && r.length == 400));

    assert_eq!(handle.acked(), Progress::new(true, 500, false));
    // Every backup stores the exact bytes.
    for record in opens {
        let replica = harness
            .cluster
            .store(record.backup_id)
            .unwrap()
            .replica(master_id(), seg)
            .unwrap();
        assert_eq!(&replica.data[..], &data[..]);
        assert!(!replica.closed);
    }
}

#[test]
fn large_writes_fragment_and_never_close_on_a_fragment() {
    let harness = setup(2, ManagerOption {
        num_replicas: 2,
        max_bytes_per_write_rpc: 256,
        ..Default::default()
    });
    let seg = SegmentId::new(11);

    let handle = harness.manager.open_segment(seg, source(1000), 100);
    handle.write(1000);
    handle.close(None);
    handle.sync(1000);
    harness.manager.sync();

    let records = harness.cluster.trace().writes_for(seg);
    let backups: Vec<_> = opens(&records).iter().map(|r| r.backup_id).collect();
    assert_eq!(backups.len(), 2);

    for backup in backups {
        let sequence: Vec<(u32, u32, bool)> = records
            .iter()
            .filter(|r| r.backup_id == backup)
            .map(|r| (r.offset, r.length, r.flags.contains(WriteFlags::CLOSE)))
            .collect();
        assert_eq!(
            sequence,
            vec![
                (0, 100, false),
                (100, 256, false),
                (356, 256, false),
                (612, 256, false),
                (868, 132, true),
            ]
        );
        let replica = harness
            .cluster
            .store(backup)
            .unwrap()
            .replica(master_id(), seg)
            .unwrap();
        assert!(replica.closed);
        assert_eq!(replica.data.len(), 1000);
    }
}

#[test]
fn close_waits_for_the_following_segment_to_be_durably_open() {
    let harness = setup(4, opt(2));
    let (s1, s2) = (SegmentId::new(1), SegmentId::new(2));

    let h1 = harness.manager.open_segment(s1, source(100), 100);
    h1.sync(100);

    // Park every write so s2's opens arrive but are never acknowledged.
    harness.cluster.hold_writes();
    let h2 = harness.manager.open_segment(s2, source(100), 100);
    h1.close(Some(&h2));

    wait_until(&harness, "s2 open rpcs to arrive", || {
        opens(&harness.cluster.trace().writes_for(s2)).len() == 2
    });
    pump(&harness, 25);
    assert!(
        closes(&harness.cluster.trace().writes_for(s1)).is_empty(),
        "close transmitted before the following segment was durably open"
    );

    harness.cluster.release_writes();
    harness.manager.sync();

    let all = harness.cluster.trace().writes();
    let last_s2_open = all
        .iter()
        .rposition(|r| r.segment_id == s2 && r.flags.contains(WriteFlags::OPEN))
        .unwrap();
    let first_s1_close = all
        .iter()
        .position(|r| r.segment_id == s1 && r.flags.contains(WriteFlags::CLOSE))
        .unwrap();
    assert!(last_s2_open < first_s1_close);
    assert_eq!(closes(&harness.cluster.trace().writes_for(s1)).len(), 2);
}

#[test]
fn data_writes_wait_for_the_preceding_close_to_be_durable() {
    let harness = setup(4, opt(2));
    let (s1, s2) = (SegmentId::new(1), SegmentId::new(2));

    let h1 = harness.manager.open_segment(s1, source(100), 100);
    h1.sync(100);

    // Park only s1's writes: its close will arrive at the backups but
    // never be acknowledged, while s2's opens ack normally.
    harness.cluster.hold_segment_writes(s1);
    let h2 = harness.manager.open_segment(s2, source(200), 100);
    h1.close(Some(&h2));
    h2.write(200);

    wait_until(&harness, "s1 close rpcs to arrive", || {
        !closes(&harness.cluster.trace().writes_for(s1)).is_empty()
    });
    pump(&harness, 25);
    let s2_records = harness.cluster.trace().writes_for(s2);
    assert_eq!(opens(&s2_records).len(), 2);
    assert!(
        s2_records.iter().all(|r| r.flags.contains(WriteFlags::OPEN)),
        "data transmitted before the preceding segment's close was durable"
    );

    harness.cluster.release_segment_writes(s1);
    harness.manager.sync();

    let deltas: Vec<_> = harness
        .cluster
        .trace()
        .writes_for(s2)
        .into_iter()
        .filter(|r| r.flags == WriteFlags::NONE)
        .collect();
    assert_eq!(deltas.len(), 2);
    assert!(deltas.iter().all(|r| r.offset == 100 && r.length == 100));
}

#[test]
fn a_failed_open_is_retried_from_scratch() {
    let harness = setup(1, opt(1));
    let seg = SegmentId::new(5);
    harness.cluster.stores()[0].fail_next_write();

    let handle = harness.manager.open_segment(seg, source(100), 100);
    handle.sync(100);

    // The first open failed before being acknowledged, so the slot was
    // reset and the selector consulted again.
    let records = harness.cluster.trace().writes_for(seg);
    assert_eq!(opens(&records).len(), 2);
    let replica = harness.cluster.stores()[0]
        .replica(master_id(), seg)
        .unwrap();
    assert_eq!(replica.data.len(), 100);
}

#[test]
fn a_failed_open_can_move_to_another_backup() {
    let harness = setup(2, opt(1));
    let seg = SegmentId::new(6);
    for store in harness.cluster.stores() {
        store.fail_next_write();
    }

    let handle = harness.manager.open_segment(seg, source(100), 100);
    handle.sync(100);

    // However selection lands, the open eventually sticks on exactly one
    // backup.
    assert!(opens(&harness.cluster.trace().writes_for(seg)).len() >= 2);
    assert_eq!(harness.cluster.replica_count(master_id(), seg), 1);
}

#[test]
fn write_rpcs_are_throttled_across_the_whole_engine() {
    let harness = setup(4, ManagerOption {
        num_replicas: 2,
        max_write_rpcs_in_flight: 1,
        ..Default::default()
    });

    let handles: Vec<_> = (1..=3u64)
        .map(|id| {
            let handle = harness
                .manager
                .open_segment(SegmentId::new(id), source(400), 100);
            handle.write(400);
            handle
        })
        .collect();
    harness.manager.sync();
    for handle in &handles {
        assert!(handle.is_synced());
    }

    assert_eq!(harness.cluster.trace().max_outstanding_writes(), 1);
    // All the work still happened: three segments, two replicas each.
    let all = harness.cluster.trace().writes();
    assert_eq!(opens(&all).len(), 6);
}

#[test]
fn sync_fences_every_live_segment() {
    let harness = setup(3, opt(2));
    let handles: Vec<_> = [(1u64, 150u32), (2, 300), (3, 450)]
        .iter()
        .map(|&(id, bytes)| {
            let handle = harness
                .manager
                .open_segment(SegmentId::new(id), source(bytes as usize), 100);
            handle.write(bytes);
            handle
        })
        .collect();

    harness.manager.sync();

    for (handle, bytes) in handles.iter().zip([150u32, 300, 450]) {
        assert!(handle.is_synced());
        assert_eq!(handle.acked(), Progress::new(true, bytes, false));
    }
}

#[test]
fn free_reclaims_replicas_and_destroys_the_segment() {
    let harness = setup(3, opt(2));
    let seg = SegmentId::new(21);
    let handle = harness.manager.open_segment(seg, source(200), 100);
    handle.write(200);
    handle.sync(200);
    assert_eq!(harness.cluster.replica_count(master_id(), seg), 2);

    handle.free();
    wait_until(&harness, "the segment to destroy itself", || {
        harness.manager.segment_count() == 0
    });

    assert_eq!(harness.cluster.replica_count(master_id(), seg), 0);
    assert!(harness.cluster.is_empty());
    assert_eq!(harness.cluster.trace().frees().len(), 2);
}

#[test]
fn failed_frees_are_retried() {
    let harness = setup(1, opt(1));
    let seg = SegmentId::new(22);
    let handle = harness.manager.open_segment(seg, source(100), 100);
    handle.sync(100);

    harness.cluster.stores()[0].fail_next_free();
    handle.free();
    wait_until(&harness, "the segment to destroy itself", || {
        harness.manager.segment_count() == 0
    });

    assert_eq!(harness.cluster.trace().frees().len(), 2);
    assert!(harness.cluster.is_empty());
}

#[test]
fn free_drains_parked_writes_before_returning() {
    let harness = setup(2, opt(2));
    let seg = SegmentId::new(23);
    let handle = harness.manager.open_segment(seg, source(200), 100);
    handle.sync(100);

    // Park the backups, queue more data, and let the rpcs get issued.
    harness.cluster.hold_writes();
    handle.write(200);
    pump(&harness, 5);

    // Release from another thread shortly after free() starts waiting.
    let cluster_stores: Vec<_> = harness.cluster.stores().to_vec();
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        for store in cluster_stores {
            store.release_writes();
        }
    });

    handle.free();
    releaser.join().unwrap();

    wait_until(&harness, "the segment to destroy itself", || {
        harness.manager.segment_count() == 0
    });
    assert!(harness.cluster.is_empty());
}

#[test]
#[should_panic(expected = "write to a closed segment")]
fn writing_a_closed_segment_is_a_programmer_error() {
    let harness = setup(1, opt(1));
    let handle = harness
        .manager
        .open_segment(SegmentId::new(30), source(100), 100);
    handle.close(None);
    handle.write(200);
}

#[test]
fn the_background_driver_replicates_without_explicit_pumping() {
    let _ = env_logger::builder().is_test(true).try_init();
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut manager = ReplicaManager::new(master_id(), opt(2), runtime.handle().clone());
    let cluster = MemCluster::new(2);
    for store in cluster.stores() {
        manager.insert_backup(store.server_id(), store.session(), 100);
    }
    manager.start_driver();

    let seg = SegmentId::new(40);
    let handle = manager.open_segment(seg, source(300), 100);
    handle.write(300);
    handle.sync(300);

    assert_eq!(cluster.replica_count(master_id(), seg), 2);
    drop(manager);
}
