// SPDX-License-Identifier: Apache-2.0

//! End-to-end flow tests against the public API (§8 concrete scenarios).

use std::collections::BTreeMap;
use std::time::Duration;

use outbox::sender::{RecordingSender, SendResult};
use outbox::{Config, Outbox};
use outbox_wal::{CommitStore, Scope};
use serde_json::json;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn commit_offset(wal_dir: &std::path::Path) -> u64 {
    let scope = Scope {
        project_id: None,
        pipeline_id: None,
        agent_id: "agent1".into(),
    };
    CommitStore::open(outbox_wal::scope_dir(wal_dir, &scope))
        .read()
        .unwrap()
}

fn scenario_config(dir: std::path::PathBuf) -> Config {
    Config {
        wal_dir: dir,
        agent_id: "agent1".into(),
        project_id: None,
        pipeline_id: None,
        segment_max_seq: 10_000,
        fsync_interval: Duration::from_millis(10),
        send_batch_size: 100,
        send_interval: Duration::from_millis(10),
        max_disk_usage: byte_unit::Byte::from_u64_with_unit(5_120, byte_unit::Unit::MiB).unwrap(),
    }
}

#[tokio::test]
async fn commit_advances_after_appends_are_sent() {
    let dir = tempdir().unwrap();
    let outbox = Outbox::new(scenario_config(dir.path().to_path_buf()), RecordingSender::accept_all())
        .await
        .unwrap();
    let ctx = CancellationToken::new();

    for n in 0..3u32 {
        let mut payload = BTreeMap::new();
        payload.insert("n".to_string(), json!(n));
        outbox.append_map(&ctx, &payload).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    outbox.close().await.unwrap();

    assert_eq!(commit_offset(dir.path()), 3);
}

#[tokio::test]
async fn rejected_sequences_are_not_acknowledged() {
    let dir = tempdir().unwrap();
    // The gateway accepts only seq 1, rejecting 2 and 3 on the first pass,
    // then accepts everything on the second. The send interval is widened
    // well past the fsync interval so the two send-loop ticks land in
    // clearly separated windows instead of racing each other.
    let mut config = scenario_config(dir.path().to_path_buf());
    config.fsync_interval = Duration::from_millis(5);
    config.send_interval = Duration::from_millis(80);

    let sender = RecordingSender::new(vec![
        SendResult {
            last_seq: 1,
            expected_seq: 2,
            rejected_seq: vec![2, 3],
        },
        SendResult {
            last_seq: 3,
            expected_seq: 4,
            rejected_seq: vec![],
        },
    ]);
    let outbox = Outbox::new(config, sender).await.unwrap();
    let ctx = CancellationToken::new();

    for n in 0..3u32 {
        let mut payload = BTreeMap::new();
        payload.insert("n".to_string(), json!(n));
        outbox.append_map(&ctx, &payload).await.unwrap();
    }

    // First send-loop tick (~80ms in) acks only up to 1, since the gateway
    // rejects 2 and 3.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(commit_offset(dir.path()), 1);

    // Second tick (~160ms in) re-reads 2..3 against the second canned
    // response, which accepts everything, so the commit offset advances to 3.
    tokio::time::sleep(Duration::from_millis(160)).await;
    assert_eq!(commit_offset(dir.path()), 3);

    outbox.close().await.unwrap();
}

#[tokio::test]
async fn reopening_after_close_resumes_sequence() {
    let dir = tempdir().unwrap();
    let ctx = CancellationToken::new();

    let seq = {
        let outbox = Outbox::new(scenario_config(dir.path().to_path_buf()), RecordingSender::accept_all())
            .await
            .unwrap();
        let mut last = 0;
        for _ in 0..3 {
            last = outbox.append(&ctx, b"{}".to_vec()).await.unwrap();
        }
        outbox.close().await.unwrap();
        last
    };
    assert_eq!(seq, 3);

    let outbox = Outbox::new(scenario_config(dir.path().to_path_buf()), RecordingSender::accept_all())
        .await
        .unwrap();
    let next = outbox.append(&ctx, b"{}".to_vec()).await.unwrap();
    assert_eq!(next, 4);
    outbox.close().await.unwrap();
}
