// SPDX-License-Identifier: Apache-2.0

//! The outbox supervisor (C5, §4.5): owns the WAL and a `Sender`, drives the
//! send loop, and advances the commit offset.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use outbox_wal::{scope_dir, CommitStore, Record, Wal};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::OutboxError;
use crate::event::Event;
use crate::sender::Sender;

/// Owns one scope's WAL and a `Sender`, and drives the background send loop
/// that forwards newly-flushed records and advances the commit offset.
pub struct Outbox {
    wal: Arc<Wal>,
    agent_id: String,
    pipeline_id: Option<String>,
    closed: AtomicBool,
    cancel: CancellationToken,
    send_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Outbox {
    /// Validates `config`, opens (or recovers) its WAL, and spawns the send
    /// loop against `sender` (§4.5, §6 `new`).
    pub async fn new(
        config: Config,
        sender: impl Sender + 'static,
    ) -> Result<Self, OutboxError> {
        config.validate()?;

        let scope = config.scope();
        let dir = scope_dir(&config.wal_dir, &scope);
        let wal = Arc::new(Wal::open(dir.clone(), config.wal_config()).await?);
        let commit = Arc::new(CommitStore::open(dir));
        let cancel = CancellationToken::new();
        let sender: Arc<dyn Sender> = Arc::new(sender);

        let send_task = tokio::spawn(send_loop(
            wal.clone(),
            commit,
            sender,
            scope.agent_id.clone(),
            scope.pipeline_id.clone(),
            config.send_batch_size,
            config.send_interval,
            cancel.clone(),
        ));

        debug!(agent_id = %scope.agent_id, "outbox opened");

        Ok(Self {
            wal,
            agent_id: scope.agent_id,
            pipeline_id: scope.pipeline_id,
            closed: AtomicBool::new(false),
            cancel,
            send_task: parking_lot::Mutex::new(Some(send_task)),
        })
    }

    /// Appends a raw JSON payload as an event record (§6 `append`).
    pub async fn append(
        &self,
        ctx: &CancellationToken,
        payload: Vec<u8>,
    ) -> Result<u64, OutboxError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OutboxError::Closed);
        }
        let record = Record::event(outbox_wal::Codec::Json, payload);
        Ok(self.wal.append(ctx, record).await?)
    }

    /// Serializes `payload` to JSON and appends it as an event record (§6 `append_map`).
    pub async fn append_map(
        &self,
        ctx: &CancellationToken,
        payload: &BTreeMap<String, Value>,
    ) -> Result<u64, OutboxError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OutboxError::Closed);
        }
        let bytes = serde_json::to_vec(payload)?;
        self.append(ctx, bytes).await
    }

    /// Idempotent shutdown: stops accepting appends, cancels and awaits the
    /// send loop, then closes the WAL (§4.5 "Close").
    pub async fn close(&self) -> Result<(), OutboxError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();
        let task = self.send_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.wal.close().await?;
        Ok(())
    }

    /// Agent identifier this outbox was opened for.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn send_loop(
    wal: Arc<Wal>,
    commit: Arc<CommitStore>,
    sender: Arc<dyn Sender>,
    agent_id: String,
    pipeline_id: Option<String>,
    batch_size: usize,
    send_interval: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(send_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                run_send_iteration(&wal, &commit, &sender, &agent_id, &pipeline_id, batch_size, &cancel).await;
            }
        }
    }
}

/// One pass of §4.5's send loop steps 1-7.
async fn run_send_iteration(
    wal: &Arc<Wal>,
    commit: &Arc<CommitStore>,
    sender: &Arc<dyn Sender>,
    agent_id: &str,
    pipeline_id: &Option<String>,
    batch_size: usize,
    cancel: &CancellationToken,
) {
    let last_acked = match commit.read() {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "commit read failed, skipping send iteration");
            return;
        }
    };

    let flushed = wal.flushed_seq();
    if flushed <= last_acked {
        return;
    }

    let records = match wal.read_records(last_acked, flushed, batch_size).await {
        Ok(records) if !records.is_empty() => records,
        Ok(_) => return,
        Err(e) => {
            warn!(error = %e, "wal read failed, skipping send iteration");
            return;
        }
    };

    let events: Vec<Event> = records
        .into_iter()
        .filter_map(|record| decode_event(record, agent_id, pipeline_id))
        .collect();
    if events.is_empty() {
        return;
    }

    let result = sender.send(cancel, &events).await;
    let new_acked = result.last_seq.min(flushed);
    if new_acked > last_acked {
        if let Err(e) = commit.write(new_acked) {
            warn!(error = %e, "commit write failed");
            return;
        }
        if let Err(e) = wal.delete_segments_up_to(new_acked).await {
            warn!(error = %e, "segment gc failed");
        }
    }

    if result.expected_seq != new_acked + 1 {
        debug!(
            expected_seq = result.expected_seq,
            new_acked, "gateway's expected_seq disagrees with last_acked + 1"
        );
    }
}

/// Decodes a record's JSON payload into an `Event`. A record whose payload
/// cannot be structurally presented to the gateway is dropped rather than
/// blocking the send loop forever (§4.5 step 4).
fn decode_event(record: Record, agent_id: &str, pipeline_id: &Option<String>) -> Option<Event> {
    let payload: BTreeMap<String, Value> = match serde_json::from_slice(&record.payload) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(seq = record.seq, error = %e, "dropping record with undecodable payload");
            return None;
        }
    };
    Some(Event::new(record.seq, payload, agent_id.to_string(), pipeline_id.clone()))
}
