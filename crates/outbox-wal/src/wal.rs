// SPDX-License-Identifier: Apache-2.0

//! Segmented WAL engine (C4, §3, §4.4, §5).

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::WalError;
use crate::record::Record;

const SEGMENT_SUFFIX: &str = ".wal";
const SEGMENT_NAME_DIGITS: usize = 16;

/// Tuning knobs for one scope's WAL (§6 Config table).
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Records per segment before rotation.
    pub segment_max_seq: u64,
    /// Interval on which the writer task fsyncs the active segment.
    pub fsync_interval: Duration,
    /// Append-time disk usage gate, in megabytes.
    pub max_disk_usage_mb: u64,
    /// Channel capacity between producers and the writer task.
    pub write_channel_capacity: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            segment_max_seq: 10_000,
            fsync_interval: Duration::from_millis(100),
            max_disk_usage_mb: 5_120,
            write_channel_capacity: 1024,
        }
    }
}

struct WriteReq {
    bytes: Vec<u8>,
    seq: u64,
    done: oneshot::Sender<Result<(), WalError>>,
}

struct RotationState {
    file: Option<File>,
    records_in_segment: u64,
}

/// A segmented, crash-recoverable write-ahead log for a single scope.
///
/// Single-writer per scope (§1 Non-goals): concurrent `append` calls are
/// safe (sequence assignment is a lock-free fetch-add), but only one `Wal`
/// should own a given directory at a time.
pub struct Wal {
    dir: PathBuf,
    cfg: WalConfig,
    tx: mpsc::Sender<WriteReq>,
    next_seq: AtomicU64,
    written_seq: Arc<AtomicU64>,
    flushed_seq: Arc<AtomicU64>,
    cancel: CancellationToken,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
}

fn join_to_io(e: tokio::task::JoinError) -> io::Error {
    io::Error::other(e)
}

fn list_segments(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if segment_start_seq(&path).is_some() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn segment_start_seq(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(SEGMENT_SUFFIX)?;
    if stem.len() != SEGMENT_NAME_DIGITS || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

fn segment_name(seq: u64) -> String {
    format!("{seq:0width$}{SEGMENT_SUFFIX}", width = SEGMENT_NAME_DIGITS)
}

/// Scans one segment, returning the greatest valid sequence found. A decode
/// failure (CRC/length mismatch, or a torn trailing write) terminates the
/// scan at that point without advancing past it (I6).
fn scan_segment_max_seq(path: &Path) -> io::Result<u64> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut max_seq = 0u64;
    while let Some(record) = Record::read_next(&mut reader)? {
        max_seq = max_seq.max(record.seq);
    }
    Ok(max_seq)
}

fn directory_wal_bytes(dir: &Path) -> io::Result<u64> {
    let mut total = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if segment_start_seq(&path).is_some() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

impl Wal {
    /// Opens (or recovers) the WAL rooted at `dir`, scanning every segment to
    /// compute `next_seq = max_seq + 1` (§4.4 "Opening").
    pub async fn open(dir: PathBuf, cfg: WalConfig) -> Result<Self, WalError> {
        let scan_dir = dir.clone();
        let max_seq = tokio::task::spawn_blocking(move || -> io::Result<u64> {
            std::fs::create_dir_all(&scan_dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&scan_dir, std::fs::Permissions::from_mode(0o755))?;
            }
            let mut max_seq = 0u64;
            for path in list_segments(&scan_dir)? {
                max_seq = max_seq.max(scan_segment_max_seq(&path)?);
            }
            Ok(max_seq)
        })
        .await
        .map_err(join_to_io)??;

        let (tx, rx) = mpsc::channel(cfg.write_channel_capacity);
        let rotation = Arc::new(Mutex::new(RotationState {
            file: None,
            records_in_segment: 0,
        }));
        let cancel = CancellationToken::new();
        let written_seq = Arc::new(AtomicU64::new(max_seq));
        let flushed_seq = Arc::new(AtomicU64::new(max_seq));

        let writer_handle = tokio::spawn(writer_loop(
            dir.clone(),
            cfg.clone(),
            rx,
            rotation,
            cancel.clone(),
            written_seq.clone(),
            flushed_seq.clone(),
        ));

        debug!(dir = %dir.display(), next_seq = max_seq + 1, "wal opened");

        Ok(Self {
            dir,
            cfg,
            tx,
            next_seq: AtomicU64::new(max_seq + 1),
            written_seq,
            flushed_seq,
            cancel,
            writer_handle: Mutex::new(Some(writer_handle)),
        })
    }

    /// Greatest sequence assigned so far, i.e. `next_seq - 1`.
    pub fn written_seq(&self) -> u64 {
        self.written_seq.load(Ordering::Acquire)
    }

    /// Greatest sequence known durable (I5: only these are visible to readers).
    pub fn flushed_seq(&self) -> u64 {
        self.flushed_seq.load(Ordering::Acquire)
    }

    /// Assigns a sequence to `record`, encodes it, and dispatches it to the
    /// writer task, honoring `ctx` cancellation at both suspension points
    /// (§4.4 "Append contract", §5).
    pub async fn append(&self, ctx: &CancellationToken, mut record: Record) -> Result<u64, WalError> {
        if ctx.is_cancelled() {
            return Err(WalError::Cancelled);
        }

        let usage = tokio::task::spawn_blocking({
            let dir = self.dir.clone();
            move || directory_wal_bytes(&dir)
        })
        .await
        .map_err(join_to_io)
        .map_err(WalError::Io)?
        .map_err(WalError::Io)?;

        let max_bytes = self.cfg.max_disk_usage_mb.saturating_mul(1024 * 1024);
        if usage >= max_bytes {
            return Err(WalError::DiskFull);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        record.seq = seq;
        let bytes = record.encode();
        let (done_tx, done_rx) = oneshot::channel();
        let req = WriteReq {
            bytes,
            seq,
            done: done_tx,
        };

        tokio::select! {
            biased;
            () = ctx.cancelled() => return Err(WalError::Cancelled),
            send_result = self.tx.send(req) => {
                if send_result.is_err() {
                    return Err(WalError::WriterGone);
                }
            }
        }

        tokio::select! {
            biased;
            () = ctx.cancelled() => Err(WalError::Cancelled),
            result = done_rx => match result {
                Ok(Ok(())) => Ok(seq),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(WalError::WriterGone),
            },
        }
    }

    /// Reads up to `limit` records with `last_acked < seq <= flushed`, in
    /// segment-then-sequence order. Callers pass the snapshot they sampled;
    /// the engine retains no memory of prior reads (§4.4 "Read contract").
    pub async fn read_records(
        &self,
        last_acked: u64,
        flushed: u64,
        limit: usize,
    ) -> Result<Vec<Record>, WalError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || -> io::Result<Vec<Record>> {
            let mut out = Vec::new();
            if limit == 0 || flushed <= last_acked {
                return Ok(out);
            }
            'segments: for path in list_segments(&dir)? {
                let file = File::open(&path)?;
                let mut reader = BufReader::new(file);
                loop {
                    if out.len() >= limit {
                        break 'segments;
                    }
                    match Record::read_next(&mut reader)? {
                        Some(record) => {
                            if record.seq > flushed {
                                break 'segments;
                            }
                            if record.seq > last_acked {
                                out.push(record);
                            }
                        }
                        None => break,
                    }
                }
            }
            Ok(out)
        })
        .await
        .map_err(join_to_io)
        .map_err(WalError::Io)?
        .map_err(WalError::Io)
    }

    /// Deletes every segment whose maximum sequence is `<= last_acked` (I4).
    /// A segment that fails to open or fully decode is skipped, not deleted,
    /// so a transient read error never causes data loss (§4.4 "Segment GC").
    pub async fn delete_segments_up_to(&self, last_acked: u64) -> Result<(), WalError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            for path in list_segments(&dir)? {
                let max_seq = match scan_segment_max_seq(&path) {
                    Ok(max_seq) => max_seq,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable segment during gc");
                        continue;
                    }
                };
                if max_seq <= last_acked {
                    std::fs::remove_file(&path)?;
                }
            }
            Ok(())
        })
        .await
        .map_err(join_to_io)
        .map_err(WalError::Io)?
        .map_err(WalError::Io)
    }

    /// Idempotent shutdown: cancels the writer task and waits for it to drain
    /// pending writes and fsync+close the active segment.
    pub async fn close(&self) -> Result<(), WalError> {
        self.cancel.cancel();
        let handle = self.writer_handle.lock().take();
        if let Some(handle) = handle {
            handle.await.map_err(join_to_io).map_err(WalError::Io)?;
        }
        Ok(())
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn handle_write(rotation: &Arc<Mutex<RotationState>>, dir: &Path, cfg: &WalConfig, req: WriteReq, written_seq: &Arc<AtomicU64>) {
    let WriteReq { bytes, seq, done } = req;
    let rotation = rotation.clone();
    let dir = dir.to_path_buf();
    let segment_max_seq = cfg.segment_max_seq;
    let result = tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut state = rotation.lock();
        if state.file.is_none() || state.records_in_segment >= segment_max_seq {
            if let Some(old) = state.file.take() {
                old.sync_all()?;
            }
            let path = dir.join(segment_name(seq));
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            state.file = Some(file);
            state.records_in_segment = 0;
        }
        state
            .file
            .as_ref()
            .expect("segment file opened above")
            .write_all(&bytes)?;
        state.records_in_segment += 1;
        Ok(())
    })
    .await;

    match result {
        Ok(Ok(())) => {
            written_seq.store(seq, Ordering::Release);
            let _ = done.send(Ok(()));
        }
        Ok(Err(e)) => {
            let _ = done.send(Err(WalError::Io(e)));
        }
        Err(e) => {
            let _ = done.send(Err(WalError::Io(join_to_io(e))));
        }
    }
}

/// Snapshots `written_seq` *before* fsyncing, then publishes that snapshot to
/// `flushed_seq` only after the fsync returns — never claiming more
/// durability than has actually been proved (§9 "partial-flush durability").
async fn fsync_current(rotation: &Arc<Mutex<RotationState>>, written_seq: &Arc<AtomicU64>, flushed_seq: &Arc<AtomicU64>) {
    let snapshot = written_seq.load(Ordering::Acquire);
    let rotation = rotation.clone();
    let result = tokio::task::spawn_blocking(move || -> io::Result<bool> {
        let state = rotation.lock();
        match state.file.as_ref() {
            Some(file) => {
                file.sync_all()?;
                Ok(true)
            }
            None => Ok(false),
        }
    })
    .await;

    match result {
        Ok(Ok(true)) => flushed_seq.store(snapshot, Ordering::Release),
        Ok(Ok(false)) => {}
        Ok(Err(e)) => warn!(error = %e, "wal fsync failed, will retry next tick"),
        Err(e) => warn!(error = %e, "wal fsync task panicked"),
    }
}

async fn close_current(rotation: &Arc<Mutex<RotationState>>) {
    let rotation = rotation.clone();
    let result = tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut state = rotation.lock();
        if let Some(file) = state.file.take() {
            file.sync_all()?;
        }
        Ok(())
    })
    .await;
    if let Ok(Err(e)) = result {
        warn!(error = %e, "error closing wal segment on shutdown");
    }
}

async fn writer_loop(
    dir: PathBuf,
    cfg: WalConfig,
    mut rx: mpsc::Receiver<WriteReq>,
    rotation: Arc<Mutex<RotationState>>,
    cancel: CancellationToken,
    written_seq: Arc<AtomicU64>,
    flushed_seq: Arc<AtomicU64>,
) {
    let mut ticker = tokio::time::interval(cfg.fsync_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                while let Ok(req) = rx.try_recv() {
                    handle_write(&rotation, &dir, &cfg, req, &written_seq).await;
                }
                fsync_current(&rotation, &written_seq, &flushed_seq).await;
                close_current(&rotation).await;
                return;
            }
            maybe_req = rx.recv() => {
                match maybe_req {
                    Some(req) => handle_write(&rotation, &dir, &cfg, req, &written_seq).await,
                    None => {
                        fsync_current(&rotation, &written_seq, &flushed_seq).await;
                        close_current(&rotation).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                fsync_current(&rotation, &written_seq, &flushed_seq).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Codec;
    use tempfile::tempdir;
    use tracing::Level;

    fn test_cfg() -> WalConfig {
        WalConfig {
            segment_max_seq: 4,
            fsync_interval: Duration::from_millis(10),
            max_disk_usage_mb: 5_120,
            write_channel_capacity: 64,
        }
    }

    /// Installs a test-scoped subscriber so WAL debug/warn logs are visible
    /// under `cargo test -- --nocapture`. Safe to call more than once per
    /// process; later calls are no-ops.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_test_writer()
            .try_init();
    }

    #[tokio::test]
    async fn append_assigns_gap_free_sequences() {
        init_tracing();
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path().to_path_buf(), test_cfg()).await.unwrap();
        let ctx = CancellationToken::new();
        for n in 0..5u32 {
            let payload = format!("{{\"n\":{n}}}").into_bytes();
            let seq = wal.append(&ctx, Record::event(Codec::Json, payload)).await.unwrap();
            assert_eq!(seq, u64::from(n) + 1);
        }
        wal.close().await.unwrap();
    }

    #[tokio::test]
    async fn flushed_seq_reaches_written_seq_after_fsync_interval() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path().to_path_buf(), test_cfg()).await.unwrap();
        let ctx = CancellationToken::new();
        for n in 0..5u32 {
            wal.append(&ctx, Record::event(Codec::Json, format!("{n}").into_bytes()))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(wal.flushed_seq(), 5);
        let records = wal.read_records(0, 5, 10).await.unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].seq, 1);
        assert_eq!(records[4].seq, 5);
        wal.close().await.unwrap();
    }

    #[tokio::test]
    async fn recovers_next_seq_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let wal = Wal::open(dir.path().to_path_buf(), test_cfg()).await.unwrap();
            let ctx = CancellationToken::new();
            for _ in 0..3 {
                wal.append(&ctx, Record::event(Codec::Json, b"x".to_vec())).await.unwrap();
            }
            wal.close().await.unwrap();
        }
        let wal = Wal::open(dir.path().to_path_buf(), test_cfg()).await.unwrap();
        let ctx = CancellationToken::new();
        let seq = wal.append(&ctx, Record::event(Codec::Json, b"y".to_vec())).await.unwrap();
        assert_eq!(seq, 4);
        wal.close().await.unwrap();
    }

    #[tokio::test]
    async fn rotates_segments_at_segment_max_seq() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path().to_path_buf(), test_cfg()).await.unwrap();
        let ctx = CancellationToken::new();
        for _ in 0..10 {
            wal.append(&ctx, Record::event(Codec::Json, b"x".to_vec())).await.unwrap();
        }
        wal.close().await.unwrap();
        let segments = list_segments(dir.path()).unwrap();
        // segment_max_seq = 4 => rotations after 4, 8 records: segments starting at 1, 5, 9
        assert_eq!(segments.len(), 3);
    }

    #[tokio::test]
    async fn gc_deletes_only_fully_acked_segments() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path().to_path_buf(), test_cfg()).await.unwrap();
        let ctx = CancellationToken::new();
        for _ in 0..10 {
            wal.append(&ctx, Record::event(Codec::Json, b"x".to_vec())).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        wal.delete_segments_up_to(4).await.unwrap();
        let remaining = list_segments(dir.path()).unwrap();
        for path in &remaining {
            assert!(scan_segment_max_seq(path).unwrap() > 4);
        }
        assert!(remaining.len() < 3);
        wal.close().await.unwrap();
    }

    #[tokio::test]
    async fn disk_full_gate_rejects_without_consuming_sequence() {
        let dir = tempdir().unwrap();
        let mut cfg = test_cfg();
        cfg.max_disk_usage_mb = 0;
        let wal = Wal::open(dir.path().to_path_buf(), cfg).await.unwrap();
        let ctx = CancellationToken::new();
        let err = wal
            .append(&ctx, Record::event(Codec::Json, b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, WalError::DiskFull));
        assert_eq!(wal.written_seq(), 0);
        wal.close().await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_before_enqueue_returns_immediately() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path().to_path_buf(), test_cfg()).await.unwrap();
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = wal
            .append(&ctx, Record::event(Codec::Json, b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, WalError::Cancelled));
        wal.close().await.unwrap();
    }
}
