// SPDX-License-Identifier: Apache-2.0

//! Atomic commit-offset store (C2, §3, §4.2).
//!
//! `commit.offset` is a 20-byte file recording the last sequence the gateway
//! has acknowledged for this scope:
//!
//! ```text
//! 0  4  magic = 0x4F42584F ("OBXO")
//! 4  2  version = 1 (big-endian)
//! 6  2  reserved = 0
//! 8  8  last_acked_seq (big-endian uint64)
//! 16 4  crc32 IEEE of bytes [0, 16)
//! ```
//!
//! A missing file, wrong magic, wrong version, short read, or CRC mismatch is
//! treated as "never acknowledged" (`0`), not as an error — a freshly
//! initialized scope, or one recovering from a crash mid-write, must still be
//! able to start sending from the beginning of the log.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::error::CommitError;

const MAGIC: u32 = 0x4F42_584F;
const VERSION: u16 = 1;
const FILE_LEN: usize = 20;
const FILE_NAME: &str = "commit.offset";
const TMP_NAME: &str = "commit.offset.tmp";

/// Atomic reader/writer for a scope's `commit.offset` file.
pub struct CommitStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl CommitStore {
    /// Opens the commit store rooted at `dir` (the scope's WAL directory).
    /// Performs no I/O; the file is read lazily.
    #[must_use]
    pub fn open(dir: PathBuf) -> Self {
        Self {
            dir,
            lock: Mutex::new(()),
        }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(FILE_NAME)
    }

    fn tmp_path(&self) -> PathBuf {
        self.dir.join(TMP_NAME)
    }

    /// Reads the last-acknowledged sequence. Structural or CRC failures are
    /// reported as `0`, matching §3's recovery behavior; only a genuine I/O
    /// error (e.g. a permissions failure) is surfaced as `Err`.
    pub fn read(&self) -> Result<u64, CommitError> {
        let _guard = self.lock.lock();
        let mut file = match File::open(self.path()) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CommitError::Io(e)),
        };
        let mut buf = [0u8; FILE_LEN];
        match file.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(0),
            Err(e) => return Err(CommitError::Io(e)),
        }
        Ok(decode(&buf).unwrap_or(0))
    }

    /// Atomically writes `seq` as the new last-acknowledged sequence:
    /// temp file + fsync + rename + parent-directory fsync. Any failed step
    /// removes the temp file (best-effort) and returns the error.
    pub fn write(&self, seq: u64) -> Result<(), CommitError> {
        let _guard = self.lock.lock();
        let tmp = self.tmp_path();
        let result = (|| -> io::Result<()> {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&encode(seq))?;
            file.sync_all()?;
            drop(file);
            fs::rename(&tmp, self.path())?;
            let dir = File::open(&self.dir)?;
            dir.sync_all()?;
            Ok(())
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result.map_err(CommitError::Io)
    }
}

fn encode(last_acked_seq: u64) -> [u8; FILE_LEN] {
    let mut buf = [0u8; FILE_LEN];
    buf[0..4].copy_from_slice(&MAGIC.to_be_bytes());
    buf[4..6].copy_from_slice(&VERSION.to_be_bytes());
    buf[6..8].copy_from_slice(&[0, 0]);
    buf[8..16].copy_from_slice(&last_acked_seq.to_be_bytes());
    let crc = crc32fast::hash(&buf[0..16]);
    buf[16..20].copy_from_slice(&crc.to_be_bytes());
    buf
}

fn decode(buf: &[u8; FILE_LEN]) -> Option<u64> {
    let magic = u32::from_be_bytes(buf[0..4].try_into().ok()?);
    if magic != MAGIC {
        return None;
    }
    let version = u16::from_be_bytes(buf[4..6].try_into().ok()?);
    if version != VERSION {
        return None;
    }
    let last_acked_seq = u64::from_be_bytes(buf[8..16].try_into().ok()?);
    let stored_crc = u32::from_be_bytes(buf[16..20].try_into().ok()?);
    let computed_crc = crc32fast::hash(&buf[0..16]);
    if computed_crc != stored_crc {
        return None;
    }
    Some(last_acked_seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_reads_zero() {
        let dir = tempdir().unwrap();
        let store = CommitStore::open(dir.path().to_path_buf());
        assert_eq!(store.read().unwrap(), 0);
    }

    #[test]
    fn round_trips_values() {
        let dir = tempdir().unwrap();
        let store = CommitStore::open(dir.path().to_path_buf());
        for v in [1u64, 10, 10_000, u64::MAX] {
            store.write(v).unwrap();
            assert_eq!(store.read().unwrap(), v);
        }
    }

    #[test]
    fn corrupt_file_reads_zero() {
        let dir = tempdir().unwrap();
        let store = CommitStore::open(dir.path().to_path_buf());
        store.write(10).unwrap();
        let path = dir.path().join(FILE_NAME);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();
        assert_eq!(store.read().unwrap(), 0);
    }

    #[test]
    fn wrong_version_reads_zero() {
        let dir = tempdir().unwrap();
        let store = CommitStore::open(dir.path().to_path_buf());
        let mut buf = encode(5);
        buf[4..6].copy_from_slice(&99u16.to_be_bytes());
        let crc = crc32fast::hash(&buf[0..16]);
        buf[16..20].copy_from_slice(&crc.to_be_bytes());
        fs::write(dir.path().join(FILE_NAME), buf).unwrap();
        assert_eq!(store.read().unwrap(), 0);
    }

    #[test]
    fn write_cleans_up_tmp_on_rename_failure() {
        let dir = tempdir().unwrap();
        let store = CommitStore::open(dir.path().to_path_buf());
        // Make the target path a directory so rename() fails.
        fs::create_dir(dir.path().join(FILE_NAME)).unwrap();
        assert!(store.write(1).is_err());
        assert!(!dir.path().join(TMP_NAME).exists());
    }
}
