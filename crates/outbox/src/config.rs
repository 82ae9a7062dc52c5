// SPDX-License-Identifier: Apache-2.0

//! Outbox configuration (§6 Config table).

use std::path::PathBuf;
use std::time::Duration;

use byte_unit::{Byte, Unit};
use serde::Deserialize;

use crate::error::ConfigError;

/// Default WAL root directory.
fn default_wal_dir() -> PathBuf {
    PathBuf::from("./outbox")
}

/// Default rotation trigger, in records per segment.
fn default_segment_max_seq() -> u64 {
    10_000
}

/// Default writer-task fsync ticker interval.
fn default_fsync_interval() -> Duration {
    Duration::from_millis(100)
}

/// Default maximum events per `Sender::send` call.
fn default_send_batch_size() -> usize {
    100
}

/// Default send-loop ticker interval.
fn default_send_interval() -> Duration {
    Duration::from_millis(50)
}

/// Default append-time disk usage gate (5120 MiB, §6 Config table).
fn default_max_disk_usage() -> Byte {
    Byte::from_u64_with_unit(5_120, Unit::MiB).expect("valid constant")
}

/// Validated configuration for one [`crate::supervisor::Outbox`] scope.
///
/// Deserializable from JSON/YAML/etc. the way the persistence processor's own
/// config is; construct with [`Config::validate`] before passing to
/// [`crate::supervisor::Outbox::new`].
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directory under which the scope's directory is created.
    #[serde(default = "default_wal_dir")]
    pub wal_dir: PathBuf,

    /// Required agent identifier; bounds the sequence namespace. ≤ 128 chars.
    pub agent_id: String,

    /// Optional project identifier. ≤ 128 chars.
    #[serde(default)]
    pub project_id: Option<String>,

    /// Optional pipeline identifier. ≤ 128 chars.
    #[serde(default)]
    pub pipeline_id: Option<String>,

    /// Records per segment before rotation.
    #[serde(default = "default_segment_max_seq")]
    pub segment_max_seq: u64,

    /// Interval on which the WAL writer task fsyncs the active segment.
    #[serde(with = "humantime_serde", default = "default_fsync_interval")]
    pub fsync_interval: Duration,

    /// Max events forwarded per `Sender::send` call.
    #[serde(default = "default_send_batch_size")]
    pub send_batch_size: usize,

    /// Interval on which the send loop wakes up to drain newly-flushed records.
    #[serde(with = "humantime_serde", default = "default_send_interval")]
    pub send_interval: Duration,

    /// Append-time disk usage gate (e.g. "5120 MiB", "5 GB", or raw bytes).
    /// Supports both IEC (KiB, MiB, GiB) and SI (KB, MB, GB) units.
    #[serde(default = "default_max_disk_usage")]
    pub max_disk_usage: Byte,
}

const MAX_SCOPE_COMPONENT_LEN: usize = 128;

impl Config {
    /// Checks the fields whose validity can't be expressed by `serde` alone
    /// (§6 Config table; `ErrAgentIdRequired`, `ErrScopeTooLong`).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_id.is_empty() {
            return Err(ConfigError::AgentIdRequired);
        }
        if self.agent_id.len() > MAX_SCOPE_COMPONENT_LEN {
            return Err(ConfigError::ScopeTooLong { field: "agent_id" });
        }
        if let Some(project_id) = &self.project_id {
            if project_id.len() > MAX_SCOPE_COMPONENT_LEN {
                return Err(ConfigError::ScopeTooLong { field: "project_id" });
            }
        }
        if let Some(pipeline_id) = &self.pipeline_id {
            if pipeline_id.len() > MAX_SCOPE_COMPONENT_LEN {
                return Err(ConfigError::ScopeTooLong { field: "pipeline_id" });
            }
        }
        Ok(())
    }

    /// Builds the [`outbox_wal::Scope`] this config describes.
    pub(crate) fn scope(&self) -> outbox_wal::Scope {
        outbox_wal::Scope {
            project_id: self.project_id.clone(),
            pipeline_id: self.pipeline_id.clone(),
            agent_id: self.agent_id.clone(),
        }
    }

    /// Builds the [`outbox_wal::WalConfig`] this config describes.
    pub(crate) fn wal_config(&self) -> outbox_wal::WalConfig {
        let max_disk_usage_mb = self.max_disk_usage.as_u64() / (1024 * 1024);
        outbox_wal::WalConfig {
            segment_max_seq: self.segment_max_seq,
            fsync_interval: self.fsync_interval,
            max_disk_usage_mb,
            write_channel_capacity: 1024,
        }
    }
}
