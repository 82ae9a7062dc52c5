// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for configuration and the outbox supervisor (§7).

use outbox_wal::WalError;

/// Errors raised while validating a [`crate::config::Config`] (§6 Config table, §7 Configuration).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `agent_id` was empty.
    #[error("agent_id is required")]
    AgentIdRequired,

    /// `agent_id`, `project_id`, or `pipeline_id` exceeded 128 characters.
    #[error("scope component {field} exceeds 128 characters")]
    ScopeTooLong {
        /// Name of the offending field.
        field: &'static str,
    },
}

/// Errors surfaced by [`crate::supervisor::Outbox`] (§6 Outbox public API surface, §7).
#[derive(thiserror::Error, Debug)]
pub enum OutboxError {
    /// `append`/`append_map` called after [`crate::supervisor::Outbox::close`].
    #[error("outbox is closed")]
    Closed,

    /// The WAL rejected the append (disk-full gate, cancellation, or I/O).
    #[error("wal error: {0}")]
    Wal(#[from] WalError),

    /// `append_map`'s payload failed to serialize to JSON.
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Construction-time config validation failure.
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
}
