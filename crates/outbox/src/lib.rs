// SPDX-License-Identifier: Apache-2.0

//! Durable agent-side outbox: accepts application events from in-process
//! producers, persists them via `outbox-wal`, and reliably ships them to a
//! remote gateway with at-least-once delivery, deduplicated by monotonically
//! increasing sequence numbers (§1).
//!
//! The gateway transport itself is external; implement [`Sender`] against it.

pub mod config;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod sender;
pub mod supervisor;

pub use config::Config;
pub use error::{ConfigError, OutboxError};
pub use event::Event;
pub use event_bus::{EventBus, EventBusConsumer};
pub use sender::{SendResult, Sender};
#[cfg(any(test, feature = "test-util"))]
pub use sender::RecordingSender;
pub use supervisor::Outbox;
