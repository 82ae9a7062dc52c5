// SPDX-License-Identifier: Apache-2.0

//! Segmented write-ahead log with a durable commit-offset store.
//!
//! This crate implements the persistence half of the agent outbox: a
//! CRC-framed record codec (C1), an atomically-written commit-offset file
//! (C2), a scope-to-path builder (C3), and the segmented WAL engine itself
//! (C4) — sequence assignment, batched fsync, crash recovery, bounded reads
//! over a sequence window, and segment garbage collection.
//!
//! Delivery (reading records and forwarding them to a gateway) lives one
//! layer up, in the `outbox` crate.

pub mod commit;
pub mod error;
pub mod path;
pub mod record;
pub mod wal;

pub use commit::CommitStore;
pub use error::{CommitError, WalError};
pub use path::{sanitize_component, scope_dir, Scope, MAX_COMPONENT_LEN};
pub use record::{Codec, Record, RecordType, MAX_FRAME_LEN, MIN_FRAME_LEN};
pub use wal::{Wal, WalConfig};
