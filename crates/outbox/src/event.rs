// SPDX-License-Identifier: Apache-2.0

//! Outbound event shape (§3 Data model, "Event").

use std::collections::BTreeMap;

use serde_json::Value;

/// A WAL record translated into the shape handed to a [`crate::sender::Sender`].
///
/// Built by [`crate::supervisor::Outbox`]'s send loop from a decoded record
/// payload; never constructed directly by callers of `append`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// The record's assigned sequence number.
    pub seq: u64,
    /// Derived as `"evt-{seq}"`.
    pub event_id: String,
    /// Always `"outbox"` for records produced by this crate.
    pub event_type: &'static str,
    /// Decoded JSON payload, as a string-keyed map.
    pub payload: BTreeMap<String, Value>,
    /// Owning agent.
    pub agent_id: String,
    /// Owning pipeline, if the scope has one.
    pub pipeline_id: Option<String>,
    /// Reserved for future step-level attribution; unset by this crate today.
    pub step_id: Option<String>,
}

impl Event {
    pub(crate) fn new(
        seq: u64,
        payload: BTreeMap<String, Value>,
        agent_id: String,
        pipeline_id: Option<String>,
    ) -> Self {
        Self {
            seq,
            event_id: format!("evt-{seq}"),
            event_type: "outbox",
            payload,
            agent_id,
            pipeline_id,
            step_id: None,
        }
    }
}
