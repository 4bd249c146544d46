//! Lifecycle message grammar for the benchmark barrier

use std::fmt;

use crate::purpose::split_purpose_segment;

/// Reserved purpose for barrier control messages
pub const LIFECYCLE_PURPOSE: &str = "lifecycle";

/// Topic prefix for readiness declarations
pub const READY_STATE_PREFIX: &str = "benchmark/ready_state/";

/// Topic prefix for completion declarations
pub const DONE_STATE_PREFIX: &str = "benchmark/done_state/";

/// Barrier phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Ready,
    Done,
}

impl Phase {
    pub fn topic_prefix(&self) -> &'static str {
        match self {
            Phase::Ready => READY_STATE_PREFIX,
            Phase::Done => DONE_STATE_PREFIX,
        }
    }

    /// Status word carried in the payload
    pub fn status(&self) -> &'static str {
        match self {
            Phase::Ready => "READY",
            Phase::Done => "DONE",
        }
    }

    /// Declaration topic for `node_id`
    pub fn topic_for(&self, node_id: &str) -> String {
        format!("{}{}", self.topic_prefix(), node_id)
    }

    /// Declaration payload for `node_id`
    pub fn payload_for(&self, node_id: &str) -> String {
        format!("{}:{}", node_id, self.status())
    }

    /// Phase whose declaration topic this is
    ///
    /// A topic-encoding purpose level (`/[lifecycle]`) is ignored.
    pub fn from_topic(topic: &str) -> Option<Phase> {
        let (bare, _) = split_purpose_segment(topic);
        if bare.starts_with(READY_STATE_PREFIX) {
            Some(Phase::Ready)
        } else if bare.starts_with(DONE_STATE_PREFIX) {
            Some(Phase::Done)
        } else {
            None
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status().to_lowercase())
    }
}

/// A parsed `{node_id}:{status}` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleMessage<'a> {
    pub node_id: &'a str,
    pub status: &'a str,
}

impl<'a> LifecycleMessage<'a> {
    /// Parse a payload, splitting at the last `:`
    pub fn parse(payload: &'a str) -> Option<Self> {
        let (node_id, status) = payload.rsplit_once(':')?;
        if node_id.is_empty() || status.is_empty() {
            return None;
        }
        Some(Self { node_id, status })
    }
}

/// Whether a topic belongs to the barrier
pub fn is_lifecycle_topic(topic: &str) -> bool {
    Phase::from_topic(topic).is_some()
}
