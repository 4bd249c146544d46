//! Distributed ready/done barrier over publish/subscribe
//!
//! Every node publishes `{id}:READY` on `benchmark/ready_state/{id}` and waits
//! until it has seen a READY from each expected node, then does the same with
//! DONE on `benchmark/done_state/{id}`. Control messages carry the reserved
//! `lifecycle` purpose so they pass purpose-enforcing brokers.

mod barrier;
mod messages;

pub use barrier::{NodeState, NodeStates, SyncBarrier, SyncError};
pub use messages::{
    DONE_STATE_PREFIX, LIFECYCLE_PURPOSE, LifecycleMessage, Phase, READY_STATE_PREFIX, is_lifecycle_topic,
};
