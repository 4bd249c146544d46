//! SyncBarrier - two-phase barrier across a fixed node set

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::messages::{LIFECYCLE_PURPOSE, LifecycleMessage, Phase};
use crate::purpose::{CodecError, PurposeCodec, PurposeMethod};
use crate::transport::Transport;

/// Errors from barrier operations
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Node {0} is not in the expected node set")]
    UnknownSelf(String),

    #[error("Timed out after {timeout:?} waiting for {phase} from {pending:?}")]
    Timeout {
        phase: Phase,
        timeout: Duration,
        pending: Vec<String>,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Per-node barrier flags; both only ever go false -> true
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeState {
    pub ready: bool,
    pub done: bool,
}

impl NodeState {
    pub fn get(&self, phase: Phase) -> bool {
        match phase {
            Phase::Ready => self.ready,
            Phase::Done => self.done,
        }
    }

    /// Raise the flag for `phase`, returning whether it changed
    fn raise(&mut self, phase: Phase) -> bool {
        let flag = match phase {
            Phase::Ready => &mut self.ready,
            Phase::Done => &mut self.done,
        };
        let changed = !*flag;
        *flag = true;
        changed
    }
}

/// Flags for every expected node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStates(BTreeMap<String, NodeState>);

impl NodeStates {
    pub fn new<I, S>(node_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            node_ids
                .into_iter()
                .map(|id| (id.into(), NodeState::default()))
                .collect(),
        )
    }

    /// Raise `phase` for `node_id`; unknown ids are ignored
    pub fn mark(&mut self, node_id: &str, phase: Phase) -> bool {
        self.0.get_mut(node_id).is_some_and(|state| state.raise(phase))
    }

    pub fn get(&self, node_id: &str) -> Option<NodeState> {
        self.0.get(node_id).copied()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.0.contains_key(node_id)
    }

    /// Every node has reported `phase`
    pub fn is_complete(&self, phase: Phase) -> bool {
        self.0.values().all(|state| state.get(phase))
    }

    /// Nodes that have not reported `phase` yet
    pub fn pending(&self, phase: Phase) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, state)| !state.get(phase))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Ready/done barrier driven purely by observed pub/sub messages
///
/// Node state lives in a watch channel: the delivery path flips flags with
/// [`on_message`](Self::on_message) and waiters wake on each real change.
/// Callbacks must not await the barrier they feed.
pub struct SyncBarrier {
    my_id: String,
    codec: PurposeCodec,
    transport: Arc<dyn Transport>,
    state: watch::Sender<NodeStates>,
}

impl SyncBarrier {
    /// Create a barrier for `my_id` among `expected` nodes
    pub fn new<I, S>(
        my_id: impl Into<String>,
        expected: I,
        transport: Arc<dyn Transport>,
        method: PurposeMethod,
    ) -> Result<Self, SyncError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let my_id = my_id.into();
        let states = NodeStates::new(expected);
        if !states.contains(&my_id) {
            return Err(SyncError::UnknownSelf(my_id));
        }
        debug!(%my_id, nodes = states.len(), method = method.code(), "SyncBarrier::new: called");
        let (state, _) = watch::channel(states);
        Ok(Self {
            my_id,
            codec: PurposeCodec::new(method),
            transport,
            state,
        })
    }

    pub fn my_id(&self) -> &str {
        &self.my_id
    }

    /// Copy of the current node flags
    pub fn snapshot(&self) -> NodeStates {
        self.state.borrow().clone()
    }

    /// Subscribe to the ready and done topics of every expected node
    pub async fn subscribe(&self) -> Result<(), SyncError> {
        let node_ids: Vec<String> = self.state.borrow().node_ids().map(str::to_string).collect();
        debug!(my_id = %self.my_id, count = node_ids.len(), "SyncBarrier::subscribe: called");
        for node_id in &node_ids {
            for phase in [Phase::Ready, Phase::Done] {
                self.codec
                    .subscribe(self.transport.as_ref(), &phase.topic_for(node_id), LIFECYCLE_PURPOSE)
                    .await?;
            }
        }
        Ok(())
    }

    /// Declare this node ready
    pub async fn notify_ready(&self) -> Result<(), SyncError> {
        self.notify(Phase::Ready).await
    }

    /// Declare this node done
    pub async fn notify_done(&self) -> Result<(), SyncError> {
        self.notify(Phase::Done).await
    }

    async fn notify(&self, phase: Phase) -> Result<(), SyncError> {
        debug!(my_id = %self.my_id, %phase, "SyncBarrier::notify: called");
        // Retained so nodes that subscribe later still observe it
        self.codec
            .publish_retained(
                self.transport.as_ref(),
                &phase.topic_for(&self.my_id),
                LIFECYCLE_PURPOSE,
                &phase.payload_for(&self.my_id),
            )
            .await?;

        // Self-observation must not depend on loopback
        self.mark(&self.my_id, phase);
        info!(my_id = %self.my_id, %phase, "Declared {}", phase.status());
        Ok(())
    }

    /// Feed a delivered message into the barrier
    ///
    /// Returns true if a flag changed. Stray, malformed, or unknown-node
    /// messages are ignored.
    pub fn on_message(&self, topic: &str, payload: &str) -> bool {
        let Some(phase) = Phase::from_topic(topic) else {
            debug!(%topic, "SyncBarrier::on_message: not a lifecycle topic");
            return false;
        };
        let Some(msg) = LifecycleMessage::parse(payload) else {
            warn!(%topic, %payload, "SyncBarrier::on_message: ignoring malformed payload");
            return false;
        };
        if msg.status != phase.status() {
            debug!(%topic, status = msg.status, "SyncBarrier::on_message: status does not match topic");
            return false;
        }
        if !self.state.borrow().contains(msg.node_id) {
            debug!(node_id = msg.node_id, "SyncBarrier::on_message: ignoring unknown node");
            return false;
        }

        let changed = self.mark(msg.node_id, phase);
        if changed {
            info!(node_id = msg.node_id, %phase, "Received {} from {}", phase.status(), msg.node_id);
        }
        changed
    }

    fn mark(&self, node_id: &str, phase: Phase) -> bool {
        self.state.send_if_modified(|states| states.mark(node_id, phase))
    }

    /// Wait until every node is ready
    pub async fn wait_for_ready(&self) -> bool {
        self.wait_for(Phase::Ready).await
    }

    /// Wait until every node is done
    pub async fn wait_for_done(&self) -> bool {
        self.wait_for(Phase::Done).await
    }

    /// [`wait_for_ready`](Self::wait_for_ready) bounded by `timeout`
    pub async fn wait_for_ready_timeout(&self, timeout: Duration) -> Result<bool, SyncError> {
        self.wait_for_timeout(Phase::Ready, timeout).await
    }

    /// [`wait_for_done`](Self::wait_for_done) bounded by `timeout`
    pub async fn wait_for_done_timeout(&self, timeout: Duration) -> Result<bool, SyncError> {
        self.wait_for_timeout(Phase::Done, timeout).await
    }

    async fn wait_for(&self, phase: Phase) -> bool {
        debug!(my_id = %self.my_id, %phase, "SyncBarrier::wait_for: called");
        let mut rx = self.state.subscribe();
        let released = rx.wait_for(|states| states.is_complete(phase)).await.is_ok();
        if released {
            info!(my_id = %self.my_id, %phase, "Barrier released");
        }
        released
    }

    async fn wait_for_timeout(&self, phase: Phase, timeout: Duration) -> Result<bool, SyncError> {
        match tokio::time::timeout(timeout, self.wait_for(phase)).await {
            Ok(released) => Ok(released),
            Err(_) => {
                let pending = self.state.borrow().pending(phase);
                warn!(my_id = %self.my_id, %phase, ?pending, "Barrier wait timed out");
                Err(SyncError::Timeout {
                    phase,
                    timeout,
                    pending,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBroker;

    const NODES: [&str; 3] = ["n1", "n2", "n3"];

    fn barrier(method: PurposeMethod) -> SyncBarrier {
        let broker = MemoryBroker::default();
        let transport: Arc<dyn Transport> = Arc::new(broker.client("n1"));
        SyncBarrier::new("n1", NODES, transport, method).unwrap()
    }

    async fn is_released(barrier: &SyncBarrier, phase: Phase) -> bool {
        let wait = async {
            match phase {
                Phase::Ready => barrier.wait_for_ready().await,
                Phase::Done => barrier.wait_for_done().await,
            }
        };
        tokio::time::timeout(Duration::from_millis(20), wait).await.is_ok()
    }

    #[test]
    fn test_unknown_self_rejected() {
        let broker = MemoryBroker::default();
        let transport: Arc<dyn Transport> = Arc::new(broker.client("n9"));
        let result = SyncBarrier::new("n9", NODES, transport, PurposeMethod::TopicEncoding);
        assert!(matches!(result, Err(SyncError::UnknownSelf(id)) if id == "n9"));
    }

    #[test]
    fn test_initial_state_all_false() {
        let barrier = barrier(PurposeMethod::TopicEncoding);
        let states = barrier.snapshot();
        assert_eq!(states.len(), 3);
        for id in NODES {
            assert_eq!(states.get(id), Some(NodeState::default()));
        }
        assert_eq!(states.pending(Phase::Ready), vec!["n1", "n2", "n3"]);
    }

    #[tokio::test]
    async fn test_release_under_every_arrival_order() {
        let permutations = [
            ["n1", "n2", "n3"],
            ["n1", "n3", "n2"],
            ["n2", "n1", "n3"],
            ["n2", "n3", "n1"],
            ["n3", "n1", "n2"],
            ["n3", "n2", "n1"],
        ];
        for order in permutations {
            let barrier = barrier(PurposeMethod::PerMessageProperty);
            for (i, id) in order.iter().enumerate() {
                assert!(!is_released(&barrier, Phase::Ready).await, "released early for {:?}", order);
                let changed = barrier.on_message(&Phase::Ready.topic_for(id), &Phase::Ready.payload_for(id));
                assert!(changed);
                if i < 2 {
                    assert!(!barrier.snapshot().is_complete(Phase::Ready));
                }
            }
            assert!(is_released(&barrier, Phase::Ready).await, "not released for {:?}", order);
        }
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_last_message() {
        let barrier = Arc::new(barrier(PurposeMethod::TopicEncoding));
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait_for_done().await })
        };

        for id in NODES {
            tokio::task::yield_now().await;
            assert!(!waiter.is_finished());
            barrier.on_message(&format!("{}/[lifecycle]", Phase::Done.topic_for(id)), &Phase::Done.payload_for(id));
        }

        let released = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(released);
    }

    #[tokio::test]
    async fn test_flags_are_monotonic() {
        let barrier = barrier(PurposeMethod::TopicEncoding);
        assert!(barrier.on_message("benchmark/ready_state/n2", "n2:READY"));

        let noise = [
            ("benchmark/ready_state/n2", "n2:READY"),
            ("benchmark/ready_state/n2", "n2:DONE"),
            ("benchmark/ready_state/n2", "garbage"),
            ("benchmark/ready_state/n2", ""),
            ("benchmark/done_state/n2", "n2:READY"),
            ("benchmark/ready_state/n7", "n7:READY"),
            ("room1", "n2:READY"),
        ];
        for (topic, payload) in noise {
            assert!(!barrier.on_message(topic, payload), "{} {} changed state", topic, payload);
            assert!(barrier.snapshot().get("n2").unwrap().ready);
        }
        assert!(!barrier.snapshot().get("n2").unwrap().done);
    }

    #[tokio::test]
    async fn test_notify_sets_own_flag_without_loopback() {
        let broker = MemoryBroker::new(crate::transport::BrokerConfig {
            loopback: false,
            ..Default::default()
        });
        let client = broker.client("n1");
        client.connect("localhost", 1883).await.unwrap();
        let transport: Arc<dyn Transport> = Arc::new(client);
        let barrier = SyncBarrier::new("n1", ["n1"], transport, PurposeMethod::RegistrationByTopic).unwrap();

        barrier.notify_ready().await.unwrap();
        assert!(barrier.wait_for_ready().await);
        assert!(!barrier.snapshot().get("n1").unwrap().done);
    }

    #[tokio::test]
    async fn test_notify_propagates_transport_error() {
        let barrier = barrier(PurposeMethod::TopicEncoding);
        let err = barrier.notify_ready().await.unwrap_err();
        assert!(matches!(err, SyncError::Codec(CodecError::Transport(_))));
        assert!(!barrier.snapshot().get("n1").unwrap().ready);
    }

    #[tokio::test]
    async fn test_wait_timeout_reports_pending() {
        let barrier = barrier(PurposeMethod::TopicEncoding);
        barrier.on_message("benchmark/ready_state/n1", "n1:READY");
        let err = barrier
            .wait_for_ready_timeout(Duration::from_millis(10))
            .await
            .unwrap_err();
        match err {
            SyncError::Timeout { phase, pending, .. } => {
                assert_eq!(phase, Phase::Ready);
                assert_eq!(pending, vec!["n2", "n3"]);
            }
            other => panic!("Expected Timeout, got {:?}", other),
        }
    }
}
