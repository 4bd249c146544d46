//! BenchmarkClient - a purpose-aware pub/sub client under test

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::purpose::{CodecError, PurposeCodec, PurposeMethod};
use crate::results::{CorrectnessTestResult, LogRecord, ResultSink};
use crate::sync::{SyncBarrier, is_lifecycle_topic};
use crate::transport::{InboundMessage, Transport, TransportError};

/// Payload a correctness test sends with an approved purpose
pub const GOOD_PAYLOAD: &str = "GOOD";

/// Payload a correctness test sends with a non-approved purpose
pub const BAD_PAYLOAD: &str = "BAD";

/// A transport session plus the bookkeeping the benchmark needs
///
/// Correctness results are mutated only by this client's delivery task.
pub struct BenchmarkClient {
    client_id: String,
    benchmark_id: String,
    transport: Arc<dyn Transport>,
    results: Mutex<Option<CorrectnessTestResult>>,
    sink: Option<Arc<dyn ResultSink>>,
    next_subscription_id: AtomicU64,
}

impl BenchmarkClient {
    pub fn new(benchmark_id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let client_id = transport.client_id().to_string();
        Self {
            client_id,
            benchmark_id: benchmark_id.into(),
            transport,
            results: Mutex::new(None),
            sink: None,
            next_subscription_id: AtomicU64::new(1),
        }
    }

    /// Log CONNECT/SUBSCRIBE/PUBLISH records to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn benchmark_id(&self) -> &str {
        &self.benchmark_id
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    fn log(&self, record: LogRecord) {
        if let Some(sink) = &self.sink {
            sink.record(record);
        }
    }

    pub async fn connect(&self, address: &str, port: u16) -> Result<(), TransportError> {
        debug!(client_id = %self.client_id, %address, port, "BenchmarkClient::connect: called");
        if let Err(e) = self.transport.connect(address, port).await {
            error!(client_id = %self.client_id, error = %e, "Failed to connect to broker {}:{}", address, port);
            return Err(e);
        }
        self.log(LogRecord::Connect {
            timestamp: Utc::now(),
            benchmark_id: self.benchmark_id.clone(),
            client_id: self.client_id.clone(),
        });
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn disconnect(&self) -> Result<(), TransportError> {
        debug!(client_id = %self.client_id, "BenchmarkClient::disconnect: called");
        self.transport.disconnect().await
    }

    /// Publish `msg` on `topic` tagged with `purpose`
    pub async fn publish_with_purpose(
        &self,
        topic: &str,
        purpose: &str,
        msg: &str,
        method: PurposeMethod,
    ) -> Result<(), CodecError> {
        PurposeCodec::new(method)
            .publish(self.transport.as_ref(), topic, purpose, msg)
            .await?;
        self.log(LogRecord::Publish {
            timestamp: Utc::now(),
            benchmark_id: self.benchmark_id.clone(),
            client_id: self.client_id.clone(),
            topic: topic.to_string(),
            purpose: purpose.to_string(),
            msg_type: method.code().to_string(),
            payload: msg.to_string(),
        });
        Ok(())
    }

    /// Subscribe to `topic` restricted to `purpose_filter`
    ///
    /// Returns the subscription id recorded in the result log.
    pub async fn subscribe_with_purpose(
        &self,
        topic: &str,
        purpose_filter: &str,
        method: PurposeMethod,
    ) -> Result<u64, CodecError> {
        let count = PurposeCodec::new(method)
            .subscribe(self.transport.as_ref(), topic, purpose_filter)
            .await?;
        let subscription_id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        debug!(client_id = %self.client_id, %topic, %purpose_filter, count, subscription_id, "Subscribed");
        self.log(LogRecord::Subscribe {
            timestamp: Utc::now(),
            benchmark_id: self.benchmark_id.clone(),
            client_id: self.client_id.clone(),
            topic_filter: topic.to_string(),
            purpose_filter: purpose_filter.to_string(),
            subscription_id,
        });
        Ok(subscription_id)
    }

    /// Start a new correctness test, replacing any previous result
    pub fn initialize_test(&self, test_name: &str) {
        info!(client_id = %self.client_id, %test_name, "Initializing correctness test");
        *self.results.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(CorrectnessTestResult::new(&self.client_id, test_name));
    }

    /// Correctness callback: GOOD counts as success, anything else as failure
    pub fn on_correctness_message(&self, message: &InboundMessage) {
        let mut guard = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(results) = guard.as_mut() else {
            debug!(client_id = %self.client_id, topic = %message.topic, "No correctness test running, ignoring");
            return;
        };
        if message.payload == GOOD_PAYLOAD {
            results.success();
        } else {
            results.failure(format!(
                "Received message for non-approved purpose on {}",
                message.topic
            ));
        }
    }

    /// Current correctness result, if a test was initialized
    pub fn results(&self) -> Option<CorrectnessTestResult> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Start the delivery task for the current connection
    ///
    /// Lifecycle topics go to `barrier`; everything else to the correctness
    /// callback. The task ends when the connection's inbound channel closes.
    pub fn spawn_delivery(self: &Arc<Self>, barrier: Option<Arc<SyncBarrier>>) -> Result<JoinHandle<()>, TransportError> {
        let mut inbound = self
            .transport
            .take_inbound()
            .ok_or_else(|| TransportError::ChannelClosed(self.client_id.clone()))?;
        let client = Arc::clone(self);

        Ok(tokio::spawn(async move {
            debug!(client_id = %client.client_id, "Delivery task started");
            while let Some(message) = inbound.recv().await {
                if is_lifecycle_topic(&message.topic) {
                    if let Some(barrier) = &barrier {
                        barrier.on_message(&message.topic, &message.payload);
                    }
                } else {
                    client.on_correctness_message(&message);
                }
            }
            debug!(client_id = %client.client_id, "Delivery task stopped");
        }))
    }
}
