//! Single-broker correctness scenario for one purpose method

use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result, eyre};
use tracing::{debug, info};

use super::benchmark::{BAD_PAYLOAD, BenchmarkClient, GOOD_PAYLOAD};
use crate::purpose::PurposeMethod;
use crate::results::{CorrectnessTestResult, ResultSink};
use crate::transport::MemoryBroker;

/// One subscriber with a purpose filter, one publisher sending GOOD messages
/// with an approved purpose and BAD messages with a denied one
#[derive(Debug, Clone)]
pub struct CorrectnessScenario {
    pub method: PurposeMethod,
    pub benchmark_id: String,
    pub topic: String,
    pub purpose_filter: String,
    pub approved_purpose: String,
    pub denied_purpose: String,
    pub rounds: usize,
    /// Time allowed for in-flight deliveries before results are collected
    pub settle: Duration,
}

impl CorrectnessScenario {
    pub fn new(method: PurposeMethod) -> Self {
        Self {
            method,
            benchmark_id: "benchmark-1".to_string(),
            topic: "room1".to_string(),
            purpose_filter: "{chat,alert}".to_string(),
            approved_purpose: "chat".to_string(),
            denied_purpose: "update".to_string(),
            rounds: 3,
            settle: Duration::from_millis(100),
        }
    }

    pub fn test_name(&self) -> String {
        format!("correctness-{}", self.method.code())
    }

    /// Run against `broker` and return the subscriber's result
    pub async fn run(&self, broker: &MemoryBroker, sink: Option<Arc<dyn ResultSink>>) -> Result<CorrectnessTestResult> {
        info!(method = %self.method, rounds = self.rounds, "Running correctness scenario");
        let code = self.method.code().to_lowercase();
        let make = |role: &str| {
            let client = BenchmarkClient::new(
                self.benchmark_id.clone(),
                Arc::new(broker.client(format!("{}-{}", code, role))),
            );
            match &sink {
                Some(sink) => client.with_sink(Arc::clone(sink)),
                None => client,
            }
        };
        let subscriber = Arc::new(make("subscriber"));
        let publisher = make("publisher");

        subscriber
            .connect(broker.address(), broker.port())
            .await
            .context("Failed to connect subscriber")?;
        publisher
            .connect(broker.address(), broker.port())
            .await
            .context("Failed to connect publisher")?;

        subscriber.initialize_test(&self.test_name());
        let delivery = subscriber.spawn_delivery(None)?;
        subscriber
            .subscribe_with_purpose(&self.topic, &self.purpose_filter, self.method)
            .await?;

        for round in 0..self.rounds {
            debug!(round, "Publishing approved and denied messages");
            publisher
                .publish_with_purpose(&self.topic, &self.approved_purpose, GOOD_PAYLOAD, self.method)
                .await?;
            publisher
                .publish_with_purpose(&self.topic, &self.denied_purpose, BAD_PAYLOAD, self.method)
                .await?;
        }

        tokio::time::sleep(self.settle).await;
        let results = subscriber
            .results()
            .ok_or_else(|| eyre!("No correctness result for {}", subscriber.client_id()))?;

        publisher.disconnect().await?;
        subscriber.disconnect().await?;
        delivery.await.context("Delivery task failed")?;

        info!(
            method = %self.method,
            successes = results.success_count(),
            failures = results.failure_count(),
            "Correctness scenario finished"
        );
        Ok(results)
    }
}
