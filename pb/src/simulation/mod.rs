//! Randomized client workload over a shared broker
//!
//! A [`TestFramework`] creates simulated clients, each subscribed to a random
//! subset of topics with a random purpose filter, then runs cycles that publish
//! a random number of messages and disconnect a random share of the clients
//! still connected. All randomness comes from one seeded [`StdRng`]; the seed
//! is logged so a run can be replayed.

use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::BenchmarkClient;
use crate::config::WorkloadConfig;
use crate::purpose::PurposeMethod;
use crate::results::ResultSink;
use crate::transport::MemoryBroker;

/// One simulated client and what it subscribed to
pub struct SimClient {
    id: usize,
    client: Arc<BenchmarkClient>,
    subscribed_topics: Vec<String>,
    purpose_filter: String,
    delivery: Option<JoinHandle<()>>,
}

impl SimClient {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn client_id(&self) -> &str {
        self.client.client_id()
    }

    pub fn subscribed_topics(&self) -> &[String] {
        &self.subscribed_topics
    }

    pub fn purpose_filter(&self) -> &str {
        &self.purpose_filter
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }
}

/// Totals for a simulation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulationSummary {
    pub seed: u64,
    pub cycles: usize,
    pub clients: usize,
    pub published: usize,
    pub disconnected: usize,
    pub still_connected: usize,
    pub delivered: u64,
    pub denied: u64,
}

pub struct TestFramework {
    seed: u64,
    rng: StdRng,
    method: PurposeMethod,
    benchmark_id: String,
    broker: MemoryBroker,
    workload: WorkloadConfig,
    sink: Option<Arc<dyn ResultSink>>,
    clients: Vec<SimClient>,
    published: usize,
    disconnected: usize,
    cycles_run: usize,
}

impl TestFramework {
    /// Seed from `workload.seed`, or pick one at random and log it
    pub fn new(broker: MemoryBroker, workload: WorkloadConfig, method: PurposeMethod) -> Self {
        let seed = workload.seed.unwrap_or_else(|| rand::rng().random_range(0..1_000_000));
        info!(seed, "Random seed for this test run");
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
            method,
            benchmark_id: "benchmark-1".to_string(),
            broker,
            workload,
            sink: None,
            clients: Vec::new(),
            published: 0,
            disconnected: 0,
            cycles_run: 0,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_benchmark_id(mut self, benchmark_id: impl Into<String>) -> Self {
        self.benchmark_id = benchmark_id.into();
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn clients(&self) -> &[SimClient] {
        &self.clients
    }

    fn active(&self) -> Vec<usize> {
        self.clients
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_connected())
            .map(|(i, _)| i)
            .collect()
    }

    /// Create, connect and subscribe `count` clients
    pub async fn create_clients(&mut self, count: usize) -> Result<()> {
        debug!(count, "TestFramework::create_clients: called");
        for _ in 0..count {
            let id = self.clients.len();
            let topic_count = self.rng.random_range(1..=self.workload.topics.len());
            let subscribed_topics: Vec<String> = self
                .workload
                .topics
                .choose_multiple(&mut self.rng, topic_count)
                .cloned()
                .collect();
            let purpose_count = self.rng.random_range(1..=self.workload.purposes.len());
            let purposes: Vec<&str> = self
                .workload
                .purposes
                .choose_multiple(&mut self.rng, purpose_count)
                .map(String::as_str)
                .collect();
            let purpose_filter = format!("{{{}}}", purposes.join(","));

            let mut client = BenchmarkClient::new(
                self.benchmark_id.clone(),
                Arc::new(self.broker.client(format!("client-{}", id))),
            );
            if let Some(sink) = &self.sink {
                client = client.with_sink(Arc::clone(sink));
            }
            let client = Arc::new(client);
            client
                .connect(self.broker.address(), self.broker.port())
                .await
                .context(format!("Failed to connect client {}", id))?;
            let delivery = client.spawn_delivery(None)?;
            for topic in &subscribed_topics {
                client
                    .subscribe_with_purpose(topic, &purpose_filter, self.method)
                    .await
                    .context(format!("Client {} failed to subscribe to {}", id, topic))?;
            }

            info!(client = id, topics = ?subscribed_topics, %purpose_filter, "Created client");
            self.clients.push(SimClient {
                id,
                client,
                subscribed_topics,
                purpose_filter,
                delivery: Some(delivery),
            });
        }
        Ok(())
    }

    /// Publish `count` messages from random connected clients
    ///
    /// Returns how many were published; zero when nobody is connected.
    pub async fn publish_messages(&mut self, count: usize) -> Result<usize> {
        let active = self.active();
        if active.is_empty() {
            debug!("TestFramework::publish_messages: no active clients");
            return Ok(0);
        }

        let mut sent = 0;
        for n in 0..count {
            let Some(&index) = active.choose(&mut self.rng) else {
                break;
            };
            let sim = &self.clients[index];
            let Some(topic) = sim.subscribed_topics.choose(&mut self.rng).cloned() else {
                continue;
            };
            let Some(purpose) = self.workload.purposes.choose(&mut self.rng).cloned() else {
                continue;
            };
            let payload = format!("cycle-{}-msg-{}", self.cycles_run + 1, n);
            info!(client = sim.id, %topic, %purpose, "Client publishing");
            sim.client
                .publish_with_purpose(&topic, &purpose, &payload, self.method)
                .await
                .context(format!("Client {} failed to publish", sim.id))?;
            sent += 1;
        }
        self.published += sent;
        Ok(sent)
    }

    /// Disconnect `rate` (0..=1) of the connected clients, rounded down
    pub async fn disconnect_clients(&mut self, rate: f64) -> Result<usize> {
        let active = self.active();
        let count = ((active.len() as f64) * rate) as usize;
        let chosen: Vec<usize> = active.choose_multiple(&mut self.rng, count).copied().collect();

        for &index in &chosen {
            let sim = &mut self.clients[index];
            sim.client
                .disconnect()
                .await
                .context(format!("Failed to disconnect client {}", sim.id))?;
            if let Some(delivery) = sim.delivery.take() {
                delivery.await.context("Delivery task failed")?;
            }
            info!(client = sim.id, "Disconnected client");
        }
        self.disconnected += chosen.len();
        Ok(chosen.len())
    }

    /// Run `cycles` publish/disconnect cycles, pausing `seconds_between` after each
    pub async fn run_test_cycle(&mut self, cycles: usize, seconds_between: f64) -> Result<SimulationSummary> {
        let pause = Duration::try_from_secs_f64(seconds_between)
            .context(format!("Invalid pause between cycles: {}", seconds_between))?;
        for _ in 0..cycles {
            self.cycles_run += 1;
            info!(cycle = self.cycles_run, "Cycle");

            let bounds = self.workload.messages_per_cycle;
            let messages = self.rng.random_range(bounds.min..=bounds.max);
            self.publish_messages(messages).await?;

            let rate = self.workload.disconnect_rate;
            let rate = if rate.min < rate.max {
                self.rng.random_range(rate.min..rate.max)
            } else {
                rate.min
            };
            self.disconnect_clients(rate).await?;

            tokio::time::sleep(pause).await;
        }
        Ok(self.summary())
    }

    pub fn summary(&self) -> SimulationSummary {
        let metrics = self.broker.metrics();
        SimulationSummary {
            seed: self.seed,
            cycles: self.cycles_run,
            clients: self.clients.len(),
            published: self.published,
            disconnected: self.disconnected,
            still_connected: self.active().len(),
            delivered: metrics.delivered,
            denied: metrics.denied,
        }
    }

    /// Disconnect every remaining client and wait for their delivery tasks
    pub async fn shutdown(&mut self) -> Result<()> {
        debug!("TestFramework::shutdown: called");
        for sim in &mut self.clients {
            if sim.client.is_connected() {
                sim.client.disconnect().await?;
            }
            if let Some(delivery) = sim.delivery.take() {
                delivery.await.context("Delivery task failed")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(seed: u64) -> WorkloadConfig {
        WorkloadConfig {
            clients: 6,
            seed: Some(seed),
            seconds_between: 0.0,
            ..WorkloadConfig::default()
        }
    }

    async fn framework(seed: u64) -> TestFramework {
        let mut framework = TestFramework::new(MemoryBroker::default(), workload(seed), PurposeMethod::TopicEncoding);
        framework.create_clients(6).await.unwrap();
        framework
    }

    #[tokio::test]
    async fn test_clients_get_non_empty_subscriptions() {
        let framework = framework(7).await;
        assert_eq!(framework.clients().len(), 6);
        for client in framework.clients() {
            assert!(client.is_connected());
            assert!(!client.subscribed_topics().is_empty());
            assert!(client.subscribed_topics().len() <= 3);
            assert!(client.purpose_filter().starts_with('{'));
        }
    }

    #[tokio::test]
    async fn test_same_seed_same_layout() {
        let a = framework(42).await;
        let b = framework(42).await;
        let layout = |f: &TestFramework| {
            f.clients()
                .iter()
                .map(|c| (c.subscribed_topics().to_vec(), c.purpose_filter().to_string()))
                .collect::<Vec<_>>()
        };
        assert_eq!(layout(&a), layout(&b));
    }

    #[tokio::test]
    async fn test_disconnect_rounds_down() {
        let mut framework = framework(1).await;
        assert_eq!(framework.disconnect_clients(0.3).await.unwrap(), 1);
        assert_eq!(framework.disconnect_clients(0.0).await.unwrap(), 0);
        assert_eq!(framework.summary().still_connected, 5);
    }

    #[tokio::test]
    async fn test_publish_without_active_clients() {
        let mut framework = framework(3).await;
        framework.disconnect_clients(1.0).await.unwrap();
        assert_eq!(framework.publish_messages(4).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_cycles_rejects_unrepresentable_pause() {
        let mut framework = framework(5).await;
        assert!(framework.run_test_cycle(1, f64::INFINITY).await.is_err());
        assert!(framework.run_test_cycle(1, -5.0).await.is_err());
        assert_eq!(framework.summary().cycles, 0);
    }

    #[tokio::test]
    async fn test_run_cycles() {
        let mut framework = framework(99).await;
        let summary = framework.run_test_cycle(3, 0.0).await.unwrap();

        assert_eq!(summary.seed, 99);
        assert_eq!(summary.cycles, 3);
        assert!(summary.published >= 1);
        assert_eq!(summary.clients, 6);
        assert_eq!(summary.still_connected + summary.disconnected, 6);
        framework.shutdown().await.unwrap();
    }
}
