//! In-process broker with purpose enforcement
//!
//! MemoryBroker behaves like a topic-based MQTT broker: `+`/`#` filters,
//! retained messages, FIFO delivery per publisher/subscriber pair, and loopback
//! of a client's own publications. With `enforce_purposes` on it also plays the
//! purpose-aware broker for every method:
//!
//! - message purposes come from a `/[...]` topic level, a `PF-MP` property, or
//!   the publisher's last registration for that topic
//! - subscription filters come from a `PF-SP` property or an `SP_reg` topic
//! - `$PF/...` control publications are consumed, never routed

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::topic;
use super::{InboundMessage, Properties, Transport, TransportError};
use crate::purpose::{
    MESSAGE_PURPOSE_KEY, MP_REGISTRATION_PREFIX, PURPOSE_MANAGEMENT_TOPIC, SP_REGISTRATION_PREFIX,
    SUBSCRIPTION_PURPOSE_KEY, expand_filter, split_purpose_segment,
};

/// Broker behaviour switches
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address clients must connect to
    pub address: String,

    pub port: u16,

    /// Filter deliveries by purpose
    pub enforce_purposes: bool,

    /// Deliver a client's own publications back to it
    pub loopback: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: 1883,
            enforce_purposes: true,
            loopback: true,
        }
    }
}

/// Broker counters for observability
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerMetrics {
    pub sessions: usize,
    pub retained: usize,
    pub published: u64,
    pub delivered: u64,
    pub denied: u64,
    pub registrations: u64,
}

struct Subscription {
    filter: String,
    /// Permitted purposes, None when the subscription carries no purpose filter
    allowed: Option<Vec<String>>,
}

struct Session {
    tx: mpsc::UnboundedSender<InboundMessage>,
    subscriptions: Vec<Subscription>,
}

struct RetainedMessage {
    message: InboundMessage,
    purpose: Option<String>,
}

#[derive(Default)]
struct BrokerState {
    sessions: HashMap<String, Session>,
    retained: BTreeMap<String, RetainedMessage>,
    /// (publisher, topic) -> purpose
    registrations: HashMap<(String, String), String>,
    /// (subscriber, topic) -> permitted purposes, from SP_reg declarations
    declared_filters: HashMap<(String, String), Vec<String>>,
    metrics: BrokerMetrics,
}

/// Shared in-process broker; clones refer to the same broker
#[derive(Clone)]
pub struct MemoryBroker {
    config: BrokerConfig,
    state: Arc<Mutex<BrokerState>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl MemoryBroker {
    pub fn new(config: BrokerConfig) -> Self {
        debug!(?config, "MemoryBroker::new: called");
        Self {
            config,
            state: Arc::new(Mutex::new(BrokerState::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Create a client bound to this broker
    pub fn client(&self, client_id: impl Into<String>) -> MemoryClient {
        MemoryClient::new(client_id, self.clone())
    }

    /// Simulate the broker going away (new connections are refused)
    pub fn set_available(&self, available: bool) {
        info!(available, "MemoryBroker::set_available");
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn metrics(&self) -> BrokerMetrics {
        let state = self.lock();
        BrokerMetrics {
            sessions: state.sessions.len(),
            retained: state.retained.len(),
            ..state.metrics.clone()
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn attach(
        &self,
        client_id: &str,
        address: &str,
        port: u16,
        tx: mpsc::UnboundedSender<InboundMessage>,
    ) -> Result<(), TransportError> {
        let refused = |reason: String| TransportError::ConnectFailed {
            address: address.to_string(),
            port,
            reason,
        };
        if address != self.config.address || port != self.config.port {
            return Err(refused(format!(
                "no broker listening here (broker is at {}:{})",
                self.config.address, self.config.port
            )));
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(refused(TransportError::BrokerUnavailable.to_string()));
        }
        debug!(%client_id, "MemoryBroker::attach: clean session");
        self.lock().sessions.insert(
            client_id.to_string(),
            Session {
                tx,
                subscriptions: Vec::new(),
            },
        );
        Ok(())
    }

    fn detach(&self, client_id: &str) {
        debug!(%client_id, "MemoryBroker::detach: called");
        self.lock().sessions.remove(client_id);
    }

    fn publish(
        &self,
        client_id: &str,
        topic_name: &str,
        payload: &str,
        properties: Properties,
        retain: bool,
    ) -> Result<(), TransportError> {
        if !topic::is_valid_topic_name(topic_name) {
            return Err(TransportError::InvalidTopic(topic_name.to_string()));
        }
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.sessions.contains_key(client_id) {
            return Err(TransportError::NotConnected(client_id.to_string()));
        }
        state.metrics.published += 1;

        if topic_name == PURPOSE_MANAGEMENT_TOPIC {
            match properties.get(MESSAGE_PURPOSE_KEY).and_then(|v| v.split_once(':')) {
                Some((purpose, target)) => register(state, client_id, target, purpose),
                None => warn!(%client_id, "Ignoring purpose registration without {}", MESSAGE_PURPOSE_KEY),
            }
            return Ok(());
        }

        if let Some(rest) = topic_name.strip_prefix(MP_REGISTRATION_PREFIX) {
            match parse_registration(rest) {
                Some((target, purpose)) => register(state, client_id, target, purpose),
                None => warn!(%client_id, topic = %topic_name, "Ignoring malformed publish registration"),
            }
            return Ok(());
        }

        if let Some(rest) = topic_name.strip_prefix(SP_REGISTRATION_PREFIX) {
            match parse_registration(rest) {
                Some((target, filter)) => {
                    let allowed = allowed_purposes(filter);
                    debug!(%client_id, %target, ?allowed, "Declared subscription purpose filter");
                    if let Some(session) = state.sessions.get_mut(client_id) {
                        for sub in session.subscriptions.iter_mut().filter(|s| s.filter == target) {
                            sub.allowed = Some(allowed.clone());
                        }
                    }
                    state
                        .declared_filters
                        .insert((client_id.to_string(), target.to_string()), allowed);
                }
                None => warn!(%client_id, topic = %topic_name, "Ignoring malformed subscribe registration"),
            }
            return Ok(());
        }

        let purpose = match split_purpose_segment(topic_name) {
            (_, Some(purpose)) => Some(purpose),
            (bare, None) => properties
                .get(MESSAGE_PURPOSE_KEY)
                .map(str::to_string)
                .or_else(|| {
                    state
                        .registrations
                        .get(&(client_id.to_string(), bare.to_string()))
                        .cloned()
                }),
        };

        let message = InboundMessage {
            topic: topic_name.to_string(),
            payload: payload.to_string(),
            properties,
            retained: false,
        };

        if retain {
            if payload.is_empty() {
                state.retained.remove(topic_name);
            } else {
                state.retained.insert(
                    topic_name.to_string(),
                    RetainedMessage {
                        message: InboundMessage {
                            retained: true,
                            ..message.clone()
                        },
                        purpose: purpose.clone(),
                    },
                );
            }
        }

        for (subscriber, session) in &state.sessions {
            if subscriber == client_id && !self.config.loopback {
                continue;
            }
            let matching: Vec<&Subscription> = session
                .subscriptions
                .iter()
                .filter(|s| topic::matches(&s.filter, topic_name))
                .collect();
            if matching.is_empty() {
                continue;
            }
            if matching.iter().any(|s| self.permits(s, purpose.as_deref())) {
                if session.tx.send(message.clone()).is_ok() {
                    state.metrics.delivered += 1;
                }
            } else {
                debug!(%subscriber, topic = %topic_name, ?purpose, "Delivery denied by purpose filter");
                state.metrics.denied += 1;
            }
        }

        Ok(())
    }

    fn subscribe(&self, client_id: &str, filter: &str, properties: Properties) -> Result<(), TransportError> {
        if !topic::is_valid_filter(filter) {
            return Err(TransportError::InvalidTopic(filter.to_string()));
        }
        let mut guard = self.lock();
        let state = &mut *guard;

        let allowed = match properties.get(SUBSCRIPTION_PURPOSE_KEY) {
            Some(value) => {
                let purpose_filter = value.split_once(':').map(|(f, _)| f).unwrap_or(value);
                Some(allowed_purposes(purpose_filter))
            }
            None => state
                .declared_filters
                .get(&(client_id.to_string(), filter.to_string()))
                .cloned(),
        };
        let subscription = Subscription {
            filter: filter.to_string(),
            allowed,
        };

        let Some(session) = state.sessions.get_mut(client_id) else {
            return Err(TransportError::NotConnected(client_id.to_string()));
        };
        debug!(%client_id, %filter, allowed = ?subscription.allowed, "MemoryBroker::subscribe");

        for (retained_topic, retained) in &state.retained {
            if topic::matches(filter, retained_topic)
                && self.permits(&subscription, retained.purpose.as_deref())
                && session.tx.send(retained.message.clone()).is_ok()
            {
                state.metrics.delivered += 1;
            }
        }

        session.subscriptions.retain(|s| s.filter != filter);
        session.subscriptions.push(subscription);
        Ok(())
    }

    fn permits(&self, subscription: &Subscription, purpose: Option<&str>) -> bool {
        if !self.config.enforce_purposes {
            return true;
        }
        match &subscription.allowed {
            None => true,
            Some(allowed) => purpose.is_some_and(|p| allowed.iter().any(|a| a == p)),
        }
    }
}

fn register(state: &mut BrokerState, client_id: &str, topic_name: &str, purpose: &str) {
    debug!(%client_id, topic = %topic_name, %purpose, "Registered publication purpose");
    state
        .registrations
        .insert((client_id.to_string(), topic_name.to_string()), purpose.to_string());
    state.metrics.registrations += 1;
}

/// Split `{topic}/[{value}]` from a registration topic
fn parse_registration(rest: &str) -> Option<(&str, &str)> {
    let (target, bracketed) = rest.rsplit_once("/[")?;
    let value = bracketed.strip_suffix(']')?;
    if target.is_empty() {
        return None;
    }
    Some((target, value))
}

fn allowed_purposes(purpose_filter: &str) -> Vec<String> {
    expand_filter(purpose_filter).unwrap_or_else(|e| {
        warn!(%purpose_filter, error = %e, "Malformed subscription purpose filter, denying all purposes");
        Vec::new()
    })
}

/// A [`Transport`] session on a [`MemoryBroker`]
pub struct MemoryClient {
    client_id: String,
    broker: MemoryBroker,
    connected: AtomicBool,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
}

impl MemoryClient {
    pub fn new(client_id: impl Into<String>, broker: MemoryBroker) -> Self {
        Self {
            client_id: client_id.into(),
            broker,
            connected: AtomicBool::new(false),
            inbound: Mutex::new(None),
        }
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected(self.client_id.clone()))
        }
    }
}

#[async_trait]
impl Transport for MemoryClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn connect(&self, address: &str, port: u16) -> Result<(), TransportError> {
        debug!(client_id = %self.client_id, %address, port, "MemoryClient::connect: called");
        let (tx, rx) = mpsc::unbounded_channel();
        self.broker.attach(&self.client_id, address, port, tx)?;
        *self.inbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(rx);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        topic_name: &str,
        payload: &str,
        properties: Properties,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.broker
            .publish(&self.client_id, topic_name, payload, properties, retain)
    }

    async fn subscribe(&self, topic_filter: &str, properties: Properties) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.broker.subscribe(&self.client_id, topic_filter, properties)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        debug!(client_id = %self.client_id, "MemoryClient::disconnect: called");
        self.ensure_connected()?;
        self.broker.detach(&self.client_id);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.inbound.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
