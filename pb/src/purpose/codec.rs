//! PurposeCodec - maps purpose-tagged operations onto plain pub/sub sends

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::{
    MESSAGE_PURPOSE_KEY, MP_REGISTRATION_PREFIX, PURPOSE_MANAGEMENT_TOPIC, PurposeError, PurposeMethod,
    SP_REGISTRATION_PREFIX, SUBSCRIPTION_PURPOSE_KEY, encode_purpose_segment, expand_filter,
};
use crate::transport::{Properties, Transport, TransportError};

/// Errors from applying codec output to a transport
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Purpose(#[from] PurposeError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A single send the transport must perform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum WireAction {
    Publish {
        topic: String,
        payload: String,
        properties: Properties,
        retain: bool,
    },
    Subscribe {
        #[serde(rename = "topic-filter")]
        topic_filter: String,
        properties: Properties,
    },
}

impl WireAction {
    fn publish(topic: impl Into<String>, payload: impl Into<String>, properties: Properties) -> Self {
        WireAction::Publish {
            topic: topic.into(),
            payload: payload.into(),
            properties,
            retain: false,
        }
    }

    fn subscribe(topic_filter: impl Into<String>, properties: Properties) -> Self {
        WireAction::Subscribe {
            topic_filter: topic_filter.into(),
            properties,
        }
    }

    /// Topic or topic filter this action addresses
    pub fn topic(&self) -> &str {
        match self {
            WireAction::Publish { topic, .. } => topic,
            WireAction::Subscribe { topic_filter, .. } => topic_filter,
        }
    }
}

impl fmt::Display for WireAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (verb, topic, properties) = match self {
            WireAction::Publish { topic, properties, .. } => ("PUBLISH", topic, properties),
            WireAction::Subscribe {
                topic_filter,
                properties,
            } => ("SUBSCRIBE", topic_filter, properties),
        };
        write!(f, "{} {}", verb, topic)?;
        for (key, value) in properties.iter() {
            write!(f, " {}={}", key, value)?;
        }
        if let WireAction::Publish { payload, retain, .. } = self {
            write!(f, " payload={:?}", payload)?;
            if *retain {
                write!(f, " retain")?;
            }
        }
        Ok(())
    }
}

/// Encodes purpose-tagged publishes and subscriptions for one method
///
/// A codec is bound to a single [`PurposeMethod`]; a logical channel must be
/// driven by one codec only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurposeCodec {
    method: PurposeMethod,
}

impl PurposeCodec {
    pub fn new(method: PurposeMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> PurposeMethod {
        self.method
    }

    /// Wire sends for publishing `payload` on `topic` with `purpose`
    ///
    /// Two-send methods emit the registration first. The sends are not atomic:
    /// a receiver may observe the payload before the registration.
    pub fn encode_publish(&self, topic: &str, purpose: &str, payload: &str) -> Vec<WireAction> {
        debug!(method = self.method.code(), %topic, %purpose, "PurposeCodec::encode_publish: called");
        match self.method {
            PurposeMethod::TopicEncoding => {
                let full_topic = format!("{}/{}", topic, encode_purpose_segment(purpose));
                vec![WireAction::publish(full_topic, payload, Properties::new())]
            }
            PurposeMethod::PerMessageProperty => {
                let properties = Properties::new().with(MESSAGE_PURPOSE_KEY, purpose);
                vec![WireAction::publish(topic, payload, properties)]
            }
            PurposeMethod::RegistrationByMessage => {
                let properties = Properties::new().with(MESSAGE_PURPOSE_KEY, format!("{}:{}", purpose, topic));
                vec![
                    WireAction::publish(PURPOSE_MANAGEMENT_TOPIC, "", properties),
                    WireAction::publish(topic, payload, Properties::new()),
                ]
            }
            PurposeMethod::RegistrationByTopic => {
                let registration_topic = format!("{}{}/[{}]", MP_REGISTRATION_PREFIX, topic, purpose);
                vec![
                    WireAction::publish(registration_topic, "", Properties::new()),
                    WireAction::publish(topic, payload, Properties::new()),
                ]
            }
        }
    }

    /// Same as [`encode_publish`](Self::encode_publish), with the payload send retained
    pub fn encode_publish_retained(&self, topic: &str, purpose: &str, payload: &str) -> Vec<WireAction> {
        let mut actions = self.encode_publish(topic, purpose, payload);
        if let Some(WireAction::Publish { retain, .. }) = actions.last_mut() {
            *retain = true;
        }
        actions
    }

    /// Wire actions for subscribing to `topic` restricted to `purpose_filter`
    ///
    /// Topic encoding needs one subscription per described purpose, so a filter
    /// that describes none is a configuration error.
    pub fn encode_subscribe(&self, topic: &str, purpose_filter: &str) -> Result<Vec<WireAction>, PurposeError> {
        debug!(method = self.method.code(), %topic, %purpose_filter, "PurposeCodec::encode_subscribe: called");
        match self.method {
            PurposeMethod::TopicEncoding => {
                let purposes = expand_filter(purpose_filter)?;
                if purposes.is_empty() {
                    return Err(PurposeError::EmptyExpansion(purpose_filter.to_string()));
                }
                Ok(purposes
                    .iter()
                    .map(|purpose| {
                        WireAction::subscribe(
                            format!("{}/{}", topic, encode_purpose_segment(purpose)),
                            Properties::new(),
                        )
                    })
                    .collect())
            }
            PurposeMethod::PerMessageProperty | PurposeMethod::RegistrationByMessage => {
                let properties =
                    Properties::new().with(SUBSCRIPTION_PURPOSE_KEY, format!("{}:{}", purpose_filter, topic));
                Ok(vec![WireAction::subscribe(topic, properties)])
            }
            PurposeMethod::RegistrationByTopic => {
                let registration_topic = format!("{}{}/[{}]", SP_REGISTRATION_PREFIX, topic, purpose_filter);
                Ok(vec![
                    WireAction::publish(registration_topic, "", Properties::new()),
                    WireAction::subscribe(topic, Properties::new()),
                ])
            }
        }
    }

    /// Publish `payload` with `purpose` through `transport`
    pub async fn publish(
        &self,
        transport: &dyn Transport,
        topic: &str,
        purpose: &str,
        payload: &str,
    ) -> Result<(), CodecError> {
        let actions = self.encode_publish(topic, purpose, payload);
        apply(transport, actions).await?;
        Ok(())
    }

    /// Publish with the payload send retained on the broker
    pub async fn publish_retained(
        &self,
        transport: &dyn Transport,
        topic: &str,
        purpose: &str,
        payload: &str,
    ) -> Result<(), CodecError> {
        let actions = self.encode_publish_retained(topic, purpose, payload);
        apply(transport, actions).await?;
        Ok(())
    }

    /// Subscribe through `transport`, returning the number of subscriptions made
    pub async fn subscribe(
        &self,
        transport: &dyn Transport,
        topic: &str,
        purpose_filter: &str,
    ) -> Result<usize, CodecError> {
        let actions = self.encode_subscribe(topic, purpose_filter)?;
        let count = actions
            .iter()
            .filter(|a| matches!(a, WireAction::Subscribe { .. }))
            .count();
        apply(transport, actions).await?;
        Ok(count)
    }
}

/// Perform wire actions in order, stopping at the first failure
pub async fn apply(transport: &dyn Transport, actions: Vec<WireAction>) -> Result<(), TransportError> {
    for action in actions {
        debug!(client_id = %transport.client_id(), %action, "apply: sending");
        match action {
            WireAction::Publish {
                topic,
                payload,
                properties,
                retain,
            } => transport.publish(&topic, &payload, properties, retain).await?,
            WireAction::Subscribe {
                topic_filter,
                properties,
            } => transport.subscribe(&topic_filter, properties).await?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish_topics(actions: &[WireAction]) -> Vec<&str> {
        actions.iter().map(WireAction::topic).collect()
    }

    #[test]
    fn test_topic_encoding_publish() {
        let codec = PurposeCodec::new(PurposeMethod::TopicEncoding);
        let actions = codec.encode_publish("room1", "ads/targeted", "hi");
        assert_eq!(
            actions,
            vec![WireAction::Publish {
                topic: "room1/[ads|targeted]".to_string(),
                payload: "hi".to_string(),
                properties: Properties::new(),
                retain: false,
            }]
        );
    }

    #[test]
    fn test_per_message_property_publish() {
        let codec = PurposeCodec::new(PurposeMethod::PerMessageProperty);
        let actions = codec.encode_publish("room1", "chat", "hi");
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            WireAction::Publish {
                topic,
                payload,
                properties,
                ..
            } => {
                assert_eq!(topic, "room1");
                assert_eq!(payload, "hi");
                assert_eq!(properties.get("PF-MP"), Some("chat"));
            }
            other => panic!("Expected publish, got {:?}", other),
        }
    }

    #[test]
    fn test_registration_by_message_publish() {
        let codec = PurposeCodec::new(PurposeMethod::RegistrationByMessage);
        let actions = codec.encode_publish("room1", "chat", "hi");
        assert_eq!(publish_topics(&actions), vec!["$PF/purpose_management", "room1"]);

        match &actions[0] {
            WireAction::Publish {
                payload, properties, ..
            } => {
                assert!(payload.is_empty());
                assert_eq!(properties.get("PF-MP"), Some("chat:room1"));
            }
            other => panic!("Expected publish, got {:?}", other),
        }
        match &actions[1] {
            WireAction::Publish {
                payload, properties, ..
            } => {
                assert_eq!(payload, "hi");
                assert!(properties.is_empty());
            }
            other => panic!("Expected publish, got {:?}", other),
        }
    }

    #[test]
    fn test_registration_by_topic_publish() {
        let codec = PurposeCodec::new(PurposeMethod::RegistrationByTopic);
        let actions = codec.encode_publish("room1", "chat", "hi");
        assert_eq!(publish_topics(&actions), vec!["$PF/MP_reg/room1/[chat]", "room1"]);
    }

    #[test]
    fn test_retained_marks_payload_send_only() {
        let codec = PurposeCodec::new(PurposeMethod::RegistrationByTopic);
        let actions = codec.encode_publish_retained("benchmark/ready_state/n1", "lifecycle", "n1:READY");
        let retained: Vec<bool> = actions
            .iter()
            .map(|a| matches!(a, WireAction::Publish { retain: true, .. }))
            .collect();
        assert_eq!(retained, vec![false, true]);
    }

    #[test]
    fn test_topic_encoding_subscribe_expands_filter() {
        let codec = PurposeCodec::new(PurposeMethod::TopicEncoding);
        let actions = codec.encode_subscribe("room1", "ads/{targeted,generic}").unwrap();
        assert_eq!(
            publish_topics(&actions),
            vec!["room1/[ads|targeted]", "room1/[ads|generic]"]
        );
        assert!(actions.iter().all(|a| matches!(a, WireAction::Subscribe { .. })));
    }

    #[test]
    fn test_topic_encoding_subscribe_empty_expansion_is_error() {
        let codec = PurposeCodec::new(PurposeMethod::TopicEncoding);
        let err = codec.encode_subscribe("room1", "a/{x,y}/./c").unwrap_err();
        assert_eq!(err, PurposeError::EmptyExpansion("a/{x,y}/./c".to_string()));
    }

    #[test]
    fn test_topic_encoding_subscribe_malformed_filter() {
        let codec = PurposeCodec::new(PurposeMethod::TopicEncoding);
        assert!(matches!(
            codec.encode_subscribe("room1", "{chat"),
            Err(PurposeError::MalformedFilter { .. })
        ));
    }

    #[test]
    fn test_property_subscribe() {
        for method in [PurposeMethod::PerMessageProperty, PurposeMethod::RegistrationByMessage] {
            let codec = PurposeCodec::new(method);
            let actions = codec.encode_subscribe("room1", "{chat,alert}").unwrap();
            assert_eq!(
                actions,
                vec![WireAction::Subscribe {
                    topic_filter: "room1".to_string(),
                    properties: Properties::new().with("PF-SP", "{chat,alert}:room1"),
                }]
            );
        }
    }

    #[test]
    fn test_registration_by_topic_subscribe() {
        let codec = PurposeCodec::new(PurposeMethod::RegistrationByTopic);
        let actions = codec.encode_subscribe("room1", "{chat,alert}").unwrap();
        assert_eq!(actions.len(), 2);
        assert!(matches!(&actions[0], WireAction::Publish { topic, payload, .. }
            if topic == "$PF/SP_reg/room1/[{chat,alert}]" && payload.is_empty()));
        assert!(matches!(&actions[1], WireAction::Subscribe { topic_filter, properties }
            if topic_filter == "room1" && properties.is_empty()));
    }

    #[test]
    fn test_topic_encoding_publish_matches_a_subscription() {
        let codec = PurposeCodec::new(PurposeMethod::TopicEncoding);
        let published = codec.encode_publish("shop", "ads/targeted", "x");
        let subscriptions = codec.encode_subscribe("shop", "ads/{generic,targeted}").unwrap();
        assert!(
            subscriptions
                .iter()
                .any(|s| crate::transport::topic::matches(s.topic(), published[0].topic()))
        );
    }

    #[test]
    fn test_wire_action_display() {
        let codec = PurposeCodec::new(PurposeMethod::RegistrationByMessage);
        let actions = codec.encode_publish("room1", "chat", "hi");
        assert_eq!(
            actions[0].to_string(),
            "PUBLISH $PF/purpose_management PF-MP=chat:room1 payload=\"\""
        );
        assert_eq!(actions[1].to_string(), "PUBLISH room1 payload=\"hi\"");
    }
}
