//! Purpose management for topic-based publish/subscribe
//!
//! A *purpose* is an application-defined tag ("chat", "alert", ...) that says
//! what a message may be used for. Plain brokers have no notion of purpose, so
//! it has to ride on primitives they already offer. Four competing methods are
//! supported:
//!
//! - **PM_1 Topic encoding:** purpose appended as a bracketed topic level
//! - **PM_2 Per-message property:** purpose carried as a user property
//! - **PM_3 Registration by message:** declaration sent to a management topic
//! - **PM_4 Registration by topic:** declaration encoded in a registration topic
//!
//! [`PurposeCodec`] turns publish/subscribe requests into the wire actions for a
//! method, and [`expand_filter`] makes brace-grouped purpose filters concrete.

mod codec;
mod filter;

pub use codec::{CodecError, PurposeCodec, WireAction, apply};
pub use filter::expand_filter;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// User property key carrying a message purpose
pub const MESSAGE_PURPOSE_KEY: &str = "PF-MP";

/// User property key carrying a subscription purpose filter
pub const SUBSCRIPTION_PURPOSE_KEY: &str = "PF-SP";

/// Management topic for registration-by-message declarations
pub const PURPOSE_MANAGEMENT_TOPIC: &str = "$PF/purpose_management";

/// Topic prefix for publish registrations (registration by topic)
pub const MP_REGISTRATION_PREFIX: &str = "$PF/MP_reg/";

/// Topic prefix for subscribe registrations (registration by topic)
pub const SP_REGISTRATION_PREFIX: &str = "$PF/SP_reg/";

/// Errors in purpose configuration
///
/// These are configuration errors: they fail fast and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PurposeError {
    #[error("Unsupported purpose management method: {0}")]
    UnsupportedMethod(String),

    #[error("Malformed purpose filter '{expression}' at byte {position}: {reason}")]
    MalformedFilter {
        expression: String,
        position: usize,
        reason: String,
    },

    #[error("Purpose filter '{0}' describes no purposes")]
    EmptyExpansion(String),
}

/// How purpose metadata is carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PurposeMethod {
    /// `{topic}/[{purpose}]`
    #[serde(alias = "pm1")]
    TopicEncoding,
    /// `PF-MP` user property on each publish
    #[serde(alias = "pm2")]
    PerMessageProperty,
    /// Declaration on `$PF/purpose_management`, then a plain publish
    #[serde(alias = "pm3")]
    RegistrationByMessage,
    /// Declaration on `$PF/MP_reg/{topic}/[{purpose}]`, then a plain publish
    #[serde(alias = "pm4")]
    RegistrationByTopic,
}

impl PurposeMethod {
    /// Every method, in PM_1..PM_4 order
    pub const ALL: [PurposeMethod; 4] = [
        PurposeMethod::TopicEncoding,
        PurposeMethod::PerMessageProperty,
        PurposeMethod::RegistrationByMessage,
        PurposeMethod::RegistrationByTopic,
    ];

    /// Short code used in result logs and on the command line
    pub fn code(&self) -> &'static str {
        match self {
            PurposeMethod::TopicEncoding => "PM_1",
            PurposeMethod::PerMessageProperty => "PM_2",
            PurposeMethod::RegistrationByMessage => "PM_3",
            PurposeMethod::RegistrationByTopic => "PM_4",
        }
    }

    /// Human-readable method name
    pub fn description(&self) -> &'static str {
        match self {
            PurposeMethod::TopicEncoding => "Purpose-Encoding Topics",
            PurposeMethod::PerMessageProperty => "Per-Message Declaration",
            PurposeMethod::RegistrationByMessage => "Registration by Message",
            PurposeMethod::RegistrationByTopic => "Registration by Topic",
        }
    }
}

impl fmt::Display for PurposeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}

impl FromStr for PurposeMethod {
    type Err = PurposeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "");
        match normalized.as_str() {
            "pm1" | "topic-encoding" => Ok(PurposeMethod::TopicEncoding),
            "pm2" | "per-message-property" => Ok(PurposeMethod::PerMessageProperty),
            "pm3" | "registration-by-message" => Ok(PurposeMethod::RegistrationByMessage),
            "pm4" | "registration-by-topic" => Ok(PurposeMethod::RegistrationByTopic),
            _ => Err(PurposeError::UnsupportedMethod(s.to_string())),
        }
    }
}

/// Encode a purpose as a topic level: `/` becomes `|`
pub fn encode_purpose_segment(purpose: &str) -> String {
    format!("[{}]", purpose.replace('/', "|"))
}

/// Split a trailing `/[...]` purpose level off a topic
///
/// Returns the bare topic and the decoded purpose, if the last level is bracketed.
pub fn split_purpose_segment(topic: &str) -> (&str, Option<String>) {
    if let Some((base, last)) = topic.rsplit_once('/')
        && let Some(inner) = last.strip_prefix('[').and_then(|l| l.strip_suffix(']'))
    {
        return (base, Some(inner.replace('|', "/")));
    }
    (topic, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_from_str() {
        assert_eq!("pm1".parse::<PurposeMethod>().unwrap(), PurposeMethod::TopicEncoding);
        assert_eq!("PM_2".parse::<PurposeMethod>().unwrap(), PurposeMethod::PerMessageProperty);
        assert_eq!(
            "registration-by-message".parse::<PurposeMethod>().unwrap(),
            PurposeMethod::RegistrationByMessage
        );
        assert_eq!("pm4".parse::<PurposeMethod>().unwrap(), PurposeMethod::RegistrationByTopic);
    }

    #[test]
    fn test_unknown_method_is_configuration_error() {
        let err = "pm5".parse::<PurposeMethod>().unwrap_err();
        assert_eq!(err, PurposeError::UnsupportedMethod("pm5".to_string()));
        assert!(err.to_string().contains("pm5"));
    }

    #[test]
    fn test_method_serde_aliases() {
        let method: PurposeMethod = serde_yaml::from_str("pm3").unwrap();
        assert_eq!(method, PurposeMethod::RegistrationByMessage);

        let yaml = serde_yaml::to_string(&PurposeMethod::TopicEncoding).unwrap();
        assert_eq!(yaml.trim(), "topic-encoding");
    }

    #[test]
    fn test_purpose_segment_round_trip() {
        let segment = encode_purpose_segment("ads/targeted");
        assert_eq!(segment, "[ads|targeted]");

        let topic = format!("shop/orders/{}", segment);
        let (base, purpose) = split_purpose_segment(&topic);
        assert_eq!(base, "shop/orders");
        assert_eq!(purpose.as_deref(), Some("ads/targeted"));
    }

    #[test]
    fn test_split_plain_topic() {
        assert_eq!(split_purpose_segment("room1"), ("room1", None));
        assert_eq!(split_purpose_segment("a/b"), ("a/b", None));
    }
}
