//! MQTT topic filter matching
//!
//! Levels are separated by `/`. In filters:
//! - `+` matches exactly one level
//! - `#` matches the parent level and any number of child levels (must be last)
//!
//! Topics starting with `$` are reserved and are never matched by a filter
//! whose first level is a wildcard.

const LEVEL_SEPARATOR: char = '/';
const WILDCARD_SINGLE: &str = "+";
const WILDCARD_MULTI: &str = "#";

/// Check whether a topic filter is well-formed
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }
    let levels: Vec<&str> = filter.split(LEVEL_SEPARATOR).collect();
    let last = levels.len() - 1;
    levels.iter().enumerate().all(|(i, level)| {
        if *level == WILDCARD_MULTI {
            i == last
        } else {
            *level == WILDCARD_SINGLE || !(level.contains('+') || level.contains('#'))
        }
    })
}

/// Check whether a topic name can be published to (no wildcards)
pub fn is_valid_topic_name(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains(['+', '#'])
}

/// Check whether `topic` matches `filter`
pub fn matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with(WILDCARD_SINGLE) || filter.starts_with(WILDCARD_MULTI)) {
        return false;
    }

    let mut filter_levels = filter.split(LEVEL_SEPARATOR);
    let mut topic_levels = topic.split(LEVEL_SEPARATOR);

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some(WILDCARD_MULTI), _) => return true,
            (Some(WILDCARD_SINGLE), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
