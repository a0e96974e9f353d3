// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! MQTT topic filter matching.
//!
//! - `+` matches exactly one level.
//! - `#` matches the parent level and every level below it. It must be the
//!   last level of the filter.
//! - Wildcards never match a first level starting with `$`.

use crate::error::{MqttError, MqttResult};

const LEVEL_SEPARATOR: char = '/';

/// Checks a filter against the wildcard placement rules.
pub fn validate_filter(filter: &str) -> MqttResult<()> {
    if filter.is_empty() {
        return Err(MqttError::invalid_filter(filter, "filter is empty"));
    }

    let levels: Vec<&str> = filter.split(LEVEL_SEPARATOR).collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i + 1 != levels.len()) {
            return Err(MqttError::invalid_filter(filter, "'#' must be a whole last level"));
        }
        if level.contains('+') && *level != "+" {
            return Err(MqttError::invalid_filter(filter, "'+' must be a whole level"));
        }
    }
    Ok(())
}

/// Returns `true` if `topic` is matched by `filter`.
pub fn matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split(LEVEL_SEPARATOR);
    let mut topic_levels = topic.split(LEVEL_SEPARATOR);

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Returns `true` if the filter contains a wildcard.
pub fn has_wildcard(filter: &str) -> bool {
    filter.contains('+') || filter.contains('#')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches("plant/line1/speed", "plant/line1/speed"));
        assert!(!matches("plant/line1/speed", "plant/line1"));
        assert!(!matches("plant/line1", "plant/line1/speed"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(matches("plant/+/speed", "plant/line1/speed"));
        assert!(!matches("plant/+/speed", "plant/line1/motor/speed"));
        assert!(matches("plant/+", "plant/"));
        assert!(!matches("plant/+", "plant"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(matches("plant/#", "plant/line1"));
        assert!(matches("plant/#", "plant/line1/motor/speed"));
        assert!(matches("plant/#", "plant"));
        assert!(matches("#", "anything/at/all"));
        assert!(!matches("plant/#", "office/line1"));
    }

    #[test]
    fn test_system_topics_need_explicit_prefix() {
        assert!(!matches("#", "$SYS/broker/uptime"));
        assert!(!matches("+/broker/uptime", "$SYS/broker/uptime"));
        assert!(matches("$SYS/#", "$SYS/broker/uptime"));
    }

    #[test]
    fn test_filter_validation() {
        assert!(validate_filter("plant/+/speed").is_ok());
        assert!(validate_filter("plant/#").is_ok());
        assert!(validate_filter("").is_err());
        assert!(validate_filter("plant/#/speed").is_err());
        assert!(validate_filter("plant/line+").is_err());
        assert!(validate_filter("plant/li#").is_err());
    }
}
