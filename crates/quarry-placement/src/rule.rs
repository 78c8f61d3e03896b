// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Tag matching rules.
//!
//! A rule has the form `key=value` or `key!=value` and is evaluated
//! against the merged node+device tags of a candidate. A volume's rules
//! must all hold for a device to host its bricks.

use quarry_core::error::{Error, Result};
use quarry_core::types::Tags;

/// One parsed tag matching rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMatchingRule {
    /// Tag key to test.
    pub key: String,
    /// True for `=`, false for `!=`.
    pub matches: bool,
    /// Value to compare against. A missing tag compares as the empty
    /// string.
    pub value: String,
}

fn valid_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

impl TagMatchingRule {
    /// Parses a rule from its text form.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the text is not `key=value` or
    /// `key!=value` with keys and values limited to alphanumerics,
    /// `.`, `-` and `_`.
    pub fn parse(text: &str) -> Result<Self> {
        let (key, matches, value) = if let Some((k, v)) = text.split_once("!=") {
            (k, false, v)
        } else if let Some((k, v)) = text.split_once('=') {
            (k, true, v)
        } else {
            return Err(Error::InvalidRequest(format!("invalid tag rule: {text:?}")));
        };
        if !valid_token(key) || !valid_token(value) {
            return Err(Error::InvalidRequest(format!("invalid tag rule: {text:?}")));
        }
        Ok(Self { key: key.to_string(), matches, value: value.to_string() })
    }

    /// Parses every rule in `texts`.
    pub fn parse_all(texts: &[String]) -> Result<Vec<Self>> {
        texts.iter().map(|t| Self::parse(t)).collect()
    }

    /// Evaluates the rule against merged tags.
    #[must_use]
    pub fn test(&self, tags: &Tags) -> bool {
        let actual = tags.get(&self.key).map(String::as_str).unwrap_or("");
        (actual == self.value) == self.matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_equality() {
        let r = TagMatchingRule::parse("tier=fast").unwrap();
        assert_eq!(r.key, "tier");
        assert!(r.matches);
        assert_eq!(r.value, "fast");
    }

    #[test]
    fn test_parse_inequality() {
        let r = TagMatchingRule::parse("rack!=r1").unwrap();
        assert!(!r.matches);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "tier", "=fast", "tier=", "tier==fast", "ti er=fast", "tier=fa st"] {
            assert!(TagMatchingRule::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_equality_test() {
        let r = TagMatchingRule::parse("tier=fast").unwrap();
        assert!(r.test(&tags(&[("tier", "fast")])));
        assert!(!r.test(&tags(&[("tier", "slow")])));
        // Missing key compares as empty string.
        assert!(!r.test(&Tags::new()));
    }

    #[test]
    fn test_inequality_test() {
        let r = TagMatchingRule::parse("rack!=r1").unwrap();
        assert!(!r.test(&tags(&[("rack", "r1")])));
        assert!(r.test(&tags(&[("rack", "r2")])));
        // A device without the tag is not in rack r1.
        assert!(r.test(&Tags::new()));
    }
}
