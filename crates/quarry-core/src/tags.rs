// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Tag merging and the arbiter tag model.
//!
//! Nodes and devices carry free-form tags. For placement decisions the
//! two maps are merged with the device's tags taking priority, so a
//! device can override a policy set at the node level.

use serde::{Deserialize, Serialize};

use crate::types::Tags;

/// Tag key controlling arbiter brick hosting.
pub const ARBITER_KEY: &str = "arbiter";

/// Merges tag maps with rightmost priority: a key in a later map
/// overrides the same key in an earlier one.
#[must_use]
pub fn merge_tags<'a>(sources: impl IntoIterator<Item = &'a Tags>) -> Tags {
    let mut merged = Tags::new();
    for tags in sources {
        for (k, v) in tags {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

/// How a device participates in arbiter volume placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArbiterTag {
    /// Device hosts only arbiter bricks.
    Required,
    /// Device may host either data or arbiter bricks. This is the
    /// default for untagged devices.
    Supported,
    /// Device never hosts arbiter bricks.
    Disabled,
}

impl ArbiterTag {
    /// Reads the arbiter tag from merged tags. Unknown or missing values
    /// fall back to `Supported`.
    #[must_use]
    pub fn from_tags(tags: &Tags) -> Self {
        match tags.get(ARBITER_KEY).map(String::as_str) {
            Some("required") => Self::Required,
            Some("disabled") => Self::Disabled,
            _ => Self::Supported,
        }
    }

    /// True if a device with this tag may host arbiter bricks.
    #[must_use]
    pub const fn can_host_arbiter(self) -> bool {
        matches!(self, Self::Required | Self::Supported)
    }

    /// True if a device with this tag may host data bricks.
    #[must_use]
    pub const fn can_host_data(self) -> bool {
        matches!(self, Self::Supported | Self::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_merge_rightmost_wins() {
        let node = tags(&[("tier", "slow"), ("rack", "r1")]);
        let device = tags(&[("tier", "fast")]);
        let merged = merge_tags([&node, &device]);
        assert_eq!(merged.get("tier").unwrap(), "fast");
        assert_eq!(merged.get("rack").unwrap(), "r1");
    }

    #[test]
    fn test_arbiter_tag_default_is_supported() {
        assert_eq!(ArbiterTag::from_tags(&Tags::new()), ArbiterTag::Supported);
        assert_eq!(ArbiterTag::from_tags(&tags(&[("arbiter", "bogus")])), ArbiterTag::Supported);
    }

    #[test]
    fn test_arbiter_hosting_rules() {
        assert!(ArbiterTag::Required.can_host_arbiter());
        assert!(!ArbiterTag::Required.can_host_data());
        assert!(ArbiterTag::Supported.can_host_arbiter());
        assert!(ArbiterTag::Supported.can_host_data());
        assert!(!ArbiterTag::Disabled.can_host_arbiter());
        assert!(ArbiterTag::Disabled.can_host_data());
    }
}
