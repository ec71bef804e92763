//! ---
//! lw_section: "01-core-functionality"
//! lw_subsection: "module"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "License watcher state, entitlement queries, and monitoring."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Enumeration of license-controlled features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Tamper-evident audit log of operator actions.
    AuditLogging,
    /// Multiple isolated namespaces per cluster.
    Namespaces,
    /// Per-namespace resource quotas.
    ResourceQuotas,
    /// Admission policies evaluated on every submission.
    PolicyEnforcement,
    /// Federation across regions.
    MultiRegion,
    /// Scheduled state snapshots.
    AutomatedBackups,
    /// Voting members spread over redundancy zones.
    RedundancyZones,
    /// Non-voting read replicas.
    ReadScalability,
}

impl Feature {
    /// Every known feature, in declaration order.
    pub const ALL: [Feature; 8] = [
        Feature::AuditLogging,
        Feature::Namespaces,
        Feature::ResourceQuotas,
        Feature::PolicyEnforcement,
        Feature::MultiRegion,
        Feature::AutomatedBackups,
        Feature::RedundancyZones,
        Feature::ReadScalability,
    ];

    /// Stable identifier string used in license payloads and APIs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::AuditLogging => "audit_logging",
            Feature::Namespaces => "namespaces",
            Feature::ResourceQuotas => "resource_quotas",
            Feature::PolicyEnforcement => "policy_enforcement",
            Feature::MultiRegion => "multi_region",
            Feature::AutomatedBackups => "automated_backups",
            Feature::RedundancyZones => "redundancy_zones",
            Feature::ReadScalability => "read_scalability",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .iter()
            .copied()
            .find(|feature| feature.as_str() == value)
            .ok_or_else(|| format!("unknown feature '{value}'"))
    }
}

/// Set of features a license entitles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FeatureSet {
    inner: BTreeSet<Feature>,
}

impl FeatureSet {
    /// The empty set, reported once a license stops being valid.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Parse payload feature names, rejecting unknown entries.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, String> {
        names
            .iter()
            .map(|name| name.as_ref().parse::<Feature>())
            .collect()
    }

    /// Returns true if the feature is entitled.
    #[must_use]
    pub fn contains(&self, feature: Feature) -> bool {
        self.inner.contains(&feature)
    }

    /// Returns true when nothing is entitled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Number of entitled features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Iterate entitled features in order.
    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.inner.iter().copied()
    }

    /// Map of every known feature to its entitlement state.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, bool> {
        Feature::ALL
            .iter()
            .map(|feature| (feature.as_str().to_owned(), self.contains(*feature)))
            .collect()
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}
