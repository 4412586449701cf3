use std::collections::BTreeMap;
use std::sync::Arc;

use super::policy::TagPolicy;
use crate::event::split_segments;

/// One routing entry: which pushes it accepts and where they are written.
#[derive(Debug, Clone)]
pub struct RegistryRule {
    pub region: String,
    /// Account id → environment name. Also the set of accepted accounts.
    pub env_by_account: BTreeMap<String, String>,
    pub registry_uri_pattern: String,
    pub repository_pattern: String,
    pub tag_policy: TagPolicy,
}

impl RegistryRule {
    pub fn new(
        region: impl Into<String>,
        env_by_account: BTreeMap<String, String>,
        registry_uri_pattern: impl Into<String>,
        repository_pattern: impl Into<String>,
        allow_tag_rule: &str,
        deny_tag_rule: &str,
    ) -> Self {
        Self {
            region: region.into(),
            env_by_account,
            registry_uri_pattern: registry_uri_pattern.into(),
            repository_pattern: repository_pattern.into(),
            tag_policy: TagPolicy::new(allow_tag_rule, deny_tag_rule),
        }
    }

    /// Non-empty segments of the registry URI pattern.
    pub fn registry_segments(&self) -> Vec<&str> {
        split_segments(&self.registry_uri_pattern)
    }

    pub fn env_for(&self, account: &str) -> Option<&str> {
        self.env_by_account.get(account).map(String::as_str)
    }
}

/// Ordered rules; the first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<RegistryRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<RegistryRule>) -> Self {
        Self { rules }
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn rules(&self) -> &[RegistryRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromIterator<RegistryRule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = RegistryRule>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
