//! First-match selection of a registry rule for a push event.

use std::collections::BTreeMap;

use tracing::trace;

use super::rule::{RegistryRule, RuleSet};
use crate::event::PushEvent;

const WILDCARD: &str = "*";
const VARIABLE_PREFIX: char = '$';

/// Values captured while matching one rule against one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchBinding {
    /// Variable token (e.g. `$1`) → captured event segment.
    pub variables: BTreeMap<String, String>,
    /// Environment of the event's account under the matched rule.
    pub env: String,
}

impl MatchBinding {
    pub fn get(&self, token: &str) -> Option<&str> {
        self.variables.get(token).map(String::as_str)
    }
}

/// The selected rule and its bindings.
#[derive(Debug, Clone)]
pub struct RuleMatch<'a> {
    /// Position of the rule in the rule set.
    pub index: usize,
    pub rule: &'a RegistryRule,
    pub binding: MatchBinding,
}

/// Selects the first rule accepting an event.
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    registry_host_template: String,
}

impl RuleMatcher {
    /// `registry_host_template` builds the host segment a pattern may match
    /// against (see [`PushEvent::registry_host`]).
    pub fn new(registry_host_template: impl Into<String>) -> Self {
        Self {
            registry_host_template: registry_host_template.into(),
        }
    }

    /// Scans `rules` in order and returns the first match.
    pub fn find<'a>(&self, rules: &'a RuleSet, event: &PushEvent) -> Option<RuleMatch<'a>> {
        rules
            .rules()
            .iter()
            .enumerate()
            .find_map(|(index, rule)| {
                self.match_rule(rule, event).map(|binding| RuleMatch {
                    index,
                    rule,
                    binding,
                })
            })
    }

    /// Matches a single rule: region, then account, then path segments.
    pub fn match_rule(&self, rule: &RegistryRule, event: &PushEvent) -> Option<MatchBinding> {
        if rule.region != event.region {
            trace!("region mismatch: {} != {}", rule.region, event.region);
            return None;
        }

        let env = rule.env_for(&event.account)?;

        let pattern = rule.registry_segments();
        let repository = event.repository_segments();

        let variables = match_segments(&pattern, &repository).or_else(|| {
            self.match_with_host(&pattern, &repository, event)
        })?;
        Some(MatchBinding {
            variables,
            env: env.to_string(),
        })
    }

    /// Retries a pattern one segment longer than the repository name, with
    /// the registry host as the leading subject segment. Only a wildcard or
    /// a literal may stand in that position; a variable never binds the host.
    fn match_with_host(
        &self,
        pattern: &[&str],
        repository: &[&str],
        event: &PushEvent,
    ) -> Option<BTreeMap<String, String>> {
        let (leading, _) = pattern.split_first()?;
        if pattern.len() != repository.len() + 1 || leading.starts_with(VARIABLE_PREFIX) {
            return None;
        }

        let host = event.registry_host(&self.registry_host_template);
        let subject: Vec<&str> = std::iter::once(host.as_str())
            .chain(repository.iter().copied())
            .collect();
        match_segments(pattern, &subject)
    }
}

/// Positional match of pattern segments against subject segments.
fn match_segments(pattern: &[&str], subject: &[&str]) -> Option<BTreeMap<String, String>> {
    if pattern.len() != subject.len() {
        return None;
    }

    let mut variables = BTreeMap::new();
    for (expected, actual) in pattern.iter().zip(subject) {
        if *expected == WILDCARD {
            continue;
        }
        if expected.starts_with(VARIABLE_PREFIX) {
            variables.insert(expected.to_string(), actual.to_string());
            continue;
        }
        if expected != actual {
            return None;
        }
    }
    Some(variables)
}
