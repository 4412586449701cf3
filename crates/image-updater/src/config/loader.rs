use std::collections::HashSet;
use std::path::Path;

use tracing::{info, warn};

use crate::config::schema::RegistryRuleConfig;
use crate::error::ConfigError;
use crate::routing::template::referenced_variables;
use crate::routing::{RegistryRule, RuleSet};
use crate::event::split_segments;

pub fn load_rules<P: AsRef<Path>>(path: P) -> Result<RuleSet, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let rules = load_rules_from_str(&content)?;
    info!("Loaded {} registry rules from {}", rules.len(), path.display());
    Ok(rules)
}

pub fn load_rules_from_str(content: &str) -> Result<RuleSet, ConfigError> {
    if content.trim().is_empty() {
        warn!("Rules file is empty; every event will be reported as unmatched");
        return Ok(RuleSet::default());
    }

    let configs: Vec<RegistryRuleConfig> = serde_yaml::from_str(content)?;

    configs
        .into_iter()
        .enumerate()
        .map(|(index, config)| build_rule(index, config))
        .collect()
}

fn build_rule(index: usize, config: RegistryRuleConfig) -> Result<RegistryRule, ConfigError> {
    validate_rule(index, &config)?;

    let rule = RegistryRule::new(
        config.region,
        config.env,
        config.registry_uri,
        config.github_repository,
        &config.allow_image_tag,
        &config.deny_image_tag,
    );
    warn_tag_policy(index, &rule);

    if rule.env_by_account.is_empty() {
        warn!("Rule #{} has no accounts in 'env' and can never match", index);
    }

    Ok(rule)
}

fn validate_rule(index: usize, config: &RegistryRuleConfig) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidRule {
        index,
        reason: reason.to_string(),
    };

    if config.region.trim().is_empty() {
        return Err(invalid("'region' must not be empty"));
    }

    let registry_segments = split_segments(&config.registry_uri);
    if registry_segments.is_empty() {
        return Err(invalid("'registryURI' must not be empty"));
    }
    if split_segments(&config.github_repository).is_empty() {
        return Err(invalid("'gitHubRepository' must not be empty"));
    }

    let mut captured = HashSet::new();
    for segment in registry_segments.iter().filter(|s| s.starts_with('$')) {
        if !captured.insert(*segment) {
            return Err(ConfigError::DuplicateVariable {
                index,
                token: segment.to_string(),
            });
        }
    }

    for token in referenced_variables(&config.github_repository) {
        if !captured.contains(token) {
            return Err(ConfigError::UnboundVariable {
                index,
                token: token.to_string(),
            });
        }
    }

    Ok(())
}

fn warn_tag_policy(index: usize, rule: &RegistryRule) {
    let policy = &rule.tag_policy;

    if policy.allow.is_empty_literal() {
        warn!(
            "Rule #{}: 'allowImageTag' is empty, so every tag is rejected (an empty 'denyImageTag' denies nothing)",
            index
        );
    }
    if let Some(reason) = policy.allow.parse_error() {
        warn!("Rule #{}: 'allowImageTag' cannot be parsed ({}); every tag is rejected", index, reason);
    }
    if let Some(reason) = policy.deny.parse_error() {
        warn!("Rule #{}: 'denyImageTag' cannot be parsed ({}); every tag is denied", index, reason);
    }
}
