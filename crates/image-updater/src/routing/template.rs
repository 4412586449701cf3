//! Repository path templating and target location parsing.

use std::path::PathBuf;

use super::matcher::MatchBinding;
use crate::error::TemplateError;
use crate::event::split_segments;

/// Token replaced with the environment of the event's account.
pub const ENV_TOKEN: &str = "$env";

const VARIABLE_MARKER: char = '$';

/// Substitutes `$env` and captured variables into `pattern`.
///
/// Substitution is per `/`-segment: a segment containing `$` is replaced as a
/// whole by its binding, so `$1` never rewrites part of `$10`. Any `$` left
/// in the result is an error.
pub fn resolve(pattern: &str, binding: &MatchBinding) -> Result<String, TemplateError> {
    let resolved = pattern
        .split('/')
        .map(|segment| {
            if !segment.contains(VARIABLE_MARKER) {
                return segment;
            }
            if segment == ENV_TOKEN {
                return binding.env.as_str();
            }
            binding.get(segment).unwrap_or(segment)
        })
        .collect::<Vec<_>>()
        .join("/");

    if resolved.contains(VARIABLE_MARKER) {
        return Err(TemplateError::Unresolved(resolved));
    }
    Ok(resolved)
}

/// Variable tokens (other than `$env`) a repository pattern refers to.
pub fn referenced_variables(pattern: &str) -> Vec<&str> {
    pattern
        .split('/')
        .filter(|segment| segment.contains(VARIABLE_MARKER) && *segment != ENV_TOKEN)
        .collect()
}

/// Where a resolved repository path points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLocation {
    /// Clone URL without credentials.
    pub clone_url: String,
    pub owner: String,
    pub repository: String,
    /// Directory of the manifest relative to the clone root.
    pub manifest_dir: PathBuf,
}

impl TargetLocation {
    /// Splits a resolved path into repository and manifest directory.
    ///
    /// Accepted forms:
    /// - `owner/repo/dir...`, cloned from `base_url`
    /// - `host/owner/repo/dir...` where `host` is the host of `base_url`
    /// - `https://host/owner/repo/dir...`
    ///
    /// A leading segment is only read as a host when it names the configured
    /// host. `my.team/repo` is an owner and repository like any other.
    pub fn parse(resolved: &str, base_url: &str) -> Result<Self, TemplateError> {
        let (base, path) = split_base(resolved, base_url);

        let segments = split_segments(path);
        let [owner, repository, dir @ ..] = segments.as_slice() else {
            return Err(TemplateError::MissingRepository(resolved.to_string()));
        };

        if dir.iter().any(|segment| matches!(segment.trim(), "." | "..")) {
            return Err(TemplateError::PathTraversal(resolved.to_string()));
        }

        Ok(Self {
            clone_url: format!("{}/{}/{}", base.trim_end_matches('/'), owner, repository),
            owner: owner.to_string(),
            repository: repository.to_string(),
            manifest_dir: dir.iter().collect(),
        })
    }

    /// `owner/repo`.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repository)
    }
}

fn split_base<'a>(resolved: &'a str, base_url: &'a str) -> (&'a str, &'a str) {
    for scheme in ["https://", "http://"] {
        if let Some(rest) = resolved.strip_prefix(scheme) {
            let host_end = rest.find('/').unwrap_or(rest.len());
            let base = &resolved[..scheme.len() + host_end];
            return (base, &rest[host_end..]);
        }
    }

    let trimmed = resolved.trim_start_matches('/');
    if let (Some(host), Some((first, rest))) = (url_host(base_url), trimmed.split_once('/')) {
        if first.eq_ignore_ascii_case(host) {
            return (base_url, rest);
        }
    }

    (base_url, resolved)
}

fn url_host(url: &str) -> Option<&str> {
    let rest = ["https://", "http://"]
        .iter()
        .find_map(|scheme| url.strip_prefix(scheme))?;
    let host = rest.split('/').next()?;
    (!host.is_empty()).then_some(host)
}
