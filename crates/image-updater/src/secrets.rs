//! Secret lookup for git tokens and app JWTs.
//!
//! A secret may be given inline, as a file (mounted Kubernetes or Docker
//! secret), or as the name of an environment variable. The first non-empty
//! source wins, in that order.

use std::path::{Path, PathBuf};

use secrecy::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source configured")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Secret file '{0}' is empty")]
    EmptyFile(PathBuf),

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where to find a secret.
#[derive(Debug, Clone, Default)]
pub struct SecretSource {
    pub value: Option<String>,
    pub file: Option<PathBuf>,
    pub env_var: Option<String>,
}

impl SecretSource {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
            ..Default::default()
        }
    }

    /// True if any source is set to a non-empty value.
    pub fn is_configured(&self) -> bool {
        self.value.as_deref().is_some_and(|s| !s.is_empty())
            || self.file.as_deref().is_some_and(|p| !p.as_os_str().is_empty())
            || self.env_var.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Resolves the secret, trimming surrounding whitespace.
    pub fn resolve(&self) -> Result<SecretString> {
        if let Some(value) = self.value.as_deref().filter(|v| !v.is_empty()) {
            return Ok(SecretString::from(value.to_string()));
        }

        if let Some(path) = self.file.as_deref().filter(|p| !p.as_os_str().is_empty()) {
            return read_secret_file(path);
        }

        if let Some(name) = self.env_var.as_deref().filter(|n| !n.is_empty()) {
            return match std::env::var(name) {
                Ok(value) => Ok(SecretString::from(value.trim().to_string())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: name.to_string(),
                }),
            };
        }

        Err(SecretError::NoSourceProvided)
    }
}

fn read_secret_file(path: &Path) -> Result<SecretString> {
    let expanded = expand_home(path);
    let content = std::fs::read_to_string(&expanded).map_err(|source| {
        SecretError::FileReadError {
            path: expanded.clone(),
            source,
        }
    })?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(SecretError::EmptyFile(expanded));
    }
    Ok(SecretString::from(trimmed.to_string()))
}

/// Expands a leading `~` to the current user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
