use std::path::PathBuf;
use thiserror::Error;

use crate::credentials::CredentialError;
use crate::gitops::{GitOpsError, Stage};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read rules file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rules YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Invalid rule #{index}: {reason}")]
    InvalidRule { index: usize, reason: String },

    #[error("Rule #{index}: variable '{token}' appears more than once in registryURI")]
    DuplicateVariable { index: usize, token: String },

    #[error("Rule #{index}: variable '{token}' in gitHubRepository is not captured by registryURI")]
    UnboundVariable { index: usize, token: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template resolution incomplete: {0}")]
    Unresolved(String),

    #[error("Resolved path '{0}' does not name an owner/repository")]
    MissingRepository(String),

    #[error("Path traversal detected in '{0}'")]
    PathTraversal(String),
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("No kustomization file found in '{0}'")]
    NotFound(PathBuf),

    #[error("Failed to read manifest '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse manifest '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid manifest structure: {0}")]
    InvalidStructure(String),

    #[error("Failed to serialize manifest: {0}")]
    Serialize(String),

    #[error("Failed to write manifest '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ManifestError {
    /// Returns true for I/O failures; layout and content problems are not retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ManifestError::ReadFile { .. } | ManifestError::WriteFile { .. }
        )
    }
}

/// Failure of a single update run.
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Credential error: {0}")]
    Credentials(#[from] CredentialError),

    #[error("Git {stage} failed: {source}")]
    Git {
        stage: Stage,
        #[source]
        source: GitOpsError,
    },

    #[error("Scratch workspace error: {0}")]
    Workspace(#[source] std::io::Error),
}

impl UpdateError {
    pub(crate) fn git(stage: Stage, source: GitOpsError) -> Self {
        UpdateError::Git { stage, source }
    }

    /// Returns true if redelivering the event may succeed.
    ///
    /// Configuration failures (unresolvable template, missing or malformed
    /// manifest) return false.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpdateError::Template(_) => false,
            UpdateError::Manifest(e) => e.is_retryable(),
            UpdateError::Credentials(_) => true,
            UpdateError::Git { source, .. } => source.is_retryable(),
            UpdateError::Workspace(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;
