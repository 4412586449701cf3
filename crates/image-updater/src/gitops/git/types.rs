//! Pure data types for git operations.

use serde::Serialize;

/// Result of a git commit operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    /// Full commit hash.
    pub commit_hash: String,
    /// Whether the commit had no staged changes.
    pub empty: bool,
}

/// Per-ref status flag from `git push --porcelain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFlag {
    FastForward,
    Forced,
    Deleted,
    New,
    Rejected,
    UpToDate,
}

impl PushFlag {
    pub fn from_char(flag: char) -> Option<Self> {
        match flag {
            ' ' => Some(PushFlag::FastForward),
            '+' => Some(PushFlag::Forced),
            '-' => Some(PushFlag::Deleted),
            '*' => Some(PushFlag::New),
            '!' => Some(PushFlag::Rejected),
            '=' => Some(PushFlag::UpToDate),
            _ => None,
        }
    }
}

/// One ref line of `git push --porcelain` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRefStatus {
    pub flag: PushFlag,
    pub source: String,
    pub destination: String,
    pub summary: String,
}

/// Why the remote refused a ref update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushRejection {
    /// Remote branch has history the local branch lacks.
    NonFastForward,
    /// A server-side hook or branch protection refused the update.
    RemoteRejected(String),
    Other(String),
}

impl PushRefStatus {
    /// Classifies a rejected ref; returns `None` if the ref was accepted.
    pub fn rejection(&self) -> Option<PushRejection> {
        if self.flag != PushFlag::Rejected {
            return None;
        }

        let reason = self
            .summary
            .split_once('(')
            .map(|(_, rest)| rest.trim_end_matches(')').trim().to_string())
            .unwrap_or_default();

        if self.summary.starts_with("[remote rejected]") {
            return Some(PushRejection::RemoteRejected(reason));
        }

        match reason.as_str() {
            "non-fast-forward" | "fetch first" => Some(PushRejection::NonFastForward),
            _ => Some(PushRejection::Other(self.summary.clone())),
        }
    }
}

/// Accepted push result for a single branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PushStatus {
    /// The branch did not exist on the remote.
    Created,
    /// The remote branch was advanced.
    Updated,
    /// The remote branch already pointed at the pushed commit.
    UpToDate,
}
