//! Clone → locate → edit → branch → commit → push for a single update.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info};

use super::git::{authenticated_url, build_auth_env, GitRepository, GitSettings, PushStatus};
use super::error::PushError;
use super::workspace::ScratchWorkspace;
use crate::credentials::GitCredential;
use crate::error::{Result, UpdateError};
use crate::manifest::{self, ImageChange, Kustomization};
use crate::sanitize::redact_repo_url;

/// Step of the driver a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Clone,
    Locate,
    Edit,
    Branch,
    Commit,
    Push,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Clone => "clone",
            Stage::Locate => "locate",
            Stage::Edit => "edit",
            Stage::Branch => "branch",
            Stage::Commit => "commit",
            Stage::Push => "push",
        };
        f.write_str(name)
    }
}

/// Everything the driver needs to submit one manifest change.
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    /// Remote to clone, without credentials.
    pub clone_url: String,
    /// Manifest directory relative to the clone root.
    pub manifest_dir: PathBuf,
    /// `images[].name` to update.
    pub image_name: String,
    pub new_tag: String,
    pub branch: String,
    pub commit_message: String,
}

/// Successful end states of a driver run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverOutcome {
    /// The branch was pushed with a new commit.
    Applied { branch: String, commit: String },
    /// The remote already has this branch with content we cannot fast-forward,
    /// or with the exact commit we produced.
    Duplicate { branch: String },
}

/// Runs update plans in throwaway clones.
#[derive(Debug, Clone)]
pub struct GitOpsDriver {
    git: GitSettings,
    scratch_root: PathBuf,
}

impl GitOpsDriver {
    pub fn new(git: GitSettings, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            git,
            scratch_root: scratch_root.into(),
        }
    }

    /// Executes `plan` and classifies the push.
    ///
    /// The scratch clone is removed before returning; if this future is
    /// dropped mid-run, the workspace and any running git child are cleaned
    /// up by their `Drop` impls.
    pub async fn run(&self, plan: &UpdatePlan, credential: &GitCredential) -> Result<DriverOutcome> {
        let workspace = ScratchWorkspace::create(&self.scratch_root).map_err(UpdateError::Workspace)?;
        let result = self.run_in(&workspace, plan, credential).await;
        workspace.close();
        result
    }

    async fn run_in(
        &self,
        workspace: &ScratchWorkspace,
        plan: &UpdatePlan,
        credential: &GitCredential,
    ) -> Result<DriverOutcome> {
        let auth = build_auth_env(credential).map_err(|e| UpdateError::git(Stage::Clone, e))?;
        let url = authenticated_url(&plan.clone_url, &credential.username);

        info!("Cloning {}", redact_repo_url(&url));
        let repo = GitRepository::clone_into(&url, workspace.repo_dir(), &auth, self.git.clone())
            .await
            .map_err(|e| UpdateError::git(Stage::Clone, e))?;

        debug!(stage = %Stage::Locate, "Locating manifest in {}", plan.manifest_dir.display());
        let manifest_path = manifest::locate(&repo.repo_path().join(&plan.manifest_dir))?;
        let mut manifest = Kustomization::load(&manifest_path)?;

        debug!(stage = %Stage::Edit, "Setting {} to {}", plan.image_name, plan.new_tag);
        if let ImageChange::Updated { previous } = manifest.set_image_tag(&plan.image_name, &plan.new_tag)? {
            debug!("Replaced previous tag {:?}", previous);
        }
        let rendered = manifest.render()?;

        debug!(stage = %Stage::Branch, "Checking out {}", plan.branch);
        repo.checkout_new_branch(&plan.branch, &auth)
            .await
            .map_err(|e| UpdateError::git(Stage::Branch, e))?;
        manifest.write(&rendered)?;

        let commit = repo
            .commit_all(&plan.commit_message)
            .await
            .map_err(|e| UpdateError::git(Stage::Commit, e))?;
        debug!(stage = %Stage::Commit, commit = %commit.commit_hash, empty = commit.empty, "Committed");

        match repo.push_branch(&plan.branch, &auth).await {
            Ok(PushStatus::UpToDate) => Ok(DriverOutcome::Duplicate {
                branch: plan.branch.clone(),
            }),
            Ok(_) => Ok(DriverOutcome::Applied {
                branch: plan.branch.clone(),
                commit: commit.commit_hash,
            }),
            Err(PushError::FastForwardRejected { reference }) => {
                debug!("Push of {} rejected as non-fast-forward", reference);
                Ok(DriverOutcome::Duplicate {
                    branch: plan.branch.clone(),
                })
            }
            Err(PushError::Other(e)) => Err(UpdateError::git(Stage::Push, e)),
        }
    }
}
