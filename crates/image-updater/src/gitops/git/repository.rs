//! Git repository operations.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

use super::auth::AuthEnv;
use super::parse::{find_ref_status, format_git_error, parse_push_porcelain};
use super::types::*;
use crate::gitops::error::{classify_git_error, GitOpsError, PushError, Result};

/// Identity and limits applied to every git invocation.
#[derive(Debug, Clone)]
pub struct GitSettings {
    pub user_name: String,
    pub user_email: String,
    /// Upper bound for a single git subprocess.
    pub timeout: Duration,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            user_name: "image-updater".to_string(),
            user_email: "image-updater@users.noreply.github.com".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Git repository operations.
pub struct GitRepository {
    /// Path to the working tree.
    repo_path: PathBuf,
    settings: GitSettings,
}

impl GitRepository {
    /// Creates a handle for an existing working tree.
    pub fn new(repo_path: impl Into<PathBuf>, settings: GitSettings) -> Self {
        Self {
            repo_path: repo_path.into(),
            settings,
        }
    }

    /// Clones `url` into `dest`, which must be empty or absent.
    pub async fn clone_into(
        url: &str,
        dest: &Path,
        auth: &AuthEnv,
        settings: GitSettings,
    ) -> Result<Self> {
        let dest_str = dest
            .to_str()
            .ok_or_else(|| GitOpsError::FileOperation("Non-UTF8 clone path".to_string()))?;

        let parent = dest.parent().unwrap_or(dest);
        let output = run_git_in(
            parent,
            &["clone", "--no-tags", "--", url, dest_str],
            Some(auth),
            settings.timeout,
        )
        .await?;

        if !output.status.success() {
            return Err(classify_git_error(&format_git_error(&output)));
        }

        Ok(Self::new(dest, settings))
    }

    /// Returns the repository path.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Gets the current branch name.
    pub async fn current_branch(&self) -> Result<String> {
        let output = self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"], None).await?;
        if !output.status.success() {
            return Err(GitOpsError::GitOperation(format_git_error(&output)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Creates `branch` from HEAD and checks it out.
    ///
    /// If the local checkout fails, the branch is fetched from origin into a
    /// local ref of the same name and checked out once more. No other retry
    /// is attempted.
    pub async fn checkout_new_branch(&self, branch: &str, auth: &AuthEnv) -> Result<()> {
        let output = self.run_git(&["checkout", "-b", branch], None).await?;
        if output.status.success() {
            return Ok(());
        }

        warn!(
            "Checkout of new branch '{}' failed, fetching from origin: {}",
            branch,
            format_git_error(&output)
        );

        self.fetch_branch(branch, auth).await?;

        let output = self.run_git(&["checkout", branch], None).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(GitOpsError::GitOperation(format_git_error(&output)))
        }
    }

    /// Mirrors `refs/heads/<branch>` from origin into the local ref of the same name.
    pub async fn fetch_branch(&self, branch: &str, auth: &AuthEnv) -> Result<()> {
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
        let output = self
            .run_git(&["fetch", "--no-tags", "origin", &refspec], Some(auth))
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(classify_git_error(&format_git_error(&output)))
        }
    }

    /// Stages every working-tree change and commits it.
    ///
    /// A commit with nothing staged is still created.
    pub async fn commit_all(&self, message: &str) -> Result<CommitResult> {
        let output = self.run_git(&["add", "-A"], None).await?;
        if !output.status.success() {
            return Err(GitOpsError::GitOperation(format_git_error(&output)));
        }

        let staged = self
            .run_git(&["diff", "--cached", "--quiet"], None)
            .await?;
        let empty = staged.status.success();
        if empty {
            debug!("No staged changes, creating empty commit");
        }

        let name_cfg = format!("user.name={}", self.settings.user_name);
        let email_cfg = format!("user.email={}", self.settings.user_email);
        let output = self
            .run_git(
                &[
                    "-c",
                    &name_cfg,
                    "-c",
                    &email_cfg,
                    "commit",
                    "--allow-empty",
                    "--no-verify",
                    "-m",
                    message,
                ],
                None,
            )
            .await?;

        if !output.status.success() {
            return Err(GitOpsError::GitOperation(format_git_error(&output)));
        }

        let commit_hash = self.head_commit().await?;
        Ok(CommitResult { commit_hash, empty })
    }

    /// Full hash of HEAD.
    pub async fn head_commit(&self) -> Result<String> {
        let output = self.run_git(&["rev-parse", "--verify", "HEAD"], None).await?;
        if !output.status.success() {
            return Err(GitOpsError::GitOperation(format_git_error(&output)));
        }

        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if hash.is_empty() {
            return Err(GitOpsError::GitOperation(
                "rev-parse HEAD returned no commit".to_string(),
            ));
        }
        Ok(hash)
    }

    /// Pushes `branch` to the same-named branch on origin.
    ///
    /// The outcome is taken from the porcelain status of the pushed ref, not
    /// from the wording of git's error messages.
    pub async fn push_branch(
        &self,
        branch: &str,
        auth: &AuthEnv,
    ) -> std::result::Result<PushStatus, PushError> {
        let reference = format!("refs/heads/{}", branch);
        let refspec = format!("{0}:{0}", reference);
        let output = self
            .run_git(&["push", "--porcelain", "origin", &refspec], Some(auth))
            .await?;

        let statuses = parse_push_porcelain(&String::from_utf8_lossy(&output.stdout));
        let Some(status) = find_ref_status(&statuses, &reference) else {
            if output.status.success() {
                return Ok(PushStatus::Updated);
            }
            return Err(PushError::Other(classify_git_error(&format_git_error(
                &output,
            ))));
        };

        match status.rejection() {
            Some(PushRejection::NonFastForward) => Err(PushError::FastForwardRejected { reference }),
            Some(PushRejection::RemoteRejected(reason)) => {
                // A concurrent create surfaces as a rejected ref update, not as
                // non-fast-forward; confirm it from the refs themselves.
                if self.remote_ref_appeared(branch, auth).await {
                    debug!("Another writer created {} during the push", reference);
                    return Err(PushError::FastForwardRejected { reference });
                }
                Err(PushError::Other(GitOpsError::RemoteRejected { reference, reason }))
            }
            Some(PushRejection::Other(summary)) => Err(PushError::Other(
                GitOpsError::GitOperation(format!("{}: {}", reference, summary)),
            )),
            None => Ok(match status.flag {
                PushFlag::UpToDate => PushStatus::UpToDate,
                PushFlag::New => PushStatus::Created,
                _ => PushStatus::Updated,
            }),
        }
    }

    /// True if `branch` was absent from origin at clone time but exists there now.
    ///
    /// Any git failure while checking yields false.
    pub async fn remote_ref_appeared(&self, branch: &str, auth: &AuthEnv) -> bool {
        let tracking = format!("refs/remotes/origin/{}", branch);
        let known = match self
            .run_git(&["rev-parse", "--verify", "--quiet", &tracking], None)
            .await
        {
            Ok(output) => output.status.success(),
            Err(_) => return false,
        };
        if known {
            return false;
        }

        let reference = format!("refs/heads/{}", branch);
        match self
            .run_git(&["ls-remote", "--exit-code", "origin", &reference], Some(auth))
            .await
        {
            Ok(output) => output.status.success(),
            Err(e) => {
                warn!("Could not inspect origin for {}: {}", reference, e);
                false
            }
        }
    }

    /// Runs a git command in the repository directory.
    async fn run_git(&self, args: &[&str], auth: Option<&AuthEnv>) -> Result<Output> {
        run_git_in(&self.repo_path, args, auth, self.settings.timeout).await
    }
}

/// Runs git in `dir`, killing the child if the timeout elapses or the
/// returned future is dropped.
async fn run_git_in(
    dir: &Path,
    args: &[&str],
    auth: Option<&AuthEnv>,
    timeout: Duration,
) -> Result<Output> {
    let mut cmd = TokioCommand::new("git");
    cmd.current_dir(dir)
        .args(args)
        .env("LC_ALL", "C")
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(auth) = auth {
        for (key, value) in &auth.env_vars {
            cmd.env(key, value);
        }
    }

    debug!("git {}", args.first().copied().unwrap_or_default());

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.map_err(GitOpsError::Spawn),
        Err(_) => Err(GitOpsError::GitTimeout(timeout.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let output = Command::new("git")
            .current_dir(dir)
            .args(args)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    /// Creates a bare remote with one commit on `main`.
    fn seeded_remote(root: &Path) -> PathBuf {
        let remote = root.join("remote.git");
        let seed = root.join("seed");
        std::fs::create_dir_all(&seed).unwrap();
        git(root, &["init", "--bare", "-b", "main", remote.to_str().unwrap()]);
        git(&seed, &["init", "-b", "main"]);
        std::fs::write(seed.join("README.md"), "seed\n").unwrap();
        git(&seed, &["add", "."]);
        git(
            &seed,
            &["-c", "user.name=t", "-c", "user.email=t@t", "commit", "-m", "seed"],
        );
        git(&seed, &["remote", "add", "origin", remote.to_str().unwrap()]);
        git(&seed, &["push", "origin", "main"]);
        remote
    }

    async fn clone(root: &Path, remote: &Path, name: &str) -> GitRepository {
        GitRepository::clone_into(
            remote.to_str().unwrap(),
            &root.join(name),
            &AuthEnv::anonymous(),
            GitSettings::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_clone_and_branch() {
        let dir = TempDir::new().unwrap();
        let remote = seeded_remote(dir.path());
        let repo = clone(dir.path(), &remote, "work").await;

        assert!(repo.repo_path().join("README.md").exists());
        repo.checkout_new_branch("feature", &AuthEnv::anonymous())
            .await
            .unwrap();
        assert_eq!(repo.current_branch().await.unwrap(), "feature");
    }

    #[tokio::test]
    async fn test_clone_missing_remote_fails() {
        let dir = TempDir::new().unwrap();
        let result = GitRepository::clone_into(
            dir.path().join("nope.git").to_str().unwrap(),
            &dir.path().join("work"),
            &AuthEnv::anonymous(),
            GitSettings::default(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_commit_empty_allowed() {
        let dir = TempDir::new().unwrap();
        let remote = seeded_remote(dir.path());
        let repo = clone(dir.path(), &remote, "work").await;

        let result = repo.commit_all("nothing changed").await.unwrap();
        assert!(result.empty);
        assert_eq!(result.commit_hash.len(), 40);
    }

    #[tokio::test]
    async fn test_head_commit_fails_without_commits() {
        let dir = TempDir::new().unwrap();
        let work = dir.path().join("unborn");
        std::fs::create_dir_all(&work).unwrap();
        git(&work, &["init"]);

        let repo = GitRepository::new(&work, GitSettings::default());
        let err = repo.head_commit().await.unwrap_err();
        assert!(matches!(err, GitOpsError::GitOperation(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_push_new_then_non_fast_forward() {
        let dir = TempDir::new().unwrap();
        let remote = seeded_remote(dir.path());
        let auth = AuthEnv::anonymous();

        let first = clone(dir.path(), &remote, "first").await;
        let second = clone(dir.path(), &remote, "second").await;

        first.checkout_new_branch("update", &auth).await.unwrap();
        std::fs::write(first.repo_path().join("a.txt"), "first\n").unwrap();
        first.commit_all("first").await.unwrap();
        assert_eq!(
            first.push_branch("update", &auth).await.unwrap(),
            PushStatus::Created
        );

        second.checkout_new_branch("update", &auth).await.unwrap();
        std::fs::write(second.repo_path().join("a.txt"), "second\n").unwrap();
        second.commit_all("second").await.unwrap();
        let err = second.push_branch("update", &auth).await.unwrap_err();
        assert!(
            matches!(err, PushError::FastForwardRejected { ref reference } if reference == "refs/heads/update"),
            "unexpected: {err:?}"
        );
    }

    #[tokio::test]
    async fn test_push_same_commit_is_up_to_date() {
        let dir = TempDir::new().unwrap();
        let remote = seeded_remote(dir.path());
        let auth = AuthEnv::anonymous();
        let repo = clone(dir.path(), &remote, "work").await;

        repo.checkout_new_branch("update", &auth).await.unwrap();
        std::fs::write(repo.repo_path().join("a.txt"), "x\n").unwrap();
        repo.commit_all("x").await.unwrap();

        assert_eq!(repo.push_branch("update", &auth).await.unwrap(), PushStatus::Created);
        assert_eq!(repo.push_branch("update", &auth).await.unwrap(), PushStatus::UpToDate);
    }

    #[tokio::test]
    async fn test_checkout_falls_back_to_fetch() {
        let dir = TempDir::new().unwrap();
        let remote = seeded_remote(dir.path());
        let auth = AuthEnv::anonymous();

        let publisher = clone(dir.path(), &remote, "publisher").await;
        publisher.checkout_new_branch("update", &auth).await.unwrap();
        publisher.push_branch("update", &auth).await.unwrap();

        // A local branch of the same name makes `checkout -b` fail.
        let repo = clone(dir.path(), &remote, "work").await;
        git(repo.repo_path(), &["branch", "update"]);

        repo.checkout_new_branch("update", &auth).await.unwrap();
        assert_eq!(repo.current_branch().await.unwrap(), "update");
    }

    #[tokio::test]
    async fn test_remote_ref_appeared() {
        let dir = TempDir::new().unwrap();
        let remote = seeded_remote(dir.path());
        let auth = AuthEnv::anonymous();

        let early = clone(dir.path(), &remote, "early").await;
        assert!(!early.remote_ref_appeared("update", &auth).await);

        let publisher = clone(dir.path(), &remote, "publisher").await;
        publisher.checkout_new_branch("update", &auth).await.unwrap();
        publisher.push_branch("update", &auth).await.unwrap();

        // Created on origin after `early` cloned.
        assert!(early.remote_ref_appeared("update", &auth).await);

        // Already present when `late` cloned.
        let late = clone(dir.path(), &remote, "late").await;
        assert!(!late.remote_ref_appeared("update", &auth).await);
    }

    #[tokio::test]
    async fn test_timeout_reported() {
        let dir = TempDir::new().unwrap();
        let result = run_git_in(
            dir.path(),
            &["--version"],
            None,
            Duration::from_nanos(1),
        )
        .await;
        // Either the process raced to completion or the timeout fired.
        if let Err(e) = result {
            assert!(matches!(e, GitOpsError::GitTimeout(0)));
        }
    }
}
