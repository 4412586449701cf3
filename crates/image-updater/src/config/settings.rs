use std::path::PathBuf;
use std::time::Duration;

use crate::gitops::GitSettings;

pub const DEFAULT_GITHUB_BASE_URL: &str = "https://github.com";
pub const DEFAULT_REGISTRY_HOST_TEMPLATE: &str = "dkr.ecr.{region}.amazonaws.com";
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Process-wide settings shared by every update run.
#[derive(Debug, Clone)]
pub struct UpdaterSettings {
    /// Base for repository paths that do not name a host.
    pub github_base_url: String,
    /// Registry host after `<account>.`; `{region}` is substituted.
    pub registry_host_template: String,
    pub author_name: String,
    pub author_email: String,
    /// Parent of the per-run scratch clones.
    pub scratch_root: PathBuf,
    pub git_timeout: Duration,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        let git = GitSettings::default();
        Self {
            github_base_url: DEFAULT_GITHUB_BASE_URL.to_string(),
            registry_host_template: DEFAULT_REGISTRY_HOST_TEMPLATE.to_string(),
            author_name: git.user_name,
            author_email: git.user_email,
            scratch_root: std::env::temp_dir().join("image-updater"),
            git_timeout: DEFAULT_GIT_TIMEOUT,
        }
    }
}

impl UpdaterSettings {
    pub fn git_settings(&self) -> GitSettings {
        GitSettings {
            user_name: self.author_name.clone(),
            user_email: self.author_email.clone(),
            timeout: self.git_timeout,
        }
    }
}
