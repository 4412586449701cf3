//! Deterministic branch names and commit messages.
//!
//! Identical events always produce the same branch, which is what lets a
//! second submission be detected as a duplicate by the remote.

use crate::event::PushEvent;
use crate::sanitize::sanitize_ref_component;

const BRANCH_PREFIX: &str = "image_updater";

/// `image_updater_<repository segments after the first, joined by _>_<env>_<tag>`.
pub fn branch_name(event: &PushEvent, env: &str) -> String {
    let segments = event.repository_segments();
    let repo_part = segments.get(1..).unwrap_or_default().join("_");
    let raw = format!("{}_{}_{}_{}", BRANCH_PREFIX, repo_part, env, event.image_tag());
    sanitize_ref_component(&raw)
}

/// `[<env>][image-committer][<repositoryName>] update image to <tag>`.
pub fn commit_message(event: &PushEvent, env: &str) -> String {
    format!(
        "[{}][image-committer][{}] update image to {}",
        env,
        event.repository_name(),
        event.image_tag()
    )
}
