//! Git side of an update: scratch clones, branch naming, and the
//! clone-to-push driver.

pub mod branch;
pub mod driver;
pub mod error;
pub mod git;
pub mod workspace;

pub use branch::{branch_name, commit_message};
pub use driver::{DriverOutcome, GitOpsDriver, Stage, UpdatePlan};
pub use error::{classify_git_error, GitOpsError, PushError, Result};
pub use git::{GitRepository, GitSettings};
pub use workspace::ScratchWorkspace;
