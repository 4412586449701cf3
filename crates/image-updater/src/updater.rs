//! One update per push event: route, check the tag, resolve the target,
//! and hand the change to the git driver.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::UpdaterSettings;
use crate::credentials::{self, CredentialProvider};
use crate::error::UpdateError;
use crate::event::{ActionType, PushEvent};
use crate::gitops::{branch_name, commit_message, DriverOutcome, GitOpsDriver, UpdatePlan};
use crate::routing::{resolve, RuleMatcher, RuleSet, TagDecision, TargetLocation};

/// Result of applying one event.
#[derive(Debug)]
pub enum UpdateOutcome {
    Applied { branch: String, commit: String },
    TagNotAllowed,
    TagDenied,
    NoRuleMatch,
    /// An identical change was already submitted on this branch.
    DuplicateSubmission { branch: String },
    /// The event is not an image push.
    Ignored,
    Failed(UpdateError),
}

/// What the transport should do with the event that produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Disposition {
    /// Done; drop the event.
    Ack,
    /// Transient failure; deliver again later.
    Retry,
    /// Will not succeed until configuration changes.
    DeadLetter,
}

impl UpdateOutcome {
    pub fn disposition(&self) -> Disposition {
        match self {
            UpdateOutcome::Failed(e) if e.is_retryable() => Disposition::Retry,
            UpdateOutcome::Failed(_) => Disposition::DeadLetter,
            _ => Disposition::Ack,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, UpdateOutcome::Failed(_))
    }

    /// Stable lowercase name used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateOutcome::Applied { .. } => "applied",
            UpdateOutcome::TagNotAllowed => "tag_not_allowed",
            UpdateOutcome::TagDenied => "tag_denied",
            UpdateOutcome::NoRuleMatch => "no_rule_match",
            UpdateOutcome::DuplicateSubmission { .. } => "duplicate_submission",
            UpdateOutcome::Ignored => "ignored",
            UpdateOutcome::Failed(_) => "failed",
        }
    }

    pub fn report(&self) -> OutcomeReport {
        let (branch, commit, error) = match self {
            UpdateOutcome::Applied { branch, commit } => {
                (Some(branch.clone()), Some(commit.clone()), None)
            }
            UpdateOutcome::DuplicateSubmission { branch } => (Some(branch.clone()), None, None),
            UpdateOutcome::Failed(e) => (None, None, Some(e.to_string())),
            _ => (None, None, None),
        };
        OutcomeReport {
            outcome: self.kind(),
            disposition: self.disposition(),
            branch,
            commit,
            error,
        }
    }
}

/// Serializable summary of an [`UpdateOutcome`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeReport {
    pub outcome: &'static str,
    pub disposition: Disposition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An event that passed routing and is ready for the git driver.
#[derive(Debug, Clone)]
pub struct PreparedUpdate {
    /// Index of the matched rule.
    pub rule_index: usize,
    pub env: String,
    /// Repository path after template substitution.
    pub resolved_path: String,
    pub location: TargetLocation,
    pub plan: UpdatePlan,
}

/// Outcome of the git-free part of an update.
#[derive(Debug)]
pub enum Routing {
    Ready(PreparedUpdate),
    Skipped(UpdateOutcome),
}

/// Applies push events. Shared across concurrent runs.
pub struct Updater {
    settings: UpdaterSettings,
    matcher: RuleMatcher,
    driver: GitOpsDriver,
    credentials: Arc<dyn CredentialProvider>,
}

impl Updater {
    pub fn new(settings: UpdaterSettings, credentials: Arc<dyn CredentialProvider>) -> Self {
        let matcher = RuleMatcher::new(settings.registry_host_template.clone());
        let driver = GitOpsDriver::new(settings.git_settings(), settings.scratch_root.clone());
        Self {
            settings,
            matcher,
            driver,
            credentials,
        }
    }

    pub fn settings(&self) -> &UpdaterSettings {
        &self.settings
    }

    /// Runs the full update for `event` and logs the outcome.
    pub async fn apply(&self, rules: &RuleSet, event: &PushEvent) -> UpdateOutcome {
        let span = info_span!("update",
            run_id = %Uuid::new_v4(),
            account = %event.account,
            region = %event.region,
            repository = %event.repository_name(),
            tag = %event.image_tag(),
        );

        async {
            let outcome = self.run(rules, event).await;
            log_outcome(&outcome);
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(&self, rules: &RuleSet, event: &PushEvent) -> UpdateOutcome {
        let prepared = match self.prepare(rules, event) {
            Routing::Ready(prepared) => prepared,
            Routing::Skipped(outcome) => return outcome,
        };

        let credential = match credentials::acquire(self.credentials.as_ref()).await {
            Ok(credential) => credential,
            Err(e) => return UpdateOutcome::Failed(e.into()),
        };

        match self.driver.run(&prepared.plan, &credential).await {
            Ok(DriverOutcome::Applied { branch, commit }) => {
                UpdateOutcome::Applied { branch, commit }
            }
            Ok(DriverOutcome::Duplicate { branch }) => UpdateOutcome::DuplicateSubmission { branch },
            Err(e) => UpdateOutcome::Failed(e),
        }
    }

    /// Routing, tag policy, and target resolution, without touching git.
    pub fn prepare(&self, rules: &RuleSet, event: &PushEvent) -> Routing {
        if *event.action_type() != ActionType::Push {
            return Routing::Skipped(UpdateOutcome::Ignored);
        }

        let Some(found) = self.matcher.find(rules, event) else {
            return Routing::Skipped(UpdateOutcome::NoRuleMatch);
        };
        debug!("Matched rule #{}", found.index);

        match found.rule.tag_policy.evaluate(event.image_tag()) {
            TagDecision::Accepted => {}
            TagDecision::NotAllowed => return Routing::Skipped(UpdateOutcome::TagNotAllowed),
            TagDecision::Denied => return Routing::Skipped(UpdateOutcome::TagDenied),
        }

        let resolved_path = match resolve(&found.rule.repository_pattern, &found.binding) {
            Ok(path) => path,
            Err(e) => return Routing::Skipped(UpdateOutcome::Failed(e.into())),
        };
        let location = match TargetLocation::parse(&resolved_path, &self.settings.github_base_url)
        {
            Ok(location) => location,
            Err(e) => return Routing::Skipped(UpdateOutcome::Failed(e.into())),
        };

        let env = found.binding.env;
        let plan = UpdatePlan {
            clone_url: location.clone_url.clone(),
            manifest_dir: location.manifest_dir.clone(),
            image_name: event.image_uri(&self.settings.registry_host_template),
            new_tag: event.image_tag().to_string(),
            branch: branch_name(event, &env),
            commit_message: commit_message(event, &env),
        };

        Routing::Ready(PreparedUpdate {
            rule_index: found.index,
            env,
            resolved_path,
            location,
            plan,
        })
    }
}

fn log_outcome(outcome: &UpdateOutcome) {
    match outcome {
        UpdateOutcome::Applied { branch, commit } => {
            info!(outcome = outcome.kind(), %branch, %commit, "Image update pushed")
        }
        UpdateOutcome::DuplicateSubmission { branch } => {
            info!(outcome = outcome.kind(), %branch, "Branch already submitted, skipping")
        }
        UpdateOutcome::Failed(e) => error!(
            outcome = outcome.kind(),
            retryable = e.is_retryable(),
            "Image update failed: {}",
            e
        ),
        _ => info!(outcome = outcome.kind(), "Event skipped"),
    }
}
