pub mod config;
pub mod credentials;
pub mod error;
pub mod event;
pub mod gitops;
pub mod manifest;
pub mod routing;
pub mod sanitize;
pub mod secrets;
pub mod transport;
pub mod updater;

pub use config::{load_rules, load_rules_from_str, UpdaterSettings};
pub use credentials::{
    AppKey, CredentialError, CredentialProvider, GitCredential, InstallationTokenProvider,
    StaticTokenProvider,
};
pub use error::{ConfigError, ManifestError, Result, TemplateError, UpdateError};
pub use event::{ActionType, PushDetail, PushEvent};
pub use gitops::{GitOpsError, Stage};
pub use routing::{MatchBinding, RegistryRule, RuleMatcher, RuleSet, TagPolicy, TargetLocation};
pub use secrets::{SecretError, SecretSource};
pub use updater::{Disposition, OutcomeReport, UpdateOutcome, Updater};
