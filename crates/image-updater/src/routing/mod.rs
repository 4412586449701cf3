//! Maps a push event to a rule, a tag decision, and a target location.

pub mod matcher;
pub mod policy;
pub mod rule;
pub mod template;

pub use matcher::{MatchBinding, RuleMatch, RuleMatcher};
pub use policy::{TagDecision, TagPolicy, TagRule};
pub use rule::{RegistryRule, RuleSet};
pub use template::{resolve, TargetLocation, ENV_TOKEN};
