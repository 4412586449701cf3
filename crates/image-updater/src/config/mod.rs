pub mod loader;
pub mod schema;
pub mod settings;

pub use loader::{load_rules, load_rules_from_str};
pub use schema::RegistryRuleConfig;
pub use settings::UpdaterSettings;
