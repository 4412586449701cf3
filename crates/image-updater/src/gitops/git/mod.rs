//! Git subprocess layer used by the gitops driver.

pub mod auth;
pub mod parse;
pub mod repository;
pub mod types;

pub use auth::{authenticated_url, build_auth_env, AuthEnv};
pub use repository::{GitRepository, GitSettings};
pub use types::*;
