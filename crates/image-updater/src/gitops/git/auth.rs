//! Git authentication handling.

use std::path::PathBuf;

use secrecy::ExposeSecret;

use crate::credentials::GitCredential;
use crate::gitops::error::{GitOpsError, Result};

/// Escapes a token for safe use in single-quoted shell strings.
/// Replaces single quotes with '\'' (end quote, escaped quote, start quote).
pub fn shell_escape_token(token: &str) -> String {
    token.replace('\'', "'\\''")
}

/// Escapes batch metacharacters so a token cannot inject commands into the
/// Windows askpass script.
#[cfg_attr(not(windows), allow(dead_code))]
fn escape_batch_token(token: &str) -> String {
    let mut escaped = String::with_capacity(token.len() * 2);
    for ch in token.chars() {
        match ch {
            '%' => escaped.push_str("%%"),
            '^' | '&' | '|' | '<' | '>' | '(' | ')' | '"' => {
                escaped.push('^');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// RAII guard for askpass script cleanup.
///
/// Deletes the askpass script when dropped so the token does not outlive the
/// git command on disk.
#[derive(Debug)]
pub struct AskpassCleanup {
    path: Option<PathBuf>,
}

impl AskpassCleanup {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub(crate) fn empty() -> Self {
        Self { path: None }
    }
}

impl Drop for AskpassCleanup {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!("Failed to clean up askpass script: {}", e);
            }
        }
    }
}

/// Authentication environment for git commands.
#[derive(Debug)]
pub struct AuthEnv {
    /// Environment variables to set for the git command.
    pub env_vars: Vec<(String, String)>,
    /// Must outlive the git command to keep the askpass script alive.
    pub _cleanup: AskpassCleanup,
}

impl AuthEnv {
    /// An environment that only disables interactive prompts.
    pub fn anonymous() -> Self {
        Self {
            env_vars: vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())],
            _cleanup: AskpassCleanup::empty(),
        }
    }
}

/// Builds an askpass environment that answers git's password prompt with the
/// credential token.
///
/// The username travels in the remote URL (see [`authenticated_url`]), so
/// the script only ever has to produce the token.
pub fn build_auth_env(credential: &GitCredential) -> Result<AuthEnv> {
    let escaped_token = shell_escape_token(credential.token.expose_secret());

    let temp_dir = std::env::temp_dir();
    let random_suffix = uuid::Uuid::new_v4().to_string();

    #[cfg(unix)]
    let (askpass_path, askpass_script) = {
        let path = temp_dir.join(format!(".git-askpass-{}.sh", random_suffix));
        let script = format!("#!/bin/sh\necho '{}'\n", escaped_token);
        (path, script)
    };

    #[cfg(windows)]
    let (askpass_path, askpass_script) = {
        let path = temp_dir.join(format!(".git-askpass-{}.bat", random_suffix));
        let escaped = escape_batch_token(credential.token.expose_secret());
        let script = format!("@echo off\r\necho {}\r\n", escaped);
        (path, script)
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o700)
            .open(&askpass_path)?;
        std::io::Write::write_all(&mut file, askpass_script.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(&askpass_path, &askpass_script)?;
    }

    let cleanup = AskpassCleanup::new(askpass_path.clone());

    let askpass_path_str = askpass_path
        .to_str()
        .ok_or_else(|| {
            GitOpsError::GitAuthFailed(
                "Temp directory path contains non-UTF8 characters".to_string(),
            )
        })?
        .to_string();

    Ok(AuthEnv {
        env_vars: vec![
            ("GIT_ASKPASS".to_string(), askpass_path_str),
            ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
        ],
        _cleanup: cleanup,
    })
}

/// Inserts the credential username into an HTTP(S) remote URL.
///
/// Other URL forms (local paths, `file://`, ssh) are returned unchanged.
pub fn authenticated_url(url: &str, username: &str) -> String {
    if username.is_empty() {
        return url.to_string();
    }

    for scheme in ["https://", "http://"] {
        if let Some(rest) = url.strip_prefix(scheme) {
            let host_end = rest.find('/').unwrap_or(rest.len());
            if rest[..host_end].contains('@') {
                return url.to_string();
            }
            return format!("{}{}@{}", scheme, username, rest);
        }
    }

    url.to_string()
}
