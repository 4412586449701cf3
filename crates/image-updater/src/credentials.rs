//! Git credentials for the downstream repository.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::secrets::{SecretError, SecretSource};

/// Username GitHub expects alongside installation and app tokens.
pub const DEFAULT_USERNAME: &str = "x-access-token";

/// Upper bound on a single credential acquisition.
pub const CREDENTIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Installation tokens are refreshed this long before they expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// App JWTs are backdated to tolerate clock drift against GitHub.
const JWT_BACKDATE_SECS: i64 = 60;
/// GitHub rejects app JWTs that expire more than ten minutes out.
const JWT_LIFETIME_SECS: i64 = 9 * 60;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("Failed to sign app JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Token request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Token endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Credential acquisition timed out after {0}s")]
    Timeout(u64),
}

/// Username and token used for both clone and push.
#[derive(Debug, Clone)]
pub struct GitCredential {
    pub username: String,
    pub token: SecretString,
}

/// Source of git credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> Result<GitCredential, CredentialError>;
}

/// Calls `provider` under [`CREDENTIAL_TIMEOUT`].
pub async fn acquire(provider: &dyn CredentialProvider) -> Result<GitCredential, CredentialError> {
    tokio::time::timeout(CREDENTIAL_TIMEOUT, provider.credential())
        .await
        .map_err(|_| CredentialError::Timeout(CREDENTIAL_TIMEOUT.as_secs()))?
}

/// A long-lived token (personal access token or similar).
///
/// The source is re-read on every call so a rotated secret file is picked
/// up without a restart.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    username: String,
    source: SecretSource,
}

impl StaticTokenProvider {
    pub fn new(username: impl Into<String>, source: SecretSource) -> Self {
        Self {
            username: username.into(),
            source,
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn credential(&self) -> Result<GitCredential, CredentialError> {
        Ok(GitCredential {
            username: self.username.clone(),
            token: self.source.resolve()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

/// GitHub App identity: the numeric app id and its RSA private key (PEM).
#[derive(Debug, Clone)]
pub struct AppKey {
    pub app_id: u64,
    pub private_key: SecretSource,
}

#[derive(Debug, Serialize, Deserialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

impl AppKey {
    pub fn new(app_id: u64, private_key: SecretSource) -> Self {
        Self {
            app_id,
            private_key,
        }
    }

    /// Signs an RS256 app JWT valid from a minute ago for nine minutes.
    ///
    /// The key is re-read on every call so a rotated key file is picked up.
    pub fn mint_jwt(&self, now: DateTime<Utc>) -> Result<SecretString, CredentialError> {
        let pem = self.private_key.resolve()?;
        let key = EncodingKey::from_rsa_pem(pem.expose_secret().as_bytes())?;
        let claims = AppClaims {
            iat: now.timestamp() - JWT_BACKDATE_SECS,
            exp: now.timestamp() + JWT_LIFETIME_SECS,
            iss: self.app_id.to_string(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)?;
        Ok(SecretString::from(token))
    }
}

/// Exchanges a GitHub App JWT for an installation access token.
///
/// The JWT is minted from the app key for each exchange. Tokens are cached
/// until shortly before their `expires_at`.
pub struct InstallationTokenProvider {
    client: reqwest::Client,
    api_url: String,
    installation_id: u64,
    app: AppKey,
    cached: Mutex<Option<CachedToken>>,
}

impl InstallationTokenProvider {
    pub fn new(
        api_url: impl Into<String>,
        installation_id: u64,
        app: AppKey,
    ) -> Result<Self, CredentialError> {
        let client = reqwest::Client::builder()
            .timeout(CREDENTIAL_TIMEOUT)
            .user_agent(concat!("image-updater/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            installation_id,
            app,
            cached: Mutex::new(None),
        })
    }

    async fn exchange(&self) -> Result<InstallationTokenResponse, CredentialError> {
        let jwt = self.app.mint_jwt(Utc::now())?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, self.installation_id
        );
        debug!(
            "Requesting installation token for app {} installation {}",
            self.app.app_id, self.installation_id
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(jwt.expose_secret())
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl CredentialProvider for InstallationTokenProvider {
    async fn credential(&self) -> Result<GitCredential, CredentialError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(entry) = cached.as_ref() {
            if entry.expires_at - chrono::Duration::seconds(EXPIRY_MARGIN_SECS) > now {
                return Ok(GitCredential {
                    username: DEFAULT_USERNAME.to_string(),
                    token: entry.token.clone(),
                });
            }
        }

        let response = self.exchange().await?;
        let token = SecretString::from(response.token);
        match response.expires_at {
            Some(expires_at) => {
                *cached = Some(CachedToken {
                    token: token.clone(),
                    expires_at,
                })
            }
            None => *cached = None,
        }

        Ok(GitCredential {
            username: DEFAULT_USERNAME.to_string(),
            token,
        })
    }
}
