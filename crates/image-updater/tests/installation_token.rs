//! GitHub App installation token exchange against a mock API.

use std::path::PathBuf;

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use image_updater::credentials::{
    AppKey, CredentialError, CredentialProvider, InstallationTokenProvider,
};
use image_updater::secrets::SecretSource;

const APP_ID: u64 = 1701;
const INSTALLATION: u64 = 4242;
const TOKEN_PATH: &str = "/app/installations/4242/access_tokens";

#[derive(Debug, Deserialize)]
struct Claims {
    iss: String,
    iat: i64,
    exp: i64,
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn app_key() -> AppKey {
    AppKey::new(APP_ID, SecretSource::from_file(fixture("app-key.pem")))
}

#[tokio::test]
async fn test_token_is_exchanged_and_cached() {
    let server = MockServer::start().await;
    let expires_at = Utc::now() + Duration::hours(1);
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(header("accept", "application/vnd.github+json"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "token": "ghs_installation",
            "expires_at": expires_at.to_rfc3339(),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = InstallationTokenProvider::new(server.uri(), INSTALLATION, app_key()).unwrap();

    let first = provider.credential().await.unwrap();
    assert_eq!(first.username, "x-access-token");
    assert_eq!(first.token.expose_secret(), "ghs_installation");

    let second = provider.credential().await.unwrap();
    assert_eq!(second.token.expose_secret(), "ghs_installation");

    let requests = server.received_requests().await.unwrap();
    let bearer = requests[0]
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap()
        .to_string();

    let public_key = std::fs::read(fixture("app-key.pub.pem")).unwrap();
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&[APP_ID.to_string()]);
    let claims = jsonwebtoken::decode::<Claims>(
        &bearer,
        &DecodingKey::from_rsa_pem(&public_key).unwrap(),
        &validation,
    )
    .unwrap()
    .claims;
    assert_eq!(claims.iss, "1701");
    assert_eq!(claims.exp - claims.iat, 600);
}

#[tokio::test]
async fn test_token_near_expiry_is_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "token": "ghs_short_lived",
            "expires_at": (Utc::now() + Duration::seconds(30)).to_rfc3339(),
        })))
        .expect(2)
        .mount(&server)
        .await;

    let provider = InstallationTokenProvider::new(server.uri(), INSTALLATION, app_key()).unwrap();

    provider.credential().await.unwrap();
    provider.credential().await.unwrap();
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("Bad credentials"))
        .mount(&server)
        .await;

    let provider = InstallationTokenProvider::new(server.uri(), INSTALLATION, app_key()).unwrap();

    match provider.credential().await {
        Err(CredentialError::Status { status, body }) => {
            assert_eq!(status, 401);
            assert_eq!(body, "Bad credentials");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_key_file_fails_before_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let provider = InstallationTokenProvider::new(
        server.uri(),
        INSTALLATION,
        AppKey::new(APP_ID, SecretSource::from_file("/nonexistent/app-key.pem")),
    )
    .unwrap();

    assert!(matches!(
        provider.credential().await,
        Err(CredentialError::Secret(_))
    ));
}
