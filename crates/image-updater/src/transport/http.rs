//! HTTP listener: health check and synchronous event submission.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::event::PushEvent;
use crate::routing::RuleSet;
use crate::updater::Updater;

#[derive(Clone)]
struct AppState {
    updater: Arc<Updater>,
    rules: Arc<RuleSet>,
}

/// Builds the router. Rules are shared with every request, never reloaded.
pub fn router(updater: Arc<Updater>, rules: Arc<RuleSet>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/kustomization", post(submit_event))
        .with_state(AppState { updater, rules })
}

/// Serves `router` on `listener` until `shutdown` resolves, then drains
/// in-flight requests.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn healthz() -> &'static str {
    "status ok"
}

async fn submit_event(State(state): State<AppState>, body: Bytes) -> Response {
    let event = match PushEvent::from_json(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Rejected malformed event: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid event: {}", e) })),
            )
                .into_response();
        }
    };

    // Run detached so a client disconnect does not abort a half-finished push.
    let handle = tokio::spawn(async move { state.updater.apply(&state.rules, &event).await });
    let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Update task failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "update task failed" })),
            )
                .into_response();
        }
    };

    let status = if outcome.is_failure() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(outcome.report())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_rules_from_str, UpdaterSettings};
    use crate::credentials::StaticTokenProvider;
    use crate::secrets::SecretSource;
    use std::net::SocketAddr;
    use tokio::sync::oneshot;

    const RULES: &str = r#"
- allowImageTag: "regexp:^v"
  registryURI: "$1/$2"
  gitHubRepository: "org"
  region: ap-northeast-1
  env:
    "123456789012": dev
"#;

    struct TestServer {
        addr: SocketAddr,
        client: reqwest::Client,
        _shutdown: oneshot::Sender<()>,
    }

    impl TestServer {
        async fn start() -> Self {
            let provider = StaticTokenProvider::new("x-access-token", SecretSource::default());
            let updater = Arc::new(Updater::new(UpdaterSettings::default(), Arc::new(provider)));
            let rules = Arc::new(load_rules_from_str(RULES).unwrap());

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (tx, rx) = oneshot::channel::<()>();
            tokio::spawn(serve(listener, router(updater, rules), async {
                let _ = rx.await;
            }));

            Self {
                addr,
                client: reqwest::Client::builder().no_proxy().build().unwrap(),
                _shutdown: tx,
            }
        }

        fn url(&self, path: &str) -> String {
            format!("http://{}{}", self.addr, path)
        }

        async fn post(&self, body: String) -> (reqwest::StatusCode, serde_json::Value) {
            let response = self
                .client
                .post(self.url("/kustomization"))
                .header("content-type", "application/json")
                .body(body)
                .send()
                .await
                .unwrap();
            let status = response.status();
            (status, response.json().await.unwrap())
        }
    }

    fn event_body(repository: &str, tag: &str) -> String {
        json!({
            "account": "123456789012",
            "region": "ap-northeast-1",
            "detail": {
                "action-type": "PUSH",
                "image-tag": tag,
                "repository-name": repository,
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_healthz() {
        let server = TestServer::start().await;
        let response = server.client.get(server.url("/healthz")).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "status ok");
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = TestServer::start().await;
        let (status, body) = server.post("{not json".to_string()).await;
        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("invalid event"));
    }

    #[tokio::test]
    async fn test_benign_outcomes_are_ok() {
        let server = TestServer::start().await;
        let (status, body) = server.post(event_body("a/b/c", "v1")).await;
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(body["outcome"], "no_rule_match");
        assert_eq!(body["disposition"], "ack");

        let (status, body) = server.post(event_body("a/b", "latest")).await;
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(body["outcome"], "tag_not_allowed");
    }

    #[tokio::test]
    async fn test_failure_is_server_error() {
        let server = TestServer::start().await;
        // "org" names no repository, a configuration failure.
        let (status, body) = server.post(event_body("a/b", "v1")).await;
        assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["outcome"], "failed");
        assert_eq!(body["disposition"], "deadLetter");
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_wrong_method() {
        let server = TestServer::start().await;
        let response = server
            .client
            .get(server.url("/kustomization"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
    }
}
