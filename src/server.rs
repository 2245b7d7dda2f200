//! HTTP surface for webhook deliveries
//!
//! # Routes
//!
//! - `POST /webhook/a` - GitHub `issues` / `issue_comment` deliveries
//! - `POST /webhook/b` - Jira issue and comment deliveries
//! - `GET /health` - liveness with version and timestamp
//! - `GET /` - plain OK
//!
//! Every webhook answer is `{"outcome", "detail", "report"}` with the status
//! code of the [`Outcome`]. Deliveries that carry a sender delivery id are
//! recorded once accepted; a redelivered id is answered `202` without
//! reprocessing.

use crate::store::MappingStore;
use crate::sync::{GitHubRouter, JiraRouter, Outcome, SyncContext};
use crate::webhook::{GitHubEvent, JiraEvent};
use crate::{Result, SyncError};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

const GITHUB_EVENT_HEADER: &str = "x-github-event";
const GITHUB_DELIVERY_HEADER: &str = "x-github-delivery";
const JIRA_DELIVERY_HEADER: &str = "x-atlassian-webhook-identifier";

/// Shared server state
struct AppState {
    github: GitHubRouter,
    jira: JiraRouter,
    store: Arc<MappingStore>,
}

/// Webhook server
pub struct SyncServer {
    state: Arc<AppState>,
    max_body_size: usize,
}

impl SyncServer {
    pub fn new(ctx: Arc<SyncContext>, max_body_size: usize) -> Self {
        Self {
            state: Arc::new(AppState {
                github: GitHubRouter::new(ctx.clone()),
                jira: JiraRouter::new(ctx.clone()),
                store: ctx.store.clone(),
            }),
            max_body_size,
        }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(root))
            .route("/health", get(health))
            .route("/webhook/a", post(github_webhook))
            .route("/webhook/b", post(jira_webhook))
            .layer(DefaultBodyLimit::max(self.max_body_size))
            .with_state(self.state.clone())
    }

    /// Run the server on the given address
    pub async fn run(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SyncError::Network(format!("Failed to bind {}: {}", addr, e)))?;

        info!(
            addr = addr,
            max_body_size = self.max_body_size,
            "Webhook server listening"
        );

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        let body = json!({
            "outcome": self.label(),
            "detail": self.detail(),
            "report": self.report(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

async fn root() -> &'static str {
    "OK"
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn github_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delivery = header(&headers, GITHUB_DELIVERY_HEADER);
    if let Some(response) = redelivery(&state.store, delivery) {
        return response;
    }

    let event = match GitHubEvent::parse(header(&headers, GITHUB_EVENT_HEADER), &body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Rejected GitHub delivery");
            return Outcome::BadRequest(e.to_string()).into_response();
        }
    };

    let outcome = state.github.handle(event).await;
    remember(&state.store, delivery, "github", &outcome);
    outcome.into_response()
}

async fn jira_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delivery = header(&headers, JIRA_DELIVERY_HEADER);
    if let Some(response) = redelivery(&state.store, delivery) {
        return response;
    }

    let event = match JiraEvent::parse(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Rejected Jira delivery");
            return Outcome::BadRequest(e.to_string()).into_response();
        }
    };

    let outcome = state.jira.handle(event).await;
    remember(&state.store, delivery, "jira", &outcome);
    outcome.into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Response for a delivery id that was already handled
fn redelivery(store: &MappingStore, delivery: Option<&str>) -> Option<Response> {
    let id = delivery?;
    match store.is_delivery_processed(id) {
        Ok(true) => {
            debug!(delivery = id, "Skipping redelivered webhook");
            Some(
                (
                    StatusCode::ACCEPTED,
                    Json(json!({
                        "outcome": "no-op",
                        "detail": format!("delivery {} was already processed", id),
                        "report": null,
                    })),
                )
                    .into_response(),
            )
        }
        Ok(false) => None,
        Err(e) => {
            warn!(delivery = id, error = %e, "Delivery lookup failed");
            Some(Outcome::from_error(&e).into_response())
        }
    }
}

fn remember(store: &MappingStore, delivery: Option<&str>, source: &str, outcome: &Outcome) {
    let Some(id) = delivery else {
        return;
    };
    if !outcome.is_accepted() {
        return;
    }
    if let Err(e) = store.mark_delivery_processed(id, source) {
        warn!(delivery = id, error = %e, "Failed to record delivery");
    }
}
