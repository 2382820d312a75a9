use crate::{
    config::ServerConfig,
    error::Error,
    github::{
        CommitMetrics, CommitOptions, DEFAULT_PAGE_SIZE, GatewayProvider, OwnerAggregator, PrStatus,
        PullRequestOptions, Repository, WorkflowOptions, WorkflowRun,
    },
    usage::{MetricsSnapshot, MetricsStore, ValidationError},
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    extract::{Query, Request, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};

const GITHUB_TOKEN_HEADER: &str = "x-github-token";

#[derive(Clone)]
pub struct ServerState {
    gateways: Arc<dyn GatewayProvider>,
    store: MetricsStore,
}

impl ServerState {
    pub fn new(gateways: Arc<dyn GatewayProvider>, store: MetricsStore) -> Self {
        Self { gateways, store }
    }

    fn aggregator(&self, headers: &HeaderMap) -> Result<OwnerAggregator, ApiError> {
        let token = extract_github_token(headers);
        let gateway = self.gateways.gateway(token.as_deref())?;
        Ok(OwnerAggregator::new(gateway))
    }
}

pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<Result<()>>,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics/prs", get(pull_requests))
        .route("/metrics/workflows", get(workflow_runs))
        .route("/metrics/commits", get(commits))
        .route("/metrics/claude", get(latest_usage).post(ingest_usage))
        .route("/metrics/claude/history", get(usage_history))
        .layer(middleware::from_fn(trace_request))
        .with_state(state)
}

pub async fn spawn(config: &ServerConfig, state: ServerState) -> Result<ServerHandle> {
    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("failed to parse listen_addr {:?}", config.listen_addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {addr}"))?;
    let local_addr = listener.local_addr().context("failed to read bound address")?;

    let app = router(state);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let join = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .map_err(|err| anyhow!(err))
    });

    tracing::info!(listen = %local_addr, "metrics server started");

    Ok(ServerHandle {
        local_addr,
        shutdown: Some(shutdown_tx),
        join,
    })
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let result = match self.join.await {
            Ok(result) => result,
            Err(err) => Err(anyhow!(err)),
        };
        tracing::info!(listen = %self.local_addr, "metrics server stopped");
        result
    }
}

/// Failures as seen by HTTP clients.
#[derive(Debug)]
enum ApiError {
    Core(Error),
    BadRequest(String),
    NotFound(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Core(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Core(Error::Validation(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Core(err) => {
                let status = match &err {
                    Error::InvalidRepository | Error::InvalidUser | Error::Validation(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    Error::MissingCredential => StatusCode::UNAUTHORIZED,
                    Error::Upstream(upstream) => {
                        tracing::error!(error = %upstream, "upstream request failed");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct MetricsQuery {
    user: Option<String>,
    owner: Option<String>,
    repo: Option<String>,
    state: Option<String>,
    branch: Option<String>,
    per_page: Option<String>,
    since: Option<String>,
    until: Option<String>,
}

/// Repository-scoped when `owner` or `repo` is given, user-scoped otherwise.
enum Target<'a> {
    Repository(Repository),
    User(&'a str),
}

impl MetricsQuery {
    fn target(&self) -> Target<'_> {
        if self.owner.is_some() || self.repo.is_some() {
            Target::Repository(Repository::new(
                self.owner.as_deref().unwrap_or_default().trim(),
                self.repo.as_deref().unwrap_or_default().trim(),
            ))
        } else {
            Target::User(self.user.as_deref().unwrap_or_default())
        }
    }

    fn per_page(&self) -> i64 {
        self.per_page
            .as_deref()
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(DEFAULT_PAGE_SIZE as i64)
    }

    fn commit_window(&self) -> Result<CommitOptions, ApiError> {
        Ok(CommitOptions {
            since: parse_time("since", self.since.as_deref())?,
            until: parse_time("until", self.until.as_deref())?,
        })
    }
}

fn parse_time(field: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|parsed| Some(parsed.with_timezone(&Utc)))
            .map_err(|err| ApiError::BadRequest(format!("invalid {field}: {err}"))),
    }
}

async fn trace_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;
    tracing::info!(%method, %path, status = response.status().as_u16(), "handled request");
    response
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn pull_requests(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<Vec<PrStatus>>, ApiError> {
    let aggregator = state.aggregator(&headers)?;
    let opts = PullRequestOptions {
        state: query.state.clone(),
        per_page: query.per_page(),
    };

    let statuses = match query.target() {
        Target::Repository(repo) => {
            aggregator
                .repositories()
                .pull_request_statuses(&repo, &opts)
                .await?
        }
        Target::User(user) => aggregator.user_pull_request_statuses(user, &opts).await?,
    };
    Ok(Json(statuses))
}

async fn workflow_runs(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<Vec<WorkflowRun>>, ApiError> {
    let aggregator = state.aggregator(&headers)?;
    let opts = WorkflowOptions {
        branch: query.branch.clone(),
        per_page: query.per_page(),
    };

    let runs = match query.target() {
        Target::Repository(repo) => aggregator.repositories().workflow_runs(&repo, &opts).await?,
        Target::User(user) => aggregator.user_workflow_runs(user, &opts).await?,
    };
    Ok(Json(runs))
}

async fn commits(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<CommitMetrics>, ApiError> {
    let window = query.commit_window()?;
    let aggregator = state.aggregator(&headers)?;

    let metrics = match query.target() {
        Target::Repository(repo) => aggregator.repositories().commit_count(&repo, &window).await?,
        Target::User(user) => aggregator.user_commit_count(user, &window).await?,
    };
    Ok(Json(metrics))
}

async fn latest_usage(State(state): State<ServerState>) -> Result<Json<MetricsSnapshot>, ApiError> {
    state
        .store
        .latest()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no usage metrics available".to_string()))
}

async fn usage_history(State(state): State<ServerState>) -> Json<Vec<MetricsSnapshot>> {
    Json(state.store.history())
}

async fn ingest_usage(
    State(state): State<ServerState>,
    payload: Result<Json<SnapshotPayload>, JsonRejection>,
) -> Result<Json<MetricsSnapshot>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        tracing::debug!(error = %rejection, "rejected usage payload");
        ApiError::BadRequest("invalid payload".to_string())
    })?;

    let snapshot = payload.into_snapshot()?;
    state.store.update(snapshot.clone())?;
    tracing::debug!(
        timestamp = %snapshot.timestamp,
        history = state.store.len(),
        "stored usage snapshot"
    );
    Ok(Json(snapshot))
}

/// Usage snapshot as posted by collectors: timestamps arrive as RFC 3339
/// strings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SnapshotPayload {
    timestamp: String,
    window_hours: f64,
    burn_rate_per_hour: f64,
    total_cost_usd: f64,
    input_tokens: i64,
    output_tokens: i64,
    cache_creation_tokens: i64,
    cache_read_tokens: i64,
    total_tokens: i64,
    session_count: i64,
    active_session_id: Option<String>,
    last_activity: String,
    source: Option<String>,
}

impl SnapshotPayload {
    fn into_snapshot(self) -> Result<MetricsSnapshot, ApiError> {
        let timestamp =
            parse_time("timestamp", Some(self.timestamp.as_str()))?.ok_or(ValidationError::MissingTimestamp)?;
        let last_activity = parse_time("last_activity", Some(self.last_activity.as_str()))?
            .ok_or(ValidationError::MissingLastActivity)?;

        Ok(MetricsSnapshot {
            timestamp,
            window_hours: self.window_hours,
            burn_rate_per_hour: self.burn_rate_per_hour,
            total_cost_usd: self.total_cost_usd,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cache_creation_tokens: self.cache_creation_tokens,
            cache_read_tokens: self.cache_read_tokens,
            total_tokens: self.total_tokens,
            session_count: self.session_count,
            active_session_id: trimmed(self.active_session_id),
            last_activity,
            source: trimmed(self.source),
        })
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Token from `Authorization: token|Bearer <t>`, else `X-GitHub-Token`.
fn extract_github_token(headers: &HeaderMap) -> Option<String> {
    let from_authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().split_once(' '))
        .filter(|(scheme, _)| {
            scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer")
        })
        .map(|(_, token)| token.trim());

    from_authorization
        .or_else(|| {
            headers
                .get(GITHUB_TOKEN_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
        })
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
