//! Capability surface over the hosting API's paginated list and search
//! endpoints, plus the upstream payload shapes the aggregators consume.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use super::{CommitOptions, Repository};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("github request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("github API error: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("invalid github base url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

/// One page of upstream results and the page number to request next, if any.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page: Option<u32>,
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Lists pull requests sorted by last update, newest first.
    async fn list_pull_requests(
        &self,
        repo: &Repository,
        state: Option<&str>,
        per_page: u32,
    ) -> Result<Page<PullRequest>, GatewayError>;

    /// Runs an issue search sorted by last update; only the first page is
    /// returned.
    async fn search_issues(&self, query: &str, per_page: u32) -> Result<Vec<Issue>, GatewayError>;

    async fn list_workflow_runs(
        &self,
        repo: &Repository,
        branch: Option<&str>,
        per_page: u32,
    ) -> Result<Page<WorkflowRunItem>, GatewayError>;

    /// Lists repositories owned by `user`, most recently pushed first.
    async fn list_repositories_for_user(
        &self,
        user: &str,
        per_page: u32,
        page: u32,
    ) -> Result<Page<RepositoryItem>, GatewayError>;

    async fn list_commits(
        &self,
        repo: &Repository,
        window: &CommitOptions,
        page: u32,
    ) -> Result<Page<CommitItem>, GatewayError>;

    async fn search_commits(&self, query: &str, page: u32) -> Result<Page<CommitItem>, GatewayError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub html_url: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub user: Option<Account>,
    #[serde(default)]
    pub merged: Option<bool>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub html_url: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub user: Option<Account>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRunItem {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryItem {
    pub name: String,
    #[serde(default)]
    pub owner: Option<Account>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitItem {
    /// Account linked to the commit author, when the hosting service could
    /// resolve one.
    #[serde(default)]
    pub author: Option<Account>,
    #[serde(default)]
    pub commit: Option<CommitDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitDetail {
    #[serde(default)]
    pub author: Option<CommitIdentity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitIdentity {
    #[serde(default)]
    pub name: Option<String>,
}

impl CommitItem {
    /// Login handle, then free-text author name, then `"unknown"`.
    pub fn author_key(&self) -> &str {
        if let Some(login) = self
            .author
            .as_ref()
            .map(|account| account.login.as_str())
            .filter(|login| !login.is_empty())
        {
            return login;
        }
        self.commit
            .as_ref()
            .and_then(|detail| detail.author.as_ref())
            .and_then(|identity| identity.name.as_deref())
            .filter(|name| !name.is_empty())
            .unwrap_or("unknown")
    }
}
