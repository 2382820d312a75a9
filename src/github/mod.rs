mod gateway;
mod owner;
mod provider;
mod repository;
mod rest;
#[cfg(test)]
pub(crate) mod testing;

pub use gateway::{
    CommitItem, Gateway, GatewayError, Issue, Page, PullRequest, RepositoryItem, WorkflowRunItem,
};
pub use owner::OwnerAggregator;
pub use provider::{GatewayProvider, RestGatewayProvider};
pub use repository::RepositoryAggregator;
pub use rest::{DEFAULT_API_BASE_URL, RestGateway};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::error::{Error, Result};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Identifies a repository by owner and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl Repository {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !is_path_name(&self.owner) || !is_path_name(&self.name) {
            return Err(Error::InvalidRepository);
        }
        Ok(())
    }
}

/// Pull request summary as served to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrStatus {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub url: String,
    pub updated_at: DateTime<Utc>,
    pub author: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub merged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: i64,
    pub name: String,
    pub status: String,
    /// Empty while the run is still in progress.
    pub conclusion: String,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WorkflowRunItem> for WorkflowRun {
    fn from(run: WorkflowRunItem) -> Self {
        Self {
            id: run.id,
            name: run.name.unwrap_or_default(),
            status: run.status.unwrap_or_default(),
            conclusion: run.conclusion.unwrap_or_default(),
            html_url: run.html_url,
            created_at: run.created_at,
            updated_at: run.updated_at,
        }
    }
}

/// Commit activity over a time window. `total` always equals the sum of
/// `by_author`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitMetrics {
    pub total: u64,
    pub by_author: HashMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

impl CommitMetrics {
    fn empty(window: &CommitOptions) -> Self {
        Self {
            total: 0,
            by_author: HashMap::new(),
            since: window.since,
            until: window.until,
        }
    }

    fn record(&mut self, commits: &[CommitItem]) {
        for commit in commits {
            *self.by_author.entry(commit.author_key().to_string()).or_insert(0) += 1;
            self.total += 1;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PullRequestOptions {
    pub state: Option<String>,
    pub per_page: i64,
}

impl PullRequestOptions {
    pub fn page_size(&self) -> u32 {
        normalize_page_size(self.per_page)
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowOptions {
    pub branch: Option<String>,
    pub per_page: i64,
}

impl WorkflowOptions {
    pub fn page_size(&self) -> u32 {
        normalize_page_size(self.per_page)
    }
}

/// Time window for commit aggregation; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOptions {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Requested sizes outside `(0, MAX_PAGE_SIZE]` fall back to the default.
pub fn normalize_page_size(requested: i64) -> u32 {
    match u32::try_from(requested) {
        Ok(size) if size > 0 && size <= MAX_PAGE_SIZE => size,
        _ => DEFAULT_PAGE_SIZE,
    }
}

/// Page to request after `current`. A continuation that does not move
/// forward ends the walk.
fn advance(current: u32, next: Option<u32>) -> Option<u32> {
    match next {
        Some(next) if next > current => Some(next),
        Some(next) => {
            tracing::warn!(current, next, "upstream pagination did not advance; stopping");
            None
        }
        None => None,
    }
}

/// Non-empty and not a dot segment.
fn is_path_name(value: &str) -> bool {
    !matches!(value, "" | "." | "..")
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
