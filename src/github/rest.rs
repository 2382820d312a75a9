use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{
    Client, RequestBuilder, Response, Url,
    header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, LINK},
};
use serde::Deserialize;
use std::time::Duration;

use super::{
    CommitItem, CommitOptions, Gateway, GatewayError, Issue, Page, PullRequest, Repository,
    RepositoryItem, WorkflowRunItem,
};

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com/";
const API_VERSION: &str = "2022-11-28";
const LIST_PAGE_SIZE: u32 = 100;

/// GitHub REST v3 gateway authenticated with a personal access token.
#[derive(Clone)]
pub struct RestGateway {
    client: Client,
    base_url: Url,
    token: String,
}

#[derive(Deserialize)]
struct SearchResults<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize)]
struct WorkflowRunList {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRunItem>,
}

impl RestGateway {
    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let base_url = parse_base_url(base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

        let client = Client::builder()
            .user_agent(user_agent.to_string())
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            token: token.into(),
        })
    }

    /// A gateway sharing this one's connection pool and base URL but
    /// authenticating as someone else.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: token.into(),
        }
    }

    /// Request for the endpoint below the base URL. Each segment is
    /// percent-encoded as one literal path segment.
    fn get(&self, segments: &[&str]) -> Result<RequestBuilder, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| GatewayError::InvalidBaseUrl {
                url: self.base_url.to_string(),
                reason: "cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token)))
    }

    async fn send(request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn fetch_page<T>(request: RequestBuilder) -> Result<Page<T>, GatewayError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = Self::send(request).await?;
        let next_page = next_page(response.headers());
        let items = response.json::<Vec<T>>().await?;
        Ok(Page { items, next_page })
    }
}

#[async_trait]
impl Gateway for RestGateway {
    async fn list_pull_requests(
        &self,
        repo: &Repository,
        state: Option<&str>,
        per_page: u32,
    ) -> Result<Page<PullRequest>, GatewayError> {
        let mut query = vec![
            ("sort", "updated".to_string()),
            ("direction", "desc".to_string()),
            ("per_page", per_page.to_string()),
        ];
        if let Some(state) = state {
            query.push(("state", state.to_string()));
        }
        let request = self
            .get(&["repos", repo.owner.as_str(), repo.name.as_str(), "pulls"])?
            .query(&query);
        Self::fetch_page(request).await
    }

    async fn search_issues(&self, query: &str, per_page: u32) -> Result<Vec<Issue>, GatewayError> {
        let request = self.get(&["search", "issues"])?.query(&[
            ("q", query.to_string()),
            ("sort", "updated".to_string()),
            ("order", "desc".to_string()),
            ("per_page", per_page.to_string()),
        ]);
        let results = Self::send(request).await?.json::<SearchResults<Issue>>().await?;
        Ok(results.items)
    }

    async fn list_workflow_runs(
        &self,
        repo: &Repository,
        branch: Option<&str>,
        per_page: u32,
    ) -> Result<Page<WorkflowRunItem>, GatewayError> {
        let mut query = vec![("per_page", per_page.to_string())];
        if let Some(branch) = branch {
            query.push(("branch", branch.to_string()));
        }
        let request = self
            .get(&["repos", repo.owner.as_str(), repo.name.as_str(), "actions", "runs"])?
            .query(&query);
        let response = Self::send(request).await?;
        let next_page = next_page(response.headers());
        let list = response.json::<WorkflowRunList>().await?;
        Ok(Page {
            items: list.workflow_runs,
            next_page,
        })
    }

    async fn list_repositories_for_user(
        &self,
        user: &str,
        per_page: u32,
        page: u32,
    ) -> Result<Page<RepositoryItem>, GatewayError> {
        let request = self.get(&["users", user, "repos"])?.query(&[
            ("type", "owner".to_string()),
            ("sort", "pushed".to_string()),
            ("direction", "desc".to_string()),
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ]);
        Self::fetch_page(request).await
    }

    async fn list_commits(
        &self,
        repo: &Repository,
        window: &CommitOptions,
        page: u32,
    ) -> Result<Page<CommitItem>, GatewayError> {
        let mut query = vec![
            ("per_page", LIST_PAGE_SIZE.to_string()),
            ("page", page.to_string()),
        ];
        if let Some(since) = window.since {
            query.push(("since", since.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        if let Some(until) = window.until {
            query.push(("until", until.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        let request = self
            .get(&["repos", repo.owner.as_str(), repo.name.as_str(), "commits"])?
            .query(&query);
        Self::fetch_page(request).await
    }

    async fn search_commits(&self, query: &str, page: u32) -> Result<Page<CommitItem>, GatewayError> {
        let request = self.get(&["search", "commits"])?.query(&[
            ("q", query.to_string()),
            ("sort", "committer-date".to_string()),
            ("order", "desc".to_string()),
            ("per_page", LIST_PAGE_SIZE.to_string()),
            ("page", page.to_string()),
        ]);
        let response = Self::send(request).await?;
        let next_page = next_page(response.headers());
        let results = response.json::<SearchResults<CommitItem>>().await?;
        Ok(Page {
            items: results.items,
            next_page,
        })
    }
}

/// Parses `raw` into a hierarchical base URL with a trailing slash.
fn parse_base_url(raw: &str) -> Result<Url, GatewayError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::InvalidBaseUrl {
            url: raw.to_string(),
            reason: "empty url".to_string(),
        });
    }
    let mut normalized = trimmed.to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    let url = Url::parse(&normalized).map_err(|err| GatewayError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(GatewayError::InvalidBaseUrl {
            url: raw.to_string(),
            reason: "cannot be a base".to_string(),
        });
    }
    Ok(url)
}

/// Page number of the `rel="next"` entry in a `Link` header.
fn next_page(headers: &HeaderMap) -> Option<u32> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| param.trim() == r#"rel="next""#);
        if !is_next {
            return None;
        }
        let url = Url::parse(target.trim_start_matches('<').trim_end_matches('>')).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == "page")
            .and_then(|(_, value)| value.parse().ok())
    })
}
