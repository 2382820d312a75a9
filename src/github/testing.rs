//! In-memory gateway used by the aggregator and server tests. Every call is
//! recorded as a short line so tests can assert exactly which upstream
//! requests were made.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::{collections::HashMap, sync::Mutex};

use super::{
    CommitItem, CommitOptions, Gateway, GatewayError, Issue, Page, PullRequest, Repository,
    RepositoryItem, WorkflowRunItem,
    gateway::{Account, CommitDetail, CommitIdentity},
};

#[derive(Default)]
pub(crate) struct FakeGateway {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    pull_requests: Vec<PullRequest>,
    issues: Vec<Issue>,
    runs: HashMap<String, Vec<WorkflowRunItem>>,
    repo_pages: Vec<Vec<RepositoryItem>>,
    commit_pages: Vec<Vec<CommitItem>>,
    failing_commit_page: Option<u32>,
    failing_repository_page: Option<u32>,
    failing_runs: Option<String>,
    stuck_next_page: Option<u32>,
}

impl FakeGateway {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn set_pull_requests(&self, prs: Vec<PullRequest>) {
        self.state.lock().unwrap().pull_requests = prs;
    }

    pub(crate) fn set_issues(&self, issues: Vec<Issue>) {
        self.state.lock().unwrap().issues = issues;
    }

    /// Registers runs for `full_name` (`owner/name`), newest first.
    pub(crate) fn add_runs(&self, full_name: &str, runs: Vec<WorkflowRunItem>) {
        self.state
            .lock()
            .unwrap()
            .runs
            .insert(full_name.to_string(), runs);
    }

    pub(crate) fn set_repository_pages(&self, pages: Vec<Vec<RepositoryItem>>) {
        self.state.lock().unwrap().repo_pages = pages;
    }

    pub(crate) fn set_commit_pages(&self, pages: Vec<Vec<CommitItem>>) {
        self.state.lock().unwrap().commit_pages = pages;
    }

    pub(crate) fn fail_commit_page(&self, page: u32) {
        self.state.lock().unwrap().failing_commit_page = Some(page);
    }

    pub(crate) fn fail_repository_page(&self, page: u32) {
        self.state.lock().unwrap().failing_repository_page = Some(page);
    }

    pub(crate) fn fail_runs_for(&self, full_name: &str) {
        self.state.lock().unwrap().failing_runs = Some(full_name.to_string());
    }

    /// Every repository and commit page then claims `page` comes next.
    pub(crate) fn stick_next_page_at(&self, page: u32) {
        self.state.lock().unwrap().stuck_next_page = Some(page);
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn commit_page(&self, page: u32) -> Result<Page<CommitItem>, GatewayError> {
        let state = self.state.lock().unwrap();
        if state.failing_commit_page == Some(page) {
            return Err(bad_gateway());
        }
        Ok(state.paged(&state.commit_pages, page))
    }
}

impl FakeState {
    fn paged<T: Clone>(&self, pages: &[Vec<T>], page: u32) -> Page<T> {
        let index = page.saturating_sub(1) as usize;
        let items = pages.get(index).cloned().unwrap_or_default();
        let next_page = self
            .stuck_next_page
            .or_else(|| (index + 1 < pages.len()).then_some(page + 1));
        Page { items, next_page }
    }
}

fn bad_gateway() -> GatewayError {
    GatewayError::Status {
        status: 502,
        body: "bad gateway".to_string(),
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn list_pull_requests(
        &self,
        repo: &Repository,
        state: Option<&str>,
        per_page: u32,
    ) -> Result<Page<PullRequest>, GatewayError> {
        self.record(format!(
            "pulls {}/{} state={} per_page={per_page}",
            repo.owner,
            repo.name,
            state.unwrap_or("-")
        ));
        let prs = self.state.lock().unwrap().pull_requests.clone();
        Ok(Page {
            items: prs.into_iter().take(per_page as usize).collect(),
            next_page: None,
        })
    }

    async fn search_issues(&self, query: &str, per_page: u32) -> Result<Vec<Issue>, GatewayError> {
        self.record(format!("search issues q={query} per_page={per_page}"));
        let issues = self.state.lock().unwrap().issues.clone();
        Ok(issues.into_iter().take(per_page as usize).collect())
    }

    async fn list_workflow_runs(
        &self,
        repo: &Repository,
        branch: Option<&str>,
        per_page: u32,
    ) -> Result<Page<WorkflowRunItem>, GatewayError> {
        let full_name = format!("{}/{}", repo.owner, repo.name);
        self.record(format!(
            "runs {full_name} branch={} per_page={per_page}",
            branch.unwrap_or("-")
        ));
        let state = self.state.lock().unwrap();
        if state.failing_runs.as_deref() == Some(full_name.as_str()) {
            return Err(bad_gateway());
        }
        let runs = state.runs.get(&full_name).cloned().unwrap_or_default();
        let has_more = runs.len() > per_page as usize;
        Ok(Page {
            items: runs.into_iter().take(per_page as usize).collect(),
            next_page: has_more.then_some(2),
        })
    }

    async fn list_repositories_for_user(
        &self,
        user: &str,
        per_page: u32,
        page: u32,
    ) -> Result<Page<RepositoryItem>, GatewayError> {
        self.record(format!("repos {user} per_page={per_page} page={page}"));
        let state = self.state.lock().unwrap();
        if state.failing_repository_page == Some(page) {
            return Err(bad_gateway());
        }
        Ok(state.paged(&state.repo_pages, page))
    }

    async fn list_commits(
        &self,
        repo: &Repository,
        _window: &CommitOptions,
        page: u32,
    ) -> Result<Page<CommitItem>, GatewayError> {
        self.record(format!("commits {}/{} page={page}", repo.owner, repo.name));
        self.commit_page(page)
    }

    async fn search_commits(&self, query: &str, page: u32) -> Result<Page<CommitItem>, GatewayError> {
        self.record(format!("search commits q={query} page={page}"));
        self.commit_page(page)
    }
}

pub(crate) fn pull_request(number: u64, author: &str) -> PullRequest {
    PullRequest {
        number,
        title: format!("PR #{number}"),
        state: "open".to_string(),
        html_url: format!("https://github.com/octo/repo/pull/{number}"),
        updated_at: Utc.timestamp_opt(1_700_000_000 + number as i64, 0).unwrap(),
        user: Some(Account {
            login: author.to_string(),
        }),
        merged: None,
        merged_at: None,
    }
}

pub(crate) fn issue(number: u64, author: &str) -> Issue {
    Issue {
        number,
        title: format!("Issue #{number}"),
        state: "closed".to_string(),
        html_url: format!("https://github.com/octo/repo/pull/{number}"),
        updated_at: Utc.timestamp_opt(1_700_000_000 + number as i64, 0).unwrap(),
        user: Some(Account {
            login: author.to_string(),
        }),
    }
}

pub(crate) fn run_item(id: i64) -> WorkflowRunItem {
    let at = Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap();
    WorkflowRunItem {
        id,
        name: Some("CI".to_string()),
        status: Some("completed".to_string()),
        conclusion: Some("success".to_string()),
        html_url: format!("https://github.com/octo/repo/actions/runs/{id}"),
        created_at: at,
        updated_at: at,
    }
}

pub(crate) fn repository(name: &str, owner: Option<&str>) -> RepositoryItem {
    RepositoryItem {
        name: name.to_string(),
        owner: owner.map(|login| Account {
            login: login.to_string(),
        }),
    }
}

pub(crate) fn commit(login: Option<&str>, name: Option<&str>) -> CommitItem {
    CommitItem {
        author: login.map(|login| Account {
            login: login.to_string(),
        }),
        commit: Some(CommitDetail {
            author: Some(CommitIdentity {
                name: name.map(str::to_string),
            }),
        }),
    }
}
