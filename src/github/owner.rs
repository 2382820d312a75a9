use chrono::SecondsFormat;
use std::sync::Arc;

use super::{
    CommitMetrics, CommitOptions, Gateway, PrStatus, PullRequestOptions, Repository,
    RepositoryAggregator, WorkflowOptions, WorkflowRun, advance, is_path_name,
};
use crate::error::{Error, Result};

const REPOSITORY_PAGE_SIZE: u32 = 50;

/// Queries spanning every repository a user owns. `per_page` is a budget for
/// the whole result, not for each repository.
#[derive(Clone)]
pub struct OwnerAggregator {
    repositories: RepositoryAggregator,
}

impl OwnerAggregator {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            repositories: RepositoryAggregator::new(gateway),
        }
    }

    /// The repository-scoped aggregator sharing this aggregator's gateway.
    pub fn repositories(&self) -> &RepositoryAggregator {
        &self.repositories
    }

    fn gateway(&self) -> &dyn Gateway {
        self.repositories.gateway()
    }

    /// Pull requests authored by `user`, via a single issue search.
    ///
    /// Search results carry no merge timestamp, so for a `merged` state every
    /// item is reported as merged with `merged_at` left unset. This is a known,
    /// accepted approximation.
    pub async fn user_pull_request_statuses(
        &self,
        user: &str,
        opts: &PullRequestOptions,
    ) -> Result<Vec<PrStatus>> {
        let user = validate_user(user)?;
        let per_page = opts.page_size();

        let query = pull_request_query(user, opts.state.as_deref());
        let merged_only = query.contains("is:merged");

        let issues = self.gateway().search_issues(&query, per_page).await?;
        tracing::debug!(%query, count = issues.len(), "searched pull requests");

        Ok(issues
            .into_iter()
            .map(|issue| PrStatus {
                number: issue.number,
                title: issue.title,
                state: issue.state,
                url: issue.html_url,
                updated_at: issue.updated_at,
                author: issue.user.map(|user| user.login).unwrap_or_default(),
                merged: merged_only,
                merged_at: None,
            })
            .collect())
    }

    /// Workflow runs across the user's repositories, visited in push-recency
    /// order, until the budget is spent or the repositories run out.
    pub async fn user_workflow_runs(
        &self,
        user: &str,
        opts: &WorkflowOptions,
    ) -> Result<Vec<WorkflowRun>> {
        let user = validate_user(user)?;
        let mut remaining = opts.page_size() as usize;

        let mut runs = Vec::with_capacity(remaining);
        let mut page_number = 1;
        'pages: loop {
            let page = self
                .gateway()
                .list_repositories_for_user(user, REPOSITORY_PAGE_SIZE, page_number)
                .await?;
            tracing::debug!(user, page = page_number, repositories = page.items.len(), "listed owned repositories");

            for item in page.items {
                if remaining == 0 {
                    break 'pages;
                }

                let owner = item
                    .owner
                    .map(|account| account.login)
                    .filter(|login| !login.is_empty())
                    .unwrap_or_else(|| user.to_string());
                let repo = Repository::new(owner, item.name);

                let mut repo_runs = self
                    .repositories
                    .workflow_runs(
                        &repo,
                        &WorkflowOptions {
                            branch: opts.branch.clone(),
                            per_page: remaining as i64,
                        },
                    )
                    .await?;
                repo_runs.truncate(remaining);
                remaining -= repo_runs.len();
                runs.extend(repo_runs);
            }

            if remaining == 0 {
                break;
            }
            match advance(page_number, page.next_page) {
                Some(next) => page_number = next,
                None => break,
            }
        }

        Ok(runs)
    }

    /// Commits authored by `user` across all repositories, via commit search.
    /// Every result page is walked.
    pub async fn user_commit_count(&self, user: &str, opts: &CommitOptions) -> Result<CommitMetrics> {
        let user = validate_user(user)?;
        let query = commit_query(user, opts);

        let mut metrics = CommitMetrics::empty(opts);
        let mut page_number = 1;
        loop {
            let page = self.gateway().search_commits(&query, page_number).await?;
            metrics.record(&page.items);
            tracing::debug!(%query, page = page_number, commits = page.items.len(), "counted commit search page");

            match advance(page_number, page.next_page) {
                Some(next) => page_number = next,
                None => break,
            }
        }

        Ok(metrics)
    }
}

fn validate_user(user: &str) -> Result<&str> {
    let user = user.trim();
    if !is_path_name(user) {
        return Err(Error::InvalidUser);
    }
    Ok(user)
}

fn pull_request_query(user: &str, state: Option<&str>) -> String {
    let mut query = vec!["type:pr".to_string(), format!("author:{user}")];
    let clause = match state.map(|state| state.trim().to_ascii_lowercase()).as_deref() {
        Some("open") => Some("is:open"),
        Some("closed") => Some("is:closed"),
        Some("merged") => Some("is:merged"),
        _ => None,
    };
    if let Some(clause) = clause {
        query.push(clause.to_string());
    }
    query.join(" ")
}

/// Commit search rejects separate `>=`/`<=` filters when both bounds are
/// present, so a closed window uses the day-granularity range syntax.
fn commit_query(user: &str, window: &CommitOptions) -> String {
    let mut query = format!("author:{user}");
    match (window.since, window.until) {
        (Some(since), Some(until)) => {
            query.push_str(&format!(
                " committer-date:{}..{}",
                since.format("%Y-%m-%d"),
                until.format("%Y-%m-%d")
            ));
        }
        (Some(since), None) => {
            query.push_str(&format!(
                " committer-date:>={}",
                since.to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
        }
        (None, Some(until)) => {
            query.push_str(&format!(
                " committer-date:<={}",
                until.to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
        }
        (None, None) => {}
    }
    query
}
