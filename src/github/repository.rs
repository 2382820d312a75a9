use std::sync::Arc;

use super::{
    CommitMetrics, CommitOptions, Gateway, PrStatus, PullRequestOptions, Repository, WorkflowOptions,
    WorkflowRun, advance, non_blank,
};
use crate::error::Result;

/// Pull request, workflow and commit queries scoped to one repository.
#[derive(Clone)]
pub struct RepositoryAggregator {
    gateway: Arc<dyn Gateway>,
}

impl RepositoryAggregator {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    pub(crate) fn gateway(&self) -> &dyn Gateway {
        self.gateway.as_ref()
    }

    /// Most recently updated pull requests, first page only.
    pub async fn pull_request_statuses(
        &self,
        repo: &Repository,
        opts: &PullRequestOptions,
    ) -> Result<Vec<PrStatus>> {
        repo.validate()?;
        let per_page = opts.page_size();

        let page = self
            .gateway
            .list_pull_requests(repo, non_blank(opts.state.as_deref()), per_page)
            .await?;
        tracing::debug!(owner = %repo.owner, repo = %repo.name, count = page.items.len(), "listed pull requests");

        Ok(page
            .items
            .into_iter()
            .map(|pr| PrStatus {
                number: pr.number,
                title: pr.title,
                state: pr.state,
                url: pr.html_url,
                updated_at: pr.updated_at,
                author: pr.user.map(|user| user.login).unwrap_or_default(),
                merged: pr.merged.unwrap_or(false) || pr.merged_at.is_some(),
                merged_at: pr.merged_at,
            })
            .collect())
    }

    /// Most recent workflow runs, optionally restricted to one branch.
    pub async fn workflow_runs(
        &self,
        repo: &Repository,
        opts: &WorkflowOptions,
    ) -> Result<Vec<WorkflowRun>> {
        repo.validate()?;
        let per_page = opts.page_size();

        let page = self
            .gateway
            .list_workflow_runs(repo, non_blank(opts.branch.as_deref()), per_page)
            .await?;
        tracing::debug!(owner = %repo.owner, repo = %repo.name, count = page.items.len(), "listed workflow runs");

        Ok(page.items.into_iter().map(WorkflowRun::from).collect())
    }

    /// Counts every commit in the window. All pages are walked; the count is
    /// never budget-limited.
    pub async fn commit_count(
        &self,
        repo: &Repository,
        opts: &CommitOptions,
    ) -> Result<CommitMetrics> {
        repo.validate()?;

        let mut metrics = CommitMetrics::empty(opts);
        let mut page_number = 1;
        loop {
            let page = self.gateway.list_commits(repo, opts, page_number).await?;
            metrics.record(&page.items);
            tracing::debug!(
                owner = %repo.owner,
                repo = %repo.name,
                page = page_number,
                commits = page.items.len(),
                "counted commit page"
            );

            match advance(page_number, page.next_page) {
                Some(next) => page_number = next,
                None => break,
            }
        }

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        github::testing::{FakeGateway, commit, pull_request, run_item},
    };
    use chrono::{TimeZone, Utc};

    fn aggregator(fake: &Arc<FakeGateway>) -> RepositoryAggregator {
        RepositoryAggregator::new(fake.clone())
    }

    #[tokio::test]
    async fn invalid_repository_never_reaches_gateway() {
        let fake = Arc::new(FakeGateway::default());
        let agg = aggregator(&fake);

        for repo in [Repository::new("", "r"), Repository::new("o", ""), Repository::new("", "")] {
            assert!(matches!(
                agg.pull_request_statuses(&repo, &PullRequestOptions::default()).await,
                Err(Error::InvalidRepository)
            ));
            assert!(matches!(
                agg.workflow_runs(&repo, &WorkflowOptions::default()).await,
                Err(Error::InvalidRepository)
            ));
            assert!(matches!(
                agg.commit_count(&repo, &CommitOptions::default()).await,
                Err(Error::InvalidRepository)
            ));
        }

        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn pull_requests_use_normalized_page_size_and_state() {
        let fake = Arc::new(FakeGateway::default());
        fake.set_pull_requests(vec![pull_request(7, "octo"), pull_request(3, "hubot")]);
        let agg = aggregator(&fake);

        let prs = agg
            .pull_request_statuses(
                &Repository::new("octo", "repo"),
                &PullRequestOptions {
                    state: Some("closed".into()),
                    per_page: 500,
                },
            )
            .await
            .unwrap();

        assert_eq!(prs.len(), 2);
        assert_eq!(prs[0].number, 7);
        assert_eq!(prs[0].author, "octo");
        assert_eq!(fake.calls(), vec!["pulls octo/repo state=closed per_page=20"]);
    }

    #[tokio::test]
    async fn pull_request_merge_state_is_best_effort() {
        let fake = Arc::new(FakeGateway::default());
        let merged_at = Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();
        let mut merged = pull_request(1, "octo");
        merged.merged_at = Some(merged_at);
        let open = pull_request(2, "octo");
        fake.set_pull_requests(vec![merged, open]);

        let prs = aggregator(&fake)
            .pull_request_statuses(&Repository::new("octo", "repo"), &PullRequestOptions::default())
            .await
            .unwrap();

        assert!(prs[0].merged);
        assert_eq!(prs[0].merged_at, Some(merged_at));
        assert!(!prs[1].merged);
        assert_eq!(prs[1].merged_at, None);
    }

    #[tokio::test]
    async fn workflow_runs_map_in_progress_conclusion_to_empty() {
        let fake = Arc::new(FakeGateway::default());
        let mut running = run_item(11);
        running.conclusion = None;
        fake.add_runs("octo/repo", vec![run_item(12), running]);

        let runs = aggregator(&fake)
            .workflow_runs(
                &Repository::new("octo", "repo"),
                &WorkflowOptions {
                    branch: Some("  main ".into()),
                    per_page: 5,
                },
            )
            .await
            .unwrap();

        assert_eq!(runs.iter().map(|run| run.id).collect::<Vec<_>>(), vec![12, 11]);
        assert_eq!(runs[0].conclusion, "success");
        assert_eq!(runs[1].conclusion, "");
        assert_eq!(fake.calls(), vec!["runs octo/repo branch=main per_page=5"]);
    }

    #[tokio::test]
    async fn commit_count_walks_every_page() {
        let fake = Arc::new(FakeGateway::default());
        fake.set_commit_pages(vec![
            vec![commit(Some("octo"), None), commit(None, Some("Jane")), commit(None, None)],
            vec![commit(Some("octo"), Some("Octo Cat"))],
            vec![commit(Some("hubot"), None)],
        ]);
        let window = CommitOptions {
            since: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            until: None,
        };

        let metrics = aggregator(&fake)
            .commit_count(&Repository::new("octo", "repo"), &window)
            .await
            .unwrap();

        assert_eq!(metrics.total, 5);
        assert_eq!(metrics.by_author.get("octo"), Some(&2));
        assert_eq!(metrics.by_author.get("Jane"), Some(&1));
        assert_eq!(metrics.by_author.get("unknown"), Some(&1));
        assert_eq!(metrics.by_author.get("hubot"), Some(&1));
        assert_eq!(metrics.total, metrics.by_author.values().sum::<u64>());
        assert_eq!(metrics.since, window.since);
        assert_eq!(metrics.until, None);
        assert_eq!(
            fake.calls(),
            vec!["commits octo/repo page=1", "commits octo/repo page=2", "commits octo/repo page=3"]
        );
    }

    #[tokio::test]
    async fn commit_count_fails_fast_mid_pagination() {
        let fake = Arc::new(FakeGateway::default());
        fake.set_commit_pages(vec![vec![commit(Some("octo"), None)], vec![commit(Some("octo"), None)]]);
        fake.fail_commit_page(2);

        let result = aggregator(&fake)
            .commit_count(&Repository::new("octo", "repo"), &CommitOptions::default())
            .await;

        assert!(matches!(result, Err(Error::Upstream(_))));
    }

    #[tokio::test]
    async fn commit_count_stops_when_next_page_points_backwards() {
        let fake = Arc::new(FakeGateway::default());
        fake.set_commit_pages(vec![vec![commit(Some("octo"), None)]]);
        fake.stick_next_page_at(1);

        let metrics = aggregator(&fake)
            .commit_count(&Repository::new("octo", "repo"), &CommitOptions::default())
            .await
            .unwrap();

        assert_eq!(metrics.total, 1);
        assert_eq!(fake.calls(), vec!["commits octo/repo page=1"]);
    }
}
