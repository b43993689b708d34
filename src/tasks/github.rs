// GitHub Issues task source

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use super::Task;

const API_ROOT: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("ralphy/", env!("CARGO_PKG_VERSION"));
const PER_PAGE: usize = 100;

/// Tasks backed by open GitHub issues, optionally filtered by label.
/// Completing a task closes its issue. Authenticated via `GITHUB_TOKEN`.
pub struct GitHubTaskSource {
    client: reqwest::Client,
    owner: String,
    repo: String,
    label: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    number: u64,
    title: String,
    body: Option<String>,
    /// Present when the "issue" is actually a pull request
    pull_request: Option<serde_json::Value>,
}

impl GitHubTaskSource {
    /// `repo_path` is `owner/repo`
    pub fn new(repo_path: &str, label: Option<String>) -> Result<Self> {
        let (owner, repo) = repo_path
            .split_once('/')
            .ok_or_else(|| anyhow!("invalid repo format: {} (expected owner/repo)", repo_path))?;
        if owner.is_empty() || repo.is_empty() {
            bail!("invalid repo format: {} (expected owner/repo)", repo_path);
        }

        Ok(Self {
            client: reqwest::Client::new(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            label,
            token: std::env::var("GITHUB_TOKEN").ok(),
        })
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn list_issues(&self, state: &str) -> Result<Vec<IssueResponse>> {
        let url = format!("{}/repos/{}/{}/issues", API_ROOT, self.owner, self.repo);
        let mut issues = Vec::new();
        let mut page = 1u32;

        loop {
            let mut request = self.request(reqwest::Method::GET, &url).query(&[
                ("state", state),
                ("per_page", &PER_PAGE.to_string()),
                ("page", &page.to_string()),
            ]);
            if let Some(label) = &self.label {
                request = request.query(&[("labels", label.as_str())]);
            }

            let response = request.send().await.context("GitHub API request failed")?;
            if !response.status().is_success() {
                bail!(
                    "GitHub API returned {} for {}/{}",
                    response.status(),
                    self.owner,
                    self.repo
                );
            }

            let batch: Vec<IssueResponse> = response
                .json()
                .await
                .context("failed to decode GitHub issue list")?;
            let full_page = batch.len() == PER_PAGE;

            issues.extend(batch.into_iter().filter(|i| i.pull_request.is_none()));

            if !full_page {
                break;
            }
            page += 1;
        }

        Ok(issues)
    }

    /// Open issues as tasks, in listing order
    pub async fn all_tasks(&self) -> Result<Vec<Task>> {
        Ok(self
            .list_issues("open")
            .await?
            .into_iter()
            .map(to_task)
            .collect())
    }

    /// Close the issue. Closing an already-closed issue is accepted by
    /// the API, so this is idempotent.
    pub async fn mark_complete(&self, id: &str) -> Result<()> {
        let number = issue_number(id)?;
        let url = format!(
            "{}/repos/{}/{}/issues/{}",
            API_ROOT, self.owner, self.repo, number
        );

        let response = self
            .request(reqwest::Method::PATCH, &url)
            .json(&serde_json::json!({ "state": "closed" }))
            .send()
            .await
            .context("GitHub API request failed")?;

        if !response.status().is_success() {
            bail!("failed to close issue #{}: {}", number, response.status());
        }
        Ok(())
    }

    pub async fn count_remaining(&self) -> Result<usize> {
        Ok(self.list_issues("open").await?.len())
    }

    pub async fn count_completed(&self) -> Result<usize> {
        Ok(self.list_issues("closed").await?.len())
    }
}

fn to_task(issue: IssueResponse) -> Task {
    let id = format!("{}:{}", issue.number, issue.title);
    Task {
        id,
        title: issue.title,
        body: issue.body,
        parallel_group: None,
        completed: false,
    }
}

/// Extract the issue number from a "number:title" task id
fn issue_number(id: &str) -> Result<u64> {
    id.split(':')
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| anyhow!("invalid issue id: {}", id))
}
