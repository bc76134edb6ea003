//! GitHub access via an opaque subprocess (the platform `gh` CLI). The
//! subprocess path sits behind the [`GitHubClient`] trait so a mock can be
//! swapped in via environment flag without touching callers (§4.3, §9).

use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use attn_core::types::{CiStatus, MergeMethod, PrCoords, PrDetails, PrRole, ReviewStatus};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::reason::derive_reason;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("gh subprocess is not available")]
    NotAvailable,
    #[error("gh subprocess failed: {0}")]
    Command(String),
    #[error("failed to parse gh output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("io error launching gh: {0}")]
    Io(#[from] std::io::Error),
}

/// A PR as returned by the list-search primitive, before detail enrichment.
#[derive(Debug, Clone)]
pub struct PrSummary {
    pub coords: PrCoords,
    pub role: PrRole,
    pub approved_by_me: bool,
    pub title: String,
    pub url: String,
    pub last_updated: DateTime<Utc>,
}

#[async_trait]
pub trait GitHubClient: Send + Sync {
    /// Runs the three issue searches (author/review-requested/reviewed-by),
    /// merges and deduplicates by PR id (§4.3.1).
    async fn fetch_all(&self) -> Result<Vec<PrSummary>, GitHubError>;

    /// Per-PR detail query (§4.3.2).
    async fn fetch_pr_details(&self, coords: &PrCoords) -> Result<PrDetails, GitHubError>;

    async fn approve_pr(&self, coords: &PrCoords) -> Result<(), GitHubError>;

    async fn merge_pr(&self, coords: &PrCoords, method: MergeMethod) -> Result<(), GitHubError>;
}

/// Derive `(reason, state)` for a fully detailed PR — convenience wrapper
/// around [`derive_reason`] kept here so callers don't need a second import.
pub fn reason_for(
    role: PrRole,
    ci_status: CiStatus,
    review_status: ReviewStatus,
    mergeable: Option<bool>,
) -> (attn_core::types::PrReason, attn_core::types::PrState) {
    derive_reason(role, ci_status, review_status, mergeable)
}

// ---------------------------------------------------------------------------
// Shell-based client
// ---------------------------------------------------------------------------

/// Invokes the `gh` CLI as a subprocess. `host`, `token` let the daemon
/// point the subprocess at a non-default GitHub host, mirroring `gh`'s own
/// `GH_HOST`/`GH_TOKEN` environment variables.
pub struct ShellGitHubClient {
    host: Option<String>,
    token: Option<String>,
}

impl ShellGitHubClient {
    pub fn new(host: Option<String>, token: Option<String>) -> Self {
        Self { host, token }
    }

    /// Probe whether the `gh` binary is present on PATH. Called once at
    /// startup; callers should log a one-time warning if this is false.
    pub async fn is_available() -> bool {
        tokio::process::Command::new("gh")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn command(&self, args: &[&str]) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("gh");
        cmd.args(args);
        if let Some(host) = &self.host {
            cmd.env("GH_HOST", host);
        }
        if let Some(token) = &self.token {
            cmd.env("GH_TOKEN", token);
        }
        cmd
    }

    async fn run_json<T: for<'de> Deserialize<'de>>(&self, args: &[&str]) -> Result<T, GitHubError> {
        let output = self.command(args).output().await?;
        if !output.status.success() {
            return Err(GitHubError::Command(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    async fn search(&self, query: &str) -> Result<Vec<RawSearchResult>, GitHubError> {
        self.run_json(&[
            "search",
            "prs",
            query,
            "--json",
            "number,title,url,repository,updatedAt",
        ])
        .await
    }
}

#[derive(Debug, Deserialize)]
struct RawSearchResult {
    number: u64,
    title: String,
    url: String,
    repository: RawRepository,
    #[serde(rename = "updatedAt")]
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    #[serde(rename = "nameWithOwner")]
    name_with_owner: String,
}

fn parse_coords(host: &str, name_with_owner: &str, number: u64) -> Option<PrCoords> {
    let (owner, repo) = name_with_owner.split_once('/')?;
    Some(PrCoords {
        host: host.to_string(),
        owner: owner.to_string(),
        repo: repo.to_string(),
        number,
    })
}

#[derive(Debug, Deserialize)]
struct RawPrView {
    title: String,
    url: String,
    mergeable: String,
    #[serde(rename = "mergeStateStatus")]
    merge_state_status: String,
    #[serde(rename = "headRefOid")]
    head_ref_oid: String,
    #[serde(rename = "statusCheckRollup")]
    status_check_rollup: Option<Vec<RawCheck>>,
    #[serde(rename = "reviewDecision")]
    review_decision: Option<String>,
    comments: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawCheck {
    conclusion: Option<String>,
    status: Option<String>,
}

#[async_trait]
impl GitHubClient for ShellGitHubClient {
    async fn fetch_all(&self) -> Result<Vec<PrSummary>, GitHubError> {
        if !Self::is_available().await {
            tracing::warn!("gh subprocess not available, fetch_all returning empty");
            return Ok(Vec::new());
        }

        let host = self.host.clone().unwrap_or_else(|| "github.com".to_string());
        let authored = self.search("is:pr is:open author:@me").await.unwrap_or_default();
        let review_requested = self
            .search("is:pr is:open review-requested:@me")
            .await
            .unwrap_or_default();
        let reviewed_by = self.search("is:pr is:open reviewed-by:@me").await.unwrap_or_default();

        let mut merged: Vec<PrSummary> = Vec::new();
        let mut upsert = |raw: RawSearchResult, role: PrRole, approved: bool| {
            let Some(coords) = parse_coords(&host, &raw.repository.name_with_owner, raw.number) else {
                return;
            };
            if let Some(existing) = merged.iter_mut().find(|p| p.coords == coords) {
                if approved {
                    existing.approved_by_me = true;
                }
            } else {
                merged.push(PrSummary {
                    coords,
                    role,
                    approved_by_me: approved,
                    title: raw.title,
                    url: raw.url,
                    last_updated: raw.updated_at,
                });
            }
        };

        for raw in authored {
            upsert(raw, PrRole::Author, false);
        }
        for raw in review_requested {
            upsert(raw, PrRole::Reviewer, false);
        }
        for raw in reviewed_by {
            upsert(raw, PrRole::Reviewer, true);
        }

        Ok(merged)
    }

    async fn fetch_pr_details(&self, coords: &PrCoords) -> Result<PrDetails, GitHubError> {
        if !Self::is_available().await {
            return Err(GitHubError::NotAvailable);
        }
        let repo_arg = format!("{}/{}", coords.owner, coords.repo);
        let number_arg = coords.number.to_string();
        let raw: RawPrView = self
            .run_json(&[
                "pr",
                "view",
                &number_arg,
                "--repo",
                &repo_arg,
                "--json",
                "title,url,mergeable,mergeStateStatus,headRefOid,statusCheckRollup,reviewDecision,comments",
            ])
            .await?;

        let ci_status = match raw.status_check_rollup {
            None => CiStatus::None,
            Some(checks) if checks.is_empty() => CiStatus::None,
            Some(checks) => {
                if checks.iter().any(|c| {
                    c.conclusion.as_deref() == Some("FAILURE")
                        || c.conclusion.as_deref() == Some("CANCELLED")
                }) {
                    CiStatus::Failure
                } else if checks
                    .iter()
                    .all(|c| c.conclusion.as_deref() == Some("SUCCESS"))
                {
                    CiStatus::Success
                } else {
                    CiStatus::Pending
                }
            }
        };

        let review_status = match raw.review_decision.as_deref() {
            Some("APPROVED") => ReviewStatus::Approved,
            Some("CHANGES_REQUESTED") => ReviewStatus::ChangesRequested,
            Some("REVIEW_REQUIRED") => ReviewStatus::ReviewRequired,
            _ => ReviewStatus::None,
        };

        Ok(PrDetails {
            title: raw.title,
            url: raw.url,
            mergeable: match raw.mergeable.as_str() {
                "MERGEABLE" => Some(true),
                "CONFLICTING" => Some(false),
                _ => None,
            },
            mergeable_state: Some(raw.merge_state_status),
            ci_status,
            review_status,
            head_sha: Some(raw.head_ref_oid),
            comment_count: raw.comments.len() as u32,
        })
    }

    async fn approve_pr(&self, coords: &PrCoords) -> Result<(), GitHubError> {
        if !Self::is_available().await {
            return Err(GitHubError::NotAvailable);
        }
        let repo_arg = format!("{}/{}", coords.owner, coords.repo);
        let number_arg = coords.number.to_string();
        let output = self
            .command(&["pr", "review", &number_arg, "--repo", &repo_arg, "--approve"])
            .output()
            .await?;
        if !output.status.success() {
            return Err(GitHubError::Command(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    async fn merge_pr(&self, coords: &PrCoords, method: MergeMethod) -> Result<(), GitHubError> {
        if !Self::is_available().await {
            return Err(GitHubError::NotAvailable);
        }
        let repo_arg = format!("{}/{}", coords.owner, coords.repo);
        let number_arg = coords.number.to_string();
        let method_flag = match method {
            MergeMethod::Squash => "--squash",
            MergeMethod::Merge => "--merge",
            MergeMethod::Rebase => "--rebase",
        };
        let output = self
            .command(&["pr", "merge", &number_arg, "--repo", &repo_arg, method_flag])
            .output()
            .await?;
        if !output.status.success() {
            return Err(GitHubError::Command(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-process mock (C8)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MockPr {
    pub coords: PrCoords,
    pub role: PrRole,
    pub approved_by_me: bool,
    pub title: String,
    pub url: String,
    pub last_updated: DateTime<Utc>,
    pub details: PrDetails,
}

#[derive(Default)]
struct MockState {
    prs: Vec<MockPr>,
}

/// In-process fake of [`GitHubClient`], switched on by `ATTN_MOCK_REVIEWER`
/// being set (§4.1, §C8). Tests seed PRs via [`MockGitHubClient::seed`].
#[derive(Clone)]
pub struct MockGitHubClient {
    state: Arc<Mutex<MockState>>,
}

impl MockGitHubClient {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn seed(&self, pr: MockPr) {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.prs.retain(|p| p.coords != pr.coords);
        state.prs.push(pr);
    }

    pub fn clear(&self) {
        self.state.lock().expect("mock state poisoned").prs.clear();
    }
}

impl Default for MockGitHubClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitHubClient for MockGitHubClient {
    async fn fetch_all(&self) -> Result<Vec<PrSummary>, GitHubError> {
        let state = self.state.lock().expect("mock state poisoned");
        Ok(state
            .prs
            .iter()
            .map(|p| PrSummary {
                coords: p.coords.clone(),
                role: p.role,
                approved_by_me: p.approved_by_me,
                title: p.title.clone(),
                url: p.url.clone(),
                last_updated: p.last_updated,
            })
            .collect())
    }

    async fn fetch_pr_details(&self, coords: &PrCoords) -> Result<PrDetails, GitHubError> {
        let state = self.state.lock().expect("mock state poisoned");
        state
            .prs
            .iter()
            .find(|p| &p.coords == coords)
            .map(|p| p.details.clone())
            .ok_or_else(|| GitHubError::Command(format!("no mock PR for {}", coords.id())))
    }

    async fn approve_pr(&self, coords: &PrCoords) -> Result<(), GitHubError> {
        let mut state = self.state.lock().expect("mock state poisoned");
        let Some(pr) = state.prs.iter_mut().find(|p| &p.coords == coords) else {
            return Err(GitHubError::Command(format!("no mock PR for {}", coords.id())));
        };
        pr.approved_by_me = true;
        pr.details.review_status = ReviewStatus::Approved;
        Ok(())
    }

    async fn merge_pr(&self, coords: &PrCoords, _method: MergeMethod) -> Result<(), GitHubError> {
        let mut state = self.state.lock().expect("mock state poisoned");
        if !state.prs.iter().any(|p| &p.coords == coords) {
            return Err(GitHubError::Command(format!("no mock PR for {}", coords.id())));
        }
        state.prs.retain(|p| &p.coords != coords);
        Ok(())
    }
}

/// Build the client the daemon should use, selected by `ATTN_MOCK_REVIEWER`
/// per §4.1/§C8: when set, an in-process mock stands in for `gh`; otherwise
/// the real subprocess client is used, optionally pointed at a custom host.
pub fn build_client(
    mock_reviewer: Option<&str>,
    mock_gh_host: Option<String>,
    mock_gh_token: Option<String>,
) -> Arc<dyn GitHubClient> {
    if mock_reviewer.is_some() {
        Arc::new(MockGitHubClient::new())
    } else {
        Arc::new(ShellGitHubClient::new(mock_gh_host, mock_gh_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coords(number: u64) -> PrCoords {
        PrCoords {
            host: "github.com".into(),
            owner: "acme".into(),
            repo: "widgets".into(),
            number,
        }
    }

    fn sample_mock_pr(number: u64) -> MockPr {
        MockPr {
            coords: coords(number),
            role: PrRole::Author,
            approved_by_me: true,
            title: "Add widget".into(),
            url: "https://github.com/acme/widgets/pull/42".into(),
            last_updated: Utc::now(),
            details: PrDetails {
                title: "Add widget".into(),
                url: "https://github.com/acme/widgets/pull/42".into(),
                mergeable: Some(true),
                mergeable_state: Some("clean".into()),
                ci_status: CiStatus::Success,
                review_status: ReviewStatus::Approved,
                head_sha: Some("abc123".into()),
                comment_count: 0,
            },
        }
    }

    #[tokio::test]
    async fn mock_client_round_trips_seeded_pr() {
        let client = MockGitHubClient::new();
        client.seed(sample_mock_pr(42));

        let summaries = client.fetch_all().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].coords.number, 42);

        let details = client.fetch_pr_details(&coords(42)).await.unwrap();
        assert_eq!(details.ci_status, CiStatus::Success);
    }

    #[tokio::test]
    async fn mock_merge_removes_the_pr() {
        let client = MockGitHubClient::new();
        client.seed(sample_mock_pr(42));

        client.merge_pr(&coords(42), MergeMethod::Squash).await.unwrap();
        assert!(client.fetch_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mock_approve_unknown_pr_errors() {
        let client = MockGitHubClient::new();
        let err = client.approve_pr(&coords(1)).await.unwrap_err();
        assert!(matches!(err, GitHubError::Command(_)));
    }

    #[test]
    fn build_client_selects_mock_when_reviewer_set() {
        // Can't downcast the trait object, but this should not panic and
        // should not require a live `gh` binary on PATH.
        let _client = build_client(Some("octocat"), None, None);
    }
}
