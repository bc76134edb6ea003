use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Codex,
    Claude,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Working,
    WaitingInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub is_worktree: bool,
    pub branch: Option<String>,
    pub main_repo: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub label: String,
    pub directory: String,
    pub agent: AgentKind,
    pub state: SessionState,
    pub state_since: DateTime<Utc>,
    pub state_updated_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub todos: Option<Vec<String>>,
    pub muted: bool,
    #[serde(default)]
    pub worktree: Option<WorktreeInfo>,
}

impl Session {
    pub fn new(id: impl Into<String>, label: impl Into<String>, directory: impl Into<String>, agent: AgentKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            label: label.into(),
            directory: directory.into(),
            agent,
            state: SessionState::Idle,
            state_since: now,
            state_updated_at: now,
            last_seen: now,
            todos: None,
            muted: false,
            worktree: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Pr
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrRole {
    Author,
    Reviewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Waiting,
    Working,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrReason {
    ReadyToMerge,
    CiFailed,
    ChangesRequested,
    ReviewNeeded,
    Open,
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Success,
    Failure,
    Pending,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    ChangesRequested,
    ReviewRequired,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatState {
    Hot,
    Warm,
    Cold,
}

/// Coordinates identifying a pull request across hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrCoords {
    pub host: String,
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PrCoords {
    /// Canonical id: `host/owner/repo#number`.
    pub fn id(&self) -> String {
        format!("{}/{}/{}#{}", self.host, self.owner, self.repo, self.number)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pr {
    pub coords: PrCoords,
    pub role: PrRole,
    pub state: PrState,
    pub reason: PrReason,
    pub title: String,
    pub url: String,
    pub last_updated: DateTime<Utc>,
    pub last_polled: DateTime<Utc>,
    pub muted: bool,

    // Detail cache, populated by fetch_pr_details.
    pub details_fetched: bool,
    pub details_fetched_at: Option<DateTime<Utc>>,
    pub mergeable: Option<bool>,
    pub mergeable_state: Option<String>,
    pub ci_status: CiStatus,
    pub review_status: ReviewStatus,
    pub head_sha: Option<String>,
    pub comment_count: u32,
    pub approved_by_me: bool,

    // Heat scheduling.
    pub heat_state: HeatState,
    pub last_heat_activity_at: DateTime<Utc>,

    // Interaction-derived.
    pub has_new_changes: bool,
}

impl Pr {
    pub fn id(&self) -> String {
        self.coords.id()
    }
}

// ---------------------------------------------------------------------------
// PrInteraction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrInteraction {
    pub pr_id: String,
    pub last_visited_at: Option<DateTime<Utc>>,
    pub last_approved_at: Option<DateTime<Utc>>,
    pub last_seen_sha: Option<String>,
    pub last_seen_comment_count: Option<u32>,
    pub last_seen_ci_status: Option<CiStatus>,
}

// ---------------------------------------------------------------------------
// RepoState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoState {
    pub host: String,
    pub owner: String,
    pub repo: String,
    pub muted: bool,
    pub collapsed: bool,
}

impl RepoState {
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.host, self.owner, self.repo)
    }
}

// ---------------------------------------------------------------------------
// Detail fetch result (what the github client returns for a single PR)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrDetails {
    pub title: String,
    pub url: String,
    pub mergeable: Option<bool>,
    pub mergeable_state: Option<String>,
    pub ci_status: CiStatus,
    pub review_status: ReviewStatus,
    pub head_sha: Option<String>,
    pub comment_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    Squash,
    Merge,
    Rebase,
}
