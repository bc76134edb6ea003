//! Wire schema shared by the command socket and the WebSocket endpoint
//! (§4.6, §4.7, §6). Both transports exchange line-delimited JSON using the
//! same tagged enums: [`ClientCommand`] (`cmd` field) flowing in,
//! [`ServerEvent`] (`event` field) flowing out.

use attn_core::types::{MergeMethod, Pr, RepoState, Session, SessionState};
use serde::{Deserialize, Serialize};

/// Server -> client push events (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    InitialState {
        sessions: Vec<Session>,
        prs: Vec<Pr>,
        repos: Vec<RepoState>,
        muted_authors: Vec<String>,
        settings: serde_json::Value,
    },
    SessionRegistered {
        session: Session,
    },
    SessionUnregistered {
        id: String,
    },
    SessionStateChanged {
        id: String,
        state: SessionState,
    },
    SessionTodosUpdated {
        id: String,
        todos: Vec<String>,
    },
    PrsUpdated {
        prs: Vec<Pr>,
    },
    ReposUpdated {
        repos: Vec<RepoState>,
    },
    MutedAuthorsUpdated {
        muted_authors: Vec<String>,
    },
    SettingsUpdated {
        settings: serde_json::Value,
    },
    PrActionResult {
        pr_id: String,
        action: String,
        success: bool,
        error: Option<String>,
    },
    Warning {
        message: String,
    },
}

/// Client -> server commands (§4.6, §4.7). The command socket and the
/// WebSocket endpoint accept the same shape; `register`/`unregister`/etc.
/// are also used by the session-hook test harness over either transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ClientCommand {
    Register {
        id: String,
        label: String,
        dir: String,
        tmux: Option<String>,
        agent: String,
    },
    Unregister {
        id: String,
    },
    State {
        id: String,
        state: SessionState,
    },
    Todos {
        id: String,
        todos: Vec<String>,
    },
    Touch {
        id: String,
    },
    Query {
        filter: Option<String>,
    },
    QueryPrs,
    QueryRepos,
    MutePr {
        id: String,
        muted: Option<bool>,
    },
    MuteRepo {
        id: String,
        muted: Option<bool>,
    },
    MuteAuthor {
        author: String,
        muted: Option<bool>,
    },
    InjectTestSession {
        id: String,
        label: String,
        dir: String,
        agent: String,
    },
    PrAction {
        id: String,
        action: PrActionKind,
        method: Option<MergeMethod>,
    },
    PrVisited {
        id: String,
    },
    FetchPrDetails {
        id: String,
    },
    CreateWorktreeFromBranch {
        repo_dir: String,
        worktree_path: String,
        branch: String,
    },
    FetchRemotes {
        repo_dir: String,
    },
    GetSettings,
    SetSetting {
        key: String,
        value: serde_json::Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrActionKind {
    Approve,
    Merge,
}

/// Response envelope for command-socket requests (§4.7): `{ok, error?,
/// sessions?, prs?, repos?, ...}`. Fields absent from a given response are
/// omitted rather than emitted as `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<Session>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prs: Option<Vec<Pr>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repos: Option<Vec<RepoState>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remotes: Option<Vec<(String, String)>>,
}

impl CommandResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_sessions(sessions: Vec<Session>) -> Self {
        Self {
            ok: true,
            sessions: Some(sessions),
            ..Default::default()
        }
    }

    pub fn with_prs(prs: Vec<Pr>) -> Self {
        Self {
            ok: true,
            prs: Some(prs),
            ..Default::default()
        }
    }

    pub fn with_repos(repos: Vec<RepoState>) -> Self {
        Self {
            ok: true,
            repos: Some(repos),
            ..Default::default()
        }
    }

    pub fn with_settings(settings: serde_json::Value) -> Self {
        Self {
            ok: true,
            settings: Some(settings),
            ..Default::default()
        }
    }

    pub fn with_remotes(remotes: Vec<(String, String)>) -> Self {
        Self {
            ok: true,
            remotes: Some(remotes),
            ..Default::default()
        }
    }
}
