//! Shared application state and command dispatch (§4.4, §4.5, §4.7).
//!
//! [`AppState`] is the single point through which the command socket and the
//! WebSocket endpoint reach the store, the event bus, and the GitHub client.
//! `dispatch` implements every command in §4.7/§4.6's shared command set so
//! neither transport duplicates mutation logic.

use std::sync::Arc;

use attn_core::config::Config;
use attn_core::git_read_adapter;
use attn_core::store::{SessionFilter, Store};
use attn_core::types::{MergeMethod, Session, SessionState};
use attn_github::client::GitHubClient;
use attn_github::reason::derive_reason;
use serde_json::json;

use crate::event_bus::EventBus;
use crate::protocol::{ClientCommand, CommandResponse, PrActionKind, ServerEvent};

const DEFAULT_HOST: &str = "github.com";

/// Commands may omit the host segment (`owner/repo#42`) since §6's examples
/// do; the store keys PRs by the full `host/owner/repo#number` id, so a
/// missing host is filled in with the default before any lookup.
fn normalize_pr_id(id: &str) -> String {
    match id.split_once('#') {
        Some((repo_part, number)) if repo_part.split('/').count() == 2 => {
            format!("{DEFAULT_HOST}/{repo_part}#{number}")
        }
        _ => id.to_string(),
    }
}

/// Same defaulting for repo ids (`owner/repo` vs `host/owner/repo`), used by
/// `mute_repo`.
fn normalize_repo_id(id: &str) -> String {
    if id.split('/').count() == 2 {
        format!("{DEFAULT_HOST}/{id}")
    } else {
        id.to_string()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub events: EventBus,
    pub github: Arc<dyn GitHubClient>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<Store>, events: EventBus, github: Arc<dyn GitHubClient>, config: Arc<Config>) -> Self {
        Self {
            store,
            events,
            github,
            config,
        }
    }

    /// Build the `initial_state` event sent first to every new subscriber
    /// (§4.6).
    pub async fn initial_state_event(&self) -> Result<ServerEvent, tokio_rusqlite::Error> {
        let sessions = self.store.list_sessions(SessionFilter::All).await?;
        let prs = self.store.list_prs().await?;
        let repos = self.store.list_repos().await?;
        let muted_authors = self.store.muted_authors().await?;
        let settings_pairs = self.store.all_settings().await?;
        let settings = json!(settings_pairs.into_iter().collect::<std::collections::BTreeMap<_, _>>());
        Ok(ServerEvent::InitialState {
            sessions,
            prs,
            repos,
            muted_authors,
            settings,
        })
    }

    /// Trigger an out-of-band refresh for a single PR: mark it hot and fetch
    /// details immediately, without waiting for the next poll tick (§4.5).
    pub fn spawn_immediate_refresh(&self, pr_id: String) {
        let store = self.store.clone();
        let github = self.github.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            if store.set_pr_hot(&pr_id).await.is_err() {
                return;
            }
            let Some(pr) = store.get_pr(&pr_id).await.ok().flatten() else {
                return;
            };
            let Ok(details) = github.fetch_pr_details(&pr.coords).await else {
                return;
            };
            let (reason, state) = derive_reason(pr.role, details.ci_status, details.review_status, details.mergeable);
            let _ = store
                .update_pr_details(
                    &pr_id,
                    details.mergeable,
                    details.mergeable_state,
                    details.ci_status,
                    details.review_status,
                    details.head_sha,
                    details.comment_count,
                    reason,
                    state,
                )
                .await;
            if let Ok(prs) = store.list_prs().await {
                events.publish(ServerEvent::PrsUpdated { prs });
            }
        });
    }

    /// Dispatch a single command to its mutation/query and return the
    /// response envelope. Mutations broadcast on the event bus after commit
    /// (§4.7); query-only commands never broadcast.
    pub async fn dispatch(&self, cmd: ClientCommand) -> CommandResponse {
        match cmd {
            ClientCommand::Register {
                id,
                label,
                dir,
                tmux: _,
                agent,
            } => {
                let agent_kind = match agent.as_str() {
                    "codex" => attn_core::types::AgentKind::Codex,
                    "claude" => attn_core::types::AgentKind::Claude,
                    _ => attn_core::types::AgentKind::Other,
                };
                let session = Session::new(id, label, dir, agent_kind);
                match self.store.add_session(&session).await {
                    Ok(()) => {
                        self.events.publish(ServerEvent::SessionRegistered { session });
                        CommandResponse::ok()
                    }
                    Err(e) => CommandResponse::err(e.to_string()),
                }
            }
            ClientCommand::Unregister { id } => match self.store.remove_session(&id).await {
                Ok(true) => {
                    self.events.publish(ServerEvent::SessionUnregistered { id });
                    CommandResponse::ok()
                }
                Ok(false) => CommandResponse::err("unknown session id"),
                Err(e) => CommandResponse::err(e.to_string()),
            },
            ClientCommand::State { id, state } => match self.store.update_state(&id, state).await {
                Ok(Some(_)) => {
                    self.events.publish(ServerEvent::SessionStateChanged { id, state });
                    CommandResponse::ok()
                }
                Ok(None) => CommandResponse::err("unknown session id"),
                Err(e) => CommandResponse::err(e.to_string()),
            },
            ClientCommand::Todos { id, todos } => match self.store.update_todos(&id, todos.clone()).await {
                Ok(Some(_)) => {
                    self.events.publish(ServerEvent::SessionTodosUpdated { id, todos });
                    CommandResponse::ok()
                }
                Ok(None) => CommandResponse::err("unknown session id"),
                Err(e) => CommandResponse::err(e.to_string()),
            },
            ClientCommand::Touch { id } => match self.store.touch(&id).await {
                Ok(Some(_)) => CommandResponse::ok(),
                Ok(None) => CommandResponse::err("unknown session id"),
                Err(e) => CommandResponse::err(e.to_string()),
            },
            ClientCommand::Query { filter } => {
                let filter = match filter.as_deref() {
                    Some("idle") => SessionFilter::State(SessionState::Idle),
                    Some("working") => SessionFilter::State(SessionState::Working),
                    Some("waiting") | Some("waiting_input") => SessionFilter::State(SessionState::WaitingInput),
                    _ => SessionFilter::All,
                };
                match self.store.list_sessions(filter).await {
                    Ok(sessions) => CommandResponse::with_sessions(sessions),
                    Err(e) => CommandResponse::err(e.to_string()),
                }
            }
            ClientCommand::QueryPrs => match self.store.list_prs().await {
                Ok(prs) => CommandResponse::with_prs(prs),
                Err(e) => CommandResponse::err(e.to_string()),
            },
            ClientCommand::QueryRepos => match self.store.list_repos().await {
                Ok(repos) => CommandResponse::with_repos(repos),
                Err(e) => CommandResponse::err(e.to_string()),
            },
            ClientCommand::MutePr { id, muted } => {
                let id = normalize_pr_id(&id);
                let muted = muted.unwrap_or(true);
                match self.store.get_pr(&id).await {
                    Ok(Some(mut pr)) => {
                        pr.muted = muted;
                        if let Err(e) = self.store.set_prs(vec![pr]).await {
                            return CommandResponse::err(e.to_string());
                        }
                        if !muted {
                            self.spawn_immediate_refresh(id.clone());
                        }
                        match self.store.list_prs().await {
                            Ok(prs) => self.events.publish(ServerEvent::PrsUpdated { prs }),
                            Err(e) => return CommandResponse::err(e.to_string()),
                        }
                        CommandResponse::ok()
                    }
                    Ok(None) => CommandResponse::err("unknown pr id"),
                    Err(e) => CommandResponse::err(e.to_string()),
                }
            }
            ClientCommand::MuteRepo { id, muted } => {
                let id = normalize_repo_id(&id);
                let mut parts = id.splitn(3, '/');
                let (Some(host), Some(owner), Some(repo)) = (parts.next(), parts.next(), parts.next()) else {
                    return CommandResponse::err("repo id must be host/owner/repo");
                };
                // An explicit flag sets state directly; omitting it toggles the
                // repo's current muted state (§8 scenario 6 re-sends the same
                // bare `mute_repo` command to unmute).
                let desired = match muted {
                    Some(m) => m,
                    None => {
                        let current = match self.store.list_repos().await {
                            Ok(repos) => repos
                                .iter()
                                .find(|r| r.host == host && r.owner == owner && r.repo == repo)
                                .map(|r| r.muted)
                                .unwrap_or(false),
                            Err(e) => return CommandResponse::err(e.to_string()),
                        };
                        !current
                    }
                };
                match self.store.set_repo_muted(host, owner, repo, desired).await {
                    Ok(_) => {
                        match self.store.list_repos().await {
                            Ok(repos) => self.events.publish(ServerEvent::ReposUpdated { repos }),
                            Err(e) => return CommandResponse::err(e.to_string()),
                        }
                        if !desired {
                            match self.store.list_prs().await {
                                Ok(prs) => {
                                    for pr in prs.into_iter().filter(|pr| {
                                        pr.coords.host == host
                                            && pr.coords.owner == owner
                                            && pr.coords.repo == repo
                                    }) {
                                        self.spawn_immediate_refresh(pr.id());
                                    }
                                }
                                Err(e) => return CommandResponse::err(e.to_string()),
                            }
                        }
                        CommandResponse::ok()
                    }
                    Err(e) => CommandResponse::err(e.to_string()),
                }
            }
            ClientCommand::MuteAuthor { author, muted } => {
                let muted = muted.unwrap_or(true);
                match self.store.set_author_muted(&author, muted).await {
                    Ok(muted_authors) => {
                        self.events
                            .publish(ServerEvent::MutedAuthorsUpdated { muted_authors });
                        CommandResponse::ok()
                    }
                    Err(e) => CommandResponse::err(e.to_string()),
                }
            }
            ClientCommand::InjectTestSession { id, label, dir, agent } => {
                let agent_kind = match agent.as_str() {
                    "codex" => attn_core::types::AgentKind::Codex,
                    "claude" => attn_core::types::AgentKind::Claude,
                    _ => attn_core::types::AgentKind::Other,
                };
                let session = Session::new(id, label, dir, agent_kind);
                match self.store.add_session(&session).await {
                    Ok(()) => {
                        self.events.publish(ServerEvent::SessionRegistered { session });
                        CommandResponse::ok()
                    }
                    Err(e) => CommandResponse::err(e.to_string()),
                }
            }
            ClientCommand::PrAction { id, action, method } => {
                let id = normalize_pr_id(&id);
                let Ok(Some(pr)) = self.store.get_pr(&id).await else {
                    return CommandResponse::err("unknown pr id");
                };
                let action_name = match action {
                    PrActionKind::Approve => "approve",
                    PrActionKind::Merge => "merge",
                };
                let result = match action {
                    PrActionKind::Approve => self.github.approve_pr(&pr.coords).await,
                    PrActionKind::Merge => {
                        self.github
                            .merge_pr(&pr.coords, method.unwrap_or(MergeMethod::Squash))
                            .await
                    }
                };
                match result {
                    Ok(()) => {
                        if action == PrActionKind::Approve {
                            let _ = self.store.mark_pr_approved(&id).await;
                        }
                        self.spawn_immediate_refresh(id.clone());
                        self.events.publish(ServerEvent::PrActionResult {
                            pr_id: id,
                            action: action_name.to_string(),
                            success: true,
                            error: None,
                        });
                        CommandResponse::ok()
                    }
                    Err(e) => {
                        self.events.publish(ServerEvent::PrActionResult {
                            pr_id: id,
                            action: action_name.to_string(),
                            success: false,
                            error: Some(e.to_string()),
                        });
                        CommandResponse::ok()
                    }
                }
            }
            ClientCommand::PrVisited { id } => {
                let id = normalize_pr_id(&id);
                match self.store.mark_pr_visited(&id).await {
                    Ok(()) => {
                        self.spawn_immediate_refresh(id.clone());
                        match self.store.list_prs().await {
                            Ok(prs) => self.events.publish(ServerEvent::PrsUpdated { prs }),
                            Err(e) => return CommandResponse::err(e.to_string()),
                        }
                        CommandResponse::ok()
                    }
                    Err(e) => CommandResponse::err(e.to_string()),
                }
            }
            ClientCommand::FetchPrDetails { id } => {
                let id = normalize_pr_id(&id);
                let Ok(Some(pr)) = self.store.get_pr(&id).await else {
                    return CommandResponse::err("unknown pr id");
                };
                match self.github.fetch_pr_details(&pr.coords).await {
                    Ok(details) => {
                        let (reason, state) =
                            derive_reason(pr.role, details.ci_status, details.review_status, details.mergeable);
                        let _ = self
                            .store
                            .update_pr_details(
                                &id,
                                details.mergeable,
                                details.mergeable_state,
                                details.ci_status,
                                details.review_status,
                                details.head_sha,
                                details.comment_count,
                                reason,
                                state,
                            )
                            .await;
                        match self.store.list_prs().await {
                            Ok(prs) => {
                                self.events.publish(ServerEvent::PrsUpdated { prs });
                                CommandResponse::ok()
                            }
                            Err(e) => CommandResponse::err(e.to_string()),
                        }
                    }
                    Err(e) => CommandResponse::err(e.to_string()),
                }
            }
            ClientCommand::CreateWorktreeFromBranch {
                repo_dir,
                worktree_path,
                branch,
            } => {
                match tokio::task::spawn_blocking(move || {
                    git_read_adapter::create_worktree_from_branch(&repo_dir, &worktree_path, &branch)
                })
                .await
                {
                    Ok(Ok(())) => CommandResponse::ok(),
                    Ok(Err(e)) => CommandResponse::err(e.to_string()),
                    Err(e) => CommandResponse::err(e.to_string()),
                }
            }
            ClientCommand::FetchRemotes { repo_dir } => {
                match tokio::task::spawn_blocking(move || git_read_adapter::fetch_remotes(&repo_dir)).await {
                    Ok(Ok(remotes)) => CommandResponse::with_remotes(remotes),
                    Ok(Err(e)) => CommandResponse::err(e.to_string()),
                    Err(e) => CommandResponse::err(e.to_string()),
                }
            }
            ClientCommand::GetSettings => match self.store.all_settings().await {
                Ok(pairs) => {
                    let settings = json!(pairs.into_iter().collect::<std::collections::BTreeMap<_, _>>());
                    CommandResponse::with_settings(settings)
                }
                Err(e) => CommandResponse::err(e.to_string()),
            },
            ClientCommand::SetSetting { key, value } => {
                let raw = match serde_json::to_string(&value) {
                    Ok(raw) => raw,
                    Err(e) => return CommandResponse::err(e.to_string()),
                };
                match self.store.set_setting(&key, &raw).await {
                    Ok(()) => {
                        match self.store.all_settings().await {
                            Ok(pairs) => {
                                let settings = json!(pairs.into_iter().collect::<std::collections::BTreeMap<_, _>>());
                                self.events.publish(ServerEvent::SettingsUpdated { settings });
                            }
                            Err(e) => return CommandResponse::err(e.to_string()),
                        }
                        CommandResponse::ok()
                    }
                    Err(e) => CommandResponse::err(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attn_core::config::Config;
    use attn_github::client::MockGitHubClient;

    async fn test_state() -> AppState {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let config = Arc::new(Config::defaults_for("attn-test"));
        AppState::new(store, EventBus::new(), Arc::new(MockGitHubClient::new()), config)
    }

    fn seeded_pr(number: u64) -> attn_core::types::Pr {
        use attn_core::types::{CiStatus, HeatState, PrCoords, PrReason, PrRole, PrState, ReviewStatus};
        use chrono::Utc;
        let now = Utc::now();
        attn_core::types::Pr {
            coords: PrCoords {
                host: "github.com".into(),
                owner: "acme".into(),
                repo: "widgets".into(),
                number,
            },
            role: PrRole::Author,
            state: PrState::Working,
            reason: PrReason::Open,
            title: "Add widget".into(),
            url: "https://example.com".into(),
            last_updated: now,
            last_polled: now,
            muted: false,
            details_fetched: false,
            details_fetched_at: None,
            mergeable: None,
            mergeable_state: None,
            ci_status: CiStatus::None,
            review_status: ReviewStatus::None,
            head_sha: None,
            comment_count: 0,
            approved_by_me: false,
            heat_state: HeatState::Hot,
            last_heat_activity_at: now,
            has_new_changes: false,
        }
    }

    #[tokio::test]
    async fn mute_pr_accepts_host_less_id() {
        let state = test_state().await;
        state.store.set_prs(vec![seeded_pr(42)]).await.unwrap();

        let response = state
            .dispatch(ClientCommand::MutePr {
                id: "acme/widgets#42".into(),
                muted: Some(true),
            })
            .await;
        assert!(response.ok);

        let pr = state
            .store
            .get_pr("github.com/acme/widgets#42")
            .await
            .unwrap()
            .unwrap();
        assert!(pr.muted);
    }

    #[tokio::test]
    async fn mute_repo_accepts_host_less_id_and_toggles_on_repeat() {
        let state = test_state().await;
        state.store.set_prs(vec![seeded_pr(42)]).await.unwrap();

        let mute = || {
            state.dispatch(ClientCommand::MuteRepo {
                id: "acme/widgets".into(),
                muted: None,
            })
        };

        let response = mute().await;
        assert!(response.ok);
        let repos = state.store.list_repos().await.unwrap();
        assert!(repos.iter().find(|r| r.repo == "widgets").unwrap().muted);

        let response = mute().await;
        assert!(response.ok);
        let repos = state.store.list_repos().await.unwrap();
        assert!(!repos.iter().find(|r| r.repo == "widgets").unwrap().muted);
    }

    #[tokio::test]
    async fn register_then_query_round_trips() {
        let state = test_state().await;
        let response = state
            .dispatch(ClientCommand::Register {
                id: "s1".into(),
                label: "demo".into(),
                dir: "/tmp/demo".into(),
                tmux: None,
                agent: "claude".into(),
            })
            .await;
        assert!(response.ok);

        let response = state.dispatch(ClientCommand::Query { filter: None }).await;
        assert_eq!(response.sessions.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unregister_unknown_session_fails() {
        let state = test_state().await;
        let response = state.dispatch(ClientCommand::Unregister { id: "nope".into() }).await;
        assert!(!response.ok);
    }

    #[tokio::test]
    async fn mute_author_broadcasts_updated_list() {
        let state = test_state().await;
        let rx = state.events.subscribe();
        let response = state
            .dispatch(ClientCommand::MuteAuthor {
                author: "octocat".into(),
                muted: Some(true),
            })
            .await;
        assert!(response.ok);
        let event = rx.try_recv().unwrap();
        matches!(event, ServerEvent::MutedAuthorsUpdated { .. });
    }

    #[tokio::test]
    async fn get_settings_returns_empty_object_when_unset() {
        let state = test_state().await;
        let response = state.dispatch(ClientCommand::GetSettings).await;
        assert!(response.ok);
        assert!(response.settings.unwrap().as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pr_action_on_unknown_pr_errors() {
        let state = test_state().await;
        let response = state
            .dispatch(ClientCommand::PrAction {
                id: "github.com/acme/widgets#1".into(),
                action: PrActionKind::Approve,
                method: None,
            })
            .await;
        assert!(!response.ok);
    }
}
