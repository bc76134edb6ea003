use attn_bridge::protocol::*;
use attn_core::types::{AgentKind, HeatState, MergeMethod, PrCoords, PrReason, PrRole, PrState, Session, SessionState};

/// Helper: serialize a message to JSON and deserialize it back, asserting the
/// round-trip produces an equivalent value (via Debug representation).
fn roundtrip_cmd(cmd: &ClientCommand) {
    let json = serde_json::to_string(cmd).expect("serialize");
    let back: ClientCommand = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(format!("{:?}", cmd), format!("{:?}", back));
}

fn roundtrip_event(event: &ServerEvent) {
    let json = serde_json::to_string(event).expect("serialize");
    let back: ServerEvent = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(format!("{:?}", event), format!("{:?}", back));
}

fn sample_session() -> Session {
    Session::new("s1", "demo", "/tmp/demo", AgentKind::Claude)
}

fn sample_coords() -> PrCoords {
    PrCoords {
        host: "github.com".into(),
        owner: "acme".into(),
        repo: "widgets".into(),
        number: 42,
    }
}

#[test]
fn test_register_roundtrip() {
    roundtrip_cmd(&ClientCommand::Register {
        id: "s1".into(),
        label: "my-repo".into(),
        dir: "/tmp".into(),
        tmux: Some("sess:1.0".into()),
        agent: "claude".into(),
    });
}

#[test]
fn test_state_roundtrip() {
    roundtrip_cmd(&ClientCommand::State {
        id: "s1".into(),
        state: SessionState::WaitingInput,
    });
}

#[test]
fn test_todos_roundtrip() {
    roundtrip_cmd(&ClientCommand::Todos {
        id: "s1".into(),
        todos: vec!["Task A".into(), "Task B".into()],
    });
}

#[test]
fn test_query_with_and_without_filter_roundtrip() {
    roundtrip_cmd(&ClientCommand::Query { filter: Some("waiting".into()) });
    roundtrip_cmd(&ClientCommand::Query { filter: None });
}

#[test]
fn test_mute_pr_roundtrip() {
    roundtrip_cmd(&ClientCommand::MutePr {
        id: "github.com/acme/widgets#42".into(),
        muted: Some(true),
    });
}

#[test]
fn test_pr_action_roundtrip() {
    roundtrip_cmd(&ClientCommand::PrAction {
        id: "github.com/acme/widgets#42".into(),
        action: PrActionKind::Merge,
        method: Some(MergeMethod::Squash),
    });
}

#[test]
fn test_create_worktree_from_branch_roundtrip() {
    roundtrip_cmd(&ClientCommand::CreateWorktreeFromBranch {
        repo_dir: "/repos/widgets".into(),
        worktree_path: "/repos/widgets-feature".into(),
        branch: "feature/foo".into(),
    });
}

#[test]
fn test_set_setting_roundtrip() {
    roundtrip_cmd(&ClientCommand::SetSetting {
        key: "theme".into(),
        value: serde_json::json!("dark"),
    });
}

#[test]
fn test_initial_state_roundtrip() {
    roundtrip_event(&ServerEvent::InitialState {
        sessions: vec![sample_session()],
        prs: Vec::new(),
        repos: Vec::new(),
        muted_authors: vec!["octocat".into()],
        settings: serde_json::json!({"theme": "dark"}),
    });
}

#[test]
fn test_session_state_changed_roundtrip() {
    roundtrip_event(&ServerEvent::SessionStateChanged {
        id: "s1".into(),
        state: SessionState::Idle,
    });
}

#[test]
fn test_pr_action_result_roundtrip() {
    roundtrip_event(&ServerEvent::PrActionResult {
        pr_id: sample_coords().id(),
        action: "approve".into(),
        success: true,
        error: None,
    });
}

#[test]
fn test_warning_roundtrip() {
    roundtrip_event(&ServerEvent::Warning {
        message: "degraded mode".into(),
    });
}

#[test]
fn test_json_uses_snake_case_tags() {
    let json = serde_json::to_value(ClientCommand::QueryPrs).unwrap();
    assert_eq!(json["cmd"], "query_prs");

    let json = serde_json::to_value(ServerEvent::Warning {
        message: "x".into(),
    })
    .unwrap();
    assert_eq!(json["event"], "warning");
}

#[test]
fn test_command_response_ok_has_no_error_field() {
    let response = CommandResponse::ok();
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["ok"], true);
    assert!(json.get("error").is_none());
}

#[test]
fn test_command_response_with_prs_serializes_reason_and_heat_fields() {
    let pr = attn_core::types::Pr {
        coords: sample_coords(),
        role: PrRole::Author,
        state: PrState::Waiting,
        reason: PrReason::ReadyToMerge,
        title: "Add widget".into(),
        url: "https://github.com/acme/widgets/pull/42".into(),
        last_updated: chrono::Utc::now(),
        last_polled: chrono::Utc::now(),
        muted: false,
        details_fetched: true,
        details_fetched_at: Some(chrono::Utc::now()),
        mergeable: Some(true),
        mergeable_state: Some("clean".into()),
        ci_status: attn_core::types::CiStatus::Success,
        review_status: attn_core::types::ReviewStatus::Approved,
        head_sha: Some("abc123".into()),
        comment_count: 0,
        approved_by_me: true,
        heat_state: HeatState::Hot,
        last_heat_activity_at: chrono::Utc::now(),
        has_new_changes: false,
    };
    let response = CommandResponse::with_prs(vec![pr]);
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["prs"][0]["reason"], "ready_to_merge");
    assert_eq!(json["prs"][0]["heat_state"], "hot");
}
