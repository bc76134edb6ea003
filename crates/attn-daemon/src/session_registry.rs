//! Stale-session sweeper (§4.4). Session registration, state transitions,
//! and todo updates are handled synchronously by [`attn_bridge::state::AppState::dispatch`]
//! against the store; this module owns only the background half: sessions
//! that stop sending hook messages are demoted to idle, then unregistered.

use std::time::Duration;

use attn_bridge::event_bus::EventBus;
use attn_bridge::protocol::ServerEvent;
use attn_core::config::SessionThresholds;
use attn_core::store::{SessionFilter, Store};
use attn_core::types::SessionState;
use std::sync::Arc;

/// Run the sweep loop until `shutdown` fires. Checked once per `interval`
/// (independent of the thresholds themselves, which only gate the
/// idle/unregister decision).
pub async fn run(
    store: Arc<Store>,
    events: EventBus,
    thresholds: SessionThresholds,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep_once(&store, &events, &thresholds).await;
            }
            _ = shutdown.recv() => {
                tracing::info!("session sweeper shutting down");
                break;
            }
        }
    }
}

async fn sweep_once(store: &Store, events: &EventBus, thresholds: &SessionThresholds) {
    let stale = match store.stale_sessions(thresholds.unregister_after_secs as i64).await {
        Ok(sessions) => sessions,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list stale sessions for unregister pass");
            return;
        }
    };
    for session in stale {
        match store.remove_session(&session.id).await {
            Ok(true) => {
                tracing::info!(id = %session.id, "unregistered stale session");
                events.publish(ServerEvent::SessionUnregistered { id: session.id });
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, id = %session.id, "failed to unregister stale session"),
        }
    }

    let idle_candidates = match store.stale_sessions(thresholds.idle_after_secs as i64).await {
        Ok(sessions) => sessions,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list stale sessions for idle pass");
            return;
        }
    };
    for session in idle_candidates {
        if session.state == SessionState::Idle {
            continue;
        }
        match store.update_state(&session.id, SessionState::Idle).await {
            Ok(Some(_)) => {
                tracing::info!(id = %session.id, "marked stale session idle");
                events.publish(ServerEvent::SessionStateChanged {
                    id: session.id,
                    state: SessionState::Idle,
                });
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, id = %session.id, "failed to idle stale session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attn_core::types::{AgentKind, Session};
    use chrono::Utc;

    async fn seed_stale_session(store: &Store, id: &str, seconds_ago: i64, state: SessionState) {
        let mut session = Session::new(id, "demo", "/tmp", AgentKind::Claude);
        session.state = state;
        session.last_seen = Utc::now() - chrono::Duration::seconds(seconds_ago);
        store.add_session(&session).await.unwrap();
    }

    #[tokio::test]
    async fn sweep_idles_sessions_past_idle_threshold() {
        let store = Store::open_in_memory().await.unwrap();
        seed_stale_session(&store, "s1", 400, SessionState::Working).await;

        let thresholds = SessionThresholds {
            idle_after_secs: 300,
            unregister_after_secs: 1800,
        };
        let events = EventBus::new();
        sweep_once(&store, &events, &thresholds).await;

        let sessions = store.list_sessions(SessionFilter::All).await.unwrap();
        assert_eq!(sessions[0].state, SessionState::Idle);
    }

    #[tokio::test]
    async fn sweep_unregisters_sessions_past_unregister_threshold() {
        let store = Store::open_in_memory().await.unwrap();
        seed_stale_session(&store, "s1", 2000, SessionState::Working).await;

        let thresholds = SessionThresholds {
            idle_after_secs: 300,
            unregister_after_secs: 1800,
        };
        let events = EventBus::new();
        sweep_once(&store, &events, &thresholds).await;

        let sessions = store.list_sessions(SessionFilter::All).await.unwrap();
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn sweep_leaves_fresh_sessions_untouched() {
        let store = Store::open_in_memory().await.unwrap();
        seed_stale_session(&store, "s1", 5, SessionState::Working).await;

        let thresholds = SessionThresholds {
            idle_after_secs: 300,
            unregister_after_secs: 1800,
        };
        let events = EventBus::new();
        sweep_once(&store, &events, &thresholds).await;

        let sessions = store.list_sessions(SessionFilter::All).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state, SessionState::Working);
    }
}
