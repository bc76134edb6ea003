//! Orchestration: startup/shutdown sequencing for the attn daemon (§4.8).
//!
//! Startup order: config, store, GitHub client probe, event bus, command
//! socket bind, background tasks armed, WebSocket listener. Shutdown:
//! SIGINT/SIGTERM stop new connections, cancel background tasks, drain
//! in-flight mutations, close socket and database.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use attn_bridge::event_bus::EventBus;
use attn_bridge::state::AppState;
use attn_core::config::Config;
use attn_core::store::Store;
use attn_github::client::build_client;
use attn_harness::shutdown::ShutdownSignal;

use crate::{poller, session_registry};

pub struct Daemon {
    config: Arc<Config>,
    store: Arc<Store>,
    state: AppState,
    shutdown: ShutdownSignal,
}

impl Daemon {
    /// Open the store (degrading to in-memory on schema failure per §4.2,
    /// §7) and build the GitHub client, but do not bind sockets yet.
    pub async fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let outcome = Store::open_or_degraded(&config.db_path).await;
        if outcome.degraded {
            tracing::warn!(path = %config.db_path.display(), "store degraded to in-memory");
        }
        let store = Arc::new(outcome.store);

        let github = build_client(
            config.mock_reviewer.as_deref(),
            config.mock_gh_host.clone(),
            config.mock_gh_token.clone(),
        );
        let events = EventBus::new();
        let state = AppState::new(store.clone(), events, github, config.clone());

        Self {
            config,
            store,
            state,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind the command socket, spawn the sweeper/poller background tasks,
    /// and return the WebSocket router for the caller to serve (the daemon
    /// binary owns the TCP listener so it can log the bound address).
    pub async fn run(&self) -> Result<axum::Router, DaemonError> {
        let listener = attn_bridge::command_socket::bind(&self.config.socket_path)?;
        let cmd_state = self.state.clone();
        let cmd_shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            attn_bridge::command_socket::serve(listener, cmd_state, cmd_shutdown).await;
        });

        self.spawn_session_sweeper();
        self.spawn_poller();

        Ok(attn_bridge::websocket::router(self.state.clone()))
    }

    /// Demotes idle sessions and unregisters stale ones (§4.4). Restarted
    /// with backoff on panic; the poll loop below is the one task exempt
    /// from this wrapper since it already resumes cleanly at its next tick.
    fn spawn_session_sweeper(&self) {
        let store = self.store.clone();
        let events = self.state.events.clone();
        let thresholds = self.config.session.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut delay = Duration::from_secs(1);
            loop {
                if shutdown.is_shutting_down() {
                    break;
                }
                let task = tokio::spawn(session_registry::run(
                    store.clone(),
                    events.clone(),
                    thresholds.clone(),
                    Duration::from_secs(60),
                    shutdown.subscribe(),
                ));
                match task.await {
                    Ok(()) => break,
                    Err(e) if shutdown.is_shutting_down() => {
                        tracing::debug!(error = %e, "session sweeper ended during shutdown");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, delay_secs = delay.as_secs(), "session sweeper panicked, restarting");
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(Duration::from_secs(30));
                    }
                }
            }
        });
    }

    fn spawn_poller(&self) {
        let store = self.store.clone();
        let github = self.state.github.clone();
        let events = self.state.events.clone();
        let heat = self.config.heat.clone();
        let interval = Duration::from_secs(self.config.poll_interval_secs);
        let backoff_cap = Duration::from_secs(self.config.poll_backoff_secs);
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            poller::run(store, github, events, heat, interval, backoff_cap, shutdown).await;
        });
    }

    pub fn ws_port(&self) -> u16 {
        self.config.ws_port
    }

    pub fn socket_path(&self) -> PathBuf {
        self.config.socket_path.clone()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    CommandSocket(#[from] attn_bridge::command_socket::CommandSocketError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn daemon_new_opens_store_and_builds_mock_client_when_configured() {
        let mut config = Config::defaults_for("attn-test");
        config.db_path = PathBuf::from(":memory:");
        config.mock_reviewer = Some("octocat".into());
        let daemon = Daemon::new(config).await;
        assert!(daemon
            .store
            .list_sessions(attn_core::store::SessionFilter::All)
            .await
            .is_ok());
    }
}
