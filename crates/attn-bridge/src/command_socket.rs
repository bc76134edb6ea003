//! Local-only Unix stream socket accept loop (§4.7). Each connection is
//! short-lived: requests and responses are line-delimited JSON, one task
//! per connection, filesystem permissions as the only access control.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use attn_core::socket_guard::{self, SocketGuardOutcome};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::protocol::{ClientCommand, CommandResponse};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum CommandSocketError {
    #[error("another attn daemon is already listening on this socket (pid {0})")]
    AlreadyRunning(u32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bind the command socket, handling stale-socket cleanup per §4.7/§7: a
/// dead previous owner's socket is unlinked and the bind retried once; a
/// live owner causes startup to fail outright.
pub fn bind(socket_path: &Path) -> Result<UnixListener, CommandSocketError> {
    match socket_guard::guard_socket_path(socket_path) {
        SocketGuardOutcome::AlreadyRunning(pid) => return Err(CommandSocketError::AlreadyRunning(pid)),
        SocketGuardOutcome::Clear | SocketGuardOutcome::StaleRemoved => {}
    }

    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    socket_guard::write_pid_file(socket_path)?;
    Ok(listener)
}

/// Accept loop: spawns one task per connection until `shutdown` fires.
pub async fn serve(listener: UnixListener, state: AppState, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, state).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "command socket accept failed");
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("command socket accept loop shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, state: AppState) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "command socket read failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ClientCommand>(&line) {
            Ok(cmd) => state.dispatch(cmd).await,
            Err(e) => CommandResponse::err(format!("malformed command: {e}")),
        };

        let Ok(mut payload) = serde_json::to_vec(&response) else {
            return;
        };
        payload.push(b'\n');
        if writer.write_all(&payload).await.is_err() {
            return;
        }
        if !response.ok && response.error.as_deref().map(|e| e.starts_with("malformed")).unwrap_or(false) {
            // malformed client message: close the connection, other clients unaffected (§7).
            return;
        }
    }
}
