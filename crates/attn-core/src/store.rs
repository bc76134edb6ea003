//! Durable persistence for sessions, pull requests, repo preferences, and
//! settings. All mutations commit synchronously within their own SQLite
//! transaction; there is no background flush loop; durability comes from
//! the embedded engine's per-transaction commit.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::HeatIntervals;
use crate::types::{
    CiStatus, HeatState, Pr, PrCoords, PrInteraction, PrReason, PrRole, PrState, ReviewStatus,
    RepoState, Session, SessionState,
};

/// Async SQLite-backed store for sessions, PRs, repos, and settings.
pub struct Store {
    conn: tokio_rusqlite::Connection,
}

/// Returned by [`Store::open_or_degraded`] so callers can broadcast a
/// `warning` event when the real database could not be opened.
pub struct OpenOutcome {
    pub store: Store,
    pub degraded: bool,
}

fn enum_to_sql<T: Serialize>(val: &T) -> String {
    let s = serde_json::to_string(val).expect("serialize enum");
    s.trim_matches('"').to_string()
}

fn enum_from_sql<T: DeserializeOwned>(raw: &str) -> T {
    let quoted = format!("\"{}\"", raw);
    serde_json::from_str(&quoted).expect("deserialize enum")
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

/// Filter applied to [`Store::list_sessions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFilter {
    All,
    State(SessionState),
}

impl Store {
    /// Open (or create) a database at the given file path, running schema
    /// migrations before returning.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, tokio_rusqlite::Error> {
        let conn = tokio_rusqlite::Connection::open(path.as_ref()).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// Purely in-memory database, used for tests and degraded-mode fallback.
    pub async fn open_in_memory() -> Result<Self, tokio_rusqlite::Error> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open the on-disk store; if schema setup fails, fall back to an
    /// in-memory store instead of failing the daemon outright (§4.2,
    /// "Schema open failure triggers degraded in-memory mode").
    pub async fn open_or_degraded(path: impl AsRef<Path>) -> OpenOutcome {
        match Self::open(&path).await {
            Ok(store) => OpenOutcome {
                store,
                degraded: false,
            },
            Err(err) => {
                tracing::error!(error = %err, path = %path.as_ref().display(), "store open failed, falling back to in-memory");
                let store = Self::open_in_memory()
                    .await
                    .expect("in-memory sqlite must open");
                OpenOutcome {
                    store,
                    degraded: true,
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> Result<(), tokio_rusqlite::Error> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA cache_size=-64000;
                    PRAGMA mmap_size=268435456;
                    PRAGMA temp_store=MEMORY;
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS sessions (
                        id                TEXT PRIMARY KEY,
                        label             TEXT NOT NULL,
                        directory         TEXT NOT NULL,
                        agent             TEXT NOT NULL,
                        state             TEXT NOT NULL,
                        state_since       TEXT NOT NULL,
                        state_updated_at  TEXT NOT NULL,
                        last_seen         TEXT NOT NULL,
                        todos             TEXT,
                        muted             INTEGER NOT NULL DEFAULT 0,
                        worktree          TEXT
                    );
                    CREATE INDEX IF NOT EXISTS idx_sessions_state ON sessions(state);

                    CREATE TABLE IF NOT EXISTS prs (
                        id                   TEXT PRIMARY KEY,
                        host                 TEXT NOT NULL,
                        owner                TEXT NOT NULL,
                        repo                 TEXT NOT NULL,
                        number               INTEGER NOT NULL,
                        role                 TEXT NOT NULL,
                        state                TEXT NOT NULL,
                        reason               TEXT NOT NULL,
                        title                TEXT NOT NULL,
                        url                  TEXT NOT NULL,
                        last_updated         TEXT NOT NULL,
                        last_polled          TEXT NOT NULL,
                        muted                INTEGER NOT NULL DEFAULT 0,
                        details_fetched      INTEGER NOT NULL DEFAULT 0,
                        details_fetched_at   TEXT,
                        mergeable            INTEGER,
                        mergeable_state      TEXT,
                        ci_status            TEXT NOT NULL DEFAULT 'none',
                        review_status        TEXT NOT NULL DEFAULT 'none',
                        head_sha             TEXT,
                        comment_count        INTEGER NOT NULL DEFAULT 0,
                        approved_by_me       INTEGER NOT NULL DEFAULT 0,
                        heat_state           TEXT NOT NULL DEFAULT 'cold',
                        last_heat_activity_at TEXT NOT NULL,
                        has_new_changes      INTEGER NOT NULL DEFAULT 0
                    );
                    CREATE INDEX IF NOT EXISTS idx_prs_repo ON prs(host, owner, repo);
                    CREATE INDEX IF NOT EXISTS idx_prs_heat ON prs(heat_state);

                    CREATE TABLE IF NOT EXISTS repos (
                        key       TEXT PRIMARY KEY,
                        host      TEXT NOT NULL,
                        owner     TEXT NOT NULL,
                        repo      TEXT NOT NULL,
                        muted     INTEGER NOT NULL DEFAULT 0,
                        collapsed INTEGER NOT NULL DEFAULT 0
                    );

                    CREATE TABLE IF NOT EXISTS pr_interactions (
                        pr_id                    TEXT PRIMARY KEY,
                        last_visited_at          TEXT,
                        last_approved_at         TEXT,
                        last_seen_sha            TEXT,
                        last_seen_comment_count  INTEGER,
                        last_seen_ci_status      TEXT
                    );

                    CREATE TABLE IF NOT EXISTS settings (
                        key   TEXT PRIMARY KEY,
                        value TEXT NOT NULL
                    );
                    ",
                )?;
                Ok(())
            })
            .await?;
        self.run_migrations().await
    }

    /// Forward-only, idempotent-guarded migrations for databases created
    /// by an earlier schema version. Each migration probes for its target
    /// column via `PRAGMA table_info` before applying the `ALTER TABLE`,
    /// so re-running against an already-migrated database is a no-op.
    async fn run_migrations(&self) -> Result<(), tokio_rusqlite::Error> {
        self.conn
            .call(|conn| {
                if !column_exists(conn, "prs", "has_new_changes")? {
                    conn.execute_batch(
                        "ALTER TABLE prs ADD COLUMN has_new_changes INTEGER NOT NULL DEFAULT 0",
                    )?;
                }
                Ok(())
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Sessions (§4.4)
    // -----------------------------------------------------------------------

    pub async fn add_session(&self, session: &Session) -> Result<(), tokio_rusqlite::Error> {
        let session = session.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (id, label, directory, agent, state, state_since,
                        state_updated_at, last_seen, todos, muted, worktree)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
                     ON CONFLICT(id) DO UPDATE SET
                        label=excluded.label, directory=excluded.directory, agent=excluded.agent,
                        state=excluded.state, state_since=excluded.state_since,
                        state_updated_at=excluded.state_updated_at, last_seen=excluded.last_seen,
                        todos=excluded.todos, muted=excluded.muted, worktree=excluded.worktree",
                    rusqlite::params![
                        session.id,
                        session.label,
                        session.directory,
                        enum_to_sql(&session.agent),
                        enum_to_sql(&session.state),
                        ts(&session.state_since),
                        ts(&session.state_updated_at),
                        ts(&session.last_seen),
                        session.todos.as_ref().map(|t| serde_json::to_string(t).unwrap()),
                        session.muted as i64,
                        session
                            .worktree
                            .as_ref()
                            .map(|w| serde_json::to_string(w).unwrap()),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn remove_session(&self, id: &str) -> Result<bool, tokio_rusqlite::Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let affected = conn.execute("DELETE FROM sessions WHERE id = ?1", rusqlite::params![id])?;
                Ok(affected > 0)
            })
            .await
    }

    pub async fn update_state(
        &self,
        id: &str,
        state: SessionState,
    ) -> Result<Option<Session>, tokio_rusqlite::Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let current = fetch_session(conn, &id)?;
                let Some(mut session) = current else {
                    return Ok(None);
                };
                let now = Utc::now();
                let changed = session.state != state;
                if changed {
                    session.state = state;
                    session.state_since = now;
                }
                session.state_updated_at = now;
                session.last_seen = now;
                write_session(conn, &session)?;
                Ok(Some(session))
            })
            .await
    }

    pub async fn update_todos(
        &self,
        id: &str,
        todos: Vec<String>,
    ) -> Result<Option<Session>, tokio_rusqlite::Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let current = fetch_session(conn, &id)?;
                let Some(mut session) = current else {
                    return Ok(None);
                };
                session.todos = Some(todos);
                session.last_seen = Utc::now();
                write_session(conn, &session)?;
                Ok(Some(session))
            })
            .await
    }

    pub async fn touch(&self, id: &str) -> Result<Option<Session>, tokio_rusqlite::Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let current = fetch_session(conn, &id)?;
                let Some(mut session) = current else {
                    return Ok(None);
                };
                session.last_seen = Utc::now();
                write_session(conn, &session)?;
                Ok(Some(session))
            })
            .await
    }

    pub async fn list_sessions(
        &self,
        filter: SessionFilter,
    ) -> Result<Vec<Session>, tokio_rusqlite::Error> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, label, directory, agent, state, state_since, state_updated_at,
                            last_seen, todos, muted, worktree FROM sessions ORDER BY last_seen DESC",
                )?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let session = row_to_session(row)?;
                    let keep = match filter {
                        SessionFilter::All => true,
                        SessionFilter::State(s) => session.state == s,
                    };
                    if keep {
                        out.push(session);
                    }
                }
                Ok(out)
            })
            .await
    }

    /// Sessions whose `last_seen` is older than `threshold` seconds ago.
    pub async fn stale_sessions(
        &self,
        threshold_secs: i64,
    ) -> Result<Vec<Session>, tokio_rusqlite::Error> {
        self.conn
            .call(move |conn| {
                let cutoff = Utc::now() - chrono::Duration::seconds(threshold_secs);
                let mut stmt = conn.prepare(
                    "SELECT id, label, directory, agent, state, state_since, state_updated_at,
                            last_seen, todos, muted, worktree FROM sessions WHERE last_seen < ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![ts(&cutoff)])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_session(row)?);
                }
                Ok(out)
            })
            .await
    }

    // -----------------------------------------------------------------------
    // PRs (§4.2, §4.5)
    // -----------------------------------------------------------------------

    /// Atomic replace preserving fields the list query cannot provide
    /// (`muted`, detail cache, heat state), computing `has_new_changes`
    /// against the interaction table. PR ids absent from `new_set` are
    /// deleted.
    pub async fn set_prs(&self, new_set: Vec<Pr>) -> Result<Vec<Pr>, tokio_rusqlite::Error> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let now = ts(&Utc::now());
                let mut kept_ids = Vec::with_capacity(new_set.len());
                let mut result = Vec::with_capacity(new_set.len());

                for mut incoming in new_set {
                    let id = incoming.id();
                    kept_ids.push(id.clone());

                    if let Some(existing) = fetch_pr(&tx, &id)? {
                        incoming.muted = existing.muted;
                        incoming.details_fetched = existing.details_fetched;
                        incoming.details_fetched_at = existing.details_fetched_at;
                        incoming.mergeable = existing.mergeable;
                        incoming.mergeable_state = existing.mergeable_state.clone();
                        incoming.ci_status = existing.ci_status;
                        incoming.review_status = existing.review_status;
                        incoming.head_sha = existing.head_sha.clone();
                        incoming.comment_count = existing.comment_count;
                        incoming.heat_state = existing.heat_state;
                        incoming.last_heat_activity_at = existing.last_heat_activity_at;
                    } else {
                        incoming.heat_state = HeatState::Cold;
                        incoming.last_heat_activity_at = Utc::now();
                    }
                    incoming.last_polled = Utc::now();

                    incoming.has_new_changes = compute_has_new_changes(&tx, &incoming)?;

                    write_pr(&tx, &incoming)?;
                    result.push(incoming);
                }

                if kept_ids.is_empty() {
                    tx.execute("DELETE FROM prs", [])?;
                } else {
                    let placeholders = kept_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                    let sql = format!("DELETE FROM prs WHERE id NOT IN ({placeholders})");
                    let params: Vec<&dyn rusqlite::ToSql> =
                        kept_ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
                    tx.execute(&sql, params.as_slice())?;
                }

                let _ = now;
                tx.commit()?;
                Ok(result)
            })
            .await
    }

    pub async fn list_prs(&self) -> Result<Vec<Pr>, tokio_rusqlite::Error> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(PR_SELECT)?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_pr(row)?);
                }
                Ok(out)
            })
            .await
    }

    pub async fn get_pr(&self, id: &str) -> Result<Option<Pr>, tokio_rusqlite::Error> {
        let id = id.to_string();
        self.conn.call(move |conn| Ok(fetch_pr(conn, &id)?)).await
    }

    pub async fn update_pr_details(
        &self,
        id: &str,
        mergeable: Option<bool>,
        mergeable_state: Option<String>,
        ci_status: CiStatus,
        review_status: ReviewStatus,
        head_sha: Option<String>,
        comment_count: u32,
        reason: PrReason,
        state: PrState,
    ) -> Result<Option<Pr>, tokio_rusqlite::Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let Some(mut pr) = fetch_pr(conn, &id)? else {
                    return Ok(None);
                };
                pr.mergeable = mergeable;
                pr.mergeable_state = mergeable_state;
                pr.ci_status = ci_status;
                pr.review_status = review_status;
                pr.head_sha = head_sha;
                pr.comment_count = comment_count;
                pr.reason = reason;
                pr.state = state;
                pr.details_fetched = true;
                pr.details_fetched_at = Some(Utc::now());
                write_pr(conn, &pr)?;
                Ok(Some(pr))
            })
            .await
    }

    /// Transition heat to hot and stamp `last_heat_activity_at`.
    pub async fn set_pr_hot(&self, id: &str) -> Result<Option<Pr>, tokio_rusqlite::Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let Some(mut pr) = fetch_pr(conn, &id)? else {
                    return Ok(None);
                };
                pr.heat_state = HeatState::Hot;
                pr.last_heat_activity_at = Utc::now();
                write_pr(conn, &pr)?;
                Ok(Some(pr))
            })
            .await
    }

    /// hot -> warm after `decay_hot_to_warm_secs`; warm -> cold after
    /// `decay_warm_to_cold_secs`, both measured from `last_heat_activity_at`.
    pub async fn decay_heat_states(
        &self,
        intervals: HeatIntervals,
    ) -> Result<usize, tokio_rusqlite::Error> {
        self.conn
            .call(move |conn| {
                let now = Utc::now();
                let hot_cutoff = ts(&(now - chrono::Duration::seconds(intervals.decay_hot_to_warm_secs as i64)));
                let warm_cutoff = ts(&(now - chrono::Duration::seconds(intervals.decay_warm_to_cold_secs as i64)));

                let hot_to_warm = conn.execute(
                    "UPDATE prs SET heat_state = 'warm'
                     WHERE heat_state = 'hot' AND last_heat_activity_at < ?1",
                    rusqlite::params![hot_cutoff],
                )?;
                let warm_to_cold = conn.execute(
                    "UPDATE prs SET heat_state = 'cold'
                     WHERE heat_state = 'warm' AND last_heat_activity_at < ?1",
                    rusqlite::params![warm_cutoff],
                )?;
                Ok(hot_to_warm + warm_to_cold)
            })
            .await
    }

    /// Unmuted PRs (and PRs in unmuted repos) whose elapsed time since
    /// `details_fetched_at` exceeds the heat interval for their state, plus
    /// any PR never detail-fetched.
    pub async fn get_prs_needing_detail_refresh(
        &self,
        intervals: HeatIntervals,
    ) -> Result<Vec<Pr>, tokio_rusqlite::Error> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(PR_SELECT)?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                let now = Utc::now();
                while let Some(row) = rows.next()? {
                    let pr = row_to_pr(row)?;
                    if pr.muted || repo_is_muted(conn, &pr.coords)? {
                        continue;
                    }
                    if !pr.details_fetched {
                        out.push(pr);
                        continue;
                    }
                    let interval_secs = match pr.heat_state {
                        HeatState::Hot => intervals.refresh_hot_secs,
                        HeatState::Warm => intervals.refresh_warm_secs,
                        HeatState::Cold => intervals.refresh_cold_secs,
                    };
                    let last = pr.details_fetched_at.unwrap_or(pr.last_polled);
                    if (now - last).num_seconds() as u64 >= interval_secs {
                        out.push(pr);
                    }
                }
                Ok(out)
            })
            .await
    }

    pub async fn mark_pr_visited(&self, id: &str) -> Result<(), tokio_rusqlite::Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let pr = fetch_pr(conn, &id)?;
                let now = ts(&Utc::now());
                let (head_sha, comment_count, ci_status) = match &pr {
                    Some(pr) => (
                        pr.head_sha.clone(),
                        Some(pr.comment_count),
                        Some(enum_to_sql(&pr.ci_status)),
                    ),
                    None => (None, None, None),
                };
                conn.execute(
                    "INSERT INTO pr_interactions (pr_id, last_visited_at, last_approved_at,
                        last_seen_sha, last_seen_comment_count, last_seen_ci_status)
                     VALUES (?1,?2,NULL,?3,?4,?5)
                     ON CONFLICT(pr_id) DO UPDATE SET
                        last_visited_at=excluded.last_visited_at,
                        last_seen_sha=excluded.last_seen_sha,
                        last_seen_comment_count=excluded.last_seen_comment_count,
                        last_seen_ci_status=excluded.last_seen_ci_status",
                    rusqlite::params![id, now, head_sha, comment_count, ci_status],
                )?;
                if let Some(mut pr) = pr {
                    pr.has_new_changes = false;
                    write_pr(conn, &pr)?;
                }
                Ok(())
            })
            .await
    }

    pub async fn mark_pr_approved(&self, id: &str) -> Result<(), tokio_rusqlite::Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let now = ts(&Utc::now());
                conn.execute(
                    "INSERT INTO pr_interactions (pr_id, last_approved_at)
                     VALUES (?1,?2)
                     ON CONFLICT(pr_id) DO UPDATE SET last_approved_at=excluded.last_approved_at",
                    rusqlite::params![id, now],
                )?;
                if let Some(mut pr) = fetch_pr(conn, &id)? {
                    pr.approved_by_me = true;
                    write_pr(conn, &pr)?;
                }
                Ok(())
            })
            .await
    }

    pub async fn get_interaction(
        &self,
        pr_id: &str,
    ) -> Result<Option<PrInteraction>, tokio_rusqlite::Error> {
        let pr_id = pr_id.to_string();
        self.conn.call(move |conn| Ok(fetch_interaction(conn, &pr_id)?)).await
    }

    // -----------------------------------------------------------------------
    // Repos (§3)
    // -----------------------------------------------------------------------

    pub async fn list_repos(&self) -> Result<Vec<RepoState>, tokio_rusqlite::Error> {
        self.conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT host, owner, repo, muted, collapsed FROM repos")?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_repo(row)?);
                }
                Ok(out)
            })
            .await
    }

    pub async fn set_repo_muted(
        &self,
        host: &str,
        owner: &str,
        repo: &str,
        muted: bool,
    ) -> Result<RepoState, tokio_rusqlite::Error> {
        let (host, owner, repo) = (host.to_string(), owner.to_string(), repo.to_string());
        self.conn
            .call(move |conn| {
                let key = format!("{host}/{owner}/{repo}");
                conn.execute(
                    "INSERT INTO repos (key, host, owner, repo, muted, collapsed)
                     VALUES (?1,?2,?3,?4,?5,0)
                     ON CONFLICT(key) DO UPDATE SET muted=excluded.muted",
                    rusqlite::params![key, host, owner, repo, muted as i64],
                )?;
                let mut stmt = conn
                    .prepare("SELECT host, owner, repo, muted, collapsed FROM repos WHERE key = ?1")?;
                let mut rows = stmt.query(rusqlite::params![key])?;
                let row = rows.next()?.expect("just inserted");
                Ok(row_to_repo(row)?)
            })
            .await
    }

    pub async fn set_repo_collapsed(
        &self,
        host: &str,
        owner: &str,
        repo: &str,
        collapsed: bool,
    ) -> Result<RepoState, tokio_rusqlite::Error> {
        let (host, owner, repo) = (host.to_string(), owner.to_string(), repo.to_string());
        self.conn
            .call(move |conn| {
                let key = format!("{host}/{owner}/{repo}");
                conn.execute(
                    "INSERT INTO repos (key, host, owner, repo, muted, collapsed)
                     VALUES (?1,?2,?3,?4,0,?5)
                     ON CONFLICT(key) DO UPDATE SET collapsed=excluded.collapsed",
                    rusqlite::params![key, host, owner, repo, collapsed as i64],
                )?;
                let mut stmt = conn
                    .prepare("SELECT host, owner, repo, muted, collapsed FROM repos WHERE key = ?1")?;
                let mut rows = stmt.query(rusqlite::params![key])?;
                let row = rows.next()?.expect("just inserted");
                Ok(row_to_repo(row)?)
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Muted authors + settings (§3)
    // -----------------------------------------------------------------------

    pub async fn muted_authors(&self) -> Result<Vec<String>, tokio_rusqlite::Error> {
        let raw = self.get_setting("muted_authors").await?;
        Ok(raw
            .and_then(|v| serde_json::from_str::<Vec<String>>(&v).ok())
            .unwrap_or_default())
    }

    pub async fn set_author_muted(
        &self,
        login: &str,
        muted: bool,
    ) -> Result<Vec<String>, tokio_rusqlite::Error> {
        let mut authors = self.muted_authors().await?;
        if muted {
            if !authors.iter().any(|a| a == login) {
                authors.push(login.to_string());
            }
        } else {
            authors.retain(|a| a != login);
        }
        let encoded = serde_json::to_string(&authors).expect("serialize muted authors");
        self.set_setting("muted_authors", &encoded).await?;
        Ok(authors)
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, tokio_rusqlite::Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
                let mut rows = stmt.query(rusqlite::params![key])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row.get::<_, String>(0)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), tokio_rusqlite::Error> {
        let (key, value) = (key.to_string(), value.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO settings (key, value) VALUES (?1,?2)
                     ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                    rusqlite::params![key, value],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn all_settings(&self) -> Result<Vec<(String, String)>, tokio_rusqlite::Error> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push((row.get(0)?, row.get(1)?));
                }
                Ok(out)
            })
            .await
    }
}

fn column_exists(conn: &rusqlite::Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn repo_is_muted(conn: &rusqlite::Connection, coords: &PrCoords) -> rusqlite::Result<bool> {
    let key = format!("{}/{}/{}", coords.host, coords.owner, coords.repo);
    let mut stmt = conn.prepare("SELECT muted FROM repos WHERE key = ?1")?;
    let mut rows = stmt.query(rusqlite::params![key])?;
    match rows.next()? {
        Some(row) => Ok(row.get::<_, i64>(0)? != 0),
        None => Ok(false),
    }
}

/// has_new_changes per §4.5: head_sha changed, comment_count increased, or
/// (for author role / approved_by_me) CI transitioned pending -> terminal.
fn compute_has_new_changes(conn: &rusqlite::Connection, pr: &Pr) -> rusqlite::Result<bool> {
    let Some(interaction) = fetch_interaction(conn, &pr.id())? else {
        return Ok(false);
    };
    if let (Some(seen_sha), Some(current_sha)) = (&interaction.last_seen_sha, &pr.head_sha) {
        if seen_sha != current_sha {
            return Ok(true);
        }
    }
    if let Some(seen_count) = interaction.last_seen_comment_count {
        if pr.comment_count > seen_count {
            return Ok(true);
        }
    }
    let cares_about_ci = pr.role == PrRole::Author || pr.approved_by_me;
    if cares_about_ci {
        if let Some(seen_ci) = interaction.last_seen_ci_status {
            let was_pending = seen_ci == CiStatus::Pending;
            let now_terminal = matches!(pr.ci_status, CiStatus::Success | CiStatus::Failure);
            if was_pending && now_terminal {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

const PR_SELECT: &str = "SELECT id, host, owner, repo, number, role, state, reason, title, url,
    last_updated, last_polled, muted, details_fetched, details_fetched_at, mergeable,
    mergeable_state, ci_status, review_status, head_sha, comment_count, approved_by_me,
    heat_state, last_heat_activity_at, has_new_changes FROM prs";

fn fetch_pr(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Pr>> {
    let sql = format!("{PR_SELECT} WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(rusqlite::params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_pr(row)?)),
        None => Ok(None),
    }
}

fn write_pr(conn: &rusqlite::Connection, pr: &Pr) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO prs (id, host, owner, repo, number, role, state, reason, title, url,
            last_updated, last_polled, muted, details_fetched, details_fetched_at, mergeable,
            mergeable_state, ci_status, review_status, head_sha, comment_count, approved_by_me,
            heat_state, last_heat_activity_at, has_new_changes)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25)
         ON CONFLICT(id) DO UPDATE SET
            role=excluded.role, state=excluded.state, reason=excluded.reason, title=excluded.title,
            url=excluded.url, last_updated=excluded.last_updated, last_polled=excluded.last_polled,
            muted=excluded.muted, details_fetched=excluded.details_fetched,
            details_fetched_at=excluded.details_fetched_at, mergeable=excluded.mergeable,
            mergeable_state=excluded.mergeable_state, ci_status=excluded.ci_status,
            review_status=excluded.review_status, head_sha=excluded.head_sha,
            comment_count=excluded.comment_count, approved_by_me=excluded.approved_by_me,
            heat_state=excluded.heat_state, last_heat_activity_at=excluded.last_heat_activity_at,
            has_new_changes=excluded.has_new_changes",
        rusqlite::params![
            pr.id(),
            pr.coords.host,
            pr.coords.owner,
            pr.coords.repo,
            pr.coords.number,
            enum_to_sql(&pr.role),
            enum_to_sql(&pr.state),
            enum_to_sql(&pr.reason),
            pr.title,
            pr.url,
            ts(&pr.last_updated),
            ts(&pr.last_polled),
            pr.muted as i64,
            pr.details_fetched as i64,
            pr.details_fetched_at.as_ref().map(ts),
            pr.mergeable.map(|m| m as i64),
            pr.mergeable_state,
            enum_to_sql(&pr.ci_status),
            enum_to_sql(&pr.review_status),
            pr.head_sha,
            pr.comment_count,
            pr.approved_by_me as i64,
            enum_to_sql(&pr.heat_state),
            ts(&pr.last_heat_activity_at),
            pr.has_new_changes as i64,
        ],
    )?;
    Ok(())
}

fn row_to_pr(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pr> {
    let role_str: String = row.get(5)?;
    let state_str: String = row.get(6)?;
    let reason_str: String = row.get(7)?;
    let last_updated_str: String = row.get(10)?;
    let last_polled_str: String = row.get(11)?;
    let details_fetched_at_str: Option<String> = row.get(14)?;
    let mergeable_int: Option<i64> = row.get(15)?;
    let ci_status_str: String = row.get(17)?;
    let review_status_str: String = row.get(18)?;
    let heat_state_str: String = row.get(22)?;
    let last_heat_activity_str: String = row.get(23)?;

    Ok(Pr {
        coords: PrCoords {
            host: row.get(1)?,
            owner: row.get(2)?,
            repo: row.get(3)?,
            number: row.get::<_, i64>(4)? as u64,
        },
        role: enum_from_sql(&role_str),
        state: enum_from_sql(&state_str),
        reason: enum_from_sql(&reason_str),
        title: row.get(8)?,
        url: row.get(9)?,
        last_updated: parse_ts(&last_updated_str),
        last_polled: parse_ts(&last_polled_str),
        muted: row.get::<_, i64>(12)? != 0,
        details_fetched: row.get::<_, i64>(13)? != 0,
        details_fetched_at: details_fetched_at_str.map(|s| parse_ts(&s)),
        mergeable: mergeable_int.map(|m| m != 0),
        mergeable_state: row.get(16)?,
        ci_status: enum_from_sql(&ci_status_str),
        review_status: enum_from_sql(&review_status_str),
        head_sha: row.get(19)?,
        comment_count: row.get::<_, i64>(20)? as u32,
        approved_by_me: row.get::<_, i64>(21)? != 0,
        heat_state: enum_from_sql(&heat_state_str),
        last_heat_activity_at: parse_ts(&last_heat_activity_str),
        has_new_changes: row.get::<_, i64>(24)? != 0,
    })
}

fn fetch_session(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Session>> {
    let mut stmt = conn.prepare(
        "SELECT id, label, directory, agent, state, state_since, state_updated_at,
                last_seen, todos, muted, worktree FROM sessions WHERE id = ?1",
    )?;
    let mut rows = stmt.query(rusqlite::params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_session(row)?)),
        None => Ok(None),
    }
}

fn write_session(conn: &rusqlite::Connection, session: &Session) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, label, directory, agent, state, state_since,
            state_updated_at, last_seen, todos, muted, worktree)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
         ON CONFLICT(id) DO UPDATE SET
            label=excluded.label, directory=excluded.directory, agent=excluded.agent,
            state=excluded.state, state_since=excluded.state_since,
            state_updated_at=excluded.state_updated_at, last_seen=excluded.last_seen,
            todos=excluded.todos, muted=excluded.muted, worktree=excluded.worktree",
        rusqlite::params![
            session.id,
            session.label,
            session.directory,
            enum_to_sql(&session.agent),
            enum_to_sql(&session.state),
            ts(&session.state_since),
            ts(&session.state_updated_at),
            ts(&session.last_seen),
            session.todos.as_ref().map(|t| serde_json::to_string(t).unwrap()),
            session.muted as i64,
            session.worktree.as_ref().map(|w| serde_json::to_string(w).unwrap()),
        ],
    )?;
    Ok(())
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let agent_str: String = row.get(3)?;
    let state_str: String = row.get(4)?;
    let state_since_str: String = row.get(5)?;
    let state_updated_at_str: String = row.get(6)?;
    let last_seen_str: String = row.get(7)?;
    let todos_str: Option<String> = row.get(8)?;
    let worktree_str: Option<String> = row.get(10)?;

    Ok(Session {
        id: row.get(0)?,
        label: row.get(1)?,
        directory: row.get(2)?,
        agent: enum_from_sql(&agent_str),
        state: enum_from_sql(&state_str),
        state_since: parse_ts(&state_since_str),
        state_updated_at: parse_ts(&state_updated_at_str),
        last_seen: parse_ts(&last_seen_str),
        todos: todos_str.map(|s| serde_json::from_str(&s).expect("valid json todos")),
        muted: row.get::<_, i64>(9)? != 0,
        worktree: worktree_str.map(|s| serde_json::from_str(&s).expect("valid json worktree")),
    })
}

fn fetch_interaction(
    conn: &rusqlite::Connection,
    pr_id: &str,
) -> rusqlite::Result<Option<PrInteraction>> {
    let mut stmt = conn.prepare(
        "SELECT pr_id, last_visited_at, last_approved_at, last_seen_sha,
                last_seen_comment_count, last_seen_ci_status FROM pr_interactions WHERE pr_id = ?1",
    )?;
    let mut rows = stmt.query(rusqlite::params![pr_id])?;
    match rows.next()? {
        Some(row) => {
            let last_visited_str: Option<String> = row.get(1)?;
            let last_approved_str: Option<String> = row.get(2)?;
            let last_seen_ci_str: Option<String> = row.get(5)?;
            Ok(Some(PrInteraction {
                pr_id: row.get(0)?,
                last_visited_at: last_visited_str.map(|s| parse_ts(&s)),
                last_approved_at: last_approved_str.map(|s| parse_ts(&s)),
                last_seen_sha: row.get(3)?,
                last_seen_comment_count: row.get::<_, Option<i64>>(4)?.map(|c| c as u32),
                last_seen_ci_status: last_seen_ci_str.map(|s| enum_from_sql(&s)),
            }))
        }
        None => Ok(None),
    }
}

fn row_to_repo(row: &rusqlite::Row<'_>) -> rusqlite::Result<RepoState> {
    Ok(RepoState {
        host: row.get(0)?,
        owner: row.get(1)?,
        repo: row.get(2)?,
        muted: row.get::<_, i64>(3)? != 0,
        collapsed: row.get::<_, i64>(4)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentKind;

    fn sample_session(id: &str) -> Session {
        Session::new(id, "my-repo", "/tmp/my-repo", AgentKind::Claude)
    }

    fn sample_pr(number: u64) -> Pr {
        let now = Utc::now();
        Pr {
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
            url: "https://github.com/acme/widgets/pull/42".into(),
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
            heat_state: HeatState::Cold,
            last_heat_activity_at: now,
            has_new_changes: false,
        }
    }

    #[tokio::test]
    async fn add_and_list_sessions() {
        let store = Store::open_in_memory().await.unwrap();
        store.add_session(&sample_session("s1")).await.unwrap();
        let sessions = store.list_sessions(SessionFilter::All).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "s1");
    }

    #[tokio::test]
    async fn update_state_is_idempotent_on_repeat() {
        let store = Store::open_in_memory().await.unwrap();
        store.add_session(&sample_session("s1")).await.unwrap();

        let first = store
            .update_state("s1", SessionState::WaitingInput)
            .await
            .unwrap()
            .unwrap();
        let second = store
            .update_state("s1", SessionState::WaitingInput)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.state, SessionState::WaitingInput);
        assert_eq!(first.state_since, second.state_since);
    }

    #[tokio::test]
    async fn set_prs_deletes_absent_ids() {
        let store = Store::open_in_memory().await.unwrap();
        store.set_prs(vec![sample_pr(1), sample_pr(2)]).await.unwrap();
        let kept = store.set_prs(vec![sample_pr(2)]).await.unwrap();

        assert_eq!(kept.len(), 1);
        let all = store.list_prs().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].coords.number, 2);
    }

    #[tokio::test]
    async fn set_prs_preserves_muted_and_heat_state() {
        let store = Store::open_in_memory().await.unwrap();
        store.set_prs(vec![sample_pr(1)]).await.unwrap();
        let id = sample_pr(1).id();
        store.set_repo_muted("github.com", "acme", "widgets", false).await.unwrap();
        store.set_pr_hot(&id).await.unwrap();

        let resynced = store.set_prs(vec![sample_pr(1)]).await.unwrap();
        assert_eq!(resynced[0].heat_state, HeatState::Hot);
    }

    #[tokio::test]
    async fn set_pr_hot_then_decay_past_window_reaches_cold() {
        let store = Store::open_in_memory().await.unwrap();
        store.set_prs(vec![sample_pr(1)]).await.unwrap();
        let id = sample_pr(1).id();
        store.set_pr_hot(&id).await.unwrap();

        store
            .conn
            .call({
                let id = id.clone();
                move |conn| {
                    conn.execute(
                        "UPDATE prs SET last_heat_activity_at = ?1 WHERE id = ?2",
                        rusqlite::params![ts(&(Utc::now() - chrono::Duration::minutes(15))), id],
                    )?;
                    Ok(())
                }
            })
            .await
            .unwrap();

        store.decay_heat_states(HeatIntervals::default()).await.unwrap();
        let pr = store.get_pr(&id).await.unwrap().unwrap();
        assert_eq!(pr.heat_state, HeatState::Cold);
    }

    #[tokio::test]
    async fn mark_pr_visited_clears_has_new_changes() {
        let store = Store::open_in_memory().await.unwrap();
        let mut pr = sample_pr(1);
        pr.head_sha = Some("aaa".into());
        store.set_prs(vec![pr.clone()]).await.unwrap();
        store.mark_pr_visited(&pr.id()).await.unwrap();

        pr.head_sha = Some("aaa".into());
        let resynced = store.set_prs(vec![pr.clone()]).await.unwrap();
        assert!(!resynced[0].has_new_changes);
    }

    #[tokio::test]
    async fn muted_repo_excludes_prs_from_detail_refresh() {
        let store = Store::open_in_memory().await.unwrap();
        let mut pr = sample_pr(1);
        pr.details_fetched = true;
        pr.details_fetched_at = Some(Utc::now());
        store.set_prs(vec![pr.clone()]).await.unwrap();
        store.set_repo_muted("github.com", "acme", "widgets", true).await.unwrap();

        let needing = store
            .get_prs_needing_detail_refresh(HeatIntervals::default())
            .await
            .unwrap();
        assert!(needing.is_empty());
    }

    #[tokio::test]
    async fn never_fetched_pr_always_needs_refresh() {
        let store = Store::open_in_memory().await.unwrap();
        store.set_prs(vec![sample_pr(1)]).await.unwrap();
        let needing = store
            .get_prs_needing_detail_refresh(HeatIntervals::default())
            .await
            .unwrap();
        assert_eq!(needing.len(), 1);
    }

    #[tokio::test]
    async fn settings_roundtrip() {
        let store = Store::open_in_memory().await.unwrap();
        store.set_setting("projects_directory", "/home/dev/code").await.unwrap();
        let value = store.get_setting("projects_directory").await.unwrap();
        assert_eq!(value.as_deref(), Some("/home/dev/code"));
    }

    #[tokio::test]
    async fn muted_authors_add_and_remove() {
        let store = Store::open_in_memory().await.unwrap();
        store.set_author_muted("bot-user", true).await.unwrap();
        assert_eq!(store.muted_authors().await.unwrap(), vec!["bot-user"]);
        store.set_author_muted("bot-user", false).await.unwrap();
        assert!(store.muted_authors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn migrations_are_idempotent_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attn.db");
        {
            let store = Store::open(&path).await.unwrap();
            store.add_session(&sample_session("s1")).await.unwrap();
        }
        let reopened = Store::open(&path).await.unwrap();
        let sessions = reopened.list_sessions(SessionFilter::All).await.unwrap();
        assert_eq!(sessions.len(), 1);
    }
}
