//! Configuration loading: binary-name-derived defaults, a JSON config file,
//! and `ATTN_*` environment overrides (highest priority).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Totally ordered debug verbosity, least to most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl DebugLevel {
    pub fn as_tracing_filter(&self) -> &'static str {
        match self {
            DebugLevel::Error => "error",
            DebugLevel::Warn => "warn",
            DebugLevel::Info => "info",
            DebugLevel::Debug => "debug",
            DebugLevel::Trace => "trace",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(DebugLevel::Error),
            "warn" | "warning" => Some(DebugLevel::Warn),
            "info" => Some(DebugLevel::Info),
            "debug" => Some(DebugLevel::Debug),
            "trace" => Some(DebugLevel::Trace),
            _ => None,
        }
    }
}

impl Default for DebugLevel {
    fn default() -> Self {
        DebugLevel::Info
    }
}

/// Intervals controlling the PR ingestion / heat scheduler (all in seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatIntervals {
    pub refresh_hot_secs: u64,
    pub refresh_warm_secs: u64,
    pub refresh_cold_secs: u64,
    pub decay_hot_to_warm_secs: u64,
    pub decay_warm_to_cold_secs: u64,
}

impl Default for HeatIntervals {
    fn default() -> Self {
        Self {
            refresh_hot_secs: 30,
            refresh_warm_secs: 120,
            refresh_cold_secs: 600,
            decay_hot_to_warm_secs: 180,
            decay_warm_to_cold_secs: 600,
        }
    }
}

/// Session-registry staleness thresholds (all in seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionThresholds {
    pub idle_after_secs: u64,
    pub unregister_after_secs: u64,
}

impl Default for SessionThresholds {
    fn default() -> Self {
        Self {
            idle_after_secs: 300,
            unregister_after_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub socket_path: PathBuf,
    pub db_path: PathBuf,
    pub log_path: PathBuf,
    pub ws_port: u16,
    pub debug_level: DebugLevel,

    pub poll_interval_secs: u64,
    pub poll_backoff_secs: u64,

    #[serde(default)]
    pub heat: HeatIntervals,
    #[serde(default)]
    pub session: SessionThresholds,

    pub mock_reviewer: Option<String>,
    pub mock_gh_url: Option<String>,
    pub mock_gh_token: Option<String>,
    pub mock_gh_host: Option<String>,
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Derive the basename of argv[0], falling back to "attn".
pub fn binary_name() -> String {
    std::env::args()
        .next()
        .map(|p| {
            Path::new(&p)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "attn".to_string())
        })
        .unwrap_or_else(|| "attn".to_string())
}

impl Config {
    /// Defaults derived purely from the binary name, with no env/file layering.
    pub fn defaults_for(binary_name: &str) -> Self {
        let dir = home_dir().join(format!(".{binary_name}"));
        Self {
            socket_path: dir.join(format!("{binary_name}.sock")),
            db_path: dir.join(format!("{binary_name}.db")),
            log_path: dir.join("daemon.log"),
            ws_port: 9849,
            debug_level: DebugLevel::default(),
            poll_interval_secs: 90,
            poll_backoff_secs: 300,
            heat: HeatIntervals::default(),
            session: SessionThresholds::default(),
            mock_reviewer: None,
            mock_gh_url: None,
            mock_gh_token: None,
            mock_gh_host: None,
        }
    }

    /// Default path for the JSON config file: `~/.attn/config.json`
    /// (using the derived binary name, not a hardcoded "attn").
    pub fn default_config_path(binary_name: &str) -> PathBuf {
        home_dir().join(format!(".{binary_name}")).join("config.json")
    }

    /// Load configuration: defaults, overlaid by the JSON config file (if
    /// present and parseable), overlaid by `ATTN_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let binary = binary_name();
        let mut config = Self::defaults_for(&binary);

        let config_path = std::env::var("ATTN_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_config_path(&binary));

        if config_path.exists() {
            config.merge_file(&config_path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file_config: PartialConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        file_config.apply_to(self);
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ATTN_SOCKET_PATH") {
            self.socket_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ATTN_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ATTN_WS_PORT") {
            if let Ok(port) = v.parse() {
                self.ws_port = port;
            }
        }
        if let Ok(v) = std::env::var("ATTN_MOCK_REVIEWER") {
            self.mock_reviewer = Some(v);
        }
        if let Ok(v) = std::env::var("ATTN_MOCK_GH_URL") {
            self.mock_gh_url = Some(v);
        }
        if let Ok(v) = std::env::var("ATTN_MOCK_GH_TOKEN") {
            self.mock_gh_token = Some(v);
        }
        if let Ok(v) = std::env::var("ATTN_MOCK_GH_HOST") {
            self.mock_gh_host = Some(v);
        }
        if let Ok(v) = std::env::var("DEBUG") {
            if let Some(level) = DebugLevel::parse(&v) {
                self.debug_level = level;
            }
        }
    }
}

/// Mirror of `Config` with every field optional, used to merge the JSON
/// config file (lower priority than environment overrides) without
/// clobbering fields the file omits.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    socket_path: Option<PathBuf>,
    db_path: Option<PathBuf>,
    log_path: Option<PathBuf>,
    ws_port: Option<u16>,
    debug_level: Option<DebugLevel>,
    poll_interval_secs: Option<u64>,
    poll_backoff_secs: Option<u64>,
    heat: Option<HeatIntervals>,
    session: Option<SessionThresholds>,
    mock_reviewer: Option<String>,
    mock_gh_url: Option<String>,
    mock_gh_token: Option<String>,
    mock_gh_host: Option<String>,
}

impl PartialConfig {
    fn apply_to(self, config: &mut Config) {
        if let Some(v) = self.socket_path {
            config.socket_path = v;
        }
        if let Some(v) = self.db_path {
            config.db_path = v;
        }
        if let Some(v) = self.log_path {
            config.log_path = v;
        }
        if let Some(v) = self.ws_port {
            config.ws_port = v;
        }
        if let Some(v) = self.debug_level {
            config.debug_level = v;
        }
        if let Some(v) = self.poll_interval_secs {
            config.poll_interval_secs = v;
        }
        if let Some(v) = self.poll_backoff_secs {
            config.poll_backoff_secs = v;
        }
        if let Some(v) = self.heat {
            config.heat = v;
        }
        if let Some(v) = self.session {
            config.session = v;
        }
        if self.mock_reviewer.is_some() {
            config.mock_reviewer = self.mock_reviewer;
        }
        if self.mock_gh_url.is_some() {
            config.mock_gh_url = self.mock_gh_url;
        }
        if self.mock_gh_token.is_some() {
            config.mock_gh_token = self.mock_gh_token;
        }
        if self.mock_gh_host.is_some() {
            config.mock_gh_host = self.mock_gh_host;
        }
    }
}
