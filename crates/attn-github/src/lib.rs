//! GitHub access for the attn daemon: the subprocess-backed client, its
//! in-process mock, and the reason-derivation table that turns raw PR
//! detail fields into a user-facing `(reason, state)` pair.

pub mod client;
pub mod reason;

pub use client::{build_client, GitHubClient, GitHubError, MockGitHubClient, MockPr, PrSummary, ShellGitHubClient};
pub use reason::derive_reason;
