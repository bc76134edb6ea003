//! Structured logging for the attn daemon, built on `tracing` and
//! `tracing-subscriber`.

pub mod logging;
