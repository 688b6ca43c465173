//! Pluggable fact-extraction backend. The heuristic extractor in
//! `extract.rs` is the default and requires no network access; an
//! `LlmProvider` is an optional upgrade the caller wires in, mirroring
//! `distiller.py`'s `get_provider(config)` indirection without committing
//! this crate to any particular vendor SDK.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("llm call failed: {0}")]
    CallFailed(String),
}

pub trait LlmProvider: Send + Sync {
    /// One-shot chat completion: system instruction plus user content in,
    /// raw text out. Implementations own their own timeout/retry policy.
    fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;
}
