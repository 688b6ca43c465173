//! Episodic-to-semantic distillation: keyword clustering, heuristic or
//! LLM-backed fact extraction, optional differential-privacy sampling,
//! and a safety-branch commit of the result.

pub mod cluster;
pub mod extract;
pub mod llm;
pub mod pipeline;

pub use cluster::{cluster_episodes, EpisodeCluster};
pub use extract::{candidate_facts, chunk_by_sentences, dedup_facts, extract_facts};
pub use llm::{LlmError, LlmProvider};
pub use pipeline::{run, DistillConfig, DistillError, DistillResult};
