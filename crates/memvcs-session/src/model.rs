//! Persisted shapes: a buffered `Observation`, the `Session` that groups
//! them, and the tunables that decide when a session auto-commits.
//! Grounded on `session.py`'s `Observation`/`Session`/`SessionConfig`
//! dataclasses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub id: String,
    pub timestamp: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub result: Option<String>,
    pub topic: Option<String>,
    pub memory_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub started_at: String,
    pub project_context: Option<String>,
    pub observations: Vec<Observation>,
    /// topic -> observation ids, in first-seen order.
    pub topics: BTreeMap<String, Vec<String>>,
    pub last_activity: Option<String>,
    pub ended_at: Option<String>,
    pub commit_count: u32,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub idle_timeout_seconds: i64,
    pub max_session_hours: f64,
    pub min_session_seconds: i64,
    pub commit_interval_seconds: i64,
    pub max_observations_per_commit: usize,
    pub min_observations_for_commit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: 300,
            max_session_hours: 8.0,
            min_session_seconds: 60,
            commit_interval_seconds: 300,
            max_observations_per_commit: 50,
            min_observations_for_commit: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusReport {
    pub active: bool,
    pub session_id: Option<String>,
    pub status: Option<SessionStatus>,
    pub started_at: Option<String>,
    pub observation_count: usize,
    pub topics: Vec<String>,
    pub commit_count: u32,
    pub last_activity: Option<String>,
}
