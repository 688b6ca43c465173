//! Session lifecycle, observation buffering, and auto-commit, grounded on
//! `session.py::SessionManager`. Persists the single active session as
//! `current_session.json` under the repository's internal storage and
//! commits its accumulated observations through [`memvcs_repo::Repository`].

use std::collections::BTreeMap;

use memvcs_objects::Author;
use memvcs_repo::{RepoError, Repository};
use memvcs_storage::StorageError;
use serde_json::Value;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::model::{Observation, Session, SessionConfig, SessionStatus, SessionStatusReport};
use crate::topic::{infer_memory_type, TopicClassifier};

const SESSION_PATH: &str = "current_session.json";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("malformed {SESSION_PATH}: {0}")]
    Malformed(String),
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub struct SessionManager<'r> {
    repo: &'r Repository,
    config: SessionConfig,
    classifier: TopicClassifier,
    session: Option<Session>,
}

impl<'r> SessionManager<'r> {
    pub fn new(repo: &'r Repository, config: SessionConfig) -> Result<Self, SessionError> {
        let session = Self::load(repo)?;
        Ok(Self {
            repo,
            config,
            classifier: TopicClassifier,
            session,
        })
    }

    fn load(repo: &Repository) -> Result<Option<Session>, SessionError> {
        match repo.meta_storage().read(SESSION_PATH) {
            Ok(bytes) => {
                let session = serde_json::from_slice(&bytes).map_err(|e| SessionError::Malformed(e.to_string()))?;
                Ok(Some(session))
            }
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self) -> Result<(), SessionError> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(session).map_err(|e| SessionError::Malformed(e.to_string()))?;
        self.repo.meta_storage().write(SESSION_PATH, &bytes)?;
        Ok(())
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Start a new session, or resume the on-disk one if it's already
    /// `Active`.
    pub fn start_session(&mut self, project_context: Option<String>) -> Result<&Session, SessionError> {
        if let Some(existing) = &self.session {
            if existing.status == SessionStatus::Active {
                return Ok(self.session.as_ref().unwrap());
            }
        }
        let id: String = Uuid::new_v4().to_string().chars().take(8).collect();
        let session = Session {
            id,
            started_at: now(),
            project_context,
            observations: Vec::new(),
            topics: BTreeMap::new(),
            last_activity: Some(now()),
            ended_at: None,
            commit_count: 0,
            status: SessionStatus::Active,
        };
        self.session = Some(session);
        self.save()?;
        Ok(self.session.as_ref().unwrap())
    }

    /// End the session, committing its buffered observations unless
    /// `commit` is false or there is nothing buffered.
    pub fn end_session(&mut self, commit: bool, author: Author) -> Result<Option<String>, SessionError> {
        let Some(session) = &mut self.session else {
            return Ok(None);
        };
        session.ended_at = Some(now());
        session.status = SessionStatus::Ended;

        let commit_hash = if commit && !session.observations.is_empty() {
            self.commit_session(author)?
        } else {
            None
        };
        self.save()?;
        Ok(commit_hash)
    }

    pub fn pause_session(&mut self) -> Result<(), SessionError> {
        if let Some(session) = &mut self.session {
            session.status = SessionStatus::Paused;
        }
        self.save()
    }

    /// Resume a `Paused` session; no-op (returns `None`) for any other
    /// status, mirroring the Python original's refusal to resume an
    /// already-ended session.
    pub fn resume_session(&mut self) -> Result<Option<&Session>, SessionError> {
        let should_resume = matches!(Self::load(self.repo)?, Some(s) if s.status == SessionStatus::Paused);
        if !should_resume {
            return Ok(None);
        }
        if let Some(session) = &mut self.session {
            session.status = SessionStatus::Active;
            session.last_activity = Some(now());
        }
        self.save()?;
        Ok(self.session.as_ref())
    }

    pub fn discard_session(&mut self) -> Result<(), SessionError> {
        self.repo.meta_storage().delete(SESSION_PATH)?;
        self.session = None;
        Ok(())
    }

    /// Buffer one observation, auto-starting a session if none is active,
    /// and trigger an auto-commit if the buffering thresholds say so.
    /// Returns the observation id and, if an auto-commit fired, its hash.
    pub fn add_observation(
        &mut self,
        tool_name: &str,
        arguments: Value,
        result: Option<String>,
        author: Author,
    ) -> Result<(String, Option<String>), SessionError> {
        if !matches!(self.session.as_ref().map(|s| s.status), Some(SessionStatus::Active)) {
            self.start_session(None)?;
        }

        let timestamp = now();
        let obs_id: String = memvcs_objects::sha256_hex(format!("{timestamp}{tool_name}{arguments}").as_bytes())
            .chars()
            .take(12)
            .collect();
        let topic = self.classifier.classify(tool_name, &arguments);
        let memory_type = infer_memory_type(tool_name).to_string();

        let observation = Observation {
            id: obs_id.clone(),
            timestamp: timestamp.clone(),
            tool_name: tool_name.to_string(),
            arguments,
            result,
            topic: Some(topic.clone()),
            memory_type,
        };

        let session = self.session.as_mut().expect("session started above");
        session.observations.push(observation);
        session.last_activity = Some(timestamp);
        session.topics.entry(topic).or_default().push(obs_id.clone());
        self.save()?;

        let commit_hash = if self.should_commit() { self.commit_session(author)? } else { None };
        Ok((obs_id, commit_hash))
    }

    fn should_commit(&self) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let obs_count = session.observations.len();
        if obs_count >= self.config.max_observations_per_commit {
            return true;
        }
        if obs_count >= self.config.min_observations_for_commit {
            let last = session.last_activity.as_deref().unwrap_or(&session.started_at);
            if let Ok(last_dt) = chrono::DateTime::parse_from_rfc3339(last) {
                let elapsed = (chrono::Utc::now() - last_dt.with_timezone(&chrono::Utc)).num_seconds();
                if elapsed >= self.config.commit_interval_seconds {
                    return true;
                }
            }
        }
        false
    }

    /// Force-commit whatever is currently buffered, regardless of the
    /// auto-commit thresholds.
    pub fn commit_now(&mut self, author: Author) -> Result<Option<String>, SessionError> {
        if self.session.as_ref().map(|s| s.observations.is_empty()).unwrap_or(true) {
            return Ok(None);
        }
        self.commit_session(author)
    }

    fn commit_session(&mut self, author: Author) -> Result<Option<String>, SessionError> {
        let Some(session) = &self.session else {
            return Ok(None);
        };
        if session.observations.is_empty() {
            return Ok(None);
        }
        let content = render_session_summary(session);
        let path = format!("episodic/sessions/session-{}.md", session.id);
        self.repo.work_storage().write(&path, content.as_bytes())?;
        self.repo.add(&path)?;

        let message = commit_message(session);
        let mut metadata = BTreeMap::new();
        metadata.insert("session_id".to_string(), Value::String(session.id.clone()));
        metadata.insert(
            "observation_count".to_string(),
            Value::from(session.observations.len()),
        );
        let commit_hash = self.repo.commit(&message, author, metadata)?;

        let session = self.session.as_mut().expect("checked above");
        session.commit_count += 1;
        session.observations.clear();
        session.topics.clear();
        let session_id = session.id.clone();
        self.save()?;
        info!(session_id = %session_id, commit_hash = ?commit_hash, "session batch committed");
        Ok(commit_hash)
    }

    pub fn status(&self) -> SessionStatusReport {
        match &self.session {
            None => SessionStatusReport {
                active: false,
                session_id: None,
                status: None,
                started_at: None,
                observation_count: 0,
                topics: Vec::new(),
                commit_count: 0,
                last_activity: None,
            },
            Some(session) => SessionStatusReport {
                active: session.status == SessionStatus::Active,
                session_id: Some(session.id.clone()),
                status: Some(session.status),
                started_at: Some(session.started_at.clone()),
                observation_count: session.observations.len(),
                topics: session.topics.keys().cloned().collect(),
                commit_count: session.commit_count,
                last_activity: session.last_activity.clone(),
            },
        }
    }
}

fn commit_message(session: &Session) -> String {
    let obs_count = session.observations.len();
    let topics: Vec<&String> = session.topics.keys().collect();
    match topics.len() {
        0 => format!("Session: {obs_count} observations"),
        1 => format!("Session: {obs_count} observations ({})", topics[0]),
        2..=3 => {
            let joined = topics.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ");
            format!("Session: {obs_count} observations ({joined})")
        }
        n => format!("Session: {obs_count} observations across {n} topics"),
    }
}

fn render_session_summary(session: &Session) -> String {
    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&format!("session_id: \"{}\"\n", session.id));
    out.push_str(&format!("started_at: \"{}\"\n", session.started_at));
    out.push_str(&format!("observation_count: {}\n", session.observations.len()));
    let topics: Vec<&str> = session.topics.keys().map(|s| s.as_str()).collect();
    out.push_str(&format!("topics: [{}]\n", topics.join(", ")));
    out.push_str("---\n\n");
    out.push_str(&format!("# Session {}\n\n", session.id));

    if let Some(context) = &session.project_context {
        out.push_str(&format!("**Context:** {context}\n\n"));
    }

    if !session.topics.is_empty() {
        out.push_str("## Activity by Topic\n\n");
        for (topic, ids) in &session.topics {
            out.push_str(&format!("### {}\n", title_case(topic)));
            let topic_obs: Vec<&Observation> = session
                .observations
                .iter()
                .filter(|o| ids.contains(&o.id))
                .collect();
            for obs in topic_obs.iter().take(5) {
                out.push_str(&format!("- [{}] `{}`\n", time_of_day(&obs.timestamp), obs.tool_name));
            }
            if topic_obs.len() > 5 {
                out.push_str(&format!("- ... and {} more\n", topic_obs.len() - 5));
            }
            out.push('\n');
        }
    }

    out.push_str("## Timeline\n\n");
    let start = session.observations.len().saturating_sub(10);
    for obs in &session.observations[start..] {
        let args_str: String = obs.arguments.to_string().chars().take(80).collect();
        out.push_str(&format!(
            "- [{}] `{}`: {args_str}\n",
            time_of_day(&obs.timestamp),
            obs.tool_name
        ));
    }
    out
}

fn time_of_day(timestamp: &str) -> String {
    timestamp
        .split('T')
        .nth(1)
        .map(|s| s.chars().take(8).collect())
        .unwrap_or_default()
}

fn title_case(topic: &str) -> String {
    topic
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use memvcs_storage::LocalStorageAdapter;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn author() -> Author {
        Author {
            name: "agent".to_string(),
            email: "agent@example.com".to_string(),
        }
    }

    fn repo() -> (tempfile::TempDir, tempfile::TempDir, Repository) {
        let meta_dir = tempdir().unwrap();
        let work_dir = tempdir().unwrap();
        let meta: Arc<dyn memvcs_storage::StorageAdapter> =
            Arc::new(LocalStorageAdapter::new(meta_dir.path()).unwrap());
        let work: Arc<dyn memvcs_storage::StorageAdapter> =
            Arc::new(LocalStorageAdapter::new(work_dir.path()).unwrap());
        let repository = Repository::init(meta, work, "main").unwrap();
        (meta_dir, work_dir, repository)
    }

    #[test]
    fn add_observation_auto_starts_and_classifies() {
        let (_m, _w, repo) = repo();
        let mut manager = SessionManager::new(&repo, SessionConfig::default()).unwrap();
        let (id, commit) = manager
            .add_observation("git_commit", serde_json::json!({}), None, author())
            .unwrap();
        assert!(!id.is_empty());
        assert!(commit.is_none());
        assert_eq!(manager.status().observation_count, 1);
        assert_eq!(manager.status().topics, vec!["git_operations".to_string()]);
    }

    #[test]
    fn buffer_full_triggers_auto_commit() {
        let (_m, _w, repo) = repo();
        let mut config = SessionConfig::default();
        config.max_observations_per_commit = 3;
        let mut manager = SessionManager::new(&repo, config).unwrap();

        let mut last_commit = None;
        for i in 0..3 {
            let (_, commit) = manager
                .add_observation(&format!("write_file_{i}"), serde_json::json!({}), None, author())
                .unwrap();
            last_commit = commit.or(last_commit);
        }
        assert!(last_commit.is_some());
        assert_eq!(manager.status().observation_count, 0);
        assert_eq!(manager.status().commit_count, 1);
    }

    #[test]
    fn end_session_commits_remaining_observations() {
        let (_m, _w, repo) = repo();
        let mut manager = SessionManager::new(&repo, SessionConfig::default()).unwrap();
        manager
            .add_observation("search_docs", serde_json::json!({"q": "rust"}), None, author())
            .unwrap();
        let hash = manager.end_session(true, author()).unwrap();
        assert!(hash.is_some());
        assert_eq!(manager.status().active, false);
    }

    #[test]
    fn discard_clears_session_without_committing() {
        let (_m, _w, repo) = repo();
        let mut manager = SessionManager::new(&repo, SessionConfig::default()).unwrap();
        manager
            .add_observation("debug_issue", serde_json::json!({}), None, author())
            .unwrap();
        manager.discard_session().unwrap();
        assert!(manager.session().is_none());

        let reloaded = SessionManager::new(&repo, SessionConfig::default()).unwrap();
        assert!(reloaded.session().is_none());
    }

    #[test]
    fn pause_and_resume_round_trip() {
        let (_m, _w, repo) = repo();
        let mut manager = SessionManager::new(&repo, SessionConfig::default()).unwrap();
        manager.start_session(None).unwrap();
        manager.pause_session().unwrap();
        assert!(!manager.status().active);
        let resumed = manager.resume_session().unwrap();
        assert!(resumed.is_some());
        assert!(manager.status().active);
    }
}
