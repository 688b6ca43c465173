//! Session-scoped observation buffering with topic classification and
//! threshold-triggered auto-commit into a [`memvcs_repo::Repository`].

pub mod manager;
pub mod model;
pub mod topic;

pub use manager::{SessionError, SessionManager};
pub use model::{Observation, Session, SessionConfig, SessionStatus, SessionStatusReport};
pub use topic::{infer_memory_type, TopicClassifier, TOPICS};
