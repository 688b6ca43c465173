//! Confidence scoring with temporal decay and source-reliability tracking
//! for memories stored outside the raw commit graph.

pub mod calculator;
pub mod decay;
pub mod source;

pub use calculator::{ConfidenceCalculator, ConfidenceError, ConfidenceFactors, ConfidenceScore};
pub use decay::{DecayKind, DecayModel};
pub use source::{SourceError, SourceRecord, SourceTracker};
