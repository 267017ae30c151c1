use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Non-terminal progress report for a session.
///
/// Serialized with the phase under `status` so pollers see the same field
/// name the workflow engine used for its in-progress marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(rename = "status")]
    pub phase: String,
    pub message: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Terminal, authoritative outcome for a session. Consumed at most once.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalResult<P> {
    pub payload: P,
    pub observed_at: DateTime<Utc>,
}

/// A single delivery as classified by an integration.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry<P> {
    Status(StatusUpdate),
    Final(FinalResult<P>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Status,
    Final,
}

impl StatusUpdate {
    pub fn new(phase: impl Into<String>, message: Option<String>) -> Self {
        Self {
            phase: phase.into(),
            message,
            observed_at: Utc::now(),
        }
    }
}

impl<P> FinalResult<P> {
    pub fn new(payload: P) -> Self {
        Self {
            payload,
            observed_at: Utc::now(),
        }
    }
}

impl<P> Entry<P> {
    /// Status entry stamped with the current time.
    pub fn status(phase: impl Into<String>, message: Option<String>) -> Self {
        Entry::Status(StatusUpdate::new(phase, message))
    }

    /// Final entry stamped with the current time.
    pub fn final_result(payload: P) -> Self {
        Entry::Final(FinalResult::new(payload))
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Status(_) => EntryKind::Status,
            Entry::Final(_) => EntryKind::Final,
        }
    }

    /// Re-stamp the entry, used when replaying deliveries with a fixed clock.
    pub fn with_observed_at(mut self, observed_at: DateTime<Utc>) -> Self {
        match &mut self {
            Entry::Status(status) => status.observed_at = observed_at,
            Entry::Final(result) => result.observed_at = observed_at,
        }
        self
    }
}
