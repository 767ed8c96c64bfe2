//! Support-session transcripts and the per-author session lifecycle.
//!
//! A session's transcript is a bounded sliding window of role-tagged turns:
//! at most [`TRANSCRIPT_CAPACITY`] entries, oldest evicted first. The whole
//! window is re-sent to the language backend on every turn, joined with
//! newlines and terminated by a `Therapist:` cue.
//!
//! The lifecycle itself is a two-state machine. Legal edges:
//!
//! ```text
//! NoSession → Active      (private invitation delivered)
//! Active    → NoSession   (exit command)
//! Active    → Active      (any other private message; transcript mutation)
//! ```
//!
//! There is no timeout-driven or count-driven transition.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum transcript entries retained per session.
pub const TRANSCRIPT_CAPACITY: usize = 10;

/// Speaker tag for one transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRole {
    User,
    Therapist,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Therapist => write!(f, "Therapist"),
        }
    }
}

/// Bounded recent-turn history for one support session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    entries: Vec<String>,
}

impl Transcript {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one turn, evicting the oldest entry beyond capacity.
    pub fn push(&mut self, role: TranscriptRole, content: &str) {
        self.entries.push(format!("{role}: {content}"));
        if self.entries.len() > TRANSCRIPT_CAPACITY {
            self.entries.remove(0);
        }
    }

    /// Compose the backend prompt: all entries joined by newlines, followed
    /// by the trailing therapist cue.
    pub fn compose_prompt(&self) -> String {
        let mut prompt = self.entries.join("\n");
        prompt.push_str("\nTherapist:");
        prompt
    }

    /// The retained entries, oldest first.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The per-author session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    NoSession,
    Active,
}

impl SessionPhase {
    /// Whether the edge from `self` to `next` is in the transition table.
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        matches!(
            (self, next),
            (Self::NoSession, Self::Active)
                | (Self::Active, Self::NoSession)
                | (Self::Active, Self::Active)
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSession => write!(f, "no_session"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// A recorded session-lifecycle transition, kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Author whose session transitioned.
    pub author: String,
    pub from: SessionPhase,
    pub to: SessionPhase,
    /// Why this transition happened.
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}
