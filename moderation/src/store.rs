//! The moderation-state store: per-author strikes, sessions, transcripts.
//!
//! All per-author state lives behind one mutex in this store; handlers hold
//! an `Arc` to it and never touch ambient module state. Each operation is a
//! single locked section, so the invariants hold at every observation point:
//!
//! - the strike counter is always in {0,1,2} (the threshold value is reset
//!   away inside the same locked section that reaches it);
//! - a session and its transcript exist together or not at all;
//! - a transcript never exceeds [`TRANSCRIPT_CAPACITY`] entries.
//!
//! The guard is never held across an await point. A full support turn
//! (append user turn, await the backend, append the reply) is therefore two
//! separate locked sections, and two rapid turns from the same author may
//! interleave their appends out of submission order.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use crate::session::{SessionPhase, Transcript, TranscriptRole, TransitionRecord};
use crate::TRANSCRIPT_CAPACITY;

/// Strikes needed to trigger escalation into a support session.
pub const STRIKE_THRESHOLD: u8 = 3;

/// Lifecycle transitions retained for diagnostics.
const TRANSITION_LOG_CAPACITY: usize = 64;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("moderation store lock poisoned")]
    LockPoisoned,

    #[error("no active session for author {0}")]
    NoActiveSession(String),

    #[error("illegal session transition: {from} → {to}")]
    IllegalTransition { from: SessionPhase, to: SessionPhase },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of recording one violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrikeOutcome {
    /// Strike recorded below the threshold.
    Warned { count: u8 },
    /// Third strike: the counter has already been reset to zero and the
    /// caller should offer a private support session.
    Escalate,
}

impl StrikeOutcome {
    /// The count to show in the public warning (always out of 3).
    pub fn warning_count(&self) -> u8 {
        match self {
            Self::Warned { count } => *count,
            Self::Escalate => STRIKE_THRESHOLD,
        }
    }
}

/// Per-author moderation state.
///
/// `transcript` doubles as the session flag: `Some` means an active session
/// (joint lifecycle with its transcript), `None` means no session.
#[derive(Debug, Default)]
struct AuthorState {
    strikes: u8,
    transcript: Option<Transcript>,
}

impl AuthorState {
    fn phase(&self) -> SessionPhase {
        if self.transcript.is_some() {
            SessionPhase::Active
        } else {
            SessionPhase::NoSession
        }
    }
}

#[derive(Default)]
struct Inner {
    authors: HashMap<String, AuthorState>,
    transitions: Vec<TransitionRecord>,
}

/// The moderation-state store.
pub struct ModerationStore {
    inner: Mutex<Inner>,
}

impl ModerationStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Record one violation for the author.
    ///
    /// Increments the counter (created lazily at zero) and, when the
    /// increment reaches [`STRIKE_THRESHOLD`], resets it to zero in the same
    /// locked section and reports [`StrikeOutcome::Escalate`].
    pub fn record_strike(&self, author: &str) -> StoreResult<StrikeOutcome> {
        let mut inner = self.lock()?;
        let state = inner.authors.entry(author.to_string()).or_default();
        let count = state.strikes + 1;
        if count >= STRIKE_THRESHOLD {
            state.strikes = 0;
            debug!(author, "Strike threshold reached, counter reset");
            Ok(StrikeOutcome::Escalate)
        } else {
            state.strikes = count;
            debug!(author, count, "Strike recorded");
            Ok(StrikeOutcome::Warned { count })
        }
    }

    /// Current strike count (zero if the author has no record).
    pub fn strike_count(&self, author: &str) -> StoreResult<u8> {
        let inner = self.lock()?;
        Ok(inner.authors.get(author).map(|s| s.strikes).unwrap_or(0))
    }

    /// Whether the author has an active support session.
    pub fn in_session(&self, author: &str) -> StoreResult<bool> {
        Ok(self.session_phase(author)? == SessionPhase::Active)
    }

    /// The author's current lifecycle phase.
    pub fn session_phase(&self, author: &str) -> StoreResult<SessionPhase> {
        let inner = self.lock()?;
        Ok(inner
            .authors
            .get(author)
            .map(AuthorState::phase)
            .unwrap_or(SessionPhase::NoSession))
    }

    /// Open a support session with an empty transcript.
    ///
    /// Called after the private invitation was delivered. Reopening while a
    /// session is already active replaces its transcript with a fresh one.
    pub fn open_session(&self, author: &str) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let state = inner.authors.entry(author.to_string()).or_default();
        let from = state.phase();
        Self::check_transition(from, SessionPhase::Active)?;
        state.transcript = Some(Transcript::new());
        Self::record_transition(
            &mut inner,
            author,
            from,
            SessionPhase::Active,
            "invitation delivered",
        );
        Ok(())
    }

    /// Close the author's session, destroying the transcript with it.
    ///
    /// Returns `true` if a session existed. Closing an absent session is a
    /// no-op rather than an error: the exit command always wins.
    pub fn close_session(&self, author: &str) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        let existed = match inner.authors.get_mut(author) {
            Some(state) => state.transcript.take().is_some(),
            None => false,
        };
        if existed {
            Self::record_transition(
                &mut inner,
                author,
                SessionPhase::Active,
                SessionPhase::NoSession,
                "exit command",
            );
        }
        Ok(existed)
    }

    /// Append a user turn to the active session's transcript and return the
    /// composed backend prompt.
    pub fn append_user_turn(&self, author: &str, content: &str) -> StoreResult<String> {
        self.append_turn(author, TranscriptRole::User, content)
            .map(|t| t.compose_prompt())
    }

    /// Append a generated reply to the active session's transcript.
    pub fn append_reply(&self, author: &str, reply: &str) -> StoreResult<()> {
        self.append_turn(author, TranscriptRole::Therapist, reply)
            .map(|_| ())
    }

    /// Snapshot of the active session's transcript entries.
    pub fn transcript(&self, author: &str) -> StoreResult<Vec<String>> {
        let inner = self.lock()?;
        let transcript = inner
            .authors
            .get(author)
            .and_then(|s| s.transcript.as_ref())
            .ok_or_else(|| StoreError::NoActiveSession(author.to_string()))?;
        Ok(transcript.entries().to_vec())
    }

    /// Recent lifecycle transitions, oldest first.
    pub fn recent_transitions(&self) -> StoreResult<Vec<TransitionRecord>> {
        Ok(self.lock()?.transitions.clone())
    }

    fn append_turn(
        &self,
        author: &str,
        role: TranscriptRole,
        content: &str,
    ) -> StoreResult<Transcript> {
        let mut inner = self.lock()?;
        let transcript = inner
            .authors
            .get_mut(author)
            .and_then(|s| s.transcript.as_mut())
            .ok_or_else(|| StoreError::NoActiveSession(author.to_string()))?;
        transcript.push(role, content);
        debug_assert!(transcript.len() <= TRANSCRIPT_CAPACITY);
        Ok(transcript.clone())
    }

    fn check_transition(from: SessionPhase, to: SessionPhase) -> StoreResult<()> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(StoreError::IllegalTransition { from, to })
        }
    }

    fn record_transition(
        inner: &mut Inner,
        author: &str,
        from: SessionPhase,
        to: SessionPhase,
        reason: &str,
    ) {
        debug!(author, %from, %to, reason, "Session transition");
        inner.transitions.push(TransitionRecord {
            author: author.to_string(),
            from,
            to,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        if inner.transitions.len() > TRANSITION_LOG_CAPACITY {
            inner.transitions.remove(0);
        }
    }
}

impl Default for ModerationStore {
    fn default() -> Self {
        Self::new()
    }
}
