//! Moderation core for the warden chat bot.
//!
//! Everything deterministic lives here, with no I/O attached:
//! - `filter`: the fixed profanity pattern table and message classification
//! - `session`: bounded support-session transcripts and the per-author
//!   session lifecycle states
//! - `store`: the moderation-state store owning all per-author state
//!   (strike counters, sessions, transcripts)
//!
//! The runtime crate (`warden-bot`) wires this core into the chat gateway
//! and the generative-language backend.

pub mod filter;
pub mod session;
pub mod store;

pub use filter::PatternSet;
pub use session::{SessionPhase, Transcript, TranscriptRole, TransitionRecord, TRANSCRIPT_CAPACITY};
pub use store::{ModerationStore, StoreError, StoreResult, StrikeOutcome, STRIKE_THRESHOLD};
