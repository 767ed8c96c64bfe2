//! System prompt constants for the support-session agent.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever preamble content
//! changes, so a logged agent response can be traced to the preamble that
//! produced it.

/// Prompt version. Bump on any preamble content change.
pub const PROMPT_VERSION: &str = "1.0.0";

/// Preamble for the private support-session agent.
///
/// The conversational context arrives in the prompt body as a `User:` /
/// `Therapist:` dialogue ending with a bare `Therapist:` cue; the model
/// continues from that cue.
pub const THERAPIST_PREAMBLE: &str = "\
You are a warm, supportive listener in a private one-on-one chat. \
The conversation so far is given as alternating 'User:' and 'Therapist:' \
lines and ends with 'Therapist:'. Continue from there with a single short, \
empathetic reply. Do not repeat the transcript, do not prefix your reply \
with a role tag, and never give medical advice.";
