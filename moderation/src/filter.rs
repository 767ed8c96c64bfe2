//! Profanity pattern table and message classification.
//!
//! Each blocked word carries an obfuscation-tolerant pattern: any letter
//! after the first may be replaced by the masking symbol `*`, so `f*ck` and
//! `fu*k` match alongside the literal word. Patterns are anchored on word
//! boundaries and matched case-insensitively. Classification short-circuits
//! on the first hit; which entry matched is not observable to callers.

use std::sync::LazyLock;

use regex::Regex;

/// A blocked word and its compiled obfuscation-tolerant pattern.
#[derive(Debug)]
pub struct BlockedWord {
    /// The literal word this entry guards against.
    pub word: &'static str,
    /// Pattern allowing `*` in place of letters after the first.
    pub pattern: Regex,
}

/// The fixed table of blocked words.
static BLOCKED_WORDS: LazyLock<Vec<BlockedWord>> = LazyLock::new(|| {
    vec![
        entry("fuck", r"\bf[u*][c*][k*]\b"),
        entry("sex", r"\bs[e*][x*][y*]?\b"),
        entry(
            "motherfucker",
            r"\bm[o*][t*][h*][e*][r*][f*][u*][c*][k*][e*][r*]\b",
        ),
        entry("shit", r"\bs[h*][i*][t*]\b"),
    ]
});

fn entry(word: &'static str, pattern: &str) -> BlockedWord {
    BlockedWord {
        word,
        pattern: Regex::new(&format!("(?i){pattern}")).unwrap(),
    }
}

/// The fixed pattern set used by the moderation filter.
///
/// A thin handle over the static table; cheap to construct and copy around.
#[derive(Debug, Clone, Copy)]
pub struct PatternSet {
    entries: &'static [BlockedWord],
}

impl PatternSet {
    /// The standard pattern set.
    pub fn standard() -> Self {
        Self {
            entries: BLOCKED_WORDS.as_slice(),
        }
    }

    /// Whether any blocked-word pattern matches the given content.
    ///
    /// Callers pass lowercased content; the patterns are case-insensitive
    /// regardless.
    pub fn is_match(&self, content: &str) -> bool {
        self.entries.iter().any(|e| e.pattern.is_match(content))
    }

    /// The table entries, in evaluation order.
    pub fn entries(&self) -> &'static [BlockedWord] {
        self.entries
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self::standard()
    }
}
