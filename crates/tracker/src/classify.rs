//! Provider failure-text classification.
//!
//! The provider reports failures as free text only. Keyword matching stays
//! inside this one function so the heuristic never leaks into control flow
//! elsewhere; callers get a typed reason back.
//!
//! TODO: replace the keyword list with structured error codes once the
//! provider exposes them; "restricted" in an unrelated message would
//! currently misclassify.

use crate::record::FailureReason;

const CONTENT_POLICY_MARKERS: &[&str] = &[
    "sensitive",
    "flagged",
    "moderation",
    "content policy",
    "nsfw",
    "restricted",
    "e005",
];

/// Map a provider failure text onto the failure taxonomy.
pub fn classify_error(error_text: &str) -> FailureReason {
    let lowered = error_text.to_lowercase();
    if CONTENT_POLICY_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        FailureReason::ContentPolicy
    } else {
        FailureReason::Provider(error_text.to_string())
    }
}
