//! Generation job kinds.

use serde::{Deserialize, Serialize};

/// The two supported generation task kinds.
///
/// Quota is counted per kind, and at most one non-terminal job per
/// (owner, kind) may exist at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Single-image photo edit.
    Photo,
    /// Video "revive" animation generated from a source image.
    Video,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::Photo, JobKind::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Photo => "photo",
            JobKind::Video => "video",
        }
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
