//! Priority domain.
//!
//! Lower sorts first. Manual overrides live in their own variant, so they sort
//! ahead of every scored value without relying on a sentinel number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Worklist ordering key.
///
/// Variant order matters: the derived `Ord` compares the variant first, so any
/// `Override` is less than any `Scored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Priority {
    /// Operator override; earlier overrides go first.
    Override { issued_at: DateTime<Utc> },

    /// Organic score copied from the score record.
    Scored(i64),
}

impl Priority {
    pub fn is_override(&self) -> bool {
        matches!(self, Priority::Override { .. })
    }

    pub fn score(&self) -> Option<i64> {
        match self {
            Priority::Scored(score) => Some(*score),
            Priority::Override { .. } => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Override { issued_at } => write!(f, "override@{}", issued_at.to_rfc3339()),
            Priority::Scored(score) => write!(f, "{score}"),
        }
    }
}
