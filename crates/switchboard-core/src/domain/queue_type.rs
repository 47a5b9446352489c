//! QueueType and the classification rule.
//!
//! `classify` is the only place that turns eligibility facts into a queue type.
//! The scoring engine, the pre-dispatch validator and the backfill tool all call it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named segment a lead is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    /// No valid signature on file.
    Unsigned,

    /// Signed, but at least one requirement is still outstanding.
    OutstandingRequirements,

    /// Outside every queue.
    None,
}

impl QueueType {
    /// Queue types that own a worklist.
    pub const ROUTABLE: [QueueType; 2] = [QueueType::Unsigned, QueueType::OutstandingRequirements];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueType::Unsigned => "unsigned",
            QueueType::OutstandingRequirements => "outstanding_requirements",
            QueueType::None => "none",
        }
    }

    pub fn is_routable(self) -> bool {
        !matches!(self, QueueType::None)
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown queue type '{0}'")]
pub struct ParseQueueTypeError(pub String);

impl FromStr for QueueType {
    type Err = ParseQueueTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsigned" => Ok(QueueType::Unsigned),
            "outstanding_requirements" => Ok(QueueType::OutstandingRequirements),
            "none" => Ok(QueueType::None),
            other => Err(ParseQueueTypeError(other.to_string())),
        }
    }
}

/// Live facts about a lead, read from the eligibility source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EligibilityFacts {
    pub has_signature: bool,
    pub outstanding_requirement_count: u32,
}

impl EligibilityFacts {
    pub fn new(has_signature: bool, outstanding_requirement_count: u32) -> Self {
        Self {
            has_signature,
            outstanding_requirement_count,
        }
    }
}

/// Facts → queue type.
pub fn classify(facts: &EligibilityFacts) -> QueueType {
    if !facts.has_signature {
        QueueType::Unsigned
    } else if facts.outstanding_requirement_count > 0 {
        QueueType::OutstandingRequirements
    } else {
        QueueType::None
    }
}
