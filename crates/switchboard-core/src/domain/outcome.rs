//! Call outcome model: what the dispatch layer reports after a call.
//!
//! Only the classification matters to the core; the outcome feeds the scoring
//! engine's penalty bookkeeping.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// The lead was reached.
    Connected,
    NoAnswer,
    Busy,
    Voicemail,
    WrongNumber,
    Declined,
}

impl CallOutcome {
    pub fn is_successful(self) -> bool {
        matches!(self, CallOutcome::Connected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallOutcome::Connected => "connected",
            CallOutcome::NoAnswer => "no_answer",
            CallOutcome::Busy => "busy",
            CallOutcome::Voicemail => "voicemail",
            CallOutcome::WrongNumber => "wrong_number",
            CallOutcome::Declined => "declined",
        }
    }
}
