//! State - エントリとコールバックの状態
//!
//! # Worklist entry の状態遷移
//! - pending → assigned → completed
//! - pending → removed（世代交代・drift・snooze・override）
//! - assigned → removed（callback override のみ）

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Assigned,
    Completed,
    Removed,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Assigned => "assigned",
            EntryStatus::Completed => "completed",
            EntryStatus::Removed => "removed",
        }
    }

    /// Counts toward the one-active-entry-per-lead invariant.
    pub fn is_active(self) -> bool {
        matches!(self, EntryStatus::Pending | EntryStatus::Assigned)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Pending,
    Accepted,
    Completed,
}

impl CallbackStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CallbackStatus::Pending => "pending",
            CallbackStatus::Accepted => "accepted",
            CallbackStatus::Completed => "completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_and_assigned_are_active() {
        assert!(EntryStatus::Pending.is_active());
        assert!(EntryStatus::Assigned.is_active());
        assert!(EntryStatus::Completed.is_terminal());
        assert!(EntryStatus::Removed.is_terminal());
    }
}
