//! Errors - エラー型と分類
//!
//! 競合（claim conflict）、空のワークリスト、eligibility drift はエラーではなく
//! 戻り値で表現する。ここに入るのは本当に失敗したケースだけ。

use thiserror::Error;

use super::ids::{CallbackId, EntryId, LeadId};
use super::queue_type::QueueType;

/// ErrorKind は実行エラーの運用分類
///
/// - Transient: 一時的なエラー（backoff 付きでリトライ）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: ストレージ障害（呼び出し元へ hard failure として返す）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("eligibility source unavailable: {0}")]
    EligibilityUnavailable(String),

    #[error("conversion ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("worklist entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("callback not found: {0}")]
    CallbackNotFound(CallbackId),

    #[error("invalid transition for {entry_id}: {from} -> {to}")]
    InvalidTransition {
        entry_id: EntryId,
        from: &'static str,
        to: &'static str,
    },

    #[error("callback {0} is not pending")]
    CallbackNotPending(CallbackId),

    #[error("queue type '{0}' has no worklist")]
    InvalidQueueType(QueueType),

    #[error("lead {0} belongs to no queue type")]
    UnroutableLead(LeadId),

    #[error("score record for {0} kept changing under concurrent writers")]
    ConcurrentUpdate(LeadId),

    #[error("configuration error: {0}")]
    Config(String),
}

impl RouterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::EligibilityUnavailable(_)
            | RouterError::LedgerUnavailable(_)
            | RouterError::ConcurrentUpdate(_) => ErrorKind::Transient,
            RouterError::StorageUnavailable(_) => ErrorKind::Infrastructure,
            RouterError::EntryNotFound(_)
            | RouterError::CallbackNotFound(_)
            | RouterError::InvalidTransition { .. }
            | RouterError::CallbackNotPending(_)
            | RouterError::InvalidQueueType(_)
            | RouterError::UnroutableLead(_)
            | RouterError::Config(_) => ErrorKind::Permanent,
        }
    }

    /// Worth retrying with backoff. Storage outages are retried at the batch level too.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Infrastructure)
    }
}

pub type Result<T, E = RouterError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_outages_are_transient() {
        assert_eq!(
            RouterError::EligibilityUnavailable("timeout".into()).kind(),
            ErrorKind::Transient
        );
        assert!(RouterError::LedgerUnavailable("503".into()).is_transient());
    }

    #[test]
    fn storage_outage_is_infrastructure() {
        let err = RouterError::StorageUnavailable("connection refused".into());
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert!(err.is_transient());
    }

    #[test]
    fn config_errors_are_permanent() {
        let err = RouterError::Config("bad".into());
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "configuration error: bad");
    }
}
