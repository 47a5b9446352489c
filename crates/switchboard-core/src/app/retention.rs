//! RetentionSweeper - 閉じた entry と古い transition の削除
//!
//! pending / assigned の entry には触れない。

use std::sync::Arc;

use serde::Serialize;

use crate::config::RetentionConfig;
use crate::domain::Result;
use crate::ports::{Clock, RouterStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub entries_purged: usize,
    pub transitions_purged: usize,
}

pub struct RetentionSweeper {
    store: Arc<dyn RouterStore>,
    clock: Arc<dyn Clock>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn RouterStore>, clock: Arc<dyn Clock>, config: RetentionConfig) -> Self {
        Self { store, clock, config }
    }

    pub async fn sweep(&self) -> Result<RetentionReport> {
        let now = self.clock.now();
        let entries_before = now - chrono::Duration::days(i64::from(self.config.entry_days));
        let transitions_before = now - chrono::Duration::days(i64::from(self.config.transition_days));

        let report = RetentionReport {
            entries_purged: self.store.purge_closed_entries(entries_before).await?,
            transitions_purged: self.store.purge_transitions(transitions_before).await?,
        };
        tracing::info!(
            entries_purged = report.entries_purged,
            transitions_purged = report.transitions_purged,
            "retention sweep finished"
        );
        Ok(report)
    }
}
