//! ConversionLedger port - 成約イベントの外部台帳（読み取り専用）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ConversionEvent, Result};

#[async_trait]
pub trait ConversionLedger: Send + Sync {
    /// Conversions with `since <= converted_at <= until`, oldest first.
    async fn list_conversions(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<ConversionEvent>>;
}
