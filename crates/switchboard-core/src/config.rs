//! Router configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Durations are plain integers with the unit in the field name.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::RouterError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub scoring: ScoringConfig,
    pub generator: GeneratorConfig,
    pub dispatch: DispatchConfig,
    pub callbacks: CallbackConfig,
    pub leaks: LeakConfig,
    pub health: HealthConfig,
    pub retention: RetentionConfig,
    pub retry: RetryConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Leads per rescoring batch.
    pub batch_size: usize,
    /// Penalty added per consecutive failed attempt (multiplied by the streak).
    pub failure_step: i64,
    pub max_outcome_penalty: i64,
    /// Share of the outcome penalty kept after a successful contact (0 = full reset).
    pub success_retention_pct: u8,
    pub aging_interval_secs: u64,
    /// Points subtracted from the time penalty per elapsed aging interval.
    pub aging_step: i64,
    /// Floor for the time penalty.
    pub min_time_penalty: i64,
    pub max_duration_secs: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            failure_step: 10,
            max_outcome_penalty: 1_000,
            success_retention_pct: 0,
            aging_interval_secs: 15 * 60,
            aging_step: 1,
            min_time_penalty: -500,
            max_duration_secs: 240,
        }
    }
}

impl ScoringConfig {
    pub fn aging_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.aging_interval_secs as i64)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Top-N kept pending per queue type.
    pub worklist_size: usize,
    pub page_size: usize,
    pub lease_ttl_secs: u64,
    pub max_duration_secs: u64,
    pub checkpoint_max_age_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            worklist_size: 100,
            page_size: 50,
            lease_ttl_secs: 300,
            max_duration_secs: 120,
            checkpoint_max_age_secs: 900,
        }
    }
}

impl GeneratorConfig {
    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_ttl_secs as i64)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    pub fn checkpoint_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.checkpoint_max_age_secs as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Drifted candidates skipped before giving up on a request.
    pub max_skips: usize,
    /// Claim conflicts tolerated before giving up on a request.
    pub max_claim_attempts: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_skips: 10,
            max_claim_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub min_snooze_minutes: u32,
    pub max_snooze_minutes: u32,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            min_snooze_minutes: 5,
            max_snooze_minutes: 7 * 24 * 60,
        }
    }
}

impl CallbackConfig {
    /// Out-of-range durations are clamped, never rejected.
    pub fn clamp_snooze(&self, minutes: i64) -> chrono::Duration {
        let clamped = minutes.clamp(self.min_snooze_minutes as i64, self.max_snooze_minutes as i64);
        chrono::Duration::minutes(clamped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeakConfig {
    /// Half-width of the conversion matching window.
    pub window_secs: u64,
    /// How far back unreconciled exits are examined.
    pub lookback_hours: u32,
}

impl Default for LeakConfig {
    fn default() -> Self {
        Self {
            window_secs: 5 * 60,
            lookback_hours: 72,
        }
    }
}

impl LeakConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// An assignment older than this counts as orphaned.
    pub orphan_after_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            orphan_after_secs: 2 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub entry_days: u32,
    pub transition_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            entry_days: 30,
            transition_days: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 200,
            multiplier: 2.0,
            max_attempts: 3,
        }
    }
}

/// Intervals of the periodic jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub scoring_every_secs: u64,
    pub refresh_every_secs: u64,
    pub callbacks_every_secs: u64,
    pub leak_scan_every_secs: u64,
    pub retention_every_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scoring_every_secs: 300,
            refresh_every_secs: 60,
            callbacks_every_secs: 30,
            leak_scan_every_secs: 600,
            retention_every_secs: 6 * 60 * 60,
        }
    }
}

impl RouterConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, RouterError> {
        let config: RouterConfig =
            serde_json::from_str(raw).map_err(|e| RouterError::Config(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RouterError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RouterError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Rejects values no deployment could mean.
    pub fn validate(&self) -> Result<(), RouterError> {
        let mut problems = Vec::new();
        if self.scoring.batch_size == 0 {
            problems.push("scoring.batch_size must be > 0");
        }
        if self.scoring.aging_interval_secs == 0 {
            problems.push("scoring.aging_interval_secs must be > 0");
        }
        if self.scoring.failure_step <= 0 {
            problems.push("scoring.failure_step must be > 0");
        }
        if self.scoring.min_time_penalty > 0 {
            problems.push("scoring.min_time_penalty must be <= 0");
        }
        if self.scoring.success_retention_pct > 100 {
            problems.push("scoring.success_retention_pct must be <= 100");
        }
        if self.generator.worklist_size == 0 {
            problems.push("generator.worklist_size must be > 0");
        }
        if self.generator.page_size == 0 {
            problems.push("generator.page_size must be > 0");
        }
        if self.dispatch.max_claim_attempts == 0 {
            problems.push("dispatch.max_claim_attempts must be > 0");
        }
        if self.callbacks.min_snooze_minutes > self.callbacks.max_snooze_minutes {
            problems.push("callbacks.min_snooze_minutes must be <= max_snooze_minutes");
        }
        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be > 0");
        }
        if self.retry.multiplier < 1.0 {
            problems.push("retry.multiplier must be >= 1.0");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(RouterError::Config(problems.join("; ")))
        }
    }
}
