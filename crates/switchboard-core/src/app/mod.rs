//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **RouterBuilder**: Router の構築とワイヤリング
//! - **Router**: 外部に見せる唯一の表面
//! - **ScoringEngine**: スコアと queue 分類（run_cycle / backfill）
//! - **QueueGenerator**: top-N ワークリストの生成
//! - **PreDispatchValidator / Dispatcher**: 再確認と claim protocol
//! - **CallbackService**: callback / override
//! - **TransitionAudit / LeakDetector**: 監査ログと leak 検出
//! - **HealthMonitor / RetentionSweeper**: 運用
//! - **JobGroup**: 定期ジョブ

pub mod audit;
pub mod builder;
pub mod callbacks;
pub mod dispatch;
pub mod generator;
pub mod health;
pub mod jobs;
pub mod retention;
pub mod retry;
pub mod router;
pub mod scoring;

// 主要な型を再エクスポート
pub use self::audit::{LeakDetector, LeakScanReport, TransitionAudit};
pub use self::builder::{BuildError, RouterBuilder};
pub use self::callbacks::CallbackService;
pub use self::dispatch::{Assignment, CompletionAck, Dispatcher, PreDispatchValidator, ValidatedCandidate};
pub use self::generator::{QueueGenerator, RefreshReport, RefreshStatus};
pub use self::health::{HealthMonitor, QueueHealth};
pub use self::jobs::JobGroup;
pub use self::retention::{RetentionReport, RetentionSweeper};
pub use self::retry::{RetryPolicy, retry_transient};
pub use self::router::Router;
pub use self::scoring::{CycleReport, ItemFailure, RescoreReport, SCORING_JOB, ScoringEngine};
