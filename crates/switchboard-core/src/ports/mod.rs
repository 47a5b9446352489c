//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（状態ストア、eligibility の system-of-record、
//! 成約台帳）へのインターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - RouterStore が source of truth（正本）
//! - EligibilitySource と ConversionLedger は読み取り専用
//! - 時刻と ID は Clock / IdGenerator 経由（テストで固定できる）

pub mod clock;
pub mod conversion_ledger;
pub mod eligibility_source;
pub mod id_generator;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::conversion_ledger::ConversionLedger;
pub use self::eligibility_source::EligibilitySource;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::store::{
    CallCompletion, CallbackAccept, CallbackSnooze, CompletionOutcome, DriftRemoval, RouterStore, SaveOutcome,
    ScoreWrite, SnoozeReport, SwapReport, WorklistCounts, WorklistSwap,
};
