//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の in-memory 実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryStore**: RouterStore（1 呼び出し = 1 トランザクション）
//! - **StaticEligibilitySource**: 書き換え可能な eligibility の事実
//! - **InMemoryConversionLedger**: 成約イベント
//!
//! # 本番用実装
//! 本番用の RouterStore（トランザクショナルな DB）や外部システムのクライアントは
//! 別クレートに配置します。

pub mod inmem_conversions;
pub mod inmem_eligibility;
pub mod inmem_store;

pub use self::inmem_conversions::InMemoryConversionLedger;
pub use self::inmem_eligibility::StaticEligibilitySource;
pub use self::inmem_store::InMemoryStore;
