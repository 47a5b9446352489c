//! RouterBuilder - Router の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use crate::app::router::Router;
use crate::config::RouterConfig;
use crate::domain::RouterError;
use crate::ports::{Clock, ConversionLedger, EligibilitySource, IdGenerator, RouterStore, SystemClock, UlidGenerator};

/// RouterBuilder は Router を構築
///
/// # 使用例
/// ```ignore
/// let router = RouterBuilder::new()
///     .config(config)
///     .store(store)
///     .eligibility(source)
///     .ledger(ledger)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - store / eligibility / ledger は必須。足りなければ build() が BuildError を返す
/// - config は build() 時に validate() する
/// - clock と id generator は省略時に SystemClock / UlidGenerator
#[derive(Default)]
pub struct RouterBuilder {
    config: RouterConfig,
    store: Option<Arc<dyn RouterStore>>,
    eligibility: Option<Arc<dyn EligibilitySource>>,
    ledger: Option<Arc<dyn ConversionLedger>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError は Router 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing ports: {0:?}. These ports must be provided before build().")]
    MissingPorts(Vec<&'static str>),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[source] RouterError),
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn RouterStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn eligibility(mut self, eligibility: Arc<dyn EligibilitySource>) -> Self {
        self.eligibility = Some(eligibility);
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn ConversionLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// # 検証
    /// - 必須の port が全部そろっているか（足りないものを全部列挙する）
    /// - config.validate()
    pub fn build(self) -> Result<Router, BuildError> {
        let mut missing = Vec::new();
        if self.store.is_none() {
            missing.push("store");
        }
        if self.eligibility.is_none() {
            missing.push("eligibility");
        }
        if self.ledger.is_none() {
            missing.push("ledger");
        }

        let (Some(store), Some(eligibility), Some(ledger)) = (self.store, self.eligibility, self.ledger) else {
            return Err(BuildError::MissingPorts(missing));
        };
        self.config.validate().map_err(BuildError::InvalidConfig)?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(clock.clone())),
        };
        Ok(Router::assemble(self.config, store, eligibility, ledger, clock, ids))
    }
}
