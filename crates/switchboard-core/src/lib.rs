//! switchboard-core
//!
//! Core building blocks for the switchboard lead router.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, queue_type, priority, score, worklist, callback, transition, errors）
//! - **ports**: 抽象化レイヤー（RouterStore, EligibilitySource, ConversionLedger, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（scoring, generator, dispatch, callbacks, audit, jobs, Router）
//! - **impls**: 実装（InMemoryStore など開発用）
//! - **config**: 設定ツリー（JSON から読み込み）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use self::app::{BuildError, Router, RouterBuilder};
pub use self::config::RouterConfig;
pub use self::domain::{Result, RouterError};
