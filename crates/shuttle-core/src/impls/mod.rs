//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryStateService**: プロセス内の State Service
//!
//! 永続化バックエンド（PostgreSQL など）は `StateService` を実装する別クレートに置く想定。

pub mod inmem_state;

pub use self::inmem_state::InMemoryStateService;
