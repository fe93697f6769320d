//! Typed - 型付き Activity API
//!
//! activity 名の typo を型で排除し、Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Activity` trait, `Handler<A>` trait - 型安全
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure
//!
//! `ActivityRegistry` はそのまま `ActivityExecutor` として proxy に渡せます。

pub mod activity;
pub mod handler;
pub mod registry;

pub use self::activity::Activity;
pub use self::handler::{ActivityContext, DynHandler, Handler};
pub use self::registry::{ActivityRegistry, RegistryError};
