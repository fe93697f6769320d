//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（activity executor, 永続化ストア, 時計）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod executor;
pub mod id_generator;
pub mod state_service;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::executor::{ActivityExecutor, ActivityRequest, Heartbeat};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::state_service::StateService;
