//! タスク本体
//!
//! クリティカル制御タスクとハートビート（バックグラウンド）タスク。どちらも
//! ランタイム非依存で、ファームウェアではembassyタスクでラップします。

pub mod critical;
pub mod heartbeat;

pub use critical::{ControlLaw, CriticalControl, Idle, OverrunPolicy};
pub use heartbeat::Heartbeat;
