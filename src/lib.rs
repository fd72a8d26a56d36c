//! SPIN/TWIST コンバータ用 2レートスケジューラとパワーステージ起動シーケンス
//!
//! 固定周期のクリティカルタスクが最初のtickでパワーステージを起動し、以降は
//! 制御則を実行します。自己ペースのバックグラウンドタスクが状態表示を担当します。
//! ハードウェアは検証済みの [`config::HardwareConfig`] で一度だけ設定され、
//! その後でなければタスクを登録できません。
//!
//! [`hardware::stm32`] と [`scheduler::embassy`] 以外はターゲット非依存で、
//! ホストでは [`sim`] が仮想クロック上でタスクを駆動します。

#![cfg_attr(not(test), no_std)]

mod fmt;

pub mod config;
pub mod error;
pub mod hardware;
pub mod power_stage;
pub mod scheduler;
pub mod sim;
pub mod tasks;
