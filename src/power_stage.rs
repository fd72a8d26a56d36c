//! パワーステージ起動シーケンス
//!
//! パワーステージはクリティカルタスクが所有します。最初のクリティカルtickで
//! 一度だけ起動し、通常動作中 `enabled` 状態は単調です。起動指令が成功して
//! 初めて `Enabled` に遷移し、失敗した場合は `Faulted` をラッチして再試行しません。

use crate::error::PowerStageError;
use crate::hardware::PowerHardware;

/// パワーステージ状態遷移
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum PowerStageState {
    /// 未起動
    Disabled,
    /// 起動指令成功、レグはスイッチング中
    Enabled,
    /// 起動指令失敗、再試行しない
    Faulted(PowerStageError),
    /// 明示的なエスカレーション（オーバーランポリシー等）で停止
    Tripped,
}

impl PowerStageState {
    pub fn is_enabled(&self) -> bool {
        matches!(self, PowerStageState::Enabled)
    }
}

/// [`PowerStage::ensure_enabled`] 1回分の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum EnableOutcome {
    /// この呼び出しで起動指令を発行し成功した
    Started,
    /// 起動済み、指令なし
    AlreadyEnabled,
    /// この呼び出しで起動指令を発行し失敗した
    Failed(PowerStageError),
    /// フォールトまたはトリップ済み、指令なし
    Inhibited,
}

/// パワーステージ状態の唯一の書き込み元
#[derive(Debug)]
pub struct PowerStage {
    state: PowerStageState,
}

impl PowerStage {
    pub const fn new() -> Self {
        Self {
            state: PowerStageState::Disabled,
        }
    }

    pub fn state(&self) -> PowerStageState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    /// 未起動の場合のみ起動指令を発行
    ///
    /// クリティカルタスクからのみ呼び出すこと。判定と遷移は
    /// プリエンプトされない1tick内で行われる。
    pub fn ensure_enabled<H: PowerHardware>(&mut self, hw: &mut H) -> EnableOutcome {
        match self.state {
            PowerStageState::Enabled => EnableOutcome::AlreadyEnabled,
            PowerStageState::Faulted(_) | PowerStageState::Tripped => EnableOutcome::Inhibited,
            PowerStageState::Disabled => match hw.start_all() {
                Ok(()) => {
                    self.state = PowerStageState::Enabled;
                    info!("Power stage enabled");
                    EnableOutcome::Started
                }
                Err(err) => {
                    self.state = PowerStageState::Faulted(err);
                    error!("Power stage start failed: {}", err);
                    EnableOutcome::Failed(err)
                }
            },
        }
    }

    /// パワーステージを停止してオフをラッチ
    ///
    /// 停止指令が失敗しても状態は `Tripped` になる。エラーは呼び出し元が
    /// 通知できるよう返す。
    pub fn trip<H: PowerHardware>(&mut self, hw: &mut H) -> Result<(), PowerStageError> {
        self.state = PowerStageState::Tripped;
        warn!("Power stage tripped");
        hw.stop_all()
    }
}

impl Default for PowerStage {
    fn default() -> Self {
        Self::new()
    }
}
